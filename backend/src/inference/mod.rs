pub mod backends;
pub mod dispatcher;
pub mod generator;
pub mod prune;
pub mod registry;
pub mod tokenizer;
#[cfg(feature = "torch")]
pub mod torch;

use image::RgbImage;
use shared::BackendKind;

pub use dispatcher::Dispatcher;
pub use registry::BackendRegistry;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model error: {0}")]
    Model(String),
    #[cfg(feature = "torch")]
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// An image-to-text model together with its prompt and decoding conventions.
///
/// Implementations are driven from a single worker thread, so `generate`
/// takes `&mut self` and need not be thread-safe.
pub trait InferenceBackend: Send {
    fn kind(&self) -> BackendKind;

    fn prompt_template(&self) -> &str;

    fn generate(&mut self, image: &RgbImage, prompt: &str) -> Result<String, InferenceError>;
}
