pub mod acquirer;
pub mod preprocess;

pub use acquirer::{AcquireError, ImageAcquirer};
