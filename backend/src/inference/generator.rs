use crate::imaging::preprocess::PixelTensor;

use super::InferenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoding {
    Greedy,
    BeamSearch { num_beams: usize, early_stopping: bool },
}

/// Knobs handed to the model's generation loop.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub decoding: Decoding,
    /// Upper bound on tokens produced after the prompt.
    pub max_new_tokens: Option<usize>,
    /// Upper bound on the whole sequence, prompt included.
    pub max_length: Option<usize>,
    pub eos_token_id: i64,
    pub pad_token_id: i64,
    /// Token sequences that must never be produced.
    pub bad_words_ids: Vec<Vec<i64>>,
}

/// The raw vision-language model: pixels plus prompt ids in, token ids out.
///
/// The returned sequence starts with the prompt ids, as Hugging Face style
/// `generate` implementations do.
pub trait Generator: Send {
    fn generate(
        &mut self,
        pixels: &PixelTensor,
        input_ids: &[i64],
        params: &GenerationParams,
    ) -> Result<Vec<i64>, InferenceError>;
}
