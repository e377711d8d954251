use image::RgbImage;
use serde::Deserialize;
use shared::BackendKind;
use std::path::PathBuf;

use super::generator::{Decoding, GenerationParams, Generator};
use super::tokenizer::{SpecialTokens, Tokenizer};
use super::{InferenceBackend, InferenceError};
use crate::imaging::preprocess::{preprocess, PreprocessConfig};

pub const CHARTINSTRUCT_PROMPT: &str =
    "<image>\nBuatkan deskripsi dari grafik berikut ini secara lengkap dan informatif\nAnswer:";
pub const UNICHART_PROMPT: &str =
    "<opencqa> Buatkan deskripsi dari grafik berikut ini secara lengkap dan informatif <s_answer>";
pub const ANSWER_MARKER: &str = "<s_answer>";

#[derive(Debug, Clone, Deserialize)]
pub struct ChartInstructConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub image: PreprocessConfig,
    #[serde(default)]
    pub special_tokens: SpecialTokens,
    #[serde(default = "default_chartinstruct_prompt")]
    pub prompt: String,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniChartConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub image: PreprocessConfig,
    #[serde(default)]
    pub special_tokens: SpecialTokens,
    #[serde(default = "default_unichart_prompt")]
    pub prompt: String,
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

fn default_chartinstruct_prompt() -> String {
    CHARTINSTRUCT_PROMPT.to_string()
}

fn default_unichart_prompt() -> String {
    UNICHART_PROMPT.to_string()
}

fn default_max_new_tokens() -> usize {
    256
}

fn default_num_beams() -> usize {
    4
}

fn default_max_length() -> usize {
    512
}

/// LLaVA-style instruction model: free-form answer after the prompt.
pub struct ChartInstructBackend {
    generator: Box<dyn Generator>,
    tokenizer: Tokenizer,
    image: PreprocessConfig,
    prompt: String,
    max_new_tokens: usize,
}

impl ChartInstructBackend {
    pub fn new(generator: Box<dyn Generator>, tokenizer: Tokenizer, config: &ChartInstructConfig) -> Self {
        Self {
            generator,
            tokenizer,
            image: config.image.clone(),
            prompt: config.prompt.clone(),
            max_new_tokens: config.max_new_tokens,
        }
    }
}

impl InferenceBackend for ChartInstructBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ChartInstruct
    }

    fn prompt_template(&self) -> &str {
        &self.prompt
    }

    fn generate(&mut self, image: &RgbImage, prompt: &str) -> Result<String, InferenceError> {
        let pixels = preprocess(image, &self.image);
        let input_ids = self.tokenizer.encode(prompt, true)?;
        let params = GenerationParams {
            decoding: Decoding::Greedy,
            max_new_tokens: Some(self.max_new_tokens),
            max_length: None,
            eos_token_id: self.tokenizer.eos_id(),
            pad_token_id: self.tokenizer.pad_id(),
            bad_words_ids: Vec::new(),
        };

        let output = self.generator.generate(&pixels, &input_ids, &params)?;
        // Only the continuation; the model echoes the prompt first.
        let continuation = output.get(input_ids.len()..).unwrap_or_default();
        Ok(self.tokenizer.decode(continuation, true)?.trim().to_string())
    }
}

/// Donut-style chart model answering after the `<s_answer>` task tag.
pub struct UniChartBackend {
    generator: Box<dyn Generator>,
    tokenizer: Tokenizer,
    image: PreprocessConfig,
    prompt: String,
    num_beams: usize,
    max_length: usize,
}

impl UniChartBackend {
    pub fn new(generator: Box<dyn Generator>, tokenizer: Tokenizer, config: &UniChartConfig) -> Self {
        Self {
            generator,
            tokenizer,
            image: config.image.clone(),
            prompt: config.prompt.clone(),
            num_beams: config.num_beams,
            max_length: config.max_length,
        }
    }
}

impl InferenceBackend for UniChartBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::UniChart
    }

    fn prompt_template(&self) -> &str {
        &self.prompt
    }

    fn generate(&mut self, image: &RgbImage, prompt: &str) -> Result<String, InferenceError> {
        let pixels = preprocess(image, &self.image);
        let input_ids = self.tokenizer.encode(prompt, false)?;
        let params = GenerationParams {
            decoding: Decoding::BeamSearch {
                num_beams: self.num_beams,
                early_stopping: true,
            },
            max_new_tokens: None,
            max_length: Some(self.max_length),
            eos_token_id: self.tokenizer.eos_id(),
            pad_token_id: self.tokenizer.pad_id(),
            bad_words_ids: vec![vec![self.tokenizer.unk_id()]],
        };

        let output = self.generator.generate(&pixels, &input_ids, &params)?;
        let special = self.tokenizer.special_tokens();
        let sequence = self
            .tokenizer
            .decode(&output, false)?
            .replace(&special.eos, "")
            .replace(&special.pad, "");
        extract_answer(&sequence)
    }
}

/// Text between the first answer marker and the next one (or the end).
pub fn extract_answer(sequence: &str) -> Result<String, InferenceError> {
    sequence
        .split(ANSWER_MARKER)
        .nth(1)
        .map(|answer| answer.trim().to_string())
        .ok_or_else(|| {
            InferenceError::MalformedOutput(format!("no {} marker in model output", ANSWER_MARKER))
        })
}
