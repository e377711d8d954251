use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use super::InferenceError;

/// Names of the special tokens a backend relies on.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpecialTokens {
    #[serde(default = "default_eos")]
    pub eos: String,
    #[serde(default = "default_pad")]
    pub pad: String,
    #[serde(default = "default_unk")]
    pub unk: String,
}

fn default_eos() -> String {
    "</s>".to_string()
}

fn default_pad() -> String {
    "<pad>".to_string()
}

fn default_unk() -> String {
    "<unk>".to_string()
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            eos: default_eos(),
            pad: default_pad(),
            unk: default_unk(),
        }
    }
}

/// A model's `tokenizer.json` plus the ids of its stop, pad and unknown tokens.
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    eos_id: i64,
    pad_id: i64,
    unk_id: i64,
    special: SpecialTokens,
}

impl Tokenizer {
    pub fn from_file(path: &Path, special: SpecialTokens) -> Result<Self, InferenceError> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            InferenceError::Unavailable(format!(
                "cannot load tokenizer {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::with_special_tokens(inner, special)
    }

    pub fn from_json_str(raw: &str, special: SpecialTokens) -> Result<Self, InferenceError> {
        let inner = tokenizers::Tokenizer::from_str(raw)
            .map_err(|e| InferenceError::Tokenizer(format!("invalid tokenizer.json: {}", e)))?;
        Self::with_special_tokens(inner, special)
    }

    fn with_special_tokens(
        inner: tokenizers::Tokenizer,
        special: SpecialTokens,
    ) -> Result<Self, InferenceError> {
        let lookup = |name: &str| {
            inner.token_to_id(name).map(i64::from).ok_or_else(|| {
                InferenceError::Tokenizer(format!("special token {} missing from vocabulary", name))
            })
        };
        let eos_id = lookup(&special.eos)?;
        let pad_id = lookup(&special.pad)?;
        let unk_id = lookup(&special.unk)?;

        Ok(Self {
            inner,
            eos_id,
            pad_id,
            unk_id,
            special,
        })
    }

    pub fn eos_id(&self) -> i64 {
        self.eos_id
    }

    pub fn pad_id(&self) -> i64 {
        self.pad_id
    }

    pub fn unk_id(&self) -> i64 {
        self.unk_id
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<i64>, InferenceError> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| InferenceError::Tokenizer(format!("encoding failed: {}", e)))?;
        Ok(encoding.get_ids().iter().map(|&id| i64::from(id)).collect())
    }

    pub fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> Result<String, InferenceError> {
        let ids: Vec<u32> = ids
            .iter()
            .filter_map(|&id| u32::try_from(id).ok())
            .collect();
        self.inner
            .decode(&ids, skip_special_tokens)
            .map_err(|e| InferenceError::Tokenizer(format!("decoding failed: {}", e)))
    }
}
