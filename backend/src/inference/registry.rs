use shared::BackendKind;
use std::collections::HashMap;
use std::path::Path;

use super::backends::{ChartInstructBackend, UniChartBackend};
use super::generator::Generator;
use super::tokenizer::Tokenizer;
use super::{InferenceBackend, InferenceError};
use crate::config::BackendsConfig;

/// The fixed set of loaded backends, keyed by kind.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Box<dyn InferenceBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, backend: Box<dyn InferenceBackend>) -> Self {
        let kind = backend.kind();
        if self.backends.insert(kind, backend).is_some() {
            log::warn!("Backend {} registered twice, keeping the last one", kind);
        }
        self
    }

    /// Loads every configured backend. Any failure aborts the whole load.
    pub fn from_config(config: &BackendsConfig) -> Result<Self, InferenceError> {
        log::info!("Loading {} backend", BackendKind::ChartInstruct);
        let chartinstruct = &config.chartinstruct;
        let tokenizer = Tokenizer::from_file(
            &chartinstruct.tokenizer_path,
            chartinstruct.special_tokens.clone(),
        )?;
        let generator = load_generator(&chartinstruct.model_path)?;
        let registry = Self::new().register(Box::new(ChartInstructBackend::new(
            generator,
            tokenizer,
            chartinstruct,
        )));

        log::info!("Loading {} backend", BackendKind::UniChart);
        let unichart = &config.unichart;
        let tokenizer =
            Tokenizer::from_file(&unichart.tokenizer_path, unichart.special_tokens.clone())?;
        let generator = load_generator(&unichart.model_path)?;
        Ok(registry.register(Box::new(UniChartBackend::new(
            generator, tokenizer, unichart,
        ))))
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    pub fn into_backends(self) -> HashMap<BackendKind, Box<dyn InferenceBackend>> {
        self.backends
    }
}

#[cfg(feature = "torch")]
fn load_generator(model_path: &Path) -> Result<Box<dyn Generator>, InferenceError> {
    Ok(Box::new(super::torch::TorchGenerator::load(model_path)?))
}

#[cfg(not(feature = "torch"))]
fn load_generator(model_path: &Path) -> Result<Box<dyn Generator>, InferenceError> {
    Err(InferenceError::Unavailable(format!(
        "cannot load {}: built without the `torch` feature",
        model_path.display()
    )))
}
