use std::path::Path;
use tch::{CModule, Device, IValue, Kind, Tensor};

use super::generator::{Decoding, GenerationParams, Generator};
use super::InferenceError;
use crate::imaging::preprocess::PixelTensor;

/// TorchScript export of a vision-language model with a scripted `generate` method.
///
/// The method signature is `generate(pixel_values, input_ids, max_new_tokens,
/// max_length, num_beams, early_stopping, eos_token_id, pad_token_id,
/// bad_token_ids) -> Tensor[1, seq]`, with `-1` meaning "no bound".
pub struct TorchGenerator {
    module: CModule,
    device: Device,
}

impl TorchGenerator {
    pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(model_path, device).map_err(|e| {
            InferenceError::Unavailable(format!("cannot load {}: {}", model_path.display(), e))
        })?;
        log::info!("Loaded {} on {:?}", model_path.display(), device);
        Ok(Self { module, device })
    }
}

impl Generator for TorchGenerator {
    fn generate(
        &mut self,
        pixels: &PixelTensor,
        input_ids: &[i64],
        params: &GenerationParams,
    ) -> Result<Vec<i64>, InferenceError> {
        let (channels, height, width) = pixels.dim();
        let data: Vec<f32> = pixels.iter().copied().collect();
        let pixel_values = Tensor::from_slice(&data)
            .view([1, channels as i64, height as i64, width as i64])
            .to_device(self.device);
        let input = Tensor::from_slice(input_ids)
            .view([1, -1])
            .to_device(self.device);

        let (num_beams, early_stopping) = match params.decoding {
            Decoding::Greedy => (1, false),
            Decoding::BeamSearch {
                num_beams,
                early_stopping,
            } => (num_beams as i64, early_stopping),
        };
        let bound = |limit: Option<usize>| limit.map_or(-1, |n| n as i64);
        // Only single-token bans are supported by the exported method.
        let bad_token_ids: Vec<i64> = params
            .bad_words_ids
            .iter()
            .filter_map(|seq| match seq.as_slice() {
                [id] => Some(*id),
                _ => None,
            })
            .collect();

        let inputs = [
            IValue::Tensor(pixel_values),
            IValue::Tensor(input),
            IValue::Int(bound(params.max_new_tokens)),
            IValue::Int(bound(params.max_length)),
            IValue::Int(num_beams),
            IValue::Bool(early_stopping),
            IValue::Int(params.eos_token_id),
            IValue::Int(params.pad_token_id),
            IValue::IntList(bad_token_ids),
        ];

        let output = tch::no_grad(|| self.module.method_is("generate", &inputs))?;
        let sequences = match output {
            IValue::Tensor(tensor) => tensor,
            other => {
                return Err(InferenceError::Model(format!(
                    "generate returned {:?} instead of a tensor",
                    other
                )))
            }
        };

        let flat = sequences
            .get(0)
            .to_kind(Kind::Int64)
            .to_device(Device::Cpu);
        Ok(Vec::<i64>::try_from(&flat)?)
    }
}
