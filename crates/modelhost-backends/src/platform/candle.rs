//! Safetensors feed-forward models executed with candle
//!
//! The weights file holds `layers.{i}.weight` (`[out, in]`) and an optional
//! `layers.{i}.bias` for consecutive `i` starting at 0. Layers are applied
//! in order with ReLU between them. The model artifact is either a single
//! safetensors file or a directory of safetensors shards.

use super::{PlatformLoader, PlatformSpec};
use crate::artifact::{Artifact, ArtifactPolicy};
use crate::backend::{Session, SessionRequest};
use crate::config::{memory_limit, CandleBackendConfig};
use crate::device::Placement;
use crate::filesystem;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module};
use modelhost_core::{Error, InferTensor, Result, CANDLE_SAFETENSORS_PLATFORM};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MODEL_FILENAME: &str = "model.safetensors";

/// Name of the single output tensor
pub const OUTPUT_NAME: &str = "output";

/// Platform spec for `candle_safetensors`
pub fn platform_spec(config: &CandleBackendConfig) -> PlatformSpec {
    PlatformSpec::new(
        CANDLE_SAFETENSORS_PLATFORM,
        ArtifactPolicy::InlineFilesAndSubdirs,
        Arc::new(CandleLoader),
    )
    .with_memory_limit_mb(memory_limit(config.memory_limit_mb))
}

struct CandleLoader;

impl PlatformLoader for CandleLoader {
    fn default_model_filename(&self) -> &str {
        DEFAULT_MODEL_FILENAME
    }

    fn open_session(&self, request: &SessionRequest<'_>) -> Result<Box<dyn Session>> {
        let device = device_for(request.placement)?;
        let tensors = load_tensors(request.artifact_name, request.artifact, &device)?;
        let layers = build_layers(request.artifact_name, &tensors)?;

        debug!(
            "Loaded {} layers for {} on {}",
            layers.len(),
            request.context_name,
            request.placement
        );

        Ok(Box::new(FeedForwardSession {
            layers,
            device,
            max_batch_size: request.model.max_batch_size,
        }))
    }
}

fn device_for(placement: Placement) -> Result<Device> {
    match placement {
        Placement::Cpu => Ok(Device::Cpu),
        Placement::Gpu(index) => Device::new_cuda(index as usize).map_err(|e| {
            Error::runtime_init(format!("Failed to initialize CUDA device {}: {}", index, e))
        }),
    }
}

fn load_tensors(name: &str, artifact: &Artifact, device: &Device) -> Result<HashMap<String, Tensor>> {
    let invalid = |e: candle_core::Error| {
        Error::config(format!("'{}' is not a valid safetensors model: {}", name, e))
    };

    match artifact {
        Artifact::Inline(bytes) => candle_core::safetensors::load_buffer(bytes, device).map_err(invalid),
        Artifact::ExternalPath(path) if path.is_dir() => {
            let shards: Vec<String> = filesystem::list_files(path, true)?
                .into_iter()
                .filter(|file| file.ends_with(".safetensors"))
                .collect();
            if shards.is_empty() {
                return Err(Error::config(format!(
                    "model directory '{}' contains no safetensors shards",
                    name
                )));
            }

            let mut tensors = HashMap::new();
            for shard in shards {
                tensors.extend(load_file(&path.join(shard), device).map_err(invalid)?);
            }
            Ok(tensors)
        }
        Artifact::ExternalPath(path) => load_file(path, device).map_err(invalid),
    }
}

fn load_file(path: &Path, device: &Device) -> candle_core::Result<HashMap<String, Tensor>> {
    candle_core::safetensors::load(path, device)
}

fn build_layers(name: &str, tensors: &HashMap<String, Tensor>) -> Result<Vec<Linear>> {
    let as_f32 = |tensor: &Tensor| {
        tensor
            .to_dtype(DType::F32)
            .map_err(|e| Error::config(format!("'{}': {}", name, e)))
    };

    let mut layers = Vec::new();
    while let Some(weight) = tensors.get(&format!("layers.{}.weight", layers.len())) {
        if weight.rank() != 2 {
            return Err(Error::config(format!(
                "'{}': layers.{}.weight must be 2-dimensional, got {:?}",
                name,
                layers.len(),
                weight.dims()
            )));
        }
        let bias = tensors
            .get(&format!("layers.{}.bias", layers.len()))
            .map(as_f32)
            .transpose()?;
        layers.push(Linear::new(as_f32(weight)?, bias));
    }

    if layers.is_empty() {
        return Err(Error::config(format!("'{}' has no layers.0.weight tensor", name)));
    }
    Ok(layers)
}

struct FeedForwardSession {
    layers: Vec<Linear>,
    device: Device,
    max_batch_size: usize,
}

impl FeedForwardSession {
    fn forward(&self, input: &InferTensor) -> candle_core::Result<(Vec<usize>, Vec<f32>)> {
        let mut x = Tensor::from_slice(&input.data, input.shape.as_slice(), &self.device)?;
        let unbatched = x.rank() == 1;
        if unbatched {
            x = x.unsqueeze(0)?;
        }

        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = x.relu()?;
            }
        }

        if unbatched {
            x = x.squeeze(0)?;
        }
        let x = x.to_device(&Device::Cpu)?;
        Ok((x.dims().to_vec(), x.flatten_all()?.to_vec1::<f32>()?))
    }
}

impl Session for FeedForwardSession {
    fn run(&self, inputs: &[InferTensor]) -> Result<Vec<InferTensor>> {
        let input = match inputs {
            [input] => input,
            _ => {
                return Err(Error::inference(format!(
                    "expected exactly 1 input tensor, got {}",
                    inputs.len()
                )))
            }
        };

        let batch = match input.shape.as_slice() {
            [_] => 1,
            [batch, _] => *batch,
            shape => {
                return Err(Error::inference(format!(
                    "input '{}' must be 1- or 2-dimensional, got {:?}",
                    input.name, shape
                )))
            }
        };
        if self.max_batch_size > 0 && batch > self.max_batch_size {
            return Err(Error::inference(format!(
                "batch size {} exceeds max_batch_size {}",
                batch, self.max_batch_size
            )));
        }

        let (shape, data) = self
            .forward(input)
            .map_err(|e| Error::inference(format!("forward pass failed: {}", e)))?;
        Ok(vec![InferTensor::new(OUTPUT_NAME, shape, data)?])
    }
}
