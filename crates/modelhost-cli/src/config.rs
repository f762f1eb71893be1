//! CLI configuration

use clap::Args;
use modelhost_backends::{GpuSpec, ServerConfig};
use std::path::{Path, PathBuf};

/// Command-line overrides applied on top of the config file
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Root directory for staged remote models
    #[arg(long, global = true)]
    pub staging_dir: Option<PathBuf>,

    /// Declare a GPU as INDEX:CAPABILITY (repeatable)
    #[arg(long = "gpu", value_parser = parse_gpu, global = true)]
    pub gpus: Vec<GpuSpec>,

    /// ONNX Runtime shared library; enables the onnxruntime_onnx platform
    #[arg(long, global = true)]
    pub ort_library: Option<PathBuf>,
}

/// Load the server configuration from file and CLI overrides
pub fn load(config_path: &str, overrides: &Overrides) -> anyhow::Result<ServerConfig> {
    // Try to load from file, or use defaults
    let mut config = if Path::new(config_path).exists() {
        ServerConfig::from_file(config_path)?
    } else {
        ServerConfig::default()
    };

    // Apply CLI overrides
    if let Some(dir) = &overrides.staging_dir {
        config.localization.staging_dir = Some(dir.clone());
    }

    for gpu in &overrides.gpus {
        config.devices.gpus.retain(|existing| existing.index != gpu.index);
        config.devices.gpus.push(gpu.clone());
    }

    if let Some(library) = &overrides.ort_library {
        config
            .platforms
            .onnxruntime_onnx
            .get_or_insert_with(Default::default)
            .library_path = Some(library.clone());
    }

    #[cfg(feature = "candle")]
    if no_platforms(&config) {
        config.platforms.candle_safetensors = Some(Default::default());
    }

    Ok(config)
}

#[cfg(feature = "candle")]
fn no_platforms(config: &ServerConfig) -> bool {
    config.platforms.onnxruntime_onnx.is_none()
        && config.platforms.tensorflow_graphdef.is_none()
        && config.platforms.candle_safetensors.is_none()
}

fn parse_gpu(value: &str) -> Result<GpuSpec, String> {
    let (index, capability) = value
        .split_once(':')
        .ok_or_else(|| format!("expected INDEX:CAPABILITY, got '{}'", value))?;

    Ok(GpuSpec {
        index: index
            .trim()
            .parse()
            .map_err(|e| format!("invalid GPU index '{}': {}", index, e))?,
        capability: capability
            .trim()
            .parse()
            .map_err(|e| format!("invalid capability '{}': {}", capability, e))?,
        name: None,
        memory_mb: None,
    })
}
