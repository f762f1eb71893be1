//! Server-wide configuration for backend factories

use crate::device::{DeviceInfo, DeviceKind};
use modelhost_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration read once at server startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Where remote model directories are staged
    #[serde(default)]
    pub localization: LocalizationConfig,

    /// Devices available to execution contexts
    #[serde(default)]
    pub devices: DevicesConfig,

    /// Per-platform backend configuration
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

/// Localization settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalizationConfig {
    /// Root for staged copies (system temp dir when unset)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Hugging Face Hub download cache
    #[serde(default)]
    pub hub_cache_dir: Option<PathBuf>,
}

/// Device inventory specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// How devices are discovered
    #[serde(default)]
    pub detect: DetectSpec,

    /// Statically declared GPUs (used with `detect: static`)
    #[serde(default)]
    pub gpus: Vec<GpuSpec>,
}

/// Device discovery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectSpec {
    /// CPU plus the GPUs listed in the config
    #[default]
    Static,
    /// Query NVIDIA GPUs through NVML
    Nvml,
}

/// A statically declared GPU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSpec {
    pub index: u32,

    /// Compute capability, e.g. 8.6
    pub capability: f64,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub memory_mb: Option<u64>,
}

/// Backend configuration for every platform the server enables
///
/// `tensorflow_graphdef` and `candle_safetensors` draw from one per-GPU
/// budget; when both set a non-zero `memory_limit_mb` the values must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub onnxruntime_onnx: Option<OnnxBackendConfig>,

    #[serde(default)]
    pub tensorflow_graphdef: Option<GraphDefBackendConfig>,

    #[serde(default)]
    pub candle_safetensors: Option<CandleBackendConfig>,
}

/// ONNX Runtime platform settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnnxBackendConfig {
    /// Shared library to load (falls back to `ORT_DYLIB_PATH`, then the
    /// platform default name)
    #[serde(default)]
    pub library_path: Option<PathBuf>,
}

/// TensorFlow GraphDef platform settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefBackendConfig {
    /// Per-GPU memory partitioned across models, 0 disables partitioning
    #[serde(default)]
    pub memory_limit_mb: u64,
}

/// Candle platform settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandleBackendConfig {
    /// Per-GPU memory partitioned across models, 0 disables partitioning
    #[serde(default)]
    pub memory_limit_mb: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            detect: DetectSpec::Static,
            gpus: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&content)
    }
}

impl GpuSpec {
    /// Convert to a device description
    pub fn to_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            kind: DeviceKind::Gpu,
            index: self.index,
            name: self
                .name
                .clone()
                .unwrap_or_else(|| format!("gpu{}", self.index)),
            capability: self.capability,
            memory_mb: self.memory_mb,
        }
    }
}

/// Budget value where 0 means "not partitioned"
pub(crate) fn memory_limit(mb: u64) -> Option<u64> {
    (mb > 0).then_some(mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_yaml() {
        let yaml = r#"
localization:
  staging_dir: /var/tmp/modelhost
devices:
  detect: static
  gpus:
    - index: 0
      capability: 8.6
      memory_mb: 24576
    - index: 1
      capability: 6.1
      name: legacy
platforms:
  onnxruntime_onnx:
    library_path: /opt/onnxruntime/lib/libonnxruntime.so
  tensorflow_graphdef:
    memory_limit_mb: 4096
  candle_safetensors: {}
"#;

        let config = ServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.localization.staging_dir, Some(PathBuf::from("/var/tmp/modelhost")));
        assert_eq!(config.devices.gpus.len(), 2);
        assert_eq!(config.devices.gpus[1].to_device_info().name, "legacy");
        assert_eq!(config.devices.gpus[0].to_device_info().name, "gpu0");

        let graphdef = config.platforms.tensorflow_graphdef.unwrap();
        assert_eq!(memory_limit(graphdef.memory_limit_mb), Some(4096));

        let candle = config.platforms.candle_safetensors.unwrap();
        assert_eq!(memory_limit(candle.memory_limit_mb), None);
        assert!(config.platforms.onnxruntime_onnx.unwrap().library_path.is_some());
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_yaml("{}").unwrap();
        assert_eq!(config.devices.detect, DetectSpec::Static);
        assert!(config.platforms.onnxruntime_onnx.is_none());
        assert!(config.localization.staging_dir.is_none());
    }
}
