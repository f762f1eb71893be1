//! Core types for modelhost

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Read-only description of a model, parsed from its `config.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name
    pub name: String,

    /// Platform identifier (e.g. `onnxruntime_onnx`)
    pub platform: String,

    /// Maximum batch size accepted at inference, 0 disables batching
    #[serde(default)]
    pub max_batch_size: usize,

    /// Artifact name holding the model inside a version directory
    #[serde(default)]
    pub default_model_filename: Option<String>,

    /// Replication requirements
    #[serde(default)]
    pub instance_group: Vec<InstanceGroup>,

    /// Platform-specific parameters
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// A group of identical execution contexts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceGroup {
    /// Group name, used as the context name prefix
    #[serde(default)]
    pub name: Option<String>,

    /// Contexts per device
    #[serde(default = "default_count")]
    pub count: usize,

    /// Where the contexts run
    #[serde(default)]
    pub kind: InstanceKind,

    /// GPU indices to place contexts on (all eligible GPUs when empty)
    #[serde(default)]
    pub gpus: Vec<u32>,

    /// Device memory each context reserves, in megabytes
    #[serde(default)]
    pub memory_mb: Option<u64>,
}

/// Device kind requested by an instance group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    /// GPU when the host has one, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Gpu,
}

fn default_count() -> usize {
    1
}

impl Default for InstanceGroup {
    fn default() -> Self {
        Self {
            name: None,
            count: default_count(),
            kind: InstanceKind::Auto,
            gpus: Vec::new(),
            memory_mb: None,
        }
    }
}

impl ModelConfig {
    /// Create a minimal configuration for a model on a platform
    pub fn new(name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
            max_batch_size: 0,
            default_model_filename: None,
            instance_group: Vec::new(),
            parameters: HashMap::new(),
        }
    }

    /// Add an instance group
    pub fn with_instance_group(mut self, group: InstanceGroup) -> Self {
        self.instance_group.push(group);
        self
    }

    /// Set the default model filename
    pub fn with_default_model_filename(mut self, filename: impl Into<String>) -> Self {
        self.default_model_filename = Some(filename.into());
        self
    }

    /// Set the maximum batch size
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

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

    /// Instance groups, or the single implicit `auto` group
    pub fn effective_instance_groups(&self) -> Vec<InstanceGroup> {
        if self.instance_group.is_empty() {
            vec![InstanceGroup::default()]
        } else {
            self.instance_group.clone()
        }
    }
}

impl InstanceGroup {
    /// Create a group of `count` contexts of the given kind
    pub fn new(kind: InstanceKind, count: usize) -> Self {
        Self {
            kind,
            count,
            ..Default::default()
        }
    }

    /// Pin the group to specific GPUs
    pub fn with_gpus(mut self, gpus: Vec<u32>) -> Self {
        self.gpus = gpus;
        self
    }

    /// Set the per-context memory reservation
    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }
}

/// Dense f32 tensor passed to and returned from a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl InferTensor {
    /// Create a tensor, checking that `data` matches `shape`
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::inference(format!(
                "tensor shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            shape,
            data,
        })
    }
}
