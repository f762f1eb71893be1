//! modelhost Core
//!
//! Core types, traits, and utilities shared across modelhost components.
//!
//! This crate provides:
//! - The structured error type returned by every loading stage
//! - The read-only model configuration consumed by backend factories
//! - Tensor containers passed across the inference entry point

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{InferTensor, InstanceGroup, InstanceKind, ModelConfig};

/// Platform identifier for ONNX models served through ONNX Runtime
pub const ONNX_RUNTIME_ONNX_PLATFORM: &str = "onnxruntime_onnx";

/// Platform identifier for frozen TensorFlow GraphDef models
pub const TENSORFLOW_GRAPHDEF_PLATFORM: &str = "tensorflow_graphdef";

/// Platform identifier for safetensors models executed with candle
pub const CANDLE_SAFETENSORS_PLATFORM: &str = "candle_safetensors";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{InferTensor, InstanceGroup, InstanceKind, ModelConfig};
}
