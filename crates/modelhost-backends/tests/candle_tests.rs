//! End-to-end loading of safetensors models through the candle platform

#![cfg(feature = "candle")]

use candle_core::{Device, Tensor};
use modelhost_backends::backend::{Session, SessionRequest};
use modelhost_backends::platform::{registry_from_config, ModelPayload, SessionBuilder};
use modelhost_backends::{BackendFactories, InferenceBackend, ServerConfig, SharedResources};
use modelhost_core::{Error, InferTensor, InstanceGroup, InstanceKind, ModelConfig, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

struct NoNativeSessions;

impl SessionBuilder for NoNativeSessions {
    fn build(&self, _payload: ModelPayload<'_>, _request: &SessionRequest<'_>) -> Result<Box<dyn Session>> {
        Err(Error::internal("native sessions are not available in tests"))
    }
}

/// Identity layer followed by a summing layer
fn write_model(version_dir: &Path) {
    std::fs::create_dir_all(version_dir).unwrap();
    let device = Device::Cpu;
    let mut tensors = HashMap::new();
    tensors.insert(
        "layers.0.weight".to_string(),
        Tensor::new(&[[1f32, 0., 0.], [0., 1., 0.], [0., 0., 1.]], &device).unwrap(),
    );
    tensors.insert("layers.1.weight".to_string(), Tensor::new(&[[1f32, 1., 1.]], &device).unwrap());
    candle_core::safetensors::save(&tensors, version_dir.join("model.safetensors")).unwrap();
    std::fs::write(version_dir.join(".DS_Store"), b"ignored").unwrap();
}

fn factories(yaml: &str) -> BackendFactories {
    let config = ServerConfig::from_yaml(yaml).unwrap();
    let resources = SharedResources::from_config(&config).unwrap();
    let registry = registry_from_config(&config.platforms, Arc::new(NoNativeSessions)).unwrap();
    BackendFactories::from_registry(&registry, &resources).unwrap()
}

#[test]
fn test_load_and_infer_on_cpu() {
    let repo = tempfile::tempdir().unwrap();
    let version_dir = repo.path().join("summer").join("1");
    write_model(&version_dir);

    let factories = factories("platforms:\n  candle_safetensors: {}\n");
    let config = ModelConfig::new("summer", "candle_safetensors")
        .with_instance_group(InstanceGroup::new(InstanceKind::Cpu, 2));

    let backend = factories
        .create_backend(&version_dir.display().to_string(), &config, 0.0)
        .unwrap();
    assert_eq!(backend.execution_context_count(), 2);

    // Negative values are clipped by the ReLU between layers
    let input = InferTensor::new("x", vec![2, 3], vec![1., 2., 3., -1., 4., 0.5]).unwrap();
    let outputs = backend.infer(&[input]).unwrap();
    assert_eq!(outputs[0].shape, vec![2, 1]);
    assert_eq!(outputs[0].data, vec![6.0, 4.5]);
}

#[test]
fn test_gpu_placement_without_cuda_fails_at_context_creation() {
    if candle_core::utils::cuda_is_available() {
        return;
    }

    let repo = tempfile::tempdir().unwrap();
    let version_dir = repo.path().join("summer").join("1");
    write_model(&version_dir);

    let factories = factories(
        r#"
devices:
  gpus:
    - index: 0
      capability: 8.6
platforms:
  candle_safetensors:
    memory_limit_mb: 512
"#,
    );
    let config = ModelConfig::new("summer", "candle_safetensors");

    let err = factories
        .create_backend(&version_dir.display().to_string(), &config, 7.0)
        .err()
        .unwrap();
    assert!(matches!(err, Error::RuntimeInit(_)));
}

#[tokio::test]
async fn test_async_load() {
    let repo = tempfile::tempdir().unwrap();
    let version_dir = repo.path().join("summer").join("3");
    write_model(&version_dir);

    let factories = Arc::new(factories("platforms:\n  candle_safetensors: {}\n"));
    let backend = factories
        .load(
            format!("file://{}", version_dir.display()),
            ModelConfig::new("summer", "candle_safetensors").with_max_batch_size(4),
            0.0,
        )
        .await
        .unwrap();

    let input = InferTensor::new("x", vec![3], vec![0.25, 0.25, 0.5]).unwrap();
    assert_eq!(backend.infer(&[input]).unwrap()[0].data, vec![1.0]);

    let too_large = InferTensor::new("x", vec![5, 3], vec![0.0; 15]).unwrap();
    assert!(matches!(backend.infer(&[too_large]), Err(Error::Inference(_))));
}
