//! Backend factories
//!
//! A [`BackendFactory`] is created once per platform. Creation holds the
//! platform's runtime lease and registers its device budget; afterwards
//! [`create_backend`](BackendFactory::create_backend) turns a model path and
//! configuration into a ready backend, or fails without leaving anything
//! behind.

use crate::artifact::{collect_artifacts, Artifact};
use crate::backend::{InferenceBackend, ModelBackend};
use crate::budget::DeviceBudgetTracker;
use crate::config::ServerConfig;
use crate::device::{inventory_from_config, DeviceInventory};
use crate::localize::{DefaultLocalizer, Localizer};
use crate::platform::{PlatformRegistry, PlatformSpec};
use crate::runtime::RuntimeLease;
use modelhost_core::{Error, ModelConfig, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// State shared by every factory in the process
#[derive(Clone)]
pub struct SharedResources {
    pub localizer: Arc<dyn Localizer>,
    pub devices: Arc<dyn DeviceInventory>,
    pub budget: Arc<DeviceBudgetTracker>,
}

impl SharedResources {
    pub fn new(localizer: Arc<dyn Localizer>, devices: Arc<dyn DeviceInventory>) -> Self {
        Self {
            localizer,
            devices,
            budget: Arc::new(DeviceBudgetTracker::new()),
        }
    }

    /// Localizer and device inventory described by the server configuration
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let localizer = Arc::new(DefaultLocalizer::new(Arc::new(config.localization.clone())));
        let devices = inventory_from_config(&config.devices)?;
        Ok(Self::new(localizer, devices))
    }
}

/// Creates backends for one platform
pub struct BackendFactory {
    spec: PlatformSpec,
    localizer: Arc<dyn Localizer>,
    devices: Arc<dyn DeviceInventory>,
    budget: Option<Arc<DeviceBudgetTracker>>,
    _runtime: Option<RuntimeLease>,
}

impl BackendFactory {
    /// Create a factory, initializing the platform runtime and device budget
    ///
    /// No factory is returned when either step fails.
    pub fn create(spec: PlatformSpec, resources: &SharedResources) -> Result<Self> {
        if spec.name.is_empty() {
            return Err(Error::config("platform name must not be empty"));
        }
        if spec.memory_limit_mb == Some(0) {
            return Err(Error::config(format!(
                "platform '{}' has a zero device memory limit",
                spec.name
            )));
        }

        let runtime = spec.runtime.as_ref().map(|runtime| runtime.acquire()).transpose()?;

        let budget = match spec.memory_limit_mb {
            Some(total) => {
                resources.budget.init(total)?;
                Some(Arc::clone(&resources.budget))
            }
            None => None,
        };

        info!(
            "Created {} backend factory (runtime: {}, device budget: {})",
            spec.name,
            spec.runtime.as_ref().map_or("none", |runtime| runtime.name()),
            spec.memory_limit_mb
                .map_or_else(|| "unmanaged".to_string(), |mb| format!("{} MB", mb))
        );

        Ok(Self {
            spec,
            localizer: Arc::clone(&resources.localizer),
            devices: Arc::clone(&resources.devices),
            budget,
            _runtime: runtime,
        })
    }

    pub fn platform(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &PlatformSpec {
        &self.spec
    }

    /// Load the model version at `path`
    ///
    /// Localizes the path, collects its artifacts, places execution contexts
    /// on devices at or above `min_capability`, and opens them. Any failure
    /// releases the localized directory and every budget reservation taken
    /// by this call.
    pub fn create_backend(
        &self,
        path: &str,
        config: &ModelConfig,
        min_capability: f64,
    ) -> Result<Box<dyn InferenceBackend>> {
        let start = Instant::now();
        let result = self.load(path, config, min_capability);
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.stage(),
        };
        metrics::counter!(
            "modelhost_backend_loads_total",
            "platform" => self.spec.name.clone(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("modelhost_backend_load_duration_ms", "platform" => self.spec.name.clone())
            .record(elapsed.as_secs_f64() * 1000.0);

        match result {
            Ok(backend) => {
                info!(
                    "Loaded model '{}' from {} with {} execution contexts in {:?}",
                    config.name,
                    path,
                    backend.execution_context_count(),
                    elapsed
                );
                Ok(Box::new(backend))
            }
            Err(e) => {
                warn!("Failed to load model '{}' from {} during {}: {}", config.name, path, e.stage(), e);
                Err(e)
            }
        }
    }

    fn load(&self, path: &str, config: &ModelConfig, min_capability: f64) -> Result<ModelBackend> {
        let localized = self.localizer.localize(path)?;
        debug!("Localized {} to {}", path, localized.path().display());

        let artifacts = collect_artifacts(localized.path(), self.spec.artifact_policy)?;
        let inline_bytes: u64 = artifacts
            .values()
            .filter_map(Artifact::as_bytes)
            .map(|bytes| bytes.len() as u64)
            .sum();
        metrics::counter!("modelhost_artifact_bytes_total", "platform" => self.spec.name.clone())
            .increment(inline_bytes);

        let mut backend = ModelBackend::new(
            min_capability,
            self.devices.devices()?,
            self.budget.clone(),
            Arc::clone(&self.spec.loader),
        )?;
        backend.init(path, config, &self.spec.name)?;
        backend.create_execution_contexts(&artifacts)?;

        // Contexts own their loaded weights, the localized copy is no longer needed
        drop(localized);
        Ok(backend)
    }
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory")
            .field("spec", &self.spec)
            .field("budget", &self.budget.is_some())
            .finish()
    }
}

/// Factories for every enabled platform, dispatching on `ModelConfig::platform`
#[derive(Debug, Default)]
pub struct BackendFactories {
    factories: HashMap<String, Arc<BackendFactory>>,
}

impl BackendFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory for every platform in `registry`
    pub fn from_registry(registry: &PlatformRegistry, resources: &SharedResources) -> Result<Self> {
        let mut factories = Self::new();
        for spec in registry.iter() {
            factories.insert(BackendFactory::create(spec.clone(), resources)?)?;
        }
        Ok(factories)
    }

    /// Add a factory, rejecting a second factory for the same platform
    pub fn insert(&mut self, factory: BackendFactory) -> Result<()> {
        let platform = factory.platform().to_string();
        if self.factories.contains_key(&platform) {
            return Err(Error::config(format!("factory for '{}' already exists", platform)));
        }
        self.factories.insert(platform, Arc::new(factory));
        Ok(())
    }

    pub fn get(&self, platform: &str) -> Option<&Arc<BackendFactory>> {
        self.factories.get(platform)
    }

    /// Enabled platform names, sorted
    pub fn platforms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Load a model with the factory for its platform
    pub fn create_backend(
        &self,
        path: &str,
        config: &ModelConfig,
        min_capability: f64,
    ) -> Result<Box<dyn InferenceBackend>> {
        let factory = self.get(&config.platform).ok_or_else(|| {
            Error::config(format!(
                "no backend for platform '{}' of model '{}' (enabled: {})",
                config.platform,
                config.name,
                self.platforms().join(", ")
            ))
        })?;
        factory.create_backend(path, config, min_capability)
    }

    /// Load on the blocking thread pool for async callers
    pub async fn load(
        self: &Arc<Self>,
        path: String,
        config: ModelConfig,
        min_capability: f64,
    ) -> Result<Box<dyn InferenceBackend>> {
        let factories = Arc::clone(self);
        tokio::task::spawn_blocking(move || factories.create_backend(&path, &config, min_capability))
            .await
            .map_err(|e| Error::internal(format!("load task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactPolicy;
    use crate::backend::{Session, SessionRequest};
    use crate::device::StaticInventory;
    use crate::localize::LocalFsLocalizer;
    use crate::platform::PlatformLoader;
    use modelhost_core::InferTensor;

    struct EchoLoader;

    impl PlatformLoader for EchoLoader {
        fn default_model_filename(&self) -> &str {
            "model.bin"
        }

        fn open_session(&self, _request: &SessionRequest<'_>) -> Result<Box<dyn Session>> {
            struct Echo;
            impl Session for Echo {
                fn run(&self, inputs: &[InferTensor]) -> Result<Vec<InferTensor>> {
                    Ok(inputs.to_vec())
                }
            }
            Ok(Box::new(Echo))
        }
    }

    fn resources() -> SharedResources {
        SharedResources::new(Arc::new(LocalFsLocalizer), Arc::new(StaticInventory::cpu_only()))
    }

    fn echo_spec() -> PlatformSpec {
        PlatformSpec::new("echo", ArtifactPolicy::InlineFilesAndSubdirs, Arc::new(EchoLoader))
    }

    #[test]
    fn test_create_backend_from_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.bin"), [0u8, 1, 2]).unwrap();

        let factory = BackendFactory::create(echo_spec(), &resources()).unwrap();
        let config = ModelConfig::new("m", "echo");
        let backend = factory
            .create_backend(&dir.path().display().to_string(), &config, 0.0)
            .unwrap();

        assert_eq!(backend.name(), "m");
        assert_eq!(backend.platform(), "echo");
        assert_eq!(backend.execution_context_count(), 1);
    }

    #[test]
    fn test_missing_path_is_localization_error() {
        let factory = BackendFactory::create(echo_spec(), &resources()).unwrap();
        let config = ModelConfig::new("m", "echo");
        let err = factory.create_backend("/nonexistent/m/1", &config, 0.0).err().unwrap();
        assert!(matches!(err, Error::Localization(_)));
    }

    #[test]
    fn test_conflicting_budgets_reject_second_factory() {
        let resources = resources();
        BackendFactory::create(echo_spec().with_memory_limit_mb(Some(100)), &resources).unwrap();

        let other = PlatformSpec::new("other", ArtifactPolicy::FilePaths, Arc::new(EchoLoader))
            .with_memory_limit_mb(Some(200));
        let err = BackendFactory::create(other, &resources).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_platform() {
        let mut registry = PlatformRegistry::new();
        registry.register(echo_spec()).unwrap();
        let factories = BackendFactories::from_registry(&registry, &resources()).unwrap();

        let config = ModelConfig::new("m", "missing");
        let err = factories.create_backend("/models/m/1", &config, 0.0).err().unwrap();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("echo")));
    }

    #[tokio::test]
    async fn test_async_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.bin"), b"weights").unwrap();

        let mut registry = PlatformRegistry::new();
        registry.register(echo_spec()).unwrap();
        let factories = Arc::new(BackendFactories::from_registry(&registry, &resources()).unwrap());

        let backend = factories
            .load(dir.path().display().to_string(), ModelConfig::new("m", "echo"), 0.0)
            .await
            .unwrap();
        let input = InferTensor::new("x", vec![2], vec![1.0, 2.0]).unwrap();
        assert_eq!(backend.infer(&[input.clone()]).unwrap(), vec![input]);
    }
}
