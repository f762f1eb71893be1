//! Platform descriptions driving the generic backend pipeline
//!
//! Every platform is a [`PlatformSpec`]: how its artifacts are collected,
//! which native runtime it shares, how much device memory it partitions,
//! and a [`PlatformLoader`] that turns artifacts into sessions. Factories
//! are built from specs, so adding a platform never touches the pipeline.

pub mod graphdef;
pub mod onnx;

#[cfg(feature = "candle")]
pub mod candle;

use crate::artifact::{Artifact, ArtifactPolicy};
use crate::backend::{Session, SessionRequest};
use crate::config::{memory_limit, PlatformsConfig};
use crate::runtime::RuntimeContext;
use modelhost_core::{Error, ModelConfig, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MB: u64 = 1024 * 1024;

/// Platform-specific half of backend loading
pub trait PlatformLoader: Send + Sync {
    /// Artifact holding the model when the config names none
    fn default_model_filename(&self) -> &str;

    /// Reject configurations this platform cannot serve
    fn validate(&self, _config: &ModelConfig) -> Result<()> {
        Ok(())
    }

    /// Device memory one context needs, in MB
    fn context_memory_mb(&self, artifact: &Artifact) -> Result<u64> {
        let bytes = artifact.size_bytes()?;
        Ok(bytes.div_ceil(MB).max(1))
    }

    /// Open the session for one execution context
    fn open_session(&self, request: &SessionRequest<'_>) -> Result<Box<dyn Session>>;
}

/// Model bytes or file handed to a native session builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPayload<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Creates native sessions for platforms whose runtime lives outside this crate
pub trait SessionBuilder: Send + Sync {
    fn build(&self, payload: ModelPayload<'_>, request: &SessionRequest<'_>) -> Result<Box<dyn Session>>;
}

/// Everything the generic pipeline needs to know about a platform
#[derive(Clone)]
pub struct PlatformSpec {
    /// Platform identifier matched against `ModelConfig::platform`
    pub name: String,

    pub artifact_policy: ArtifactPolicy,

    /// Native runtime shared by every factory of this platform
    pub runtime: Option<Arc<RuntimeContext>>,

    /// Per-GPU memory partitioned across models; `None` disables budgeting
    pub memory_limit_mb: Option<u64>,

    pub loader: Arc<dyn PlatformLoader>,
}

impl PlatformSpec {
    pub fn new(
        name: impl Into<String>,
        artifact_policy: ArtifactPolicy,
        loader: Arc<dyn PlatformLoader>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_policy,
            runtime: None,
            memory_limit_mb: None,
            loader,
        }
    }

    pub fn with_runtime(mut self, runtime: Arc<RuntimeContext>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_memory_limit_mb(mut self, memory_limit_mb: Option<u64>) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self
    }
}

impl std::fmt::Debug for PlatformSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSpec")
            .field("name", &self.name)
            .field("artifact_policy", &self.artifact_policy)
            .field("runtime", &self.runtime.as_ref().map(|runtime| runtime.name().to_string()))
            .field("memory_limit_mb", &self.memory_limit_mb)
            .finish()
    }
}

/// Platform specs keyed by platform name
#[derive(Debug, Default, Clone)]
pub struct PlatformRegistry {
    platforms: HashMap<String, PlatformSpec>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a platform, rejecting duplicate names
    pub fn register(&mut self, spec: PlatformSpec) -> Result<()> {
        if self.platforms.contains_key(&spec.name) {
            return Err(Error::config(format!("platform '{}' registered twice", spec.name)));
        }
        self.platforms.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PlatformSpec> {
        self.platforms.get(name)
    }

    /// Registered platform names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.platforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlatformSpec> {
        self.platforms.values()
    }
}

/// Registry holding every platform enabled in `config`
///
/// ONNX and GraphDef sessions are opened through `native_sessions`.
pub fn registry_from_config(
    config: &PlatformsConfig,
    native_sessions: Arc<dyn SessionBuilder>,
) -> Result<PlatformRegistry> {
    check_shared_memory_limit(config)?;
    let mut registry = PlatformRegistry::new();

    if let Some(onnx_config) = &config.onnxruntime_onnx {
        registry.register(onnx::platform_spec(
            onnx::runtime(onnx_config),
            Arc::clone(&native_sessions),
        ))?;
    }
    if let Some(graphdef_config) = &config.tensorflow_graphdef {
        registry.register(graphdef::platform_spec(graphdef_config, Arc::clone(&native_sessions)))?;
    }

    #[cfg(feature = "candle")]
    if let Some(candle_config) = &config.candle_safetensors {
        registry.register(candle::platform_spec(candle_config))?;
    }
    #[cfg(not(feature = "candle"))]
    if config.candle_safetensors.is_some() {
        return Err(Error::config("candle_safetensors requires the 'candle' feature"));
    }

    Ok(registry)
}

/// GraphDef and candle partition the same per-GPU tracker, so their
/// non-zero limits must agree
fn check_shared_memory_limit(config: &PlatformsConfig) -> Result<()> {
    let graphdef = config
        .tensorflow_graphdef
        .as_ref()
        .and_then(|c| memory_limit(c.memory_limit_mb));
    let candle = config
        .candle_safetensors
        .as_ref()
        .and_then(|c| memory_limit(c.memory_limit_mb));

    match (graphdef, candle) {
        (Some(g), Some(c)) if g != c => Err(Error::config(format!(
            "tensorflow_graphdef.memory_limit_mb ({}) and candle_safetensors.memory_limit_mb ({}) \
             share one device budget and must match",
            g, c
        ))),
        _ => Ok(()),
    }
}

/// Resolve the payload of a model artifact
///
/// Inline artifacts are handed over as bytes. A directory artifact must
/// contain `inner_file`; a file artifact is used as-is.
pub(crate) fn resolve_payload<'a>(
    artifact_name: &str,
    artifact: &'a Artifact,
    inner_file: &str,
    resolved: &'a mut Option<PathBuf>,
) -> Result<ModelPayload<'a>> {
    match artifact {
        Artifact::Inline(bytes) => Ok(ModelPayload::Bytes(bytes)),
        Artifact::ExternalPath(path) if path.is_dir() => {
            let inner = path.join(inner_file);
            if !inner.is_file() {
                return Err(Error::config(format!(
                    "model directory '{}' does not contain '{}'",
                    artifact_name, inner_file
                )));
            }
            Ok(ModelPayload::File(resolved.insert(inner)))
        }
        Artifact::ExternalPath(path) => Ok(ModelPayload::File(path)),
    }
}
