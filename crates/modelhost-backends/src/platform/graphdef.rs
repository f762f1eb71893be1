//! Frozen TensorFlow GraphDef models

use super::{resolve_payload, PlatformLoader, PlatformSpec, SessionBuilder};
use crate::artifact::ArtifactPolicy;
use crate::backend::{Session, SessionRequest};
use crate::config::{memory_limit, GraphDefBackendConfig};
use modelhost_core::{Result, TENSORFLOW_GRAPHDEF_PLATFORM};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MODEL_FILENAME: &str = "model.graphdef";

/// Platform spec for `tensorflow_graphdef`
///
/// GraphDef sessions read their model from disk, so every file is passed
/// by path. A non-zero `memory_limit_mb` partitions each GPU across models.
pub fn platform_spec(config: &GraphDefBackendConfig, sessions: Arc<dyn SessionBuilder>) -> PlatformSpec {
    PlatformSpec::new(
        TENSORFLOW_GRAPHDEF_PLATFORM,
        ArtifactPolicy::FilePaths,
        Arc::new(GraphDefLoader { sessions }),
    )
    .with_memory_limit_mb(memory_limit(config.memory_limit_mb))
}

struct GraphDefLoader {
    sessions: Arc<dyn SessionBuilder>,
}

impl PlatformLoader for GraphDefLoader {
    fn default_model_filename(&self) -> &str {
        DEFAULT_MODEL_FILENAME
    }

    fn open_session(&self, request: &SessionRequest<'_>) -> Result<Box<dyn Session>> {
        let mut resolved = None;
        let payload = resolve_payload(
            request.artifact_name,
            request.artifact,
            DEFAULT_MODEL_FILENAME,
            &mut resolved,
        )?;
        debug!("Opening GraphDef session {} on {}", request.context_name, request.placement);
        self.sessions.build(payload, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ModelPayload;

    struct Unused;

    impl SessionBuilder for Unused {
        fn build(&self, _payload: ModelPayload<'_>, _request: &SessionRequest<'_>) -> Result<Box<dyn Session>> {
            Err(modelhost_core::Error::internal("unused"))
        }
    }

    #[test]
    fn test_memory_limit_enables_budget() {
        let spec = platform_spec(&GraphDefBackendConfig { memory_limit_mb: 2048 }, Arc::new(Unused));
        assert_eq!(spec.memory_limit_mb, Some(2048));
        assert_eq!(spec.artifact_policy, ArtifactPolicy::FilePaths);
        assert!(spec.runtime.is_none());

        let spec = platform_spec(&GraphDefBackendConfig::default(), Arc::new(Unused));
        assert_eq!(spec.memory_limit_mb, None);
        assert_eq!(spec.loader.default_model_filename(), "model.graphdef");
    }
}
