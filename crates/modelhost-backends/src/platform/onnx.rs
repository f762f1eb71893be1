//! ONNX models served through ONNX Runtime

use super::{resolve_payload, ModelPayload, PlatformLoader, PlatformSpec, SessionBuilder};
use crate::artifact::ArtifactPolicy;
use crate::backend::{Session, SessionRequest};
use crate::config::OnnxBackendConfig;
use crate::runtime::{DynamicLibraryRuntime, RuntimeContext};
use modelhost_core::{Result, ONNX_RUNTIME_ONNX_PLATFORM};
use std::sync::Arc;
use tracing::debug;

/// Default model artifact, a file or a directory containing it
pub const DEFAULT_MODEL_FILENAME: &str = "model.onnx";

/// Environment variable naming the runtime library
pub const ORT_DYLIB_ENV: &str = "ORT_DYLIB_PATH";

const ORT_LIBRARY_NAME: &str = "onnxruntime";
const ORT_ENTRY_SYMBOL: &str = "OrtGetApiBase";

/// Shared ONNX Runtime context for this process
pub fn runtime(config: &OnnxBackendConfig) -> Arc<RuntimeContext> {
    let candidates =
        DynamicLibraryRuntime::candidates(config.library_path.clone(), ORT_DYLIB_ENV, ORT_LIBRARY_NAME);
    RuntimeContext::new(Box::new(DynamicLibraryRuntime::new(
        "onnxruntime",
        candidates,
        ORT_ENTRY_SYMBOL,
    )))
}

/// Platform spec for `onnxruntime_onnx`
pub fn platform_spec(runtime: Arc<RuntimeContext>, sessions: Arc<dyn SessionBuilder>) -> PlatformSpec {
    PlatformSpec::new(
        ONNX_RUNTIME_ONNX_PLATFORM,
        ArtifactPolicy::InlineFilesAndSubdirs,
        Arc::new(OnnxLoader { sessions }),
    )
    .with_runtime(runtime)
}

struct OnnxLoader {
    sessions: Arc<dyn SessionBuilder>,
}

impl PlatformLoader for OnnxLoader {
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
        debug!("Opening ONNX session {} from {}", request.context_name, payload_kind(&payload));
        self.sessions.build(payload, request)
    }
}

fn payload_kind(payload: &ModelPayload<'_>) -> String {
    match payload {
        ModelPayload::Bytes(bytes) => format!("{} inline bytes", bytes.len()),
        ModelPayload::File(path) => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactMap};
    use crate::device::Placement;
    use modelhost_core::{InferTensor, ModelConfig};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBuilder {
        seen: Mutex<Vec<String>>,
    }

    struct Noop;

    impl Session for Noop {
        fn run(&self, _inputs: &[InferTensor]) -> Result<Vec<InferTensor>> {
            Ok(Vec::new())
        }
    }

    impl SessionBuilder for RecordingBuilder {
        fn build(&self, payload: ModelPayload<'_>, request: &SessionRequest<'_>) -> Result<Box<dyn Session>> {
            self.seen
                .lock()
                .push(format!("{}:{}", request.context_name, payload_kind(&payload)));
            Ok(Box::new(Noop))
        }
    }

    #[test]
    fn test_spec_shape() {
        let runtime = runtime(&OnnxBackendConfig::default());
        let spec = platform_spec(Arc::clone(&runtime), Arc::new(RecordingBuilder::default()));

        assert_eq!(spec.name, ONNX_RUNTIME_ONNX_PLATFORM);
        assert_eq!(spec.artifact_policy, ArtifactPolicy::InlineFilesAndSubdirs);
        assert!(spec.runtime.is_some());
        assert!(spec.memory_limit_mb.is_none());
        assert_eq!(spec.loader.default_model_filename(), "model.onnx");
        assert_eq!(runtime.users(), 0);
    }

    #[test]
    fn test_inline_model_is_passed_as_bytes() {
        let builder = Arc::new(RecordingBuilder::default());
        let loader = OnnxLoader {
            sessions: builder.clone(),
        };

        let artifact = Artifact::Inline(vec![0u8; 16]);
        let artifacts = ArtifactMap::new();
        let config = ModelConfig::new("m", ONNX_RUNTIME_ONNX_PLATFORM);
        let request = SessionRequest {
            model: &config,
            context_name: "m_0_0_cpu",
            placement: Placement::Cpu,
            artifact_name: "model.onnx",
            artifact: &artifact,
            artifacts: &artifacts,
        };

        loader.open_session(&request).unwrap();
        assert_eq!(builder.seen.lock().as_slice(), ["m_0_0_cpu:16 inline bytes"]);
    }
}
