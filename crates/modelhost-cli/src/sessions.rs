//! Sessions for platforms whose execution engine is not linked in
//!
//! The loader checks that the model payload is present and readable so
//! `modelhost load` can validate ONNX and GraphDef repositories. Inference
//! on these sessions reports that no engine is available.

use modelhost_backends::platform::{ModelPayload, SessionBuilder};
use modelhost_backends::{Session, SessionRequest};
use modelhost_core::{Error, InferTensor, Result};
use tracing::debug;

pub struct LoadOnlySessions;

impl SessionBuilder for LoadOnlySessions {
    fn build(&self, payload: ModelPayload<'_>, request: &SessionRequest<'_>) -> Result<Box<dyn Session>> {
        let size = match payload {
            ModelPayload::Bytes(bytes) => bytes.len() as u64,
            ModelPayload::File(path) => std::fs::metadata(path)
                .map_err(|e| Error::io(path, e))?
                .len(),
        };
        if size == 0 {
            return Err(Error::config(format!("model artifact '{}' is empty", request.artifact_name)));
        }

        debug!("Validated {} ({} bytes) for {}", request.artifact_name, size, request.context_name);
        Ok(Box::new(LoadOnlySession {
            platform: request.model.platform.clone(),
        }))
    }
}

struct LoadOnlySession {
    platform: String,
}

impl Session for LoadOnlySession {
    fn run(&self, _inputs: &[InferTensor]) -> Result<Vec<InferTensor>> {
        Err(Error::inference(format!(
            "no {} execution engine is linked into this binary",
            self.platform
        )))
    }
}
