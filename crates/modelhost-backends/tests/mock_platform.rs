//! Mock platform pieces for testing
//!
//! Provides configurable implementations of the runtime, loader, and
//! localizer seams so factory behavior can be tested without native
//! runtimes or GPUs.

#![allow(dead_code)]

use modelhost_backends::backend::{Session, SessionRequest};
use modelhost_backends::localize::{stage_copy, LocalizedDirectory, Localizer};
use modelhost_backends::platform::PlatformLoader;
use modelhost_backends::runtime::NativeRuntime;
use modelhost_backends::{Artifact, LocalizationConfig};
use modelhost_core::{Error, InferTensor, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Runtime that counts init and stop calls, optionally failing init
#[derive(Clone, Default)]
pub struct MockRuntime {
    inits: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    fail_init: bool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a missing native library
    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl NativeRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn init(&self) -> Result<()> {
        if self.fail_init {
            return Err(Error::runtime_init("libmock.so: cannot open shared object file"));
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader whose sessions echo their inputs
#[derive(Default)]
pub struct MockLoader {
    context_memory_mb: Option<u64>,
    fail_on_session: Option<usize>,
    opened: AtomicUsize,
    placements: Mutex<Vec<String>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed per-context memory estimate
    pub fn with_context_memory_mb(mut self, mb: u64) -> Self {
        self.context_memory_mb = Some(mb);
        self
    }

    /// Fail when opening the `n`th session (0-based)
    pub fn failing_on_session(mut self, n: usize) -> Self {
        self.fail_on_session = Some(n);
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Placements of every opened session, in order
    pub fn placements(&self) -> Vec<String> {
        self.placements.lock().clone()
    }
}

impl PlatformLoader for MockLoader {
    fn default_model_filename(&self) -> &str {
        "model.bin"
    }

    fn context_memory_mb(&self, artifact: &Artifact) -> Result<u64> {
        match self.context_memory_mb {
            Some(mb) => Ok(mb),
            None => Ok(artifact.size_bytes()?.div_ceil(1024 * 1024).max(1)),
        }
    }

    fn open_session(&self, request: &SessionRequest<'_>) -> Result<Box<dyn Session>> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_session == Some(n) {
            return Err(Error::internal(format!("session {} failed to open", request.context_name)));
        }
        self.placements.lock().push(request.placement.to_string());
        Ok(Box::new(EchoSession))
    }
}

pub struct EchoSession;

impl Session for EchoSession {
    fn run(&self, inputs: &[InferTensor]) -> Result<Vec<InferTensor>> {
        Ok(inputs.to_vec())
    }
}

/// Localizer that stages a copy of a local directory, like a remote fetch
pub struct StagingLocalizer {
    config: LocalizationConfig,
    staged: Mutex<Vec<PathBuf>>,
}

impl StagingLocalizer {
    pub fn new(staging_root: &Path) -> Self {
        Self {
            config: LocalizationConfig {
                staging_dir: Some(staging_root.to_path_buf()),
                hub_cache_dir: None,
            },
            staged: Mutex::new(Vec::new()),
        }
    }

    /// Every staged path handed out so far
    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.staged.lock().clone()
    }
}

impl Localizer for StagingLocalizer {
    fn localize(&self, path: &str) -> Result<Arc<LocalizedDirectory>> {
        let source = path.strip_prefix("mock://").unwrap_or(path);
        let localized = stage_copy(path, Path::new(source), &self.config)?;
        self.staged.lock().push(localized.path().to_path_buf());
        Ok(localized)
    }
}

/// Version directory holding `model.bin` of `size` bytes
pub fn model_dir(size: usize) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("model.bin"), vec![7u8; size]).unwrap();
    dir
}
