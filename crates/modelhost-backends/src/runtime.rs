//! Process-wide native runtime lifecycle
//!
//! A [`RuntimeContext`] owns one native runtime and counts the factories
//! using it. The first [`acquire`](RuntimeContext::acquire) initializes the
//! runtime, dropping the last [`RuntimeLease`] tears it down, and both
//! transitions happen under the same lock.

use libloading::Library;
use modelhost_core::{Error, Result};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Global setup and teardown of a native inference runtime
pub trait NativeRuntime: Send + Sync {
    /// Runtime name for logs
    fn name(&self) -> &str;

    /// One-time global initialization
    fn init(&self) -> Result<()>;

    /// Global teardown, only called after a successful `init`
    fn stop(&self);
}

/// Reference-counted owner of a native runtime
pub struct RuntimeContext {
    runtime: Box<dyn NativeRuntime>,
    users: Mutex<usize>,
}

impl RuntimeContext {
    pub fn new(runtime: Box<dyn NativeRuntime>) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            users: Mutex::new(0),
        })
    }

    pub fn name(&self) -> &str {
        self.runtime.name()
    }

    /// Register a user, initializing the runtime on the first one
    pub fn acquire(self: &Arc<Self>) -> Result<RuntimeLease> {
        let mut users = self.users.lock();
        if *users == 0 {
            info!("Initializing {} runtime", self.runtime.name());
            self.runtime.init()?;
        }
        *users += 1;
        debug!("{} runtime acquired ({} users)", self.runtime.name(), *users);

        Ok(RuntimeLease {
            context: Arc::clone(self),
        })
    }

    /// Number of live leases
    pub fn users(&self) -> usize {
        *self.users.lock()
    }

    fn release(&self) {
        let mut users = self.users.lock();
        match *users {
            0 => warn!("{} runtime released with no users", self.runtime.name()),
            1 => {
                *users = 0;
                info!("Stopping {} runtime", self.runtime.name());
                self.runtime.stop();
            }
            _ => *users -= 1,
        }
    }
}

/// Keeps a runtime initialized while held
pub struct RuntimeLease {
    context: Arc<RuntimeContext>,
}

impl RuntimeLease {
    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }
}

impl Drop for RuntimeLease {
    fn drop(&mut self) {
        self.context.release();
    }
}

/// Runtime provided by a shared library loaded at init
///
/// Initialization opens the library and resolves `entry_symbol`, so a
/// missing or incompatible install fails before any model is loaded.
pub struct DynamicLibraryRuntime {
    name: String,
    candidates: Vec<OsString>,
    entry_symbol: String,
    library: Mutex<Option<Library>>,
}

impl DynamicLibraryRuntime {
    pub fn new(
        name: impl Into<String>,
        candidates: Vec<OsString>,
        entry_symbol: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            candidates,
            entry_symbol: entry_symbol.into(),
            library: Mutex::new(None),
        }
    }

    /// Candidate list: explicit path, then `env_var`, then the default name
    pub fn candidates(explicit: Option<PathBuf>, env_var: &str, default_name: &str) -> Vec<OsString> {
        let mut candidates = Vec::new();
        if let Some(path) = explicit {
            candidates.push(path.into_os_string());
        }
        if let Some(path) = std::env::var_os(env_var) {
            candidates.push(path);
        }
        candidates.push(libloading::library_filename(default_name));
        candidates
    }

    pub fn is_loaded(&self) -> bool {
        self.library.lock().is_some()
    }
}

impl NativeRuntime for DynamicLibraryRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self) -> Result<()> {
        let mut slot = self.library.lock();
        if slot.is_some() {
            return Ok(());
        }

        let mut failures = Vec::new();
        for candidate in &self.candidates {
            // SAFETY: loading runs the library's initializers; candidates are
            // operator-configured runtime installs.
            let library = match unsafe { Library::new(candidate) } {
                Ok(library) => library,
                Err(e) => {
                    failures.push(format!("{}: {}", candidate.to_string_lossy(), e));
                    continue;
                }
            };

            // SAFETY: the symbol is only checked for presence, never called.
            let probe = unsafe { library.get::<unsafe extern "C" fn()>(self.entry_symbol.as_bytes()) };
            if let Err(e) = probe {
                failures.push(format!(
                    "{}: missing symbol {}: {}",
                    candidate.to_string_lossy(),
                    self.entry_symbol,
                    e
                ));
                continue;
            }

            info!("Loaded {} runtime from {}", self.name, candidate.to_string_lossy());
            *slot = Some(library);
            return Ok(());
        }

        Err(Error::runtime_init(format!(
            "unable to load {} runtime: {}",
            self.name,
            failures.join("; ")
        )))
    }

    fn stop(&self) {
        if self.library.lock().take().is_some() {
            debug!("Unloaded {} runtime library", self.name);
        }
    }
}
