//! Error types for modelhost

use std::path::{Path, PathBuf};

/// Result type alias using modelhost's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for backend loading operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Remote fetch or path resolution failed
    #[error("localization error: {0}")]
    Localization(String),

    /// Directory listing or file read failed
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Native runtime failed global initialization
    #[error("runtime initialization error: {0}")]
    RuntimeInit(String),

    /// No device satisfies the capability floor
    #[error("capability error: {0}")]
    Capability(String),

    /// Not enough shared device budget for the requested contexts
    #[error("budget error: {0}")]
    Budget(String),

    /// Model or backend configuration incompatible with the platform
    #[error("configuration error: {0}")]
    Config(String),

    /// Inference request rejected or failed inside a session
    #[error("inference error: {0}")]
    Inference(String),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new localization error
    pub fn localization(msg: impl Into<String>) -> Self {
        Self::Localization(msg.into())
    }

    /// Create a new io error bound to the path that failed
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a new runtime initialization error
    pub fn runtime_init(msg: impl Into<String>) -> Self {
        Self::RuntimeInit(msg.into())
    }

    /// Create a new capability error
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    /// Create a new budget error
    pub fn budget(msg: impl Into<String>) -> Self {
        Self::Budget(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Name of the loading stage this error belongs to
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Localization(_) => "localize",
            Self::Io { .. } => "collect",
            Self::RuntimeInit(_) => "runtime-init",
            Self::Capability(_) => "placement",
            Self::Budget(_) => "reserve",
            Self::Config(_) => "init",
            Self::Inference(_) => "infer",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}
