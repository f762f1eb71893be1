//! modelhost Backends
//!
//! Turns a model repository path and a model configuration into a backend
//! ready to serve inference.
//!
//! Loading runs in fixed stages:
//! - Localization: remote paths (`hf://`) are staged into a local directory
//! - Artifact collection: the version directory becomes a name-keyed map of
//!   inline bytes and external paths
//! - Placement: execution contexts are assigned to devices that meet the
//!   capability floor
//! - Context creation: device budget is reserved and one session is opened
//!   per context
//!
//! Platforms plug into this pipeline as [`PlatformSpec`] records. Native
//! runtimes are shared between factories through [`RuntimeContext`], and GPU
//! memory is partitioned through one [`DeviceBudgetTracker`].

pub mod artifact;
pub mod backend;
pub mod budget;
pub mod config;
pub mod device;
pub mod factory;
pub mod filesystem;
pub mod localize;
pub mod platform;
pub mod runtime;

pub use artifact::{collect_artifacts, Artifact, ArtifactMap, ArtifactPolicy};
pub use backend::{ExecutionContext, InferenceBackend, ModelBackend, Session, SessionRequest};
pub use budget::{BudgetReservation, DeviceBudgetTracker};
pub use config::{
    CandleBackendConfig, DetectSpec, DevicesConfig, GpuSpec, GraphDefBackendConfig,
    LocalizationConfig, OnnxBackendConfig, PlatformsConfig, ServerConfig,
};
pub use device::{inventory_from_config, DeviceInfo, DeviceInventory, DeviceKind, Placement, StaticInventory};
pub use factory::{BackendFactories, BackendFactory, SharedResources};
pub use localize::{DefaultLocalizer, HuggingFaceLocalizer, LocalFsLocalizer, LocalizedDirectory, Localizer};
pub use platform::{
    registry_from_config, ModelPayload, PlatformLoader, PlatformRegistry, PlatformSpec,
    SessionBuilder,
};
pub use runtime::{DynamicLibraryRuntime, NativeRuntime, RuntimeContext, RuntimeLease};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::InferenceBackend;
    pub use crate::config::ServerConfig;
    pub use crate::factory::{BackendFactories, BackendFactory, SharedResources};
    pub use crate::platform::{registry_from_config, PlatformRegistry, PlatformSpec, SessionBuilder};
    pub use modelhost_core::prelude::*;
}
