//! Device inventory and placement

use crate::config::{DetectSpec, DevicesConfig};
use modelhost_core::Result;
use std::fmt;
use std::sync::Arc;

/// Kind of device a context can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// A device reported by the inventory
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub index: u32,
    pub name: String,

    /// Reported capability (CUDA compute capability for GPUs)
    pub capability: f64,

    pub memory_mb: Option<u64>,
}

impl DeviceInfo {
    /// The host CPU
    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            index: 0,
            name: "cpu".to_string(),
            capability: 0.0,
            memory_mb: None,
        }
    }

    /// A GPU with the given index and capability
    pub fn gpu(index: u32, capability: f64) -> Self {
        Self {
            kind: DeviceKind::Gpu,
            index,
            name: format!("gpu{}", index),
            capability,
            memory_mb: None,
        }
    }

    pub fn is_gpu(&self) -> bool {
        self.kind == DeviceKind::Gpu
    }
}

/// Where an execution context runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Cpu,
    Gpu(u32),
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu(index) => write!(f, "gpu{}", index),
        }
    }
}

/// Source of the devices available on this host
pub trait DeviceInventory: Send + Sync {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;
}

/// Fixed device list
#[derive(Debug, Clone)]
pub struct StaticInventory {
    devices: Vec<DeviceInfo>,
}

impl StaticInventory {
    /// The CPU plus the given GPUs
    pub fn with_gpus(gpus: impl IntoIterator<Item = DeviceInfo>) -> Self {
        let mut devices = vec![DeviceInfo::cpu()];
        devices.extend(gpus);
        Self { devices }
    }

    pub fn cpu_only() -> Self {
        Self::with_gpus(Vec::new())
    }
}

impl DeviceInventory for StaticInventory {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }
}

/// NVIDIA GPUs discovered through NVML, plus the CPU
#[cfg(feature = "nvml")]
pub struct NvmlInventory {
    nvml: nvml_wrapper::Nvml,
}

#[cfg(feature = "nvml")]
impl NvmlInventory {
    pub fn new() -> Result<Self> {
        let nvml = nvml_wrapper::Nvml::init().map_err(|e| {
            modelhost_core::Error::runtime_init(format!("Failed to initialize NVML: {}", e))
        })?;
        Ok(Self { nvml })
    }
}

#[cfg(feature = "nvml")]
impl DeviceInventory for NvmlInventory {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        use modelhost_core::Error;

        let nvml_err = |e: nvml_wrapper::error::NvmlError| Error::internal(format!("NVML query failed: {}", e));

        let count = self.nvml.device_count().map_err(nvml_err)?;
        let mut devices = vec![DeviceInfo::cpu()];

        for index in 0..count {
            let device = self.nvml.device_by_index(index).map_err(nvml_err)?;
            let cc = device.cuda_compute_capability().map_err(nvml_err)?;
            let memory = device.memory_info().map_err(nvml_err)?;

            devices.push(DeviceInfo {
                kind: DeviceKind::Gpu,
                index,
                name: device.name().map_err(nvml_err)?,
                capability: cc.major as f64 + cc.minor as f64 / 10.0,
                memory_mb: Some(memory.total / (1024 * 1024)),
            });
        }

        Ok(devices)
    }
}

/// Build the inventory described by the server configuration
pub fn inventory_from_config(config: &DevicesConfig) -> Result<Arc<dyn DeviceInventory>> {
    match config.detect {
        DetectSpec::Static => Ok(Arc::new(StaticInventory::with_gpus(
            config.gpus.iter().map(|gpu| gpu.to_device_info()),
        ))),
        #[cfg(feature = "nvml")]
        DetectSpec::Nvml => Ok(Arc::new(NvmlInventory::new()?)),
        #[cfg(not(feature = "nvml"))]
        DetectSpec::Nvml => Err(modelhost_core::Error::config(
            "NVML device detection requires the 'nvml' feature",
        )),
    }
}
