//! Backend instances and their execution contexts

use crate::artifact::{Artifact, ArtifactMap};
use crate::budget::{BudgetReservation, DeviceBudgetTracker};
use crate::device::{DeviceInfo, Placement};
use crate::platform::PlatformLoader;
use modelhost_core::{Error, InferTensor, InstanceKind, ModelConfig, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A model loaded into a native runtime for one context
pub trait Session: Send + Sync {
    /// Run the model on `inputs`
    fn run(&self, inputs: &[InferTensor]) -> Result<Vec<InferTensor>>;
}

/// Everything a platform needs to open a session for one context
pub struct SessionRequest<'a> {
    pub model: &'a ModelConfig,
    pub context_name: &'a str,
    pub placement: Placement,

    /// Name and content of the artifact holding the model
    pub artifact_name: &'a str,
    pub artifact: &'a Artifact,

    /// The full artifact map, for auxiliary files
    pub artifacts: &'a ArtifactMap,
}

/// The serving-layer view of a loaded model version
pub trait InferenceBackend: Send + Sync {
    /// Model name
    fn name(&self) -> &str;

    /// Platform identifier
    fn platform(&self) -> &str;

    /// Number of execution contexts created
    fn execution_context_count(&self) -> usize;

    /// Created execution contexts
    fn contexts(&self) -> &[ExecutionContext];

    /// Run inference on the next execution context
    fn infer(&self, inputs: &[InferTensor]) -> Result<Vec<InferTensor>>;
}

/// One independently invocable replica of a model
pub struct ExecutionContext {
    name: String,
    placement: Placement,
    session: Box<dyn Session>,
    reservation: Option<BudgetReservation>,
}

impl ExecutionContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Device memory held by this context, in MB
    pub fn reserved_mb(&self) -> u64 {
        self.reservation.as_ref().map_or(0, BudgetReservation::amount)
    }

    pub fn run(&self, inputs: &[InferTensor]) -> Result<Vec<InferTensor>> {
        self.session.run(inputs)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("placement", &self.placement)
            .field("reserved_mb", &self.reserved_mb())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedContext {
    name: String,
    placement: Placement,
    memory_mb: Option<u64>,
}

/// Backend instance shared by every platform
///
/// Construction applies the capability floor, [`init`](Self::init) binds the
/// model configuration and plans context placement, and
/// [`create_execution_contexts`](Self::create_execution_contexts) reserves
/// device budget and opens one session per context.
pub struct ModelBackend {
    loader: Arc<dyn PlatformLoader>,
    budget: Option<Arc<DeviceBudgetTracker>>,
    min_capability: f64,
    cpu: Option<DeviceInfo>,
    eligible_gpus: Vec<DeviceInfo>,
    excluded_gpus: Vec<DeviceInfo>,

    source_path: String,
    platform: String,
    config: Option<ModelConfig>,
    planned: Vec<PlannedContext>,

    contexts: Vec<ExecutionContext>,
    next_context: AtomicUsize,
}

impl ModelBackend {
    /// Create a backend that only places contexts on devices at or above
    /// `min_capability`
    ///
    /// Groups pinned to `kind: cpu` are the only ones exempt from the floor.
    /// Fails when neither a CPU nor an eligible GPU remains.
    pub fn new(
        min_capability: f64,
        devices: Vec<DeviceInfo>,
        budget: Option<Arc<DeviceBudgetTracker>>,
        loader: Arc<dyn PlatformLoader>,
    ) -> Result<Self> {
        let cpu = devices.iter().find(|device| !device.is_gpu()).cloned();
        let (eligible_gpus, excluded_gpus): (Vec<_>, Vec<_>) = devices
            .into_iter()
            .filter(DeviceInfo::is_gpu)
            .partition(|gpu| gpu.capability >= min_capability);

        for gpu in &excluded_gpus {
            debug!(
                "Excluding {} (capability {}) below minimum {}",
                gpu.name, gpu.capability, min_capability
            );
        }

        if cpu.is_none() && eligible_gpus.is_empty() {
            return Err(Error::capability(format!(
                "no device meets minimum capability {} (available: {})",
                min_capability,
                describe(&excluded_gpus)
            )));
        }

        Ok(Self {
            loader,
            budget,
            min_capability,
            cpu,
            eligible_gpus,
            excluded_gpus,
            source_path: String::new(),
            platform: String::new(),
            config: None,
            planned: Vec::new(),
            contexts: Vec::new(),
            next_context: AtomicUsize::new(0),
        })
    }

    /// Bind the model configuration and plan context placement
    pub fn init(&mut self, path: &str, config: &ModelConfig, platform: &str) -> Result<()> {
        if config.platform != platform {
            return Err(Error::config(format!(
                "model '{}' targets platform '{}', expected '{}'",
                config.name, config.platform, platform
            )));
        }
        self.loader.validate(config)?;

        self.planned = self.plan_contexts(config)?;
        self.source_path = path.to_string();
        self.platform = platform.to_string();
        self.config = Some(config.clone());
        Ok(())
    }

    /// Open every planned context from the artifact map
    pub fn create_execution_contexts(&mut self, artifacts: &ArtifactMap) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::internal("execution contexts requested before init"))?;

        let artifact_name = config
            .default_model_filename
            .as_deref()
            .unwrap_or_else(|| self.loader.default_model_filename());
        let artifact = artifacts.get(artifact_name).ok_or_else(|| {
            Error::config(format!(
                "unable to find '{}' in model version directory '{}'",
                artifact_name, self.source_path
            ))
        })?;

        let mut estimated_mb = None;
        let mut contexts = Vec::with_capacity(self.planned.len());

        for planned in &self.planned {
            let reservation = match (planned.placement, &self.budget) {
                (Placement::Gpu(index), Some(budget)) => {
                    let amount = match planned.memory_mb {
                        Some(mb) => mb,
                        None => match estimated_mb {
                            Some(mb) => mb,
                            None => {
                                let mb = self.loader.context_memory_mb(artifact)?;
                                estimated_mb = Some(mb);
                                mb
                            }
                        },
                    };
                    Some(budget.reserve_guard(index, amount)?)
                }
                _ => None,
            };

            let request = SessionRequest {
                model: config,
                context_name: &planned.name,
                placement: planned.placement,
                artifact_name,
                artifact,
                artifacts,
            };
            let session = self.loader.open_session(&request)?;

            debug!(
                "Created execution context {} on {} ({} MB reserved)",
                planned.name,
                planned.placement,
                reservation.as_ref().map_or(0, BudgetReservation::amount)
            );

            contexts.push(ExecutionContext {
                name: planned.name.clone(),
                placement: planned.placement,
                session,
                reservation,
            });
        }

        info!(
            "Model '{}' ready with {} execution contexts",
            config.name,
            contexts.len()
        );
        metrics::gauge!("modelhost_execution_contexts", "platform" => self.platform.clone())
            .increment(contexts.len() as f64);
        self.contexts = contexts;
        Ok(())
    }

    /// Path the model was loaded from
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn min_capability(&self) -> f64 {
        self.min_capability
    }

    fn plan_contexts(&self, config: &ModelConfig) -> Result<Vec<PlannedContext>> {
        let has_gpus = !self.eligible_gpus.is_empty() || !self.excluded_gpus.is_empty();
        let mut planned = Vec::new();

        for (g, group) in config.effective_instance_groups().iter().enumerate() {
            if group.count == 0 {
                return Err(Error::config(format!(
                    "instance group {} of model '{}' has count 0",
                    g, config.name
                )));
            }

            let group_name = group
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}", config.name, g));

            let kind = match group.kind {
                InstanceKind::Auto if has_gpus => InstanceKind::Gpu,
                InstanceKind::Auto => {
                    self.check_cpu_floor()?;
                    InstanceKind::Cpu
                }
                kind => kind,
            };

            let placements = match kind {
                InstanceKind::Gpu => self
                    .target_gpus(&group.gpus)?
                    .into_iter()
                    .map(Placement::Gpu)
                    .collect(),
                _ if self.cpu.is_some() => vec![Placement::Cpu],
                _ => {
                    return Err(Error::config(format!(
                        "instance group {} of model '{}' needs a CPU, none available",
                        g, config.name
                    )))
                }
            };

            for placement in placements {
                for c in 0..group.count {
                    planned.push(PlannedContext {
                        name: format!("{}_{}_{}", group_name, c, placement),
                        placement,
                        memory_mb: group.memory_mb,
                    });
                }
            }
        }

        Ok(planned)
    }

    fn check_cpu_floor(&self) -> Result<()> {
        match &self.cpu {
            Some(cpu) if cpu.capability < self.min_capability => Err(Error::capability(format!(
                "no device meets minimum capability {} (available: {} capability {})",
                self.min_capability, cpu.name, cpu.capability
            ))),
            _ => Ok(()),
        }
    }

    fn target_gpus(&self, requested: &[u32]) -> Result<Vec<u32>> {
        if requested.is_empty() {
            if self.eligible_gpus.is_empty() {
                return Err(Error::capability(format!(
                    "no GPU meets minimum capability {} (available: {})",
                    self.min_capability,
                    describe(&self.excluded_gpus)
                )));
            }
            return Ok(self.eligible_gpus.iter().map(|gpu| gpu.index).collect());
        }

        let mut targets = Vec::with_capacity(requested.len());
        for &index in requested {
            if self.eligible_gpus.iter().any(|gpu| gpu.index == index) {
                targets.push(index);
            } else if let Some(gpu) = self.excluded_gpus.iter().find(|gpu| gpu.index == index) {
                return Err(Error::capability(format!(
                    "gpu{} has capability {}, below minimum {}",
                    index, gpu.capability, self.min_capability
                )));
            } else {
                return Err(Error::config(format!("gpu{} is not available", index)));
            }
        }
        Ok(targets)
    }
}

fn describe(gpus: &[DeviceInfo]) -> String {
    if gpus.is_empty() {
        return "none".to_string();
    }
    gpus.iter()
        .map(|gpu| format!("{} capability {}", gpu.name, gpu.capability))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Drop for ModelBackend {
    fn drop(&mut self) {
        if !self.contexts.is_empty() {
            metrics::gauge!("modelhost_execution_contexts", "platform" => self.platform.clone())
                .decrement(self.contexts.len() as f64);
        }
    }
}

impl InferenceBackend for ModelBackend {
    fn name(&self) -> &str {
        self.config.as_ref().map_or("", |config| config.name.as_str())
    }

    fn platform(&self) -> &str {
        &self.platform
    }

    fn execution_context_count(&self) -> usize {
        self.contexts.len()
    }

    fn contexts(&self) -> &[ExecutionContext] {
        &self.contexts
    }

    fn infer(&self, inputs: &[InferTensor]) -> Result<Vec<InferTensor>> {
        if self.contexts.is_empty() {
            return Err(Error::inference(format!(
                "model '{}' has no execution contexts",
                self.name()
            )));
        }
        let index = self.next_context.fetch_add(1, Ordering::Relaxed) % self.contexts.len();
        self.contexts[index].run(inputs)
    }
}
