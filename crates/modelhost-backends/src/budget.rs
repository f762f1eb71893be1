//! Partitioning of per-GPU memory across concurrently loaded models
//!
//! One tracker is created at server startup and shared by every factory
//! that manages device memory. All mutation happens under a single lock so
//! two models loading on the same GPU never both receive the same budget.

use modelhost_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Remaining budget per GPU index
#[derive(Debug, Default)]
pub struct DeviceBudgetTracker {
    state: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    total_per_device: Option<u64>,
    remaining: HashMap<u32, u64>,
}

impl DeviceBudgetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish the per-device budget in MB
    ///
    /// Repeating the same value is a no-op; a different value is rejected.
    pub fn init(&self, total_per_device: u64) -> Result<()> {
        let mut state = self.state.lock();
        match state.total_per_device {
            None => {
                debug!("Device budget initialized at {} MB per device", total_per_device);
                state.total_per_device = Some(total_per_device);
                Ok(())
            }
            Some(existing) if existing == total_per_device => Ok(()),
            Some(existing) => Err(Error::config(format!(
                "device budget already initialized at {} MB, cannot change to {} MB",
                existing, total_per_device
            ))),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().total_per_device.is_some()
    }

    /// Per-device budget, if initialized
    pub fn total_per_device(&self) -> Option<u64> {
        self.state.lock().total_per_device
    }

    /// Take `amount` MB from `device`
    pub fn reserve(&self, device: u32, amount: u64) -> Result<()> {
        let mut state = self.state.lock();
        let total = state
            .total_per_device
            .ok_or_else(|| Error::budget("device budget has not been initialized"))?;

        let remaining = state.remaining.entry(device).or_insert(total);
        if *remaining < amount {
            return Err(Error::budget(format!(
                "insufficient budget on gpu{}: requested {} MB, {} MB remaining",
                device, amount, remaining
            )));
        }

        *remaining -= amount;
        debug!("Reserved {} MB on gpu{} ({} MB remaining)", amount, device, remaining);
        Ok(())
    }

    /// Return `amount` MB to `device`; unknown devices are ignored
    pub fn release(&self, device: u32, amount: u64) {
        let mut state = self.state.lock();
        let Some(total) = state.total_per_device else {
            return;
        };
        if let Some(remaining) = state.remaining.get_mut(&device) {
            *remaining = remaining.saturating_add(amount).min(total);
            debug!("Released {} MB on gpu{} ({} MB remaining)", amount, device, remaining);
        }
    }

    /// Budget left on `device`, if initialized
    pub fn remaining(&self, device: u32) -> Option<u64> {
        let state = self.state.lock();
        let total = state.total_per_device?;
        Some(state.remaining.get(&device).copied().unwrap_or(total))
    }

    /// Reserve and return a guard that releases on drop
    pub fn reserve_guard(self: &Arc<Self>, device: u32, amount: u64) -> Result<BudgetReservation> {
        self.reserve(device, amount)?;
        Ok(BudgetReservation {
            tracker: Arc::clone(self),
            device,
            amount,
        })
    }
}

/// Budget held by an execution context
#[derive(Debug)]
pub struct BudgetReservation {
    tracker: Arc<DeviceBudgetTracker>,
    device: u32,
    amount: u64,
}

impl BudgetReservation {
    pub fn device(&self) -> u32 {
        self.device
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Drop for BudgetReservation {
    fn drop(&mut self) {
        self.tracker.release(self.device, self.amount);
    }
}
