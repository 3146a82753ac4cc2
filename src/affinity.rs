//! # CPU Affinity Calibration
//!
//! When no core is pinned explicitly, the calibrator pins the current thread
//! to each candidate core in turn, runs a short probe workload there and keeps
//! the core that completed the most work. Cores are tried in ascending order
//! starting at 0; the first core the OS refuses ends the sweep, which on most
//! systems means "no more cores".
//!
//! Calibration measures the workload as it actually runs (interrupt routing,
//! SMT siblings, NUMA placement all show up in the numbers) instead of trying
//! to model the topology.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Highest core index the calibrator will try (exclusive)
pub const MAX_CANDIDATE_CORES: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AffinityError {
    #[error("operating system rejected binding to core {core}")]
    BindRejected { core: usize },

    #[error("no candidate core could be bound")]
    NoBindableCore,
}

/// Binds the calling thread to a single core
pub trait CpuBinder: Send + Sync {
    fn bind_current_thread(&self, core: usize) -> Result<(), AffinityError>;
}

/// [`CpuBinder`] backed by the `core_affinity` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreAffinityBinder;

impl CpuBinder for CoreAffinityBinder {
    fn bind_current_thread(&self, core: usize) -> Result<(), AffinityError> {
        if core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
            debug!(core, "bound current thread");
            Ok(())
        } else {
            Err(AffinityError::BindRejected { core })
        }
    }
}

/// Throughput measured on one core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreProbe {
    pub core: usize,
    pub sends: u64,
}

/// Outcome of a calibration sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    pub best_core: usize,
    /// Every probed core, in the order tried
    pub probes: Vec<CoreProbe>,
}

pub struct Calibrator<B: CpuBinder> {
    binder: B,
    max_cores: usize,
}

impl<B: CpuBinder> Calibrator<B> {
    pub fn new(binder: B) -> Self {
        Self {
            binder,
            max_cores: MAX_CANDIDATE_CORES,
        }
    }

    /// Limit the sweep to cores `0..max_cores`
    pub fn with_max_cores(mut self, max_cores: usize) -> Self {
        self.max_cores = max_cores.min(MAX_CANDIDATE_CORES);
        self
    }

    pub fn binder(&self) -> &B {
        &self.binder
    }

    /// Sweep the candidate cores and leave the calling thread bound to the best.
    ///
    /// `probe` runs on the calling thread after it has been bound to `core` and
    /// returns the amount of work completed. Ties keep the lower core.
    pub fn run<F>(&self, mut probe: F) -> Result<Calibration>
    where
        F: FnMut(usize) -> Result<u64>,
    {
        let mut probes = Vec::new();
        let mut best: Option<CoreProbe> = None;

        for core in 0..self.max_cores {
            if let Err(e) = self.binder.bind_current_thread(core) {
                debug!(core, error = %e, "ending calibration sweep");
                break;
            }

            let sends = probe(core).with_context(|| format!("probe on core {core} failed"))?;
            let result = CoreProbe { core, sends };
            info!(core, sends, "calibration probe complete");
            probes.push(result);

            if best.map_or(true, |b| sends > b.sends) {
                best = Some(result);
            }
        }

        let best = best.ok_or(AffinityError::NoBindableCore)?;
        self.binder
            .bind_current_thread(best.core)
            .context("failed to re-bind to the calibrated core")?;
        info!(best_core = best.core, sends = best.sends, "calibration selected core");

        Ok(Calibration {
            best_core: best.core,
            probes,
        })
    }
}
