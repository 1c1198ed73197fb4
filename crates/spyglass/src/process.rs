//! Process-wide profiling state
//!
//! One [`ProcessProfiler`] exists per server process, created at startup and
//! injected (`Arc`) wherever profiling is coordinated or intercepted. It
//! carries the process-visible enabled flag and the single shared sampler
//! that full-process sessions accumulate into.
//!
//! Full-process profiling is defined for single-worker deployments only, so
//! the flag needs no lock: a compare-and-swap precondition check covers the
//! one caller path that flips it.

use std::sync::atomic::{AtomicBool, Ordering};

use spyglass_common::{Result, SpyglassError};

use crate::sampler::{SampleBuffer, SharedSampler};

/// Process-scoped profiling flag plus the shared full-process sampler.
#[derive(Debug, Default)]
pub struct ProcessProfiler {
    enabled: AtomicBool,
    sampler: SharedSampler,
}

impl ProcessProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a full-process session is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the process flag on for a full-process session.
    ///
    /// Only one full-process session may be enabled at a time; a second
    /// activation fails without touching any state.
    pub fn activate(&self) -> Result<()> {
        self.enabled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                SpyglassError::Precondition(
                    "another full-process profiling session is already enabled".to_string(),
                )
            })?;
        Ok(())
    }

    /// Clear the process flag on disable.
    pub fn deactivate(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Handle to the shared sampler, for the interception scope and for
    /// threading into instrumented code.
    pub fn sampler(&self) -> SharedSampler {
        self.sampler.clone()
    }

    /// Snapshot of the shared sampler's accumulated buffer.
    pub fn buffer(&self) -> SampleBuffer {
        self.sampler.buffer()
    }

    /// Serialize the shared sampler's buffer.
    pub fn dump(&self) -> Result<Vec<u8>> {
        self.sampler.dump()
    }

    /// Wipe the shared sampler's accumulated buffer.
    pub fn clear(&self) {
        self.sampler.clear();
    }
}
