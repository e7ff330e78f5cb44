//! Shared runtime state: the dwell interval and the running flag
//!
//! Both the beacon loop and the task worker read this state while task
//! handlers mutate it, so each field is an atomic. The running flag only ever
//! transitions true -> false.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Default dwell interval in seconds.
pub const DEFAULT_DWELL_SECS: u64 = 5;

#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("Dwell time must be a positive number of seconds")]
    InvalidDwell,
}

/// Process-wide mutable state, shared as `Arc<RuntimeState>`.
#[derive(Debug)]
pub struct RuntimeState {
    dwell_secs: AtomicU64,
    running: AtomicBool,
}

impl RuntimeState {
    /// Create state with the given dwell interval; zero falls back to the
    /// default so the invariant `dwell_secs > 0` holds from construction.
    pub fn new(dwell_secs: u64) -> Self {
        let dwell = if dwell_secs == 0 {
            DEFAULT_DWELL_SECS
        } else {
            dwell_secs
        };
        Self {
            dwell_secs: AtomicU64::new(dwell),
            running: AtomicBool::new(true),
        }
    }

    /// Current dwell interval. Concurrent updates take effect on the caller's
    /// next read, never retroactively.
    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_secs.load(Ordering::Relaxed))
    }

    pub fn dwell_secs(&self) -> u64 {
        self.dwell_secs.load(Ordering::Relaxed)
    }

    /// Update the dwell interval. Rejects zero.
    pub fn set_dwell_secs(&self, secs: u64) -> Result<(), StateError> {
        if secs == 0 {
            return Err(StateError::InvalidDwell);
        }
        self.dwell_secs.store(secs, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Clear the running flag. One-way: there is no way to set it back.
    pub fn request_exit(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(DEFAULT_DWELL_SECS)
    }
}
