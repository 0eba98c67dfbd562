//! Per-job-code run locks.
//!
//! Concurrent runs of the same job code against the same target clash, so
//! a trigger for a job code that is already running is rejected rather
//! than queued. Distinct job codes run independently.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{EngineError, EngineResult};

/// In-process registry of job codes with a run in flight.
#[derive(Clone, Default)]
pub struct RunLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for a job code. Fails with `RunInProgress` when a run
    /// for the same code already holds it. The lock is released when the
    /// returned guard is dropped.
    pub fn acquire(&self, job_code: &str) -> EngineResult<RunLockGuard> {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(job_code.to_string()) {
            return Err(EngineError::RunInProgress(job_code.to_string()));
        }
        Ok(RunLockGuard {
            job_code: job_code.to_string(),
            held: Arc::clone(&self.held),
        })
    }
}

/// Holds the run lock for one job code until dropped.
#[derive(Debug)]
pub struct RunLockGuard {
    job_code: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.job_code);
    }
}
