//! Run lifecycle: identifier allocation, run records, finalization.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::audit::AuditStore;
use crate::error::EngineResult;
use crate::model::{RunRecord, RunStatus};

/// Allocates run identifiers and threads them through the audit store.
pub struct RunTracker {
    audit: Arc<dyn AuditStore>,
}

impl RunTracker {
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        Self { audit }
    }

    /// Allocate a run identifier, unique across the lifetime of the system.
    pub fn new_run_id() -> Uuid {
        Uuid::new_v4()
    }

    /// Open a new run: allocate its id and persist the RUNNING record.
    pub async fn start_run(&self, job_code: &str) -> EngineResult<RunRecord> {
        let run = RunRecord {
            run_id: Self::new_run_id(),
            job_code: job_code.to_string(),
            start_time: Utc::now(),
            end_time: None,
            overall_status: RunStatus::Running,
        };

        self.audit.insert_run(&run).await?;
        tracing::info!(job_code, run_id = %run.run_id, "run started");
        Ok(run)
    }

    /// Close a run with its terminal status. Fails with `AlreadyFinalized`
    /// when called twice for the same run id.
    pub async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> EngineResult<()> {
        self.audit
            .finalize_run(run_id, status, Utc::now(), error)
            .await?;
        tracing::info!(run_id = %run_id, status = %status, "run finalized");
        Ok(())
    }
}
