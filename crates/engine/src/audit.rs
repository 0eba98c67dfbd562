//! Audit persistence: run records and step execution logs.
//!
//! The audit tables are the sole source of truth for diagnosing runs. The
//! engine owns their lifecycle for the duration of a run; once a run ends
//! its rows belong to history and are never rewritten or deleted.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::{RunRecord, RunStatus, StepLog};
use crate::template::{opt_literal, quote_literal, ts_literal};
use crate::warehouse::Warehouse;

/// Write access to the run and step audit tables.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist the initial RUNNING run record. A run-id collision must
    /// surface as an error, never be retried silently.
    async fn insert_run(&self, run: &RunRecord) -> EngineResult<()>;

    /// Set the end time and terminal status of a run, exactly once.
    /// A second call fails with `AlreadyFinalized`.
    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        end_time: DateTime<Utc>,
        error: Option<&str>,
    ) -> EngineResult<()>;

    /// Insert a step attempt row with whatever status the log carries
    /// (STARTED for attempts about to execute, SKIPPED for inactive steps).
    async fn insert_step(&self, log: &StepLog) -> EngineResult<()>;

    /// Complete a step attempt row with its terminal status, row count and
    /// error message.
    async fn update_step(&self, log: &StepLog) -> EngineResult<()>;
}

/// Audit adapter writing through the warehouse connection.
pub struct SqlAuditStore {
    warehouse: Arc<dyn Warehouse>,
    run_table: String,
    step_table: String,
}

impl SqlAuditStore {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        run_table: impl Into<String>,
        step_table: impl Into<String>,
    ) -> Self {
        Self {
            warehouse,
            run_table: run_table.into(),
            step_table: step_table.into(),
        }
    }
}

fn opt_i64_literal(value: Option<i64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "NULL".to_string(),
    }
}

#[async_trait]
impl AuditStore for SqlAuditStore {
    async fn insert_run(&self, run: &RunRecord) -> EngineResult<()> {
        let sql = format!(
            "INSERT INTO {} (run_id, job_code, start_time, end_time, overall_status, error_message) \
             VALUES ({}, {}, {}, NULL, {}, NULL)",
            self.run_table,
            quote_literal(&run.run_id.to_string()),
            quote_literal(&run.job_code),
            ts_literal(run.start_time),
            quote_literal(run.overall_status.as_str()),
        );
        self.warehouse.execute(&sql).await?;
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        end_time: DateTime<Utc>,
        error: Option<&str>,
    ) -> EngineResult<()> {
        // The end_time guard makes finalization single-shot: a second call
        // matches zero rows.
        let sql = format!(
            "UPDATE {} SET end_time = {}, overall_status = {}, error_message = {} \
             WHERE run_id = {} AND end_time IS NULL",
            self.run_table,
            ts_literal(end_time),
            quote_literal(status.as_str()),
            opt_literal(error),
            quote_literal(&run_id.to_string()),
        );

        let result = self.warehouse.execute(&sql).await?;
        if result.rows_affected == Some(0) {
            return Err(EngineError::AlreadyFinalized(run_id));
        }
        Ok(())
    }

    async fn insert_step(&self, log: &StepLog) -> EngineResult<()> {
        let end_time = match log.end_time {
            Some(ts) => ts_literal(ts),
            None => "NULL".to_string(),
        };
        let sql = format!(
            "INSERT INTO {} (run_id, step_number, attempt, start_time, end_time, status, \
             rows_affected, error_message) VALUES ({}, {}, {}, {}, {}, {}, {}, {})",
            self.step_table,
            quote_literal(&log.run_id.to_string()),
            log.step_number,
            log.attempt,
            ts_literal(log.start_time),
            end_time,
            quote_literal(log.status.as_str()),
            opt_i64_literal(log.rows_affected),
            opt_literal(log.error_message.as_deref()),
        );
        self.warehouse.execute(&sql).await?;
        Ok(())
    }

    async fn update_step(&self, log: &StepLog) -> EngineResult<()> {
        let end_time = match log.end_time {
            Some(ts) => ts_literal(ts),
            None => "NULL".to_string(),
        };
        let sql = format!(
            "UPDATE {} SET end_time = {}, status = {}, rows_affected = {}, error_message = {} \
             WHERE run_id = {} AND step_number = {} AND attempt = {}",
            self.step_table,
            end_time,
            quote_literal(log.status.as_str()),
            opt_i64_literal(log.rows_affected),
            opt_literal(log.error_message.as_deref()),
            quote_literal(&log.run_id.to_string()),
            log.step_number,
            log.attempt,
        );
        self.warehouse.execute(&sql).await?;
        Ok(())
    }
}
