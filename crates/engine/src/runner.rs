//! Job execution: the interpreter over the control-table step program.
//!
//! A run walks the ordered step program one step at a time, writing an
//! audit row for every attempt. Transient step failures retry with
//! exponential backoff; permanent failures stop the run at the failing
//! step. The run record is finalized exactly once with SUCCESS, FAILED,
//! or PARTIAL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::audit::{AuditStore, SqlAuditStore};
use crate::config::{EngineConfig, RetryPolicy};
use crate::error::{EngineError, EngineResult};
use crate::executor::SqlExecutor;
use crate::lock::RunLocks;
use crate::metadata::{MetadataStore, SqlMetadataStore};
use crate::model::{LoadType, RunStatus, StepDefinition, StepLog, StepStatus};
use crate::run::RunTracker;
use crate::scd2;
use crate::template::BindContext;
use crate::warehouse::Warehouse;

/// Cooperative cancellation flag for a run.
///
/// Cancellation is observed at step boundaries only; a statement already
/// submitted to the warehouse runs to completion.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Terminal summary of a run that produced a run record.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub job_code: String,
    pub status: RunStatus,
    pub steps_succeeded: usize,
    pub steps_skipped: usize,
    /// The failure that ended the run, when it did not succeed.
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Drives runs of control-table jobs.
pub struct JobRunner {
    metadata: Arc<dyn MetadataStore>,
    audit: Arc<dyn AuditStore>,
    tracker: RunTracker,
    executor: SqlExecutor,
    locks: RunLocks,
    retry: RetryPolicy,
    partial_status: bool,
}

impl JobRunner {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        audit: Arc<dyn AuditStore>,
        executor: SqlExecutor,
        retry: RetryPolicy,
        partial_status: bool,
    ) -> Self {
        Self {
            metadata,
            audit: Arc::clone(&audit),
            tracker: RunTracker::new(audit),
            executor,
            locks: RunLocks::new(),
            retry,
            partial_status,
        }
    }

    /// Wire a runner onto one warehouse using the configured table names.
    pub fn from_config(warehouse: Arc<dyn Warehouse>, config: &EngineConfig) -> Self {
        let metadata = Arc::new(SqlMetadataStore::new(
            Arc::clone(&warehouse),
            config.control_table.clone(),
        ));
        let audit = Arc::new(SqlAuditStore::new(
            Arc::clone(&warehouse),
            config.run_table.clone(),
            config.step_table.clone(),
        ));
        let executor = SqlExecutor::new(warehouse, config.step_timeout);
        Self::new(
            metadata,
            audit,
            executor,
            config.retry.clone(),
            config.partial_status,
        )
    }

    /// Execute one run of a job.
    ///
    /// Returns `Ok` with the terminal outcome whenever a run record was
    /// produced, including failed runs; the caller inspects the status.
    /// Returns `Err` only for failures before the run exists: a run
    /// already in flight for the job code, or unusable metadata.
    pub async fn run_job(&self, job_code: &str, cancel: &CancelToken) -> EngineResult<RunOutcome> {
        let _lock = self.locks.acquire(job_code)?;
        let steps = self.metadata.load_steps(job_code).await?;

        let run = self.tracker.start_run(job_code).await?;
        tracing::info!(job_code, run_id = %run.run_id, steps = steps.len(), "starting run");

        let mut succeeded = 0usize;
        let mut skipped = 0usize;
        let mut failure: Option<String> = None;
        let mut cancelled = false;

        for step in &steps {
            if cancel.is_cancelled() {
                failure = Some(EngineError::Cancelled.to_string());
                cancelled = true;
                break;
            }

            if !step.is_active {
                // An audit write failure here still ends with a finalized
                // run record, same as a failing step would.
                if let Err(err) = self.log_skipped(run.run_id, step).await {
                    failure = Some(format!("auditing step {} failed: {err}", step.step_number));
                    break;
                }
                skipped += 1;
                continue;
            }

            let ctx = BindContext {
                run_id: run.run_id,
                job_code: job_code.to_string(),
                source_object: step.source_object.clone(),
                target_object: step.target_object.clone(),
                batch_ts: run.start_time,
            };

            match self.run_step(run.run_id, step, &ctx).await {
                Ok(()) => succeeded += 1,
                Err(err) => {
                    failure = Some(format!(
                        "step {} failed: {}{}",
                        step.step_number,
                        err,
                        step.description
                            .as_deref()
                            .map(|d| format!(" ({d})"))
                            .unwrap_or_default(),
                    ));
                    break;
                }
            }
        }

        let status = match &failure {
            None => RunStatus::Success,
            // A cancelled run is FAILED no matter how far it got.
            Some(_) if cancelled => RunStatus::Failed,
            Some(_) if succeeded > 0 && self.partial_status => RunStatus::Partial,
            Some(_) => RunStatus::Failed,
        };

        self.tracker
            .finalize_run(run.run_id, status, failure.as_deref())
            .await?;

        Ok(RunOutcome {
            run_id: run.run_id,
            job_code: job_code.to_string(),
            status,
            steps_succeeded: succeeded,
            steps_skipped: skipped,
            error: failure,
        })
    }

    /// Execute one step to completion, retrying transient failures. Each
    /// attempt gets its own audit row.
    async fn run_step(
        &self,
        run_id: Uuid,
        step: &StepDefinition,
        ctx: &BindContext,
    ) -> EngineResult<()> {
        let mut attempt: i32 = 1;
        loop {
            let mut log = StepLog {
                run_id,
                step_number: step.step_number,
                attempt,
                start_time: Utc::now(),
                end_time: None,
                status: StepStatus::Started,
                rows_affected: None,
                error_message: None,
            };
            self.audit.insert_step(&log).await?;

            match self.execute_step(step, ctx).await {
                Ok(rows_affected) => {
                    log.end_time = Some(Utc::now());
                    log.status = StepStatus::Success;
                    log.rows_affected = rows_affected;
                    self.audit.update_step(&log).await?;
                    tracing::info!(
                        step = step.step_number,
                        attempt,
                        rows = ?rows_affected,
                        "step succeeded"
                    );
                    return Ok(());
                }
                Err(err) => {
                    log.end_time = Some(Utc::now());
                    log.status = StepStatus::Failed;
                    log.error_message = Some(err.to_string());
                    self.audit.update_step(&log).await?;

                    let retries_left = attempt <= self.retry.max_retries as i32;
                    if err.is_transient() && retries_left {
                        let delay = self.retry.delay(attempt as u32);
                        tracing::warn!(
                            step = step.step_number,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transient step failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(step = step.step_number, attempt, error = %err, "step failed");
                    return Err(err);
                }
            }
        }
    }

    /// Dispatch one attempt by load type. Explicit SQL takes precedence for
    /// FULL and INCREMENTAL steps; SCD2 steps always use the generated
    /// merge so the history columns stay engine-managed.
    async fn execute_step(
        &self,
        step: &StepDefinition,
        ctx: &BindContext,
    ) -> EngineResult<Option<i64>> {
        if step.load_type == LoadType::Scd2 {
            let result = scd2::merge(&self.executor, step, ctx).await?;
            return Ok(result.rows_affected);
        }

        if let Some(sql) = step.sql() {
            let result = self.executor.execute(sql, ctx).await?;
            return Ok(result.rows_affected);
        }

        let (source, target) = match (step.source_object.as_deref(), step.target_object.as_deref())
        {
            (Some(source), Some(target)) => (source, target),
            // A step with no SQL body and no load objects is a declared
            // no-op: it succeeds without touching the warehouse.
            (None, None) => {
                tracing::debug!(step = step.step_number, "empty step body, no-op");
                return Ok(Some(0));
            }
            _ => {
                return Err(EngineError::MetadataIntegrity(format!(
                    "step {} has no sql_logic and only one of source_object/target_object",
                    step.step_number
                )))
            }
        };

        match step.load_type {
            LoadType::Full => {
                self.executor.submit(&format!("DELETE FROM {target}")).await?;
                let loaded = self
                    .executor
                    .submit(&format!("INSERT INTO {target} SELECT * FROM {source}"))
                    .await?;
                Ok(loaded.rows_affected)
            }
            LoadType::Incremental => {
                let loaded = self
                    .executor
                    .submit(&format!("INSERT INTO {target} SELECT * FROM {source}"))
                    .await?;
                Ok(loaded.rows_affected)
            }
            LoadType::Scd2 => unreachable!("handled above"),
        }
    }

    async fn log_skipped(&self, run_id: Uuid, step: &StepDefinition) -> EngineResult<()> {
        let now = Utc::now();
        let log = StepLog {
            run_id,
            step_number: step.step_number,
            attempt: 1,
            start_time: now,
            end_time: Some(now),
            status: StepStatus::Skipped,
            rows_affected: None,
            error_message: None,
        };
        self.audit.insert_step(&log).await?;
        tracing::info!(step = step.step_number, "step inactive, skipped");
        Ok(())
    }
}
