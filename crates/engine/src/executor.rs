//! SQL execution boundary: placeholder rendering, timeout, submission.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::model::ExecutionResult;
use crate::template::{render, BindContext};
use crate::warehouse::Warehouse;

/// Submits statements to the warehouse with placeholder substitution and a
/// per-step timeout. Submitted SQL mutates warehouse state and is not
/// rolled back on failure; step SQL is expected to be safely re-runnable.
pub struct SqlExecutor {
    warehouse: Arc<dyn Warehouse>,
    step_timeout: Duration,
}

impl SqlExecutor {
    pub fn new(warehouse: Arc<dyn Warehouse>, step_timeout: Duration) -> Self {
        Self {
            warehouse,
            step_timeout,
        }
    }

    /// Render placeholders in `sql_text` and submit the result.
    ///
    /// Placeholder resolution happens before anything reaches the
    /// warehouse, so a bad token never submits partial work.
    pub async fn execute(&self, sql_text: &str, ctx: &BindContext) -> EngineResult<ExecutionResult> {
        let sql = render(sql_text, ctx)?;
        self.submit(&sql).await
    }

    /// Submit already-rendered SQL with the step timeout applied. A timed
    /// out statement is reported as a transient failure.
    pub async fn submit(&self, sql: &str) -> EngineResult<ExecutionResult> {
        tracing::debug!(sql, "submitting statement");

        match tokio::time::timeout(self.step_timeout, self.warehouse.execute(sql)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::execution(
                format!("statement timed out after {:?}", self.step_timeout),
                true,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct RecordingWarehouse {
        submitted: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl RecordingWarehouse {
        fn new(delay: Duration) -> Self {
            Self {
                submitted: Mutex::new(Vec::new()),
                delay,
            }
        }
    }

    #[async_trait]
    impl Warehouse for RecordingWarehouse {
        async fn execute(&self, sql: &str) -> EngineResult<ExecutionResult> {
            tokio::time::sleep(self.delay).await;
            self.submitted.lock().unwrap().push(sql.to_string());
            Ok(ExecutionResult {
                rows_affected: Some(1),
                returned_rows: vec![],
            })
        }

        async fn query(&self, _sql: &str) -> EngineResult<Vec<serde_json::Value>> {
            Ok(vec![])
        }
    }

    fn ctx() -> BindContext {
        BindContext {
            run_id: Uuid::nil(),
            job_code: "JOB_01".to_string(),
            source_object: Some("stg".to_string()),
            target_object: Some("tgt".to_string()),
            batch_ts: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_execute_renders_before_submission() {
        let warehouse = Arc::new(RecordingWarehouse::new(Duration::ZERO));
        let executor = SqlExecutor::new(warehouse.clone(), Duration::from_secs(5));

        executor
            .execute("INSERT INTO {{target_object}} SELECT * FROM {{source_object}}", &ctx())
            .await
            .unwrap();

        let submitted = warehouse.submitted.lock().unwrap();
        assert_eq!(submitted.as_slice(), ["INSERT INTO tgt SELECT * FROM stg"]);
    }

    #[tokio::test]
    async fn test_bad_token_never_reaches_warehouse() {
        let warehouse = Arc::new(RecordingWarehouse::new(Duration::ZERO));
        let executor = SqlExecutor::new(warehouse.clone(), Duration::from_secs(5));

        let err = executor
            .execute("SELECT {{no_such_token}}", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PlaceholderResolution(_)));
        assert!(warehouse.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let warehouse = Arc::new(RecordingWarehouse::new(Duration::from_millis(100)));
        let executor = SqlExecutor::new(warehouse, Duration::from_millis(10));

        let err = executor.submit("SELECT 1").await.unwrap_err();
        assert!(err.is_transient());
    }
}
