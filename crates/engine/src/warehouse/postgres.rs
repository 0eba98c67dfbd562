//! PostgreSQL warehouse backend.
//!
//! Uses the simple-query protocol so a step's `sql_logic` may contain a
//! multi-statement block; affected-row counts are summed across the
//! statements in the block.

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, SimpleQueryMessage, SimpleQueryRow};

use crate::error::{EngineError, EngineResult};
use crate::model::ExecutionResult;

use super::Warehouse;

/// A pooled connection to a PostgreSQL warehouse.
pub struct PostgresWarehouse {
    pool: Pool,
}

impl PostgresWarehouse {
    /// Create a pool for the given connection string.
    pub fn connect(connection_string: &str) -> EngineResult<Self> {
        let mut config = Config::new();
        config.url = Some(connection_string.to_string());

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| EngineError::Connection(format!("failed to create pool: {e}")))?;

        Ok(Self { pool })
    }

    async fn client(&self) -> EngineResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| EngineError::execution(format!("failed to get connection: {e}"), true))
    }
}

/// Connection-level failures carry no database error code and are retry
/// eligible; SQL failures reported by the server are not.
fn is_transient(error: &tokio_postgres::Error) -> bool {
    error.as_db_error().is_none()
}

fn row_to_json(row: &SimpleQueryRow) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match row.get(idx) {
            Some(text) => serde_json::Value::String(text.to_string()),
            None => serde_json::Value::Null,
        };
        obj.insert(column.name().to_string(), value);
    }
    serde_json::Value::Object(obj)
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn execute(&self, sql: &str) -> EngineResult<ExecutionResult> {
        let client = self.client().await?;

        let messages = client
            .simple_query(sql)
            .await
            .map_err(|e| EngineError::execution(e.to_string(), is_transient(&e)))?;

        let mut rows_affected: Option<i64> = None;
        let mut returned_rows = Vec::new();
        for message in messages {
            match message {
                SimpleQueryMessage::CommandComplete(count) => {
                    *rows_affected.get_or_insert(0) += count as i64;
                }
                SimpleQueryMessage::Row(row) => {
                    returned_rows.push(row_to_json(&row));
                }
                _ => {}
            }
        }

        Ok(ExecutionResult {
            rows_affected,
            returned_rows,
        })
    }

    async fn query(&self, sql: &str) -> EngineResult<Vec<serde_json::Value>> {
        Ok(self.execute(sql).await?.returned_rows)
    }
}
