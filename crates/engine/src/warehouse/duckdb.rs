//! Embedded DuckDB warehouse backend.
//!
//! Serves local runs and the integration tests, which exercise real SQL
//! semantics without a server. The connection is mutex-guarded so
//! concurrent runs never interleave statements.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use duckdb::types::{TimeUnit, Value as DbValue};
use duckdb::Connection;

use crate::error::{EngineError, EngineResult};
use crate::model::ExecutionResult;

use super::Warehouse;

/// An embedded DuckDB warehouse.
pub struct DuckDbWarehouse {
    conn: Mutex<Connection>,
}

impl DuckDbWarehouse {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> EngineResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| EngineError::Connection(format!("failed to open duckdb: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a transient in-memory database.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Connection(format!("failed to open duckdb: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An embedded engine has no connection to lose: every failure it reports
/// is a SQL failure, so nothing is retry eligible.
fn execution_error(error: duckdb::Error) -> EngineError {
    EngineError::execution(error.to_string(), false)
}

/// Count the statements in a SQL block. Semicolons inside string literals
/// are not recognized; engine-generated SQL never contains them.
fn statement_count(sql: &str) -> usize {
    sql.split(';').filter(|s| !s.trim().is_empty()).count()
}

fn db_value_to_json(value: DbValue) -> serde_json::Value {
    use serde_json::json;
    match value {
        DbValue::Null => serde_json::Value::Null,
        DbValue::Boolean(b) => json!(b),
        DbValue::TinyInt(n) => json!(n),
        DbValue::SmallInt(n) => json!(n),
        DbValue::Int(n) => json!(n),
        DbValue::BigInt(n) => json!(n),
        DbValue::UTinyInt(n) => json!(n),
        DbValue::USmallInt(n) => json!(n),
        DbValue::UInt(n) => json!(n),
        DbValue::UBigInt(n) => json!(n),
        DbValue::HugeInt(n) => json!(n.to_string()),
        DbValue::Float(f) => json!(f),
        DbValue::Double(f) => json!(f),
        DbValue::Decimal(d) => json!(d.to_string()),
        DbValue::Text(s) => json!(s),
        DbValue::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            match chrono::DateTime::from_timestamp_micros(micros) {
                Some(ts) => json!(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
                None => json!(raw),
            }
        }
        other => json!(format!("{other:?}")),
    }
}

#[async_trait]
impl Warehouse for DuckDbWarehouse {
    async fn execute(&self, sql: &str) -> EngineResult<ExecutionResult> {
        let conn = self.lock();

        if statement_count(sql) > 1 {
            // Multi-statement block; DuckDB reports no aggregate row count.
            conn.execute_batch(sql).map_err(execution_error)?;
            return Ok(ExecutionResult::default());
        }

        let changed = conn.execute(sql, []).map_err(execution_error)?;
        Ok(ExecutionResult {
            rows_affected: Some(changed as i64),
            returned_rows: Vec::new(),
        })
    }

    async fn query(&self, sql: &str) -> EngineResult<Vec<serde_json::Value>> {
        let conn = self.lock();

        let mut stmt = conn.prepare(sql).map_err(execution_error)?;
        let mut rows = stmt.query([]).map_err(execution_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(execution_error)? {
            let names = row.as_ref().column_names();
            let mut obj = serde_json::Map::new();
            for (idx, name) in names.iter().enumerate() {
                let value: DbValue = row.get(idx).map_err(execution_error)?;
                obj.insert(name.to_string(), db_value_to_json(value));
            }
            out.push(serde_json::Value::Object(obj));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_reports_changed_rows() {
        let wh = DuckDbWarehouse::open_in_memory().unwrap();
        wh.execute("CREATE TABLE t (id INTEGER, name VARCHAR)")
            .await
            .unwrap();

        let result = wh
            .execute("INSERT INTO t VALUES (1, 'a'), (2, 'b')")
            .await
            .unwrap();
        assert_eq!(result.rows_affected, Some(2));

        let result = wh.execute("DELETE FROM t WHERE id = 1").await.unwrap();
        assert_eq!(result.rows_affected, Some(1));
    }

    #[tokio::test]
    async fn test_multi_statement_block() {
        let wh = DuckDbWarehouse::open_in_memory().unwrap();
        wh.execute("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1); INSERT INTO t VALUES (2)")
            .await
            .unwrap();

        let rows = wh.query("SELECT count(*) AS n FROM t").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_query_returns_typed_json() {
        let wh = DuckDbWarehouse::open_in_memory().unwrap();
        wh.execute(
            "CREATE TABLE t (id INTEGER, name VARCHAR, active BOOLEAN, seen TIMESTAMP); \
             INSERT INTO t VALUES (7, 'x', TRUE, TIMESTAMP '2024-01-02 03:04:05')",
        )
        .await
        .unwrap();

        let rows = wh.query("SELECT * FROM t").await.unwrap();
        assert_eq!(rows[0]["id"], serde_json::json!(7));
        assert_eq!(rows[0]["name"], serde_json::json!("x"));
        assert_eq!(rows[0]["active"], serde_json::json!(true));
        assert_eq!(rows[0]["seen"], serde_json::json!("2024-01-02 03:04:05"));
    }

    #[tokio::test]
    async fn test_sql_error_is_permanent() {
        let wh = DuckDbWarehouse::open_in_memory().unwrap();
        let err = wh.execute("INSERT INTO missing VALUES (1)").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
