//! Warehouse connectivity.
//!
//! The engine assumes nothing about the warehouse beyond "submit SQL text,
//! receive a row count, rows, or an error". Two backends are provided: a
//! remote PostgreSQL endpoint and an embedded DuckDB database for local
//! runs and tests. Both are internally synchronized so a connection is
//! never shared across concurrent statements.

pub mod duckdb;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::model::ExecutionResult;

pub use self::duckdb::DuckDbWarehouse;
pub use self::postgres::PostgresWarehouse;

/// A single configured warehouse endpoint.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Submit a statement (or multi-statement block) that mutates state.
    async fn execute(&self, sql: &str) -> EngineResult<ExecutionResult>;

    /// Submit a query and return rows as JSON objects keyed by column name.
    async fn query(&self, sql: &str) -> EngineResult<Vec<serde_json::Value>>;
}

impl std::fmt::Debug for dyn Warehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Warehouse")
    }
}

/// Open a warehouse from a URL.
///
/// `duckdb://<path>` (or `duckdb://:memory:`) selects the embedded backend;
/// anything else is treated as a PostgreSQL connection string.
pub fn connect(url: &str) -> EngineResult<Arc<dyn Warehouse>> {
    if let Some(path) = url.strip_prefix("duckdb://") {
        let warehouse = if path.is_empty() || path == ":memory:" {
            DuckDbWarehouse::open_in_memory()?
        } else {
            DuckDbWarehouse::open(std::path::Path::new(path))?
        };
        Ok(Arc::new(warehouse))
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Arc::new(PostgresWarehouse::connect(url)?))
    } else {
        Err(EngineError::Connection(format!(
            "unsupported warehouse url: {url}"
        )))
    }
}

/// Read a string field from a JSON row.
///
/// Rows fetched through the PostgreSQL simple-query protocol arrive with
/// every value as text, so numeric and boolean fields are coerced here
/// rather than at the backend.
pub fn field_str(row: &serde_json::Value, name: &str) -> Option<String> {
    match row.get(name) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

/// Read an integer field from a JSON row, accepting numeric strings.
pub fn field_i64(row: &serde_json::Value, name: &str) -> Option<i64> {
    match row.get(name) {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a boolean field from a JSON row, accepting the textual forms the
/// simple-query protocol produces ("t"/"f", "true"/"false", "1"/"0").
pub fn field_bool(row: &serde_json::Value, name: &str) -> Option<bool> {
    match row.get(name) {
        Some(serde_json::Value::Bool(b)) => Some(*b),
        Some(serde_json::Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "t" | "true" | "1" | "y" | "yes" => Some(true),
            "f" | "false" | "0" | "n" | "no" => Some(false),
            _ => None,
        },
        Some(serde_json::Value::Number(n)) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}
