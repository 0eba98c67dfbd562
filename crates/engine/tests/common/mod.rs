//! Shared fixtures for integration tests: an embedded warehouse with the
//! control and audit tables provisioned.
#![allow(dead_code)]

use std::sync::Arc;

use sqlrun_engine::template::quote_literal;
use sqlrun_engine::warehouse::{self, Warehouse};
use sqlrun_engine::EngineConfig;

const SCHEMA: &str = "
CREATE TABLE job_control (
    job_code VARCHAR NOT NULL,
    step_number INTEGER NOT NULL,
    description VARCHAR,
    sql_logic VARCHAR,
    source_object VARCHAR,
    target_object VARCHAR,
    load_type VARCHAR NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    business_key_columns VARCHAR,
    tracked_columns VARCHAR
);
CREATE TABLE run_log (
    run_id VARCHAR NOT NULL,
    job_code VARCHAR NOT NULL,
    start_time TIMESTAMP NOT NULL,
    end_time TIMESTAMP,
    overall_status VARCHAR NOT NULL,
    error_message VARCHAR
);
CREATE TABLE step_log (
    run_id VARCHAR NOT NULL,
    step_number INTEGER NOT NULL,
    attempt INTEGER NOT NULL,
    start_time TIMESTAMP NOT NULL,
    end_time TIMESTAMP,
    status VARCHAR NOT NULL,
    rows_affected BIGINT,
    error_message VARCHAR
);
";

/// Open an in-memory warehouse with the engine tables created.
pub async fn provisioned_warehouse() -> Arc<dyn Warehouse> {
    let warehouse = warehouse::connect("duckdb://:memory:").expect("open embedded warehouse");
    warehouse.execute(SCHEMA).await.expect("create engine tables");
    warehouse
}

/// Configuration pointing at the provisioned tables, with fast retries so
/// failure tests do not sleep for real.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config
}

/// Register one control-table step.
pub struct ControlRow<'a> {
    pub job_code: &'a str,
    pub step_number: i32,
    pub sql_logic: Option<&'a str>,
    pub source_object: Option<&'a str>,
    pub target_object: Option<&'a str>,
    pub load_type: &'a str,
    pub is_active: bool,
    pub business_keys: Option<&'a str>,
    pub tracked_columns: Option<&'a str>,
}

impl<'a> ControlRow<'a> {
    pub fn sql_step(job_code: &'a str, step_number: i32, sql_logic: &'a str) -> Self {
        Self {
            job_code,
            step_number,
            sql_logic: Some(sql_logic),
            source_object: None,
            target_object: None,
            load_type: "FULL",
            is_active: true,
            business_keys: None,
            tracked_columns: None,
        }
    }
}

fn opt(value: Option<&str>) -> String {
    match value {
        Some(v) => quote_literal(v),
        None => "NULL".to_string(),
    }
}

pub async fn insert_control_row(warehouse: &Arc<dyn Warehouse>, row: ControlRow<'_>) {
    let sql = format!(
        "INSERT INTO job_control (job_code, step_number, description, sql_logic, \
         source_object, target_object, load_type, is_active, business_key_columns, \
         tracked_columns) VALUES ({}, {}, NULL, {}, {}, {}, {}, {}, {}, {})",
        quote_literal(row.job_code),
        row.step_number,
        opt(row.sql_logic),
        opt(row.source_object),
        opt(row.target_object),
        quote_literal(row.load_type),
        row.is_active,
        opt(row.business_keys),
        opt(row.tracked_columns),
    );
    warehouse.execute(&sql).await.expect("insert control row");
}

/// Count rows matched by a predicate, for asserting on table state.
pub async fn count_where(warehouse: &Arc<dyn Warehouse>, table: &str, predicate: &str) -> i64 {
    let rows = warehouse
        .query(&format!("SELECT COUNT(*) AS n FROM {table} WHERE {predicate}"))
        .await
        .expect("count query");
    warehouse::field_i64(&rows[0], "n").expect("count value")
}

/// Fetch step_log rows for a run, in execution order.
pub async fn step_rows(
    warehouse: &Arc<dyn Warehouse>,
    run_id: &str,
) -> Vec<(i64, i64, String)> {
    let rows = warehouse
        .query(&format!(
            "SELECT step_number, attempt, status FROM step_log \
             WHERE run_id = {} ORDER BY start_time, step_number, attempt",
            quote_literal(run_id)
        ))
        .await
        .expect("step_log query");

    rows.iter()
        .map(|row| {
            (
                warehouse::field_i64(row, "step_number").expect("step_number"),
                warehouse::field_i64(row, "attempt").expect("attempt"),
                warehouse::field_str(row, "status").expect("status"),
            )
        })
        .collect()
}
