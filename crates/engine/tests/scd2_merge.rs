//! Type-2 dimension merge semantics against an embedded warehouse.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use common::{count_where, provisioned_warehouse};
use sqlrun_engine::executor::SqlExecutor;
use sqlrun_engine::scd2;
use sqlrun_engine::template::BindContext;
use sqlrun_engine::warehouse::Warehouse;
use sqlrun_engine::{LoadType, StepDefinition};

const DIM_SCHEMA: &str = "
CREATE TABLE stg_customer (
    customer_id INTEGER NOT NULL,
    name VARCHAR,
    tier VARCHAR
);
CREATE TABLE dim_customer (
    customer_id INTEGER NOT NULL,
    name VARCHAR,
    tier VARCHAR,
    effective_start TIMESTAMP NOT NULL,
    effective_end TIMESTAMP,
    is_current BOOLEAN NOT NULL
);
";

fn merge_step() -> StepDefinition {
    StepDefinition {
        job_code: "DIM_CUSTOMER".to_string(),
        step_number: 1,
        description: None,
        sql_logic: None,
        source_object: Some("stg_customer".to_string()),
        target_object: Some("dim_customer".to_string()),
        load_type: LoadType::Scd2,
        is_active: true,
        business_keys: vec!["customer_id".to_string()],
        tracked_columns: vec!["name".to_string(), "tier".to_string()],
    }
}

fn ctx_at(day: u32) -> BindContext {
    BindContext {
        run_id: Uuid::new_v4(),
        job_code: "DIM_CUSTOMER".to_string(),
        source_object: Some("stg_customer".to_string()),
        target_object: Some("dim_customer".to_string()),
        batch_ts: Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap(),
    }
}

async fn dim_warehouse() -> (Arc<dyn Warehouse>, SqlExecutor) {
    let warehouse = provisioned_warehouse().await;
    warehouse.execute(DIM_SCHEMA).await.expect("create dimension tables");
    let executor = SqlExecutor::new(Arc::clone(&warehouse), Duration::from_secs(30));
    (warehouse, executor)
}

async fn stage(warehouse: &Arc<dyn Warehouse>, rows: &[(i32, &str, &str)]) {
    warehouse
        .execute("DELETE FROM stg_customer")
        .await
        .expect("clear staging");
    for (id, name, tier) in rows {
        warehouse
            .execute(&format!(
                "INSERT INTO stg_customer VALUES ({id}, '{name}', '{tier}')"
            ))
            .await
            .expect("stage row");
    }
}

#[tokio::test]
async fn test_new_keys_inserted_as_current() {
    let (warehouse, executor) = dim_warehouse().await;
    stage(&warehouse, &[(1, "Ada", "gold"), (2, "Brin", "silver")]).await;

    let result = scd2::merge(&executor, &merge_step(), &ctx_at(1)).await.unwrap();
    assert_eq!(result.rows_affected, Some(2));

    assert_eq!(count_where(&warehouse, "dim_customer", "TRUE").await, 2);
    assert_eq!(
        count_where(
            &warehouse,
            "dim_customer",
            "is_current AND effective_end IS NULL \
             AND effective_start = TIMESTAMP '2024-06-01 00:00:00'"
        )
        .await,
        2
    );
}

#[tokio::test]
async fn test_changed_attribute_opens_new_version() {
    let (warehouse, executor) = dim_warehouse().await;
    stage(&warehouse, &[(1, "Ada", "gold")]).await;
    scd2::merge(&executor, &merge_step(), &ctx_at(1)).await.unwrap();

    stage(&warehouse, &[(1, "Ada", "platinum")]).await;
    let result = scd2::merge(&executor, &merge_step(), &ctx_at(2)).await.unwrap();
    // One row closed, one row inserted.
    assert_eq!(result.rows_affected, Some(2));

    assert_eq!(count_where(&warehouse, "dim_customer", "customer_id = 1").await, 2);
    assert_eq!(
        count_where(
            &warehouse,
            "dim_customer",
            "customer_id = 1 AND NOT is_current \
             AND tier = 'gold' AND effective_end = TIMESTAMP '2024-06-02 00:00:00'"
        )
        .await,
        1
    );
    assert_eq!(
        count_where(
            &warehouse,
            "dim_customer",
            "customer_id = 1 AND is_current AND tier = 'platinum' AND effective_end IS NULL"
        )
        .await,
        1
    );
}

#[tokio::test]
async fn test_unchanged_input_is_noop() {
    let (warehouse, executor) = dim_warehouse().await;
    stage(&warehouse, &[(1, "Ada", "gold")]).await;
    scd2::merge(&executor, &merge_step(), &ctx_at(1)).await.unwrap();

    let result = scd2::merge(&executor, &merge_step(), &ctx_at(2)).await.unwrap();
    assert_eq!(result.rows_affected, Some(0));
    assert_eq!(count_where(&warehouse, "dim_customer", "TRUE").await, 1);
    assert_eq!(
        count_where(
            &warehouse,
            "dim_customer",
            "effective_start = TIMESTAMP '2024-06-01 00:00:00'"
        )
        .await,
        1
    );
}

#[tokio::test]
async fn test_null_transition_counts_as_change() {
    let (warehouse, executor) = dim_warehouse().await;
    stage(&warehouse, &[(1, "Ada", "gold")]).await;
    scd2::merge(&executor, &merge_step(), &ctx_at(1)).await.unwrap();

    warehouse.execute("DELETE FROM stg_customer").await.unwrap();
    warehouse
        .execute("INSERT INTO stg_customer VALUES (1, 'Ada', NULL)")
        .await
        .unwrap();

    let result = scd2::merge(&executor, &merge_step(), &ctx_at(2)).await.unwrap();
    assert_eq!(result.rows_affected, Some(2));
    assert_eq!(
        count_where(
            &warehouse,
            "dim_customer",
            "customer_id = 1 AND is_current AND tier IS NULL"
        )
        .await,
        1
    );
}

#[tokio::test]
async fn test_keys_absent_from_source_untouched() {
    let (warehouse, executor) = dim_warehouse().await;
    stage(&warehouse, &[(1, "Ada", "gold"), (2, "Brin", "silver")]).await;
    scd2::merge(&executor, &merge_step(), &ctx_at(1)).await.unwrap();

    // Customer 2 drops out of the staging snapshot; no deletion is inferred.
    stage(&warehouse, &[(1, "Ada", "platinum")]).await;
    scd2::merge(&executor, &merge_step(), &ctx_at(2)).await.unwrap();

    assert_eq!(
        count_where(
            &warehouse,
            "dim_customer",
            "customer_id = 2 AND is_current AND effective_end IS NULL"
        )
        .await,
        1
    );
}

#[tokio::test]
async fn test_single_current_row_per_key_across_runs() {
    let (warehouse, executor) = dim_warehouse().await;

    let tiers = ["bronze", "silver", "gold", "platinum"];
    for (i, tier) in tiers.into_iter().enumerate() {
        stage(&warehouse, &[(1, "Ada", tier)]).await;
        scd2::merge(&executor, &merge_step(), &ctx_at(i as u32 + 1))
            .await
            .unwrap();
    }

    assert_eq!(count_where(&warehouse, "dim_customer", "customer_id = 1").await, 4);
    assert_eq!(
        count_where(&warehouse, "dim_customer", "customer_id = 1 AND is_current").await,
        1
    );
    assert_eq!(
        count_where(
            &warehouse,
            "dim_customer",
            "customer_id = 1 AND is_current AND tier = 'platinum'"
        )
        .await,
        1
    );
    // Every closed version carries an end timestamp.
    assert_eq!(
        count_where(
            &warehouse,
            "dim_customer",
            "customer_id = 1 AND NOT is_current AND effective_end IS NULL"
        )
        .await,
        0
    );
}
