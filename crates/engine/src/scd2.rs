//! Type-2 slowly-changing-dimension merge engine.
//!
//! Builds the history-preserving merge from the column metadata on the
//! step definition alone; no per-dimension procedural SQL. The merge is
//! two set-oriented statements: close the superseded current rows, then
//! insert the new current rows. Business keys present in the target but
//! absent from the source are left untouched; the engine never infers
//! deletions. Re-applying the merge with unchanged input is a no-op.
//!
//! The staged source is expected to carry one row per business key.

use crate::error::{EngineError, EngineResult};
use crate::executor::SqlExecutor;
use crate::model::{ExecutionResult, StepDefinition};
use crate::template::{ts_literal, BindContext};

/// Dimension housekeeping columns, present on every SCD2 target.
pub const EFFECTIVE_START: &str = "effective_start";
pub const EFFECTIVE_END: &str = "effective_end";
pub const IS_CURRENT: &str = "is_current";

/// The two statements of a planned merge.
#[derive(Debug, Clone)]
pub struct MergePlan {
    /// Closes current rows whose tracked attributes changed:
    /// sets `effective_end` to the run timestamp and clears `is_current`.
    pub close_sql: String,

    /// Inserts a current row for every business key without one — both
    /// brand-new keys and keys whose previous row was just closed.
    pub insert_sql: String,
}

/// Plan the merge statements for an SCD2 step.
pub fn plan_merge(step: &StepDefinition, ctx: &BindContext) -> EngineResult<MergePlan> {
    let integrity = |what: String| EngineError::MetadataIntegrity(what);

    let source = step.source_object.as_deref().ok_or_else(|| {
        integrity(format!("SCD2 step {} has no source_object", step.step_number))
    })?;
    let target = step.target_object.as_deref().ok_or_else(|| {
        integrity(format!("SCD2 step {} has no target_object", step.step_number))
    })?;
    if step.business_keys.is_empty() {
        return Err(integrity(format!(
            "SCD2 step {} has no business key columns",
            step.step_number
        )));
    }
    if step.tracked_columns.is_empty() {
        return Err(integrity(format!(
            "SCD2 step {} has no tracked columns",
            step.step_number
        )));
    }

    let ts = ts_literal(ctx.batch_ts);

    let key_match = step
        .business_keys
        .iter()
        .map(|k| format!("t.{k} = s.{k}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let close_key_match = step
        .business_keys
        .iter()
        .map(|k| format!("{target}.{k} = s.{k}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    // IS DISTINCT FROM so a NULL transition counts as a change.
    let close_changed = step
        .tracked_columns
        .iter()
        .map(|c| format!("{target}.{c} IS DISTINCT FROM s.{c}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    let close_sql = format!(
        "UPDATE {target} SET {EFFECTIVE_END} = {ts}, {IS_CURRENT} = FALSE \
         FROM {source} AS s \
         WHERE {target}.{IS_CURRENT} AND {close_key_match} AND ({close_changed})"
    );

    let data_columns: Vec<&str> = step
        .business_keys
        .iter()
        .chain(step.tracked_columns.iter())
        .map(String::as_str)
        .collect();
    let insert_columns = format!(
        "{}, {EFFECTIVE_START}, {EFFECTIVE_END}, {IS_CURRENT}",
        data_columns.join(", ")
    );
    let select_columns = data_columns
        .iter()
        .map(|c| format!("s.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let first_key = &step.business_keys[0];

    let insert_sql = format!(
        "INSERT INTO {target} ({insert_columns}) \
         SELECT {select_columns}, {ts}, NULL, TRUE \
         FROM {source} AS s \
         LEFT JOIN {target} AS t ON t.{IS_CURRENT} AND {key_match} \
         WHERE t.{first_key} IS NULL"
    );

    Ok(MergePlan {
        close_sql,
        insert_sql,
    })
}

/// Apply the merge for an SCD2 step: close superseded rows, then insert
/// the new current rows, on the run's connection.
pub async fn merge(
    executor: &SqlExecutor,
    step: &StepDefinition,
    ctx: &BindContext,
) -> EngineResult<ExecutionResult> {
    let plan = plan_merge(step, ctx)?;

    let closed = executor.submit(&plan.close_sql).await?;
    let inserted = executor.submit(&plan.insert_sql).await?;

    let rows_affected = match (closed.rows_affected, inserted.rows_affected) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    };

    tracing::info!(
        target = step.target_object.as_deref().unwrap_or_default(),
        closed = ?closed.rows_affected,
        inserted = ?inserted.rows_affected,
        "scd2 merge applied"
    );

    Ok(ExecutionResult {
        rows_affected,
        returned_rows: Vec::new(),
    })
}
