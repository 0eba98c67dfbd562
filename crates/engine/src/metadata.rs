//! Control-table access.
//!
//! Job and step definitions are owned by the metadata store and read-only
//! to the engine; each run fetches its own immutable snapshot of the step
//! program at start.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::model::{LoadType, StepDefinition};
use crate::template::quote_literal;
use crate::warehouse::{field_bool, field_i64, field_str, Warehouse};

/// Read access to job/step definitions.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Load the active, ordered step program for a job code.
    ///
    /// Fails with `MetadataNotFound` when the job has no active steps and
    /// with `MetadataIntegrity` when the control-table rows are unusable,
    /// in both cases before any run record exists.
    async fn load_steps(&self, job_code: &str) -> EngineResult<Vec<StepDefinition>>;
}

/// Validate and order a loaded step program.
///
/// Sorts ascending by step number (gaps are legal), then rejects empty
/// programs, non-positive or duplicate step numbers, and SCD2 steps with
/// incomplete column metadata.
pub fn validate_step_program(
    job_code: &str,
    mut steps: Vec<StepDefinition>,
) -> EngineResult<Vec<StepDefinition>> {
    if steps.is_empty() {
        return Err(EngineError::MetadataNotFound(job_code.to_string()));
    }

    steps.sort_by_key(|s| s.step_number);

    for pair in steps.windows(2) {
        if pair[0].step_number == pair[1].step_number {
            return Err(EngineError::MetadataIntegrity(format!(
                "duplicate step number {} for job code '{}'",
                pair[0].step_number, job_code
            )));
        }
    }

    for step in &steps {
        if step.step_number < 1 {
            return Err(EngineError::MetadataIntegrity(format!(
                "step number {} for job code '{}' is not positive",
                step.step_number, job_code
            )));
        }
        if step.load_type == LoadType::Scd2 {
            if step.business_keys.is_empty() || step.tracked_columns.is_empty() {
                return Err(EngineError::MetadataIntegrity(format!(
                    "SCD2 step {} of job '{}' is missing business key or tracked column metadata",
                    step.step_number, job_code
                )));
            }
            if step.source_object.is_none() || step.target_object.is_none() {
                return Err(EngineError::MetadataIntegrity(format!(
                    "SCD2 step {} of job '{}' needs both source_object and target_object",
                    step.step_number, job_code
                )));
            }
        }
    }

    Ok(steps)
}

/// Control-table adapter reading through the warehouse connection.
pub struct SqlMetadataStore {
    warehouse: Arc<dyn Warehouse>,
    table: String,
}

impl SqlMetadataStore {
    pub fn new(warehouse: Arc<dyn Warehouse>, table: impl Into<String>) -> Self {
        Self {
            warehouse,
            table: table.into(),
        }
    }

    fn parse_row(table: &str, row: &serde_json::Value) -> EngineResult<StepDefinition> {
        let integrity = |what: &str| {
            EngineError::MetadataIntegrity(format!("control table {table}: {what}"))
        };

        let job_code = field_str(row, "job_code").ok_or_else(|| integrity("missing job_code"))?;
        let step_number = field_i64(row, "step_number")
            .ok_or_else(|| integrity("missing or non-numeric step_number"))?
            as i32;

        let raw_load_type =
            field_str(row, "load_type").ok_or_else(|| integrity("missing load_type"))?;
        let load_type = LoadType::parse(&raw_load_type)
            .ok_or_else(|| integrity(&format!("unknown load_type '{raw_load_type}'")))?;

        Ok(StepDefinition {
            job_code,
            step_number,
            description: field_str(row, "description"),
            sql_logic: field_str(row, "sql_logic"),
            source_object: field_str(row, "source_object"),
            target_object: field_str(row, "target_object"),
            load_type,
            is_active: field_bool(row, "is_active").unwrap_or(true),
            business_keys: split_columns(field_str(row, "business_key_columns")),
            tracked_columns: split_columns(field_str(row, "tracked_columns")),
        })
    }
}

/// Split a comma-separated control-table column list.
fn split_columns(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[async_trait]
impl MetadataStore for SqlMetadataStore {
    async fn load_steps(&self, job_code: &str) -> EngineResult<Vec<StepDefinition>> {
        let sql = format!(
            "SELECT job_code, step_number, description, sql_logic, source_object, \
             target_object, load_type, is_active, business_key_columns, tracked_columns \
             FROM {} WHERE job_code = {} AND is_active ORDER BY step_number",
            self.table,
            quote_literal(job_code)
        );

        let rows = self.warehouse.query(&sql).await?;
        let steps = rows
            .iter()
            .map(|row| Self::parse_row(&self.table, row))
            .collect::<EngineResult<Vec<_>>>()?;

        let steps = validate_step_program(job_code, steps)?;
        tracing::debug!(job_code, steps = steps.len(), "loaded step program");
        Ok(steps)
    }
}
