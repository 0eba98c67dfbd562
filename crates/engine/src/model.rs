//! Core data model: control-table rows, run records, and audit rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a step loads its target object.
///
/// This is a closed set: the runner matches on it exhaustively, so a new
/// load type cannot ship without a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadType {
    /// Replace the target contents from the source.
    Full,
    /// Append new rows to the target.
    Incremental,
    /// Type-2 history-preserving dimension merge.
    Scd2,
}

impl LoadType {
    /// Parse a control-table `load_type` value (case insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "FULL" => Some(LoadType::Full),
            "INCREMENTAL" => Some(LoadType::Incremental),
            "SCD2" => Some(LoadType::Scd2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadType::Full => "FULL",
            LoadType::Incremental => "INCREMENTAL",
            LoadType::Scd2 => "SCD2",
        }
    }
}

impl std::fmt::Display for LoadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the control table: a single SQL-driven unit of work within a
/// job, with a fixed execution position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub job_code: String,

    /// Execution order within the job. Gaps are legal, duplicates are not.
    pub step_number: i32,

    /// Human-readable step description, carried into failure messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Templated SQL text. May reference the allow-listed placeholder
    /// tokens. Empty for steps that rely on generated load SQL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_logic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_object: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_object: Option<String>,

    pub load_type: LoadType,

    /// Inactive steps are skipped (and logged as such), never deleted.
    pub is_active: bool,

    /// Business-key columns for SCD2 targets.
    #[serde(default)]
    pub business_keys: Vec<String>,

    /// Attribute columns whose changes open a new dimension row.
    #[serde(default)]
    pub tracked_columns: Vec<String>,
}

impl StepDefinition {
    /// The trimmed sql_logic, or None when absent or blank.
    pub fn sql(&self) -> Option<&str> {
        self.sql_logic
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    /// At least one step succeeded before a hard failure stopped the run.
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
            RunStatus::Partial => "PARTIAL",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    /// Written when the attempt begins; replaced on completion.
    Started,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "STARTED",
            StepStatus::Success => "SUCCESS",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single execution attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub job_code: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub overall_status: RunStatus,
}

/// One persisted step attempt. Retried steps produce one row per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub run_id: Uuid,
    pub step_number: i32,
    pub attempt: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: StepStatus,
    pub rows_affected: Option<i64>,
    pub error_message: Option<String>,
}

/// Outcome of one SQL submission to the warehouse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Total affected-row count, when the warehouse reports one.
    pub rows_affected: Option<i64>,

    /// Returned rows as JSON objects keyed by column name.
    pub returned_rows: Vec<serde_json::Value>,
}
