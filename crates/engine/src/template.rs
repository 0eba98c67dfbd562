//! Placeholder substitution for templated SQL logic.
//!
//! `sql_logic` may reference a fixed, allow-listed token set:
//! `{{run_id}}`, `{{job_code}}`, `{{source_object}}`, `{{target_object}}`,
//! `{{batch_ts}}`. Tokens are substituted before submission; an unresolved
//! token is a configuration error, never passed through to the warehouse.
//! The token set is closed on purpose: no expressions, no filters.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("token pattern"));

/// Values available for substitution during one step execution.
#[derive(Debug, Clone)]
pub struct BindContext {
    pub run_id: Uuid,
    pub job_code: String,
    pub source_object: Option<String>,
    pub target_object: Option<String>,
    /// One timestamp per run, shared by every step's SQL.
    pub batch_ts: DateTime<Utc>,
}

impl BindContext {
    /// Resolve a token name to its value, or None when the token is not in
    /// the allow-list or has no value for this step.
    fn resolve(&self, token: &str) -> Option<String> {
        match token {
            "run_id" => Some(self.run_id.to_string()),
            "job_code" => Some(self.job_code.clone()),
            "source_object" => self.source_object.clone(),
            "target_object" => self.target_object.clone(),
            "batch_ts" => Some(format_ts(self.batch_ts)),
            _ => None,
        }
    }
}

/// Substitute all placeholder tokens in `sql`.
pub fn render(sql: &str, ctx: &BindContext) -> EngineResult<String> {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for caps in TOKEN_RE.captures_iter(sql) {
        let token = caps
            .get(0)
            .ok_or_else(|| EngineError::PlaceholderResolution(sql.to_string()))?;
        let name = &caps[1];
        let value = ctx
            .resolve(name)
            .ok_or_else(|| EngineError::PlaceholderResolution(name.to_string()))?;
        out.push_str(&sql[last..token.start()]);
        out.push_str(&value);
        last = token.end();
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

/// Format a timestamp the way it is written into SQL (second precision,
/// `YYYY-MM-DD HH:MM:SS`, UTC).
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// A timestamp as a SQL literal.
pub fn ts_literal(ts: DateTime<Utc>) -> String {
    format!("TIMESTAMP '{}'", format_ts(ts))
}

/// Quote a string as a SQL literal (single-quote doubling).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// An optional string as a SQL literal or NULL.
pub fn opt_literal(value: Option<&str>) -> String {
    match value {
        Some(v) => quote_literal(v),
        None => "NULL".to_string(),
    }
}
