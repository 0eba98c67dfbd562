//! Engine configuration.

use std::time::Duration;

/// Retry policy for transient step failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries per step (beyond the first attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,

    /// Cap on the delay between retries, in milliseconds.
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given retry (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let ms = (self.initial_delay_ms as f64 * factor).round() as u64;
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Warehouse endpoint: `duckdb://<path>` or a PostgreSQL URL.
    pub warehouse_url: String,

    /// Control table holding job/step definitions.
    pub control_table: String,

    /// Run-level audit table.
    pub run_table: String,

    /// Step-level audit table.
    pub step_table: String,

    /// Retry policy for transient step failures.
    pub retry: RetryPolicy,

    /// Per-step statement timeout.
    pub step_timeout: Duration,

    /// Finalize as PARTIAL (rather than FAILED) when at least one step
    /// succeeded before a hard failure.
    pub partial_status: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warehouse_url: "duckdb://sqlrun.db".to_string(),
            control_table: "job_control".to_string(),
            run_table: "run_log".to_string(),
            step_table: "step_log".to_string(),
            retry: RetryPolicy::default(),
            step_timeout: Duration::from_secs(600),
            partial_status: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, with defaults for
    /// anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let warehouse_url =
            std::env::var("SQLRUN_WAREHOUSE").unwrap_or(defaults.warehouse_url);
        let control_table =
            std::env::var("SQLRUN_CONTROL_TABLE").unwrap_or(defaults.control_table);
        let run_table = std::env::var("SQLRUN_RUN_TABLE").unwrap_or(defaults.run_table);
        let step_table = std::env::var("SQLRUN_STEP_TABLE").unwrap_or(defaults.step_table);

        let step_timeout_secs: u64 = std::env::var("SQLRUN_STEP_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.step_timeout.as_secs());

        let retry = RetryPolicy {
            max_retries: env_parse("SQLRUN_MAX_RETRIES", defaults.retry.max_retries),
            initial_delay_ms: env_parse("SQLRUN_RETRY_INITIAL_MS", defaults.retry.initial_delay_ms),
            max_delay_ms: env_parse("SQLRUN_RETRY_MAX_MS", defaults.retry.max_delay_ms),
            backoff_multiplier: env_parse(
                "SQLRUN_RETRY_MULTIPLIER",
                defaults.retry.backoff_multiplier,
            ),
        };

        let partial_status = env_parse("SQLRUN_PARTIAL_STATUS", defaults.partial_status);

        Self {
            warehouse_url,
            control_table,
            run_table,
            step_table,
            retry,
            step_timeout: Duration::from_secs(step_timeout_secs),
            partial_status,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
