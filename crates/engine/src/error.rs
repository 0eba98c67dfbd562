//! Engine error types.
//!
//! The taxonomy maps directly onto the engine's propagation rules: metadata
//! errors abort before a run record exists, step-level execution errors are
//! logged to the step audit before surfacing, and finalization guards are
//! programming errors that must never be swallowed.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No active steps exist for the requested job code.
    #[error("no active steps found for job code '{0}'")]
    MetadataNotFound(String),

    /// The control table contents violate an engine invariant.
    #[error("control table integrity error: {0}")]
    MetadataIntegrity(String),

    /// A warehouse-reported failure while executing a statement.
    ///
    /// `transient` distinguishes connection/timeout failures (retry
    /// eligible) from SQL failures (not retried).
    #[error("execution failed: {message}")]
    Execution { message: String, transient: bool },

    /// A run record was finalized more than once.
    #[error("run {0} is already finalized")]
    AlreadyFinalized(Uuid),

    /// `sql_logic` references a token outside the allow-listed set, or one
    /// with no value in the current bind context.
    #[error("unresolved placeholder '{0}' in sql_logic")]
    PlaceholderResolution(String),

    /// Another run for the same job code holds the run lock.
    #[error("a run for job code '{0}' is already in progress")]
    RunInProgress(String),

    /// The run was cancelled at a step boundary.
    #[error("run cancelled")]
    Cancelled,

    /// Warehouse endpoint configuration or connection setup failure.
    #[error("warehouse connection error: {0}")]
    Connection(String),
}

impl EngineError {
    /// Build a step execution error.
    pub fn execution(message: impl Into<String>, transient: bool) -> Self {
        EngineError::Execution {
            message: message.into(),
            transient,
        }
    }

    /// Returns true if the error is eligible for the step retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Execution { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
