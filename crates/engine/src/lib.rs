//! Metadata-driven SQL job execution engine.
//!
//! Jobs are defined as rows in a control table: ordered, templated SQL
//! steps with a load type per step. The engine loads a job's step program,
//! interprets it against a warehouse backend, and records every run and
//! step attempt in audit tables. Type-2 dimension history is maintained by
//! a generated two-statement merge driven entirely by column metadata.
//!
//! The crate is backend-agnostic behind the [`warehouse::Warehouse`]
//! trait; PostgreSQL and embedded DuckDB adapters ship in-tree.

pub mod audit;
pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod metadata;
pub mod model;
pub mod run;
pub mod runner;
pub mod scd2;
pub mod template;
pub mod warehouse;

pub use config::{EngineConfig, RetryPolicy};
pub use error::{EngineError, EngineResult};
pub use model::{LoadType, RunRecord, RunStatus, StepDefinition, StepLog, StepStatus};
pub use runner::{CancelToken, JobRunner, RunOutcome};
