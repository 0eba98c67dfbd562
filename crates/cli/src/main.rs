//! Command line front end for the SQL job engine.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqlrun_engine::metadata::{MetadataStore, SqlMetadataStore};
use sqlrun_engine::{warehouse, CancelToken, EngineConfig, JobRunner, RunStatus};

#[derive(Parser)]
#[command(name = "sqlrun")]
#[command(version, about = "Metadata-driven SQL job runner", long_about = None)]
struct Cli {
    /// Warehouse endpoint (overrides SQLRUN_WAREHOUSE)
    #[arg(long)]
    warehouse: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one run of a job and exit non-zero unless it succeeds
    Run {
        /// Job code to run, as registered in the control table
        #[arg(value_name = "JOB_CODE")]
        job_code: String,
    },
    /// Print the active step program for a job as JSON
    Steps {
        #[arg(value_name = "JOB_CODE")]
        job_code: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlrun_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(url) = cli.warehouse {
        config.warehouse_url = url;
    }

    let warehouse = warehouse::connect(&config.warehouse_url)
        .with_context(|| format!("connecting to warehouse '{}'", config.warehouse_url))?;

    match cli.command {
        Commands::Run { job_code } => run_job(warehouse, &config, &job_code).await,
        Commands::Steps { job_code } => show_steps(warehouse, &config, &job_code).await,
    }
}

async fn run_job(
    warehouse: Arc<dyn warehouse::Warehouse>,
    config: &EngineConfig,
    job_code: &str,
) -> Result<ExitCode> {
    let runner = JobRunner::from_config(warehouse, config);

    let cancel = CancelToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling at next step boundary");
            signal_cancel.cancel();
        }
    });

    let outcome = runner
        .run_job(job_code, &cancel)
        .await
        .with_context(|| format!("running job '{job_code}'"))?;

    println!(
        "run {} of {}: {} ({} succeeded, {} skipped)",
        outcome.run_id,
        outcome.job_code,
        outcome.status,
        outcome.steps_succeeded,
        outcome.steps_skipped
    );
    if let Some(error) = &outcome.error {
        eprintln!("error: {error}");
    }

    Ok(if outcome.status == RunStatus::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn show_steps(
    warehouse: Arc<dyn warehouse::Warehouse>,
    config: &EngineConfig,
    job_code: &str,
) -> Result<ExitCode> {
    let store = SqlMetadataStore::new(warehouse, config.control_table.clone());
    let steps = store
        .load_steps(job_code)
        .await
        .with_context(|| format!("loading steps for job '{job_code}'"))?;

    println!("{}", serde_json::to_string_pretty(&steps)?);
    Ok(ExitCode::SUCCESS)
}
