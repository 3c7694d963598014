//! adsync CLI - run advertising-platform extraction jobs in dependency order.

mod command;
mod logging;

use adsync_core::{
    ConfigError, OrchestratorConfig, OrchestratorResult, EXIT_CONFIG_ERROR, EXIT_UNEXPECTED_ERROR,
};
use adsync_execution::{ExecutionMonitor, Orchestrator, OrchestratorError};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "adsync")]
#[command(about = "Dependency-aware extraction job orchestrator", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a configuration file without running anything
    Validate {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the execution waves
    Plan {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run enabled jobs
    Run {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Only run these jobs (repeatable)
        #[arg(long = "job")]
        jobs: Vec<String>,
        /// Write an execution report (.json or .csv)
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let code = match execute(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "adsync failed");
            eprintln!("error: {err:#}");
            if err.downcast_ref::<ConfigError>().is_some() {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_UNEXPECTED_ERROR
            }
        }
    };

    std::process::exit(code);
}

async fn execute(command: Commands) -> Result<i32> {
    match command {
        Commands::Validate { config } => {
            let orchestrator = load(&config)?;
            let cfg = orchestrator.config();
            println!(
                "Configuration OK: {} jobs ({} enabled)",
                cfg.jobs.len(),
                cfg.enabled_jobs().len()
            );
            Ok(0)
        }
        Commands::Plan { config } => {
            let orchestrator = load(&config)?;
            for (index, wave) in orchestrator.plan()?.iter().enumerate() {
                println!("Wave {}: {}", index + 1, wave.join(", "));
            }
            Ok(0)
        }
        Commands::Run { config, jobs, report } => {
            let orchestrator = load(&config)?;
            let monitor = Arc::new(ExecutionMonitor::new());

            let outcome = if jobs.is_empty() {
                orchestrator.run_with_monitor(monitor.clone()).await
            } else {
                orchestrator.run_jobs_with_monitor(&jobs, monitor.clone()).await
            };

            if let Some(path) = &report {
                monitor.export(path)?;
            }

            match outcome {
                Ok(result) => {
                    print_result(&result);
                    Ok(result.exit_code())
                }
                Err(OrchestratorError::RunAborted { job, message, result }) => {
                    error!(job = %job, error = %message, "Run aborted");
                    print_result(&result);
                    Ok(result.exit_code())
                }
                Err(OrchestratorError::Internal { message, result }) => {
                    print_result(&result);
                    Err(anyhow::anyhow!("internal orchestrator error: {message}"))
                }
                Err(OrchestratorError::Configuration(err)) => Err(err.into()),
            }
        }
    }
}

/// Load the configuration and register a command job for every entry.
fn load(path: &Path) -> Result<Orchestrator<()>> {
    let config = OrchestratorConfig::from_path(path)?;
    info!(path = %path.display(), jobs = config.jobs.len(), "Loaded configuration");

    let settings: HashMap<String, serde_json::Value> = config
        .jobs
        .iter()
        .map(|job| (job.name.clone(), job.settings.clone()))
        .collect();
    let registry = command::command_registry(settings);

    Ok(Orchestrator::new(config, registry, Arc::new(()))?)
}

fn print_result(result: &OrchestratorResult) {
    println!(
        "Completed {}/{} jobs in {:.1}s ({} rows, {} tables)",
        result.completed.len(),
        result.summary.total_jobs,
        result.total_duration_seconds,
        result.total_rows_processed,
        result.total_tables_processed,
    );
    for name in &result.skipped {
        println!("  skipped: {name}");
    }
    for (name, message) in &result.error_summary {
        println!("  failed:  {name} - {message}");
    }
}
