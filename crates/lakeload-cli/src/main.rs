use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lakeload_sync::{build_scheduler, init_logging, EtlConfig, Pipeline, RunSummary};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "lakeload-cli")]
#[command(about = "Load SQL and spreadsheet extracts into the data lake")]
struct Cli {
    /// YAML configuration file; environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the load once.
    Run,
    /// Run the load on the configured cron schedule until interrupted.
    Schedule,
}

fn print_summary(summary: &RunSummary) {
    println!(
        "run complete: run_id={} outcome={:?} spreadsheets={} uploads={} metadata_records={}",
        summary.run_id,
        summary.outcome,
        summary.spreadsheets_processed,
        summary.uploads_attempted,
        summary
            .metadata_records
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EtlConfig::from_yaml_file(path)?,
        None => EtlConfig::from_env(),
    };
    let _log_guard = init_logging(&config.log_file)?;
    let pipeline = Arc::new(Pipeline::new(config)?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = pipeline.run_once().await;
            print_summary(&summary);
        }
        Commands::Schedule => match build_scheduler(pipeline.clone()).await? {
            Some(mut sched) => {
                sched.start().await.context("starting scheduler")?;
                info!(cron = %pipeline.config().sync_cron, "scheduler started");
                tokio::signal::ctrl_c()
                    .await
                    .context("waiting for ctrl-c")?;
                sched.shutdown().await.context("stopping scheduler")?;
                info!("scheduler stopped");
            }
            None => {
                warn!("scheduler disabled in configuration; running once");
                let summary = pipeline.run_once().await;
                print_summary(&summary);
            }
        },
    }

    Ok(())
}
