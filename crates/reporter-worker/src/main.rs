use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reporter_worker::{build_pipeline, init_tracing, router, AppState, WorkerConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Report generation worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the report ingest and health endpoints
    Serve,
    /// Run a single report message through the pipeline
    Process(ProcessArgs),
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Path to a JSON report message
    #[arg(long)]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = WorkerConfig::from_env()?;
    init_tracing();

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Process(args) => process(config, args).await,
    }
}

async fn serve(config: WorkerConfig) -> Result<()> {
    let pipeline = Arc::new(build_pipeline(&config).await?);
    let state = AppState::new(pipeline, config.max_in_flight_reports);

    let listener = TcpListener::bind(config.server_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server_address))?;
    info!(address = %listener.local_addr()?, "report worker listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested; draining in-flight reports");
            }
        })
        .await?;
    Ok(())
}

async fn process(config: WorkerConfig, args: ProcessArgs) -> Result<()> {
    let body = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let pipeline = build_pipeline(&config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling report");
            on_signal.cancel();
        }
    });

    let outcome = pipeline
        .process_with_cancellation(&body, &cancel)
        .await
        .context("report generation failed")?;
    info!(report_id = %outcome.report_id(), status = %outcome.status(), "report processed");
    Ok(())
}
