//! radiohue - live radio capture daemon
//!
//! Loads the static configuration, then either runs the slot scheduler until
//! interrupted or performs a single capture pass, sweep, or config check.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use radiohue_common::config::resolve_config_path;
use radiohue_common::events::EventBus;
use radiohue_common::{RadiohueConfig, StationId};
use radiohue_engine::{ArtifactStore, CapturePipeline, CaptureScheduler, JobRunner};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for radiohue
#[derive(Parser, Debug)]
#[command(name = "radiohue")]
#[command(about = "Samples live radio streams and dispatches a color per station")]
#[command(version)]
struct Args {
    /// Config file (default: $RADIOHUE_CONFIG, then the user and system config dirs)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the artifact directory
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Override the downstream WebSocket endpoint
    #[arg(long, env = "RADIOHUE_DISPATCH_ENDPOINT")]
    dispatch_endpoint: Option<String>,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until Ctrl+C or SIGTERM (default)
    Run,
    /// Run one capture pass now
    Capture {
        /// Comma-separated station ids (default: whole catalog)
        #[arg(long, value_delimiter = ',')]
        stations: Vec<String>,
    },
    /// Run one retention sweep now
    Sweep,
    /// Load and validate the configuration, then print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path =
        resolve_config_path(args.config.as_deref()).context("Failed to locate config file")?;
    let mut config = RadiohueConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    if let Some(dir) = args.artifact_dir {
        config.artifact_dir = dir;
    }
    if let Some(endpoint) = args.dispatch_endpoint {
        config.dispatch.endpoint = endpoint;
    }
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("radiohue={level},radiohue_engine={level},radiohue_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(config = %config_path.display(), "Configuration loaded");

    let command = args.command.unwrap_or(Command::Run);
    if let Command::CheckConfig = command {
        print_summary(&config)?;
        return Ok(());
    }

    let store = ArtifactStore::new(&config.artifact_dir);
    store
        .ensure_dir(&config.retention.sentinel_file)
        .await
        .context("Failed to prepare artifact directory")?;

    let events = EventBus::new(256);
    let pipeline = Arc::new(
        CapturePipeline::from_config(&config, store, events.clone())
            .context("Failed to initialize capture pipeline")?,
    );

    match command {
        Command::Run => {
            let runner: Arc<dyn JobRunner> = pipeline.clone();
            let scheduler = CaptureScheduler::from_config(&config, runner, events)
                .await
                .context("Failed to initialize scheduler")?;

            let shutdown = CancellationToken::new();
            let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

            shutdown_signal().await;
            shutdown.cancel();
            if let Err(e) = scheduler_task.await {
                tracing::error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        Command::Capture { stations } => {
            let ids = if stations.is_empty() {
                pipeline.registry().ids()
            } else {
                stations
                    .into_iter()
                    .map(StationId::new)
                    .collect::<radiohue_common::Result<Vec<_>>>()
                    .context("Invalid station id")?
            };

            let report = pipeline
                .run_capture_pass(&ids)
                .await
                .context("Capture pass failed")?;
            for result in &report.dispatched {
                println!(
                    "{}  rgb({}, {}, {})",
                    result.station_id, result.rgb[0], result.rgb[1], result.rgb[2]
                );
            }
            for (station, kind) in &report.skipped {
                println!("{}  skipped ({})", station, kind);
            }
        }
        Command::Sweep => {
            let report = pipeline
                .run_cleanup_pass()
                .await
                .context("Retention sweep failed")?;
            println!(
                "deleted {} file(s), {} in flight, {} failure(s)",
                report.deleted.len(),
                report.in_flight,
                report.failures
            );
        }
        Command::CheckConfig => {}
    }

    pipeline.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn print_summary(config: &RadiohueConfig) -> Result<()> {
    let registry = config.station_registry()?;
    let slots = config.schedule.expanded_slots()?;

    println!("artifact_dir: {}", config.artifact_dir.display());
    println!("dispatch:     {}", config.dispatch.endpoint);
    println!(
        "stations:     {}",
        registry
            .ids()
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "slots:        {} per day ({:?})",
        slots.len(),
        config.schedule.repeat
    );
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
