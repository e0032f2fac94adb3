//! # central-daemon
//!
//! CLI binary for the central aggregation backend.
//!
//! ## Commands
//!
//! - `run` - Open the store and run the rollup/purge scheduler until ctrl-c
//! - `purge` - One-off purge of expired rows, then exit
//!
//! ## Usage
//!
//! ```bash
//! central-daemon run
//! central-daemon --config /etc/central/config.toml run
//! central-daemon purge
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use central_aggregate::RollupService;
use central_scheduler::{jobs, SchedulerConfig, SchedulerService};
use central_storage::Storage;
use central_types::Settings;

/// Central aggregation daemon.
#[derive(Parser)]
#[command(name = "central-daemon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run,
    /// Purge expired rows once and exit
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.clone())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Run => run(settings).await,
        Commands::Purge => purge_once(settings).await,
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let rollup_config = settings.rollup_config()?;
    let storage = Arc::new(Storage::open(
        Path::new(&settings.db_path),
        rollup_config.level_count(),
    )?);
    let rollup = Arc::new(RollupService::new(
        storage.clone(),
        rollup_config,
        settings.max_query_aggregates,
        settings.max_service_call_aggregates,
    ));

    let mut scheduler = SchedulerService::new(SchedulerConfig {
        default_timezone: settings.scheduler.timezone.clone(),
        ..Default::default()
    })
    .await?;
    jobs::create_rollup_job(&scheduler, storage.clone(), rollup, &settings.scheduler).await?;
    jobs::create_purge_job(&scheduler, storage.clone(), &settings.scheduler).await?;
    scheduler.start().await?;
    info!(db_path = %settings.db_path, "Central daemon running");

    tokio::signal::ctrl_c().await?;
    info!("Received ctrl-c, shutting down");
    scheduler.shutdown().await?;
    storage.flush()?;
    Ok(())
}

async fn purge_once(settings: Settings) -> anyhow::Result<()> {
    let rollup_config = settings.rollup_config()?;
    let storage = Storage::open(Path::new(&settings.db_path), rollup_config.level_count())?;
    let purged = storage.purge_expired(Utc::now().timestamp_millis())?;
    info!(purged, "Purge complete");
    Ok(())
}
