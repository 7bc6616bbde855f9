//! Command-line entry point: a thin wrapper that can run the HTTP server or
//! drive a single sync/resolution pass directly, without going through the
//! Controller Surface.

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::clients::discogs::{DiscogsClient, OAuthCredentials};
use crate::config::Settings;
use crate::models::SyncMode;
use crate::progress::{DurationProgressStore, SyncProgressStore};
use crate::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::repository::{AlbumRepository, DurationRepository, SyncLogRepository};
use crate::resolver::DurationResolverWorker;
use crate::state::StateManager;
use crate::sync::{CatalogSyncWorker, SyncWorkerConfig};

#[derive(Parser)]
#[command(name = "vinylkeeper", about = "Self-hosted record catalog sync and duration resolution service")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup, before `Cli::parse`).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (the Controller Surface).
    Serve,

    /// Run a single catalog sync to completion.
    Sync {
        /// Discogs username to sync
        username: String,
        /// Releases fetched per Discogs API page
        #[arg(long, default_value_t = 50)]
        batch_size: i32,
        /// "all", "all-folders", or "specific"
        #[arg(long, default_value = "all")]
        mode: String,
        /// Folder id, required when mode is "specific"
        #[arg(long)]
        folder_id: Option<i64>,
    },

    /// Run duration resolution over the whole backlog to completion.
    ResolveDurations,

    /// Print the current sync and duration-resolver progress as JSON.
    Status,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings;

    match cli.command {
        Commands::Serve => crate::server::serve(&settings).await,
        Commands::Sync {
            username,
            batch_size,
            mode,
            folder_id,
        } => cmd_sync(&settings, username, batch_size, mode, folder_id).await,
        Commands::ResolveDurations => cmd_resolve_durations(&settings).await,
        Commands::Status => cmd_status(&settings),
    }
}

async fn cmd_sync(
    settings: &Settings,
    username: String,
    batch_size: i32,
    mode: String,
    folder_id: Option<i64>,
) -> anyhow::Result<()> {
    let sync_mode = SyncMode::from_str(&mode)
        .ok_or_else(|| anyhow::anyhow!("invalid sync mode: {mode} (expected all, all-folders, or specific)"))?;

    let db_path = settings.resolved_db_path();
    let db_path = Path::new(&db_path);

    let auth_limiter = RateLimiter::new(RateLimiterConfig::default());
    let anon_limiter = RateLimiter::new(RateLimiterConfig::default());
    let credentials = OAuthCredentials {
        consumer_key: settings.discogs_consumer_key.clone(),
        consumer_secret: settings.discogs_consumer_secret.clone(),
        token: None,
        token_secret: None,
    };
    let discogs = Arc::new(DiscogsClient::new(credentials, auth_limiter, anon_limiter));

    let worker = CatalogSyncWorker::new(
        discogs,
        Arc::new(AlbumRepository::new(db_path)?),
        Arc::new(SyncLogRepository::new(db_path)?),
        Arc::new(SyncProgressStore::new(db_path)?),
        StateManager::new(),
    );

    let config = SyncWorkerConfig {
        username,
        batch_size: batch_size.max(1),
        sync_mode,
        folder_id,
    };

    println!("starting catalog sync...");
    worker.run(config, CancellationToken::new()).await?;
    println!("sync complete");
    Ok(())
}

async fn cmd_resolve_durations(settings: &Settings) -> anyhow::Result<()> {
    let db_path = settings.resolved_db_path();
    let db_path = Path::new(&db_path);

    let providers = crate::server::build_providers(settings);
    let worker = DurationResolverWorker::new(
        providers,
        Arc::new(AlbumRepository::new(db_path)?),
        Arc::new(DurationRepository::new(db_path)?),
        Arc::new(DurationProgressStore::new(db_path)?),
        StateManager::new(),
    );

    println!("resolving track durations...");
    worker.run_bulk(CancellationToken::new()).await?;
    println!("duration resolution complete");
    Ok(())
}

fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let db_path = settings.resolved_db_path();
    let db_path = Path::new(&db_path);

    let sync_progress = SyncProgressStore::new(db_path)?.load()?;
    let duration_progress = DurationProgressStore::new(db_path)?.load()?;

    println!(
        "{}",
        serde_json::json!({
            "sync": sync_progress,
            "duration_resolution": duration_progress,
        })
    );
    Ok(())
}
