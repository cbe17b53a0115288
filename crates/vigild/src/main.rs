//! Vigil Daemon - emergency alert lifecycle and escalation engine

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use vigild::config::{Config, StorageBackend};
use vigild::directory::StaticDirectory;
use vigild::dispatcher::build_channels;
use vigild::server::{self, AppState};
use vigild::store::{AlertStore, JsonlStore, MemoryStore};
use vigild::Engine;

/// How often finished jobs and expired dedup keys are pruned
const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(name = "vigild", version, about = "Emergency alert escalation daemon")]
struct Args {
    /// Config file (default: /etc/vigil/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Keep alerts in memory only
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse();
    info!("[BOOT] vigild v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }

    let store: Arc<dyn AlertStore> = match config.storage.backend {
        StorageBackend::Jsonl => Arc::new(
            JsonlStore::open(&config.storage.data_dir)
                .await
                .context("Failed to open alert store")?,
        ),
        StorageBackend::Memory => {
            warn!("[BOOT] In-memory store: alerts will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    let directory = Arc::new(StaticDirectory::from_config(&config));
    let channels = build_channels(&config.channels)?;
    info!("[BOOT] {} facilities configured", config.facilities.len());

    let engine = Arc::new(
        Engine::start(&config, store, directory, channels)
            .await
            .context("Engine recovery failed")?,
    );

    let mut dead_letters = engine.dead_letters();
    tokio::spawn(async move {
        while let Ok(dead) = dead_letters.recv().await {
            error!(
                job = %dead.key,
                attempts = dead.attempts,
                "Dead letter: {}",
                dead.last_error
            );
        }
    });

    let pruner = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            pruner.dispatcher().prune_finished();
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down gracefully");
    };
    server::run(AppState::new(engine.clone()), &config.server.listen, shutdown).await?;

    engine.shutdown();
    Ok(())
}
