mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crew_sync_config::SyncConfig;
use crew_sync_core::connectivity::Connectivity;
use crew_sync_core::engine::SyncEngine;
use crew_sync_core::families::ALL_FAMILIES;
use crew_sync_core::http::RestBackend;
use crew_sync_core::identity::{ensure_identifier, is_identifier, stable_identifier_from};
use crew_sync_core::queue::MutationQueue;
use crew_sync_core::store::FileStore;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.cmd {
        Command::Check => check(&config).await,
        Command::Schema { refresh } => schema(&config, refresh).await,
        Command::Queue => queue(&config),
        Command::Flush => flush(&config).await,
        Command::Id { value, namespace } => id(&value, namespace.as_deref()),
    }
}

/// Engine against the configured backend, after confirming it is reachable.
async fn connected_engine(config: &SyncConfig) -> Result<SyncEngine> {
    let backend = RestBackend::from_config(config)?.with_context(|| {
        format!(
            "backend not configured; set backend_url/anon_key or {} and {}",
            crew_sync_config::BACKEND_URL_ENV,
            crew_sync_config::ANON_KEY_ENV
        )
    })?;

    info!("Connecting to {}", backend.base_url());
    let engine = SyncEngine::from_config(config, Arc::new(backend), Connectivity::new(true))?;
    engine
        .check_connection()
        .await
        .context("backend session probe failed")?;
    Ok(engine)
}

async fn check(config: &SyncConfig) -> Result<()> {
    println!(
        "backend:   {}",
        config.backend_url.as_deref().unwrap_or("(not configured)")
    );
    println!("queue dir: {}", config.resolved_queue_dir()?.display());

    connected_engine(config).await?;
    println!("session:   ok");
    Ok(())
}

async fn schema(config: &SyncConfig, refresh: bool) -> Result<()> {
    let engine = connected_engine(config).await?;
    println!("{}", engine.detector().detect(refresh).await);
    Ok(())
}

fn queue(config: &SyncConfig) -> Result<()> {
    let store = Arc::new(FileStore::open(config.resolved_queue_dir()?)?);
    for family in ALL_FAMILIES {
        let queue = MutationQueue::new(config.queue_key(family.name), store.clone());
        println!("{:<28} {}", family.table, queue.len());
    }
    Ok(())
}

async fn flush(config: &SyncConfig) -> Result<()> {
    let engine = connected_engine(config).await?;
    let pending = engine.pending_total();
    info!("Flushing {} queued operations", pending);

    let failed = engine.flush().await;
    println!("{} failed", failed);
    if failed > 0 {
        warn!("{} of {} operations could not be replayed", failed, pending);
        bail!("{} operations remain queued", failed);
    }
    Ok(())
}

fn id(value: &str, namespace: Option<&str>) -> Result<()> {
    if value.is_empty() {
        bail!("value must not be empty");
    }

    let normalized = match namespace {
        Some(namespace) => ensure_identifier(value, namespace),
        None if is_identifier(value) => value.to_string(),
        None => stable_identifier_from(value),
    };
    println!("{}", normalized);
    Ok(())
}
