//! convoyd — the convoy control plane daemon.
//!
//! Composition root: opens the GDM store and the image-name cache, wires
//! the scheduler clients, the rectification queue, and the REST surface,
//! and serves until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use convoy_api::{run_queue_worker, ApiState, RectifyQueue};
use convoy_registry::NameCache;
use convoy_scheduler::{DeletePolicy, HttpClientFactory, Resolver};
use convoy_state::StateStore;

mod config;
mod rectifier;
mod registry_api;

use config::ConvoydConfig;
use rectifier::QueueRectifier;
use registry_api::HttpRegistryApi;

#[derive(Parser)]
#[command(name = "convoyd", about = "Serve the convoy control plane")]
struct Cli {
    /// Path to convoyd.toml.
    #[arg(long, default_value = "convoyd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        ConvoydConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        info!(config = %cli.config.display(), "no config file, using defaults");
        ConvoydConfig::default()
    };

    let store = Arc::new(
        StateStore::open(&config.state_path())
            .with_context(|| format!("opening state at {}", config.state_path().display()))?,
    );

    let registry_api = Arc::new(HttpRegistryApi::new(
        config
            .registry_api_url
            .as_deref()
            .context("registry_api_url must be configured")?,
    )?);
    let cache = Arc::new(
        NameCache::open(&config.cache_path(), registry_api)
            .with_context(|| format!("opening cache at {}", config.cache_path().display()))?,
    );

    let factory = Arc::new(HttpClientFactory::new()?);
    let delete_policy = if config.propagate_deletes() {
        DeletePolicy::Propagate
    } else {
        DeletePolicy::Warn
    };
    let resolver = Resolver::new(factory, cache)
        .with_opts(config.assembler_opts())
        .with_delete_policy(delete_policy);

    let queue = Arc::new(RectifyQueue::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(run_queue_worker(
        queue.clone(),
        Arc::new(QueueRectifier::new(resolver, store.clone())),
        shutdown_rx,
    ));

    let app = convoy_api::router(ApiState {
        manager: store,
        queue,
    });
    let listener = tokio::net::TcpListener::bind(config.listen())
        .await
        .with_context(|| format!("binding {}", config.listen()))?;
    info!(listen = config.listen(), "convoyd serving");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    worker.await.context("queue worker died")?;
    Ok(())
}
