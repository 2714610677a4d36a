//! ROPT server binary.
//!
//! Wires configuration, backing stores, the ingestion consumer, the fanout
//! relay and the HTTP/`WebSocket` API into one process, then runs until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `ropt-config.yaml` (defaults if missing)
//! 2. Initialize structured logging (tracing)
//! 3. Connect the durable store (with migrations) or use memory
//! 4. Connect the live state backend
//! 5. Build the fanout (local, or NATS-relayed)
//! 6. Assemble the application context and load zones + base graph
//! 7. Spawn the event consumer and the fanout relay
//! 8. Serve HTTP until shutdown, then stop the consumer
//!
//! Shared backends are retried with bounded backoff; if one stays down the
//! process exits with an error.

mod error;
mod retry;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use ropt_core::config::{FanoutMode, LiveBackend, PersistenceBackend, RoptConfig};
use ropt_core::{AppContext, Fanout, LiveState, Persistence, spawn_consumer};
use ropt_db::{DragonflyPool, PostgresPool};
use ropt_observer::{ServerConfig, start_server};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::StartupError;
use crate::retry::connect_with_retry;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "ropt-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, a required backend stays
/// unreachable, or the HTTP listener cannot bind.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration. Logging is not up yet, so failures surface
    //    through the returned error.
    let config = RoptConfig::load(Path::new(CONFIG_PATH))
        .with_context(|| format!("loading {CONFIG_PATH}"))?;

    // 2. Initialize structured logging. RUST_LOG wins over the config.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        port = config.server.port,
        live_state = ?config.live_state.backend,
        fanout = ?config.fanout.mode,
        persistence = ?config.persistence.backend,
        queue_capacity = config.ingest.queue_capacity,
        "ropt-server starting"
    );

    let infra = config.infrastructure.clone();
    let attempts = infra.connect_attempts;
    let backoff = infra.connect_backoff();

    // 3. Durable store.
    let persistence = match config.persistence.backend {
        PersistenceBackend::Postgres => {
            let pool = connect_with_retry("postgres", attempts, backoff, || {
                PostgresPool::connect_url(&infra.postgres_url)
            })
            .await?;
            pool.run_migrations()
                .await
                .map_err(|e| StartupError::Core { source: e.into() })?;
            Persistence::Postgres(pool)
        }
        PersistenceBackend::Memory => {
            tracing::warn!("Using in-memory persistence; events are lost on restart");
            Persistence::memory()
        }
    };

    // 4. Live state.
    let limits = config.ingest.live_limits();
    let live = match config.live_state.backend {
        LiveBackend::Shared => {
            let pool = connect_with_retry("dragonfly", attempts, backoff, || {
                DragonflyPool::connect(&infra.dragonfly_url)
            })
            .await?;
            LiveState::shared(pool, &config.live_state.key_prefix, limits)
        }
        LiveBackend::Memory => {
            info!("Using in-memory live state; run exactly one ingestion process");
            LiveState::memory(limits)
        }
    };

    // 5. Fanout.
    let fanout = match config.fanout.mode {
        FanoutMode::Distributed => {
            let client = connect_with_retry("nats", attempts, backoff, || {
                async_nats::connect(infra.nats_url.as_str())
            })
            .await?;
            info!(subject = %config.fanout.subject, "Distributed fanout over NATS");
            Fanout::distributed(client, &config.fanout.subject, config.fanout.viewer_buffer)
        }
        FanoutMode::Local => Fanout::local(config.fanout.viewer_buffer),
    };
    let fanout = Arc::new(fanout);

    // 6. Application context and planning state.
    let server_config = ServerConfig::from(&config.server);
    let (ctx, events) = AppContext::new(config, live, persistence, Arc::clone(&fanout));
    ctx.load_planning_state()
        .await
        .map_err(|source| StartupError::Core { source })?;

    // 7. Consumer and relay.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = spawn_consumer(Arc::clone(&ctx), events, shutdown_rx);
    let relay = fanout
        .start_relay()
        .await
        .map_err(|source| StartupError::Core { source })?;

    // 8. Serve until Ctrl-C.
    start_server(&server_config, Arc::clone(&ctx), shutdown_signal())
        .await
        .map_err(|source| StartupError::Server { source })?;

    info!("Stopping event consumer");
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Event consumer already stopped");
    }
    if let Err(e) = consumer.await {
        tracing::error!(error = %e, "Event consumer task failed");
    }
    if let Some(relay) = relay {
        relay.abort();
    }

    info!("ropt-server shutdown complete");
    Ok(())
}

/// Resolves on `Ctrl-C`.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
