//! Octomirror service binary: config, tracing, workers, HTTP server.

use anyhow::Context;
use chrono::Duration;
use octomirror_core::dispatch::{DispatchingHandler, EventDispatcher};
use octomirror_core::sync_state::SyncTracker;
use octomirror_core::UserId;
use octomirror_queue::{ProcessorConfig, QueueProcessor};
use octomirror_service::{AppState, ServiceConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::load().context("loading configuration")?;
    init_tracing(&config);

    if config.github.webhook_secret.is_empty() {
        warn!("GITHUB_WEBHOOK_SECRET is not set; webhook deliveries will be rejected");
    }

    let state = AppState::new(config.clone())?;

    // Flip any sync-state abandoned in `syncing` by a previous run.
    let stale = Duration::seconds(config.sync.stale_threshold_secs);
    let recovered = SyncTracker::new(state.store.clone())
        .recover_stale(stale, chrono::Utc::now())
        .await
        .context("recovering stale sync states")?;
    if recovered > 0 {
        info!(recovered, "Recovered stale sync states from previous run");
    }

    // The queue processor and its cleanup loop run for the life of the
    // process and stop on ctrl-c.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let primary_user =
        UserId::new(config.sync.primary_user.clone()).context("invalid primary user id")?;
    let dispatcher = EventDispatcher::new(state.store.clone(), primary_user);
    let handler = Arc::new(DispatchingHandler::new(dispatcher, state.store.clone()));

    let processor = Arc::new(QueueProcessor::new(
        state.queue.clone(),
        handler,
        ProcessorConfig {
            batch_size: config.queue.batch_size,
            poll_interval: std::time::Duration::from_millis(config.queue.poll_interval_ms),
            base_delay: std::time::Duration::from_millis(config.queue.base_delay_ms),
            max_delay: std::time::Duration::from_millis(config.queue.max_delay_ms),
            lease_horizon: Duration::seconds(config.queue.lease_horizon_secs),
            processed_retention: Duration::hours(config.queue.processed_retention_hours),
            dead_letter_retention: Duration::days(config.queue.dead_letter_retention_days),
            cleanup_batch_limit: config.queue.cleanup_batch_limit,
            cleanup_interval: std::time::Duration::from_secs(config.queue.cleanup_interval_secs),
            ..ProcessorConfig::default()
        },
    ));

    let worker = {
        let processor = processor.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { processor.run(shutdown).await })
    };
    let cleaner = {
        let processor = processor.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { processor.run_cleanup(shutdown).await })
    };

    let server = tokio::spawn(octomirror_service::start_server(state));

    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received");
    shutdown_tx.send(true).ok();

    worker.await.ok();
    cleaner.await.ok();
    server.abort();
    Ok(())
}

fn init_tracing(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
