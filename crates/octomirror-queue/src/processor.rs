//! Background worker draining the webhook queue.
//!
//! The processor claims due items under a lease, hands each payload to the
//! injected [`QueueHandler`], and translates the outcome into the item's
//! next lifecycle state: `processed`, `pending` with backoff, or
//! `dead_letter`. A companion cleanup loop enforces the retention windows.

use crate::error::QueueError;
use crate::item::{QueueItem, QueueItemStatus};
use crate::store::{CleanupStats, QueueStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;

// ============================================================================
// Handler Interface
// ============================================================================

/// Failure reported by a [`QueueHandler`]
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
    /// Retryable failures return the item to `pending` with backoff;
    /// permanent ones dead-letter it immediately.
    pub retryable: bool,
}

impl HandlerError {
    /// A failure worth retrying (network, 5xx, rate limits)
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not succeed on retry
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Consumer of claimed queue items
///
/// Implemented by the event dispatcher; the processor stays ignorant of
/// webhook semantics.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    /// Process one claimed item
    async fn handle(&self, item: &QueueItem) -> Result<(), HandlerError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning knobs for the processor and cleanup loops
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Worker identity recorded on leases
    pub worker_id: String,
    /// Maximum items claimed per pass
    pub batch_size: usize,
    /// Sleep between passes when the queue is idle
    pub poll_interval: std::time::Duration,
    /// Base delay for exponential backoff
    pub base_delay: std::time::Duration,
    /// Cap applied to the computed backoff delay
    pub max_delay: std::time::Duration,
    /// Age after which a `processing` lease is considered abandoned
    pub lease_horizon: Duration,
    /// Retention window for `processed` items
    pub processed_retention: Duration,
    /// Retention window for `dead_letter` items
    pub dead_letter_retention: Duration,
    /// Maximum deletions per cleanup pass
    pub cleanup_batch_limit: usize,
    /// Sleep between cleanup passes
    pub cleanup_interval: std::time::Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            batch_size: 10,
            poll_interval: std::time::Duration::from_millis(500),
            base_delay: std::time::Duration::from_secs(2),
            max_delay: std::time::Duration::from_secs(300),
            lease_horizon: Duration::minutes(5),
            processed_retention: Duration::hours(24),
            dead_letter_retention: Duration::days(7),
            cleanup_batch_limit: 500,
            cleanup_interval: std::time::Duration::from_secs(600),
        }
    }
}

/// Compute the delay before retry number `attempts`
///
/// Capped exponential backoff, `min(base · 2^attempts, cap)`, with a
/// deterministic ±25% jitter derived from the attempt number so retry tests
/// stay reproducible.
pub fn backoff_delay(config: &ProcessorConfig, attempts: u32) -> std::time::Duration {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let exponent = attempts.min(16);
    let base_ms = config.base_delay.as_millis() as u64;
    let raw_ms = base_ms.saturating_mul(1u64 << exponent);
    let capped_ms = raw_ms.min(config.max_delay.as_millis() as u64);

    let mut hasher = DefaultHasher::new();
    attempts.hash(&mut hasher);
    let jitter_factor = 0.75 + (hasher.finish() % 500) as f64 / 1000.0;

    let jittered_ms = ((capped_ms as f64 * jitter_factor) as u64)
        .min(config.max_delay.as_millis() as u64);
    std::time::Duration::from_millis(jittered_ms)
}

// ============================================================================
// Processor
// ============================================================================

/// Per-pass processing statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStats {
    pub claimed: usize,
    pub processed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub leases_reclaimed: usize,
}

/// Long-lived worker draining the queue through a handler
pub struct QueueProcessor {
    store: Arc<dyn QueueStore>,
    handler: Arc<dyn QueueHandler>,
    config: ProcessorConfig,
}

impl QueueProcessor {
    /// Create a processor over a store and handler
    pub fn new(
        store: Arc<dyn QueueStore>,
        handler: Arc<dyn QueueHandler>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            handler,
            config,
        }
    }

    /// Run the processing loop until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.config.worker_id, "Webhook queue processor started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_once(Utc::now()).await {
                Ok(stats) if stats.claimed > 0 => {
                    debug!(
                        claimed = stats.claimed,
                        processed = stats.processed,
                        retried = stats.retried,
                        dead_lettered = stats.dead_lettered,
                        "Queue pass complete"
                    );
                    // Drain eagerly while there is work.
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Queue pass failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(worker_id = %self.config.worker_id, "Webhook queue processor stopped");
    }

    /// Run the cleanup loop until `shutdown` flips to `true`
    pub async fn run_cleanup(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.cleanup_once(Utc::now()).await {
                Ok(stats) if stats.total() > 0 => {
                    info!(
                        processed_deleted = stats.processed_deleted,
                        dead_letter_deleted = stats.dead_letter_deleted,
                        "Queue retention cleanup complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Queue retention cleanup failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cleanup_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Execute one claim-and-process pass
    pub async fn process_once(&self, now: DateTime<Utc>) -> Result<ProcessStats, QueueError> {
        let mut stats = ProcessStats::default();

        stats.leases_reclaimed = self
            .store
            .release_expired_leases(self.config.lease_horizon, now)
            .await?;
        if stats.leases_reclaimed > 0 {
            warn!(
                reclaimed = stats.leases_reclaimed,
                "Reclaimed abandoned processing leases"
            );
        }

        let claimed = self
            .store
            .claim_due(&self.config.worker_id, self.config.batch_size, now)
            .await?;
        stats.claimed = claimed.len();

        for item in claimed {
            self.process_item(&item, now, &mut stats).await?;
        }

        Ok(stats)
    }

    /// Delete expired processed and dead-lettered items
    pub async fn cleanup_once(&self, now: DateTime<Utc>) -> Result<CleanupStats, QueueError> {
        self.store
            .cleanup(
                now - self.config.processed_retention,
                now - self.config.dead_letter_retention,
                self.config.cleanup_batch_limit,
            )
            .await
    }

    async fn process_item(
        &self,
        item: &QueueItem,
        now: DateTime<Utc>,
        stats: &mut ProcessStats,
    ) -> Result<(), QueueError> {
        debug_assert_eq!(item.status, QueueItemStatus::Processing);

        match self.handler.handle(item).await {
            Ok(()) => {
                self.store.mark_processed(&item.id, now).await?;
                stats.processed += 1;
                debug!(
                    delivery_id = %item.delivery_id,
                    event = %item.event,
                    attempts = item.attempts,
                    "Webhook delivery processed"
                );
            }
            Err(failure) => {
                let next_attempts = item.attempts + 1;
                let exhausted = next_attempts >= item.max_attempts;

                if failure.retryable && !exhausted {
                    let delay = backoff_delay(&self.config, next_attempts);
                    let next_retry_at = now
                        + Duration::from_std(delay).unwrap_or_else(|_| Duration::seconds(60));
                    self.store
                        .mark_retry(&item.id, &failure.message, next_retry_at)
                        .await?;
                    stats.retried += 1;
                    warn!(
                        delivery_id = %item.delivery_id,
                        event = %item.event,
                        attempt = next_attempts,
                        max_attempts = item.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %failure.message,
                        "Webhook processing failed, scheduled retry"
                    );
                } else {
                    self.store
                        .mark_dead_letter(&item.id, &failure.message, now)
                        .await?;
                    stats.dead_lettered += 1;
                    error!(
                        delivery_id = %item.delivery_id,
                        event = %item.event,
                        attempts = next_attempts,
                        retryable = failure.retryable,
                        error = %failure.message,
                        "Webhook delivery dead-lettered"
                    );
                }
            }
        }

        Ok(())
    }
}
