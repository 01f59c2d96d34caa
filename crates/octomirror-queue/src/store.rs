//! Storage trait for the durable webhook queue.

use crate::error::QueueError;
use crate::item::{NewQueueItem, QueueItem, QueueItemId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Result of an enqueue attempt
///
/// Enqueueing is idempotent per delivery ID: a second enqueue for a delivery
/// that already has an item reports `Duplicate` with the existing item's ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(QueueItemId),
    Duplicate(QueueItemId),
}

impl EnqueueOutcome {
    /// Get the queue item ID regardless of outcome
    pub fn item_id(&self) -> QueueItemId {
        match self {
            Self::Enqueued(id) | Self::Duplicate(id) => *id,
        }
    }

    /// Check whether the delivery was already enqueued
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Per-status item counts for the observability surface
///
/// `failed` counts items that have failed at least once and are waiting for
/// a retry; they remain `pending` in storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub processed: usize,
    pub dead_letter: usize,
}

/// Result of a cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub processed_deleted: usize,
    pub dead_letter_deleted: usize,
}

impl CleanupStats {
    /// Total number of items deleted in this pass
    pub fn total(&self) -> usize {
        self.processed_deleted + self.dead_letter_deleted
    }
}

/// Persistence interface for the webhook queue
///
/// Implementations must guarantee at most one item per delivery ID and must
/// make `claim_due` hand each due item to exactly one caller.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new pending item, or report the existing one for a
    /// duplicate delivery ID
    async fn enqueue(&self, item: NewQueueItem) -> Result<EnqueueOutcome, QueueError>;

    /// Claim up to `limit` due pending items, oldest first, marking each
    /// `processing` with a lease for `worker_id`
    async fn claim_due(
        &self,
        worker_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueError>;

    /// Transition a claimed item to `processed`, record `processed_at`, and
    /// clear its payload
    async fn mark_processed(&self, id: &QueueItemId, now: DateTime<Utc>)
        -> Result<(), QueueError>;

    /// Return a claimed item to `pending` after a retryable failure,
    /// bumping the attempt counter and scheduling the next try
    async fn mark_retry(
        &self,
        id: &QueueItemId,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// Park a claimed item in `dead_letter`, preserving the last error
    ///
    /// The stored attempt counter is raised to `max_attempts` if the item is
    /// dead-lettered early for a permanent failure.
    async fn mark_dead_letter(
        &self,
        id: &QueueItemId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// Return `processing` items whose lease is older than `horizon` to
    /// `pending`; returns the number reclaimed
    async fn release_expired_leases(
        &self,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError>;

    /// Fetch a single item by ID
    async fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>, QueueError>;

    /// Fetch the item for a delivery ID, if any
    async fn find_by_delivery(&self, delivery_id: &str) -> Result<Option<QueueItem>, QueueError>;

    /// List items awaiting retry plus dead-lettered items, oldest first
    async fn list_failed(&self) -> Result<Vec<QueueItem>, QueueError>;

    /// Operator retry: reset an awaiting-retry or dead-lettered item to a
    /// fresh `pending` state, immediately due
    async fn requeue(&self, id: &QueueItemId, now: DateTime<Utc>) -> Result<(), QueueError>;

    /// Operator retry-all: requeue every dead-lettered item; returns the
    /// number requeued
    async fn requeue_all_dead(&self, now: DateTime<Utc>) -> Result<usize, QueueError>;

    /// Operator discard: delete an item outright
    async fn discard(&self, id: &QueueItemId) -> Result<(), QueueError>;

    /// Operator discard-all: delete every dead-lettered item; returns the
    /// number deleted
    async fn discard_all_dead(&self) -> Result<usize, QueueError>;

    /// Current per-status counts
    async fn counts(&self) -> Result<StatusCounts, QueueError>;

    /// Age of the oldest pending item, if any
    async fn oldest_pending_age(&self, now: DateTime<Utc>)
        -> Result<Option<Duration>, QueueError>;

    /// When the most recent item finished processing, if any
    async fn last_processed_at(&self) -> Result<Option<DateTime<Utc>>, QueueError>;

    /// Delete `processed` items older than `processed_before` and
    /// `dead_letter` items older than `dead_letter_before`, at most `limit`
    /// in total
    async fn cleanup(
        &self,
        processed_before: DateTime<Utc>,
        dead_letter_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<CleanupStats, QueueError>;
}
