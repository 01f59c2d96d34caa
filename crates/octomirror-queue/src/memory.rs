//! In-memory queue store implementation.
//!
//! Fully functional reference implementation of [`QueueStore`] backed by a
//! `RwLock`-guarded map. Claiming sorts due items by creation time so
//! oldest-first ordering holds even for items enqueued in the same
//! millisecond.
//!
//! Intended for unit tests, development, and single-process deployments;
//! durable backends implement the same trait.

use crate::error::QueueError;
use crate::item::{Lease, NewQueueItem, QueueItem, QueueItemId, QueueItemStatus};
use crate::store::{CleanupStats, EnqueueOutcome, QueueStore, StatusCounts};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Thread-safe in-memory queue storage
pub struct MemoryQueueStore {
    inner: RwLock<Inner>,
}

struct Inner {
    items: BTreeMap<QueueItemId, QueueItem>,
    by_delivery: HashMap<String, QueueItemId>,
}

impl MemoryQueueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                items: BTreeMap::new(),
                by_delivery: HashMap::new(),
            }),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        // Lock poisoning only happens if a writer panicked; propagating the
        // panic to every later caller is the least surprising behavior.
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn get_mut(&mut self, id: &QueueItemId) -> Result<&mut QueueItem, QueueError> {
        self.items
            .get_mut(id)
            .ok_or_else(|| QueueError::ItemNotFound { id: id.to_string() })
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, item: NewQueueItem) -> Result<EnqueueOutcome, QueueError> {
        let mut inner = self.write();

        if let Some(existing) = inner.by_delivery.get(&item.delivery_id) {
            return Ok(EnqueueOutcome::Duplicate(*existing));
        }

        let stored = item.into_item(Utc::now());
        let id = stored.id;
        inner.by_delivery.insert(stored.delivery_id.clone(), id);
        inner.items.insert(id, stored);

        Ok(EnqueueOutcome::Enqueued(id))
    }

    async fn claim_due(
        &self,
        worker_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        let mut inner = self.write();

        let mut due: Vec<(DateTime<Utc>, QueueItemId)> = inner
            .items
            .values()
            .filter(|item| item.is_due(now))
            .map(|item| (item.created_at, item.id))
            .collect();
        due.sort();

        let mut claimed = Vec::new();
        for (_, id) in due.into_iter().take(limit) {
            let item = inner.get_mut(&id)?;
            item.status = QueueItemStatus::Processing;
            item.lease = Some(Lease {
                worker_id: worker_id.to_string(),
                leased_at: now,
            });
            claimed.push(item.clone());
        }

        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        id: &QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.write();
        let item = inner.get_mut(id)?;

        if item.status != QueueItemStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                operation: "mark_processed".to_string(),
            });
        }

        item.status = QueueItemStatus::Processed;
        item.processed_at = Some(now);
        item.payload = serde_json::Value::Null;
        item.lease = None;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: &QueueItemId,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.write();
        let item = inner.get_mut(id)?;

        if item.status != QueueItemStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                operation: "mark_retry".to_string(),
            });
        }

        item.status = QueueItemStatus::Pending;
        item.attempts += 1;
        item.next_retry_at = next_retry_at;
        item.last_error = Some(error.to_string());
        item.lease = None;
        Ok(())
    }

    async fn mark_dead_letter(
        &self,
        id: &QueueItemId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.write();
        let item = inner.get_mut(id)?;

        if item.status != QueueItemStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                operation: "mark_dead_letter".to_string(),
            });
        }

        item.status = QueueItemStatus::DeadLetter;
        // Dead-lettered items always satisfy attempts >= max_attempts, even
        // when parked early for a permanent failure.
        item.attempts = item.attempts.saturating_add(1).max(item.max_attempts);
        item.failed_at = Some(now);
        item.last_error = Some(error.to_string());
        item.lease = None;
        Ok(())
    }

    async fn release_expired_leases(
        &self,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        let mut inner = self.write();
        let mut released = 0;

        for item in inner.items.values_mut() {
            if item.lease_expired(horizon, now) {
                item.status = QueueItemStatus::Pending;
                item.next_retry_at = now;
                item.lease = None;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>, QueueError> {
        Ok(self.read().items.get(id).cloned())
    }

    async fn find_by_delivery(&self, delivery_id: &str) -> Result<Option<QueueItem>, QueueError> {
        let inner = self.read();
        Ok(inner
            .by_delivery
            .get(delivery_id)
            .and_then(|id| inner.items.get(id))
            .cloned())
    }

    async fn list_failed(&self) -> Result<Vec<QueueItem>, QueueError> {
        let inner = self.read();
        Ok(inner
            .items
            .values()
            .filter(|item| item.is_retrying() || item.status == QueueItemStatus::DeadLetter)
            .cloned()
            .collect())
    }

    async fn requeue(&self, id: &QueueItemId, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut inner = self.write();
        let item = inner.get_mut(id)?;

        match item.status {
            QueueItemStatus::Pending | QueueItemStatus::DeadLetter => {
                item.status = QueueItemStatus::Pending;
                item.attempts = 0;
                item.next_retry_at = now;
                item.failed_at = None;
                item.lease = None;
                Ok(())
            }
            _ => Err(QueueError::InvalidTransition {
                id: id.to_string(),
                operation: "requeue".to_string(),
            }),
        }
    }

    async fn requeue_all_dead(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut inner = self.write();
        let mut requeued = 0;

        for item in inner.items.values_mut() {
            if item.status == QueueItemStatus::DeadLetter {
                item.status = QueueItemStatus::Pending;
                item.attempts = 0;
                item.next_retry_at = now;
                item.failed_at = None;
                item.lease = None;
                requeued += 1;
            }
        }

        Ok(requeued)
    }

    async fn discard(&self, id: &QueueItemId) -> Result<(), QueueError> {
        let mut inner = self.write();
        let item = inner
            .items
            .remove(id)
            .ok_or_else(|| QueueError::ItemNotFound { id: id.to_string() })?;
        inner.by_delivery.remove(&item.delivery_id);
        Ok(())
    }

    async fn discard_all_dead(&self) -> Result<usize, QueueError> {
        let mut inner = self.write();
        let dead: Vec<QueueItemId> = inner
            .items
            .values()
            .filter(|item| item.status == QueueItemStatus::DeadLetter)
            .map(|item| item.id)
            .collect();

        for id in &dead {
            if let Some(item) = inner.items.remove(id) {
                inner.by_delivery.remove(&item.delivery_id);
            }
        }

        Ok(dead.len())
    }

    async fn counts(&self) -> Result<StatusCounts, QueueError> {
        let inner = self.read();
        let mut counts = StatusCounts::default();

        for item in inner.items.values() {
            match item.status {
                QueueItemStatus::Pending => {
                    counts.pending += 1;
                    if item.attempts > 0 {
                        counts.failed += 1;
                    }
                }
                QueueItemStatus::Processing => counts.processing += 1,
                QueueItemStatus::Processed => counts.processed += 1,
                QueueItemStatus::DeadLetter => counts.dead_letter += 1,
            }
        }

        Ok(counts)
    }

    async fn oldest_pending_age(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, QueueError> {
        let inner = self.read();
        Ok(inner
            .items
            .values()
            .filter(|item| item.status == QueueItemStatus::Pending)
            .map(|item| now - item.created_at)
            .max())
    }

    async fn last_processed_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        let inner = self.read();
        Ok(inner
            .items
            .values()
            .filter_map(|item| item.processed_at)
            .max())
    }

    async fn cleanup(
        &self,
        processed_before: DateTime<Utc>,
        dead_letter_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<CleanupStats, QueueError> {
        let mut inner = self.write();
        let mut stats = CleanupStats::default();
        let mut to_delete = Vec::new();

        for item in inner.items.values() {
            if to_delete.len() >= limit {
                break;
            }
            match item.status {
                QueueItemStatus::Processed
                    if item.processed_at.is_some_and(|t| t < processed_before) =>
                {
                    to_delete.push(item.id);
                    stats.processed_deleted += 1;
                }
                QueueItemStatus::DeadLetter
                    if item.failed_at.is_some_and(|t| t < dead_letter_before) =>
                {
                    to_delete.push(item.id);
                    stats.dead_letter_deleted += 1;
                }
                _ => {}
            }
        }

        for id in to_delete {
            if let Some(item) = inner.items.remove(&id) {
                inner.by_delivery.remove(&item.delivery_id);
            }
        }

        Ok(stats)
    }
}
