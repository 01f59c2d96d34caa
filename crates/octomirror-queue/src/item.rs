//! Queue item model and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a queue item
///
/// Uses ULID so that identifiers sort roughly by creation time, which makes
/// queue listings readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueItemId(Ulid);

impl QueueItemId {
    /// Generate a new unique queue item ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueItemId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse::<Ulid>()?))
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of a queue item
///
/// `pending → processing → processed` on success. A retryable failure
/// returns the item to `pending` with a bumped attempt counter and a future
/// `next_retry_at`; exhausting `max_attempts` parks it in `dead_letter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Processed,
    DeadLetter,
}

impl QueueItemStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing lease held by a worker on a `processing` item
///
/// A lease older than the configured horizon is considered abandoned and the
/// item is returned to `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: String,
    pub leased_at: DateTime<Utc>,
}

// ============================================================================
// Items
// ============================================================================

/// A webhook delivery waiting for (or finished with) asynchronous processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    /// `X-GitHub-Delivery` value; at most one item exists per delivery ID.
    pub delivery_id: String,
    /// `X-GitHub-Event` value.
    pub event: String,
    /// The payload's `action` field, when present.
    pub action: Option<String>,
    /// Raw event payload; cleared once the item is processed.
    pub payload: serde_json::Value,
    pub status: QueueItemStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
}

impl QueueItem {
    /// Check whether this item can be claimed at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueItemStatus::Pending && self.next_retry_at <= now
    }

    /// Check whether this item has failed at least once but is still
    /// awaiting a retry
    pub fn is_retrying(&self) -> bool {
        self.status == QueueItemStatus::Pending && self.attempts > 0
    }

    /// Check whether the processing lease has expired
    pub fn lease_expired(&self, horizon: chrono::Duration, now: DateTime<Utc>) -> bool {
        match (&self.status, &self.lease) {
            (QueueItemStatus::Processing, Some(lease)) => now - lease.leased_at > horizon,
            _ => false,
        }
    }
}

/// Input for enqueueing a freshly received webhook delivery
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub delivery_id: String,
    pub event: String,
    pub action: Option<String>,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
}

impl NewQueueItem {
    /// Build the stored item, `pending` and immediately due
    pub fn into_item(self, now: DateTime<Utc>) -> QueueItem {
        QueueItem {
            id: QueueItemId::new(),
            delivery_id: self.delivery_id,
            event: self.event,
            action: self.action,
            payload: self.payload,
            status: QueueItemStatus::Pending,
            attempts: 0,
            max_attempts: self.max_attempts,
            next_retry_at: now,
            last_error: None,
            created_at: now,
            processed_at: None,
            failed_at: None,
            lease: None,
        }
    }
}

#[cfg(test)]
#[path = "item_tests.rs"]
mod tests;
