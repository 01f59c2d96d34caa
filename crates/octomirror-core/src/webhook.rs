//! Webhook receive pipeline: headers, signature, dedup, enqueue.
//!
//! The receiver does the minimum needed to durably accept a delivery and
//! returns: verify the HMAC-SHA256 signature over the raw body, parse the
//! JSON, suppress replays by delivery ID, and enqueue. Processing always
//! happens later, on the queue processor, so GitHub's delivery timeout
//! never waits on downstream latency.

use crate::store::{EntityKind, EntityRecord, EntityStore, StoreError};
use crate::{DeliveryId, EntityId};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use octomirror_queue::{NewQueueItem, QueueError, QueueItemId, QueueStore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

/// Default retry budget for enqueued deliveries
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Headers and Signature
// ============================================================================

/// The GitHub headers a delivery must carry
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    pub event: String,
    pub delivery_id: DeliveryId,
    pub signature: String,
}

impl WebhookHeaders {
    /// Parse the required headers from a lowercased header map
    pub fn from_http_headers(headers: &HashMap<String, String>) -> Result<Self, ReceiveError> {
        let delivery_id = headers
            .get("x-github-delivery")
            .filter(|value| !value.is_empty())
            .ok_or(ReceiveError::MissingHeader {
                name: "X-GitHub-Delivery",
            })?;
        let event = headers
            .get("x-github-event")
            .filter(|value| !value.is_empty())
            .ok_or(ReceiveError::MissingHeader {
                name: "X-GitHub-Event",
            })?;
        let signature = headers
            .get("x-hub-signature-256")
            .filter(|value| !value.is_empty())
            .ok_or(ReceiveError::MissingHeader {
                name: "X-Hub-Signature-256",
            })?;

        Ok(Self {
            event: event.clone(),
            delivery_id: DeliveryId::new(delivery_id.clone()).map_err(|_| {
                ReceiveError::MissingHeader {
                    name: "X-GitHub-Delivery",
                }
            })?,
            signature: signature.clone(),
        })
    }
}

/// Verify a `sha256=<hex>` signature over the raw body
///
/// The prefix is required and the HMAC comparison is constant-time
/// (`Mac::verify_slice`), so neither a missing prefix nor a near-miss
/// digest leaks timing.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), ReceiveError> {
    let hex_digest = signature
        .strip_prefix("sha256=")
        .ok_or(ReceiveError::InvalidSignature)?;
    let expected = hex::decode(hex_digest).map_err(|_| ReceiveError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ReceiveError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| ReceiveError::InvalidSignature)
}

// ============================================================================
// Delivery Records
// ============================================================================

/// Lifecycle state of a received delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Received,
    Processed,
    Failed,
}

/// One record per received delivery ID; the replay-suppression ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryRow {
    pub delivery_id: String,
    pub event: String,
    pub status: DeliveryStatus,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Mark a delivery's record `processed`
pub async fn mark_delivery_processed(
    store: &dyn EntityStore,
    delivery_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    update_delivery(store, delivery_id, now, |row| {
        row.status = DeliveryStatus::Processed;
        row.processed_at = Some(now);
        row.error = None;
    })
    .await
}

/// Mark a delivery's record `failed`, preserving the error
pub async fn mark_delivery_failed(
    store: &dyn EntityStore,
    delivery_id: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    update_delivery(store, delivery_id, now, |row| {
        row.status = DeliveryStatus::Failed;
        row.error = Some(error.to_string());
    })
    .await
}

async fn update_delivery<F: FnOnce(&mut WebhookDeliveryRow)>(
    store: &dyn EntityStore,
    delivery_id: &str,
    now: DateTime<Utc>,
    mutate: F,
) -> Result<(), StoreError> {
    let id = EntityId::delivery(delivery_id);
    let Some(record) = store.get(&id).await? else {
        return Ok(());
    };
    let mut row: WebhookDeliveryRow = record.decode()?;
    mutate(&mut row);
    let updated = EntityRecord::new(id, EntityKind::WebhookDelivery, &row, now)?
        .with_natural_key(row.delivery_id.clone());
    store.upsert(updated, Vec::new()).await
}

// ============================================================================
// Receiver
// ============================================================================

/// Error type for webhook receipt; each variant maps to one HTTP status
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("Missing required header: {name}")]
    MissingHeader { name: &'static str },

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Webhook payload is not valid JSON: {message}")]
    MalformedPayload { message: String },

    #[error("Delivery storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("Delivery enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

/// Outcome of accepting one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// First sighting: recorded and enqueued
    Queued { queue_item_id: QueueItemId },
    /// Replay of a delivery ID already seen; nothing enqueued
    Duplicate,
}

/// Verifies, dedups, and enqueues incoming webhook deliveries
pub struct WebhookReceiver {
    store: Arc<dyn EntityStore>,
    queue: Arc<dyn QueueStore>,
    secret: String,
    max_attempts: u32,
}

impl WebhookReceiver {
    /// Create a receiver with the shared webhook secret
    pub fn new(store: Arc<dyn EntityStore>, queue: Arc<dyn QueueStore>, secret: String) -> Self {
        Self {
            store,
            queue,
            secret,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the per-item retry budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Accept one delivery: verify, dedup, record, enqueue
    pub async fn receive(
        &self,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<ReceiveOutcome, ReceiveError> {
        let headers = WebhookHeaders::from_http_headers(headers)?;

        verify_signature(&self.secret, body, &headers.signature)?;

        let payload: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| ReceiveError::MalformedPayload {
                message: e.to_string(),
            })?;

        let delivery_entity = EntityId::delivery(headers.delivery_id.as_str());
        if self.store.get(&delivery_entity).await?.is_some() {
            info!(
                delivery_id = %headers.delivery_id,
                event = %headers.event,
                "Duplicate webhook delivery suppressed"
            );
            return Ok(ReceiveOutcome::Duplicate);
        }

        let now = Utc::now();
        let row = WebhookDeliveryRow {
            delivery_id: headers.delivery_id.to_string(),
            event: headers.event.clone(),
            status: DeliveryStatus::Received,
            received_at: now,
            processed_at: None,
            error: None,
        };
        let record = EntityRecord::new(delivery_entity, EntityKind::WebhookDelivery, &row, now)?
            .with_natural_key(row.delivery_id.clone());
        self.store.upsert(record, Vec::new()).await?;

        let action = payload
            .get("action")
            .and_then(|a| a.as_str())
            .map(String::from);
        let outcome = self
            .queue
            .enqueue(NewQueueItem {
                delivery_id: headers.delivery_id.to_string(),
                event: headers.event.clone(),
                action,
                payload,
                max_attempts: self.max_attempts,
            })
            .await?;

        if outcome.is_duplicate() {
            // The delivery record was missing but the queue knew the ID; a
            // previous receive must have died between the two writes.
            warn!(
                delivery_id = %headers.delivery_id,
                "Queue already held this delivery; treating as duplicate"
            );
            return Ok(ReceiveOutcome::Duplicate);
        }

        info!(
            delivery_id = %headers.delivery_id,
            event = %headers.event,
            queue_item_id = %outcome.item_id(),
            "Webhook delivery enqueued"
        );
        Ok(ReceiveOutcome::Queued {
            queue_item_id: outcome.item_id(),
        })
    }
}
