//! # Octomirror Core
//!
//! The shared ingestion engine behind both of Octomirror's data paths.
//!
//! GitHub data reaches the local store two ways: pull-based REST syncs with
//! ETags and per-resource progress, and push-based webhooks drained from a
//! durable queue. Both converge here:
//!
//! - the [`store`] adapter over the local transactional entity store,
//! - the [`applier`], the single place remote JSON shapes become local
//!   entities (keyed upserts with stale-child reaping),
//! - the [`sync_state`] machine coordinating ETags, progress, and
//!   `auth_invalid` gating,
//! - the [`webhook`] receive pipeline (signature verification and
//!   delivery-ID dedup) and the [`dispatch`] table that routes queue items
//!   to applier calls,
//! - the pull [`sync`] orchestrators.
//!
//! Because every applier is a keyed upsert and list-valued children are
//! reaped by natural key, applying the same payload twice is a no-op and
//! the two ingestion paths cannot disagree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod applier;
pub mod dispatch;
pub mod entities;
pub mod store;
pub mod sync;
pub mod sync_state;
pub mod token_store;
pub mod webhook;

pub use dispatch::{DispatchOutcome, DispatchingHandler, EventDispatcher};
pub use store::{EntityRecord, EntityStore, Link, MemoryStore, StoreError, StoreOp};
pub use sync_state::{ResourceKind, SyncResource, SyncStatus, SyncTracker};
pub use token_store::SyncStateTokenStore;
pub use webhook::{ReceiveOutcome, WebhookReceiver};

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Locally-generated opaque entity identifier
///
/// Deterministic for entities with a natural composite key (tree entries,
/// sync states, webhook deliveries) so re-ingestion is a pure upsert and
/// concurrent ingestion paths cannot mint duplicates; random (UUID) for
/// everything else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Generate a fresh random ID
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing ID value
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Deterministic ID for a tree entry
    ///
    /// Equal for equal `(repo, ref, path)` regardless of when it is built.
    pub fn tree_entry(repo: &EntityId, ref_name: &str, path: &str) -> Self {
        Self(format!("tree:{}:{}:{}", repo.0, ref_name, path))
    }

    /// Deterministic ID for a sync-state row
    pub fn sync_state(user_id: &UserId, kind: &str, resource_id: Option<&str>) -> Self {
        match resource_id {
            Some(resource) => Self(format!("sync:{}:{}:{}", user_id, kind, resource)),
            None => Self(format!("sync:{}:{}", user_id, kind)),
        }
    }

    /// Deterministic ID for a webhook delivery record
    pub fn delivery(delivery_id: &str) -> Self {
        Self(format!("delivery:{}", delivery_id))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the process owner
///
/// One user per process instance; this value doubles as the opaque bearer
/// token the HTTP surface accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a user ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "user_id".to_string(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidFormat {
                field: "user_id".to_string(),
                message: "only printable ASCII allowed".to_string(),
            });
        }
        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The entity ID of this user's local row
    pub fn entity_id(&self) -> EntityId {
        EntityId::from_value(format!("user:{}", self.0))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// `X-GitHub-Delivery` value: GitHub's UUID for one delivery attempt
///
/// The unit of webhook deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(String);

impl DeliveryId {
    /// Create a delivery ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "delivery_id".to_string(),
            });
        }
        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },
}
