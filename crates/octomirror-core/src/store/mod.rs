//! Store adapter over the local transactional entity store.
//!
//! The mirror treats its backing store as a transactional key-value store
//! with linkable entities: records are opaque JSON rows with two secondary
//! lookups (the GitHub numeric ID and a natural composite key), and
//! directional named links connect entities. A single [`EntityStore::transact`]
//! call is atomic, which is what lets the applier make a whole coherent
//! group (a PR and its files, a tree's reap-then-insert) visible at once.

pub mod memory;

use crate::EntityId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;

// ============================================================================
// Entity Kinds and Records
// ============================================================================

/// Kinds of mirrored entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Organization,
    Repository,
    PullRequest,
    PrFile,
    PrReview,
    PrComment,
    PrCheck,
    PrEvent,
    PrCommit,
    Issue,
    IssueComment,
    TreeEntry,
    Commit,
    SyncState,
    WebhookDelivery,
}

impl EntityKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Organization => "organization",
            Self::Repository => "repository",
            Self::PullRequest => "pull_request",
            Self::PrFile => "pr_file",
            Self::PrReview => "pr_review",
            Self::PrComment => "pr_comment",
            Self::PrCheck => "pr_check",
            Self::PrEvent => "pr_event",
            Self::PrCommit => "pr_commit",
            Self::Issue => "issue",
            Self::IssueComment => "issue_comment",
            Self::TreeEntry => "tree_entry",
            Self::Commit => "commit",
            Self::SyncState => "sync_state",
            Self::WebhookDelivery => "webhook_delivery",
        }
    }
}

/// One stored entity row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    /// GitHub's numeric ID, when the entity originates from one
    pub github_id: Option<u64>,
    /// Natural composite key for entities that have one
    /// (e.g. `{pr}:{path}` for PR files)
    pub natural_key: Option<String>,
    /// The serialized row
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    /// Build a record from a serializable row
    pub fn new<T: Serialize>(
        id: EntityId,
        kind: EntityKind,
        row: &T,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            id,
            kind,
            github_id: None,
            natural_key: None,
            data: serde_json::to_value(row)?,
            updated_at: now,
        })
    }

    /// Attach the GitHub numeric ID for secondary lookup
    pub fn with_github_id(mut self, github_id: u64) -> Self {
        self.github_id = Some(github_id);
        self
    }

    /// Attach a natural composite key for secondary lookup
    pub fn with_natural_key(mut self, key: impl Into<String>) -> Self {
        self.natural_key = Some(key.into());
        self
    }

    /// Deserialize the row back into its typed shape
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// A directional named relationship between two entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub from: EntityId,
    pub name: String,
    pub to: EntityId,
}

impl Link {
    /// Build a link
    pub fn new(from: EntityId, name: impl Into<String>, to: EntityId) -> Self {
        Self {
            from,
            name: name.into(),
            to,
        }
    }
}

/// One operation inside a transaction
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Insert or replace a record, plus its outgoing links
    Upsert {
        record: EntityRecord,
        links: Vec<Link>,
    },
    /// Record a link on its own
    Link(Link),
    /// Delete a record and its links
    Delete { id: EntityId },
}

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store operation failed: {message}")]
    Storage { message: String },

    #[error("Row serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage { .. } => true,
            Self::Serialization(_) => false,
        }
    }
}

// ============================================================================
// Store Interface
// ============================================================================

/// Transactional entity store the whole ingestion engine writes through
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch a record by ID
    async fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>, StoreError>;

    /// Fetch a record by its GitHub numeric ID
    async fn find_by_github_id(
        &self,
        kind: EntityKind,
        github_id: u64,
    ) -> Result<Option<EntityRecord>, StoreError>;

    /// Fetch a record by its natural composite key
    async fn find_by_natural_key(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> Result<Option<EntityRecord>, StoreError>;

    /// List records of a kind whose natural key starts with `prefix`
    async fn query_prefix(
        &self,
        kind: EntityKind,
        prefix: &str,
    ) -> Result<Vec<EntityRecord>, StoreError>;

    /// List every record of a kind
    async fn query_kind(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, StoreError>;

    /// IDs linked from `id` under `name`
    async fn links_from(&self, id: &EntityId, name: &str) -> Result<Vec<EntityId>, StoreError>;

    /// Apply a batch of operations atomically
    async fn transact(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;

    /// Convenience single-record upsert
    async fn upsert(&self, record: EntityRecord, links: Vec<Link>) -> Result<(), StoreError> {
        self.transact(vec![StoreOp::Upsert { record, links }]).await
    }
}
