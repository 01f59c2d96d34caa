//! Per-resource sync-state machine.
//!
//! Every syncable resource keeps one bookkeeping row recording progress,
//! the last ETag, the last error, and a status. Transitions are explicit:
//!
//! ```text
//! idle ── begin ──▶ syncing ── complete ──▶ idle | completed
//!                     │
//!                     ├── fail ──▶ error ── retry ──▶ idle
//!                     └── auth failure ──▶ auth_invalid (global)
//! ```
//!
//! `begin` on a row already `syncing` is an idempotent no-op, `reset`
//! clears the ETag and error, and a startup recovery pass flips `syncing`
//! rows abandoned by a crashed or cancelled orchestrator back to `error`.

use crate::store::{EntityKind, EntityRecord, EntityStore, StoreError};
use crate::{EntityId, UserId};
use chrono::{DateTime, Duration, Utc};
use octomirror_github::RateLimit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
#[path = "sync_state_tests.rs"]
mod tests;

// ============================================================================
// Resources
// ============================================================================

/// Kinds of syncable resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The stored OAuth token rides on this row (see [`crate::token_store`])
    Token,
    /// The initial/overview sync as a whole
    Overview,
    Organizations,
    Repositories,
    /// One repository's open pull requests
    PullRequests,
    /// One pull request's full detail
    PullRequest,
    /// One issue with its comments
    Issue,
    /// One repository's tree listing at a ref
    Tree,
    /// One repository's recent commits at a ref
    Commits,
    /// Webhook registration across all repositories
    Webhooks,
}

impl ResourceKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "github:token",
            Self::Overview => "overview",
            Self::Organizations => "orgs",
            Self::Repositories => "repos",
            Self::PullRequests => "pulls",
            Self::PullRequest => "pull",
            Self::Issue => "issue",
            Self::Tree => "tree",
            Self::Commits => "commits",
            Self::Webhooks => "webhooks",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = crate::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github:token" => Ok(Self::Token),
            "overview" => Ok(Self::Overview),
            "orgs" => Ok(Self::Organizations),
            "repos" => Ok(Self::Repositories),
            "pulls" => Ok(Self::PullRequests),
            "pull" => Ok(Self::PullRequest),
            "issue" => Ok(Self::Issue),
            "tree" => Ok(Self::Tree),
            "commits" => Ok(Self::Commits),
            "webhooks" => Ok(Self::Webhooks),
            _ => Err(crate::ValidationError::InvalidFormat {
                field: "resource_type".to_string(),
                message: format!("unknown resource type '{}'", s),
            }),
        }
    }
}

/// A syncable resource: a kind plus an optional instance
/// (e.g. pulls for one repository)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncResource {
    pub kind: ResourceKind,
    pub resource_id: Option<String>,
}

impl SyncResource {
    /// A resource without an instance (orgs, repos, overview, token)
    pub fn global(kind: ResourceKind) -> Self {
        Self {
            kind,
            resource_id: None,
        }
    }

    /// A resource scoped to one instance
    pub fn scoped(kind: ResourceKind, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            resource_id: Some(resource_id.into()),
        }
    }

    /// The deterministic entity ID of this resource's sync-state row
    pub fn entity_id(&self, user_id: &UserId) -> EntityId {
        EntityId::sync_state(user_id, self.kind.as_str(), self.resource_id.as_deref())
    }

    fn natural_key(&self, user_id: &UserId) -> String {
        match &self.resource_id {
            Some(resource) => format!("{}:{}:{}", user_id, self.kind.as_str(), resource),
            None => format!("{}:{}", user_id, self.kind.as_str()),
        }
    }
}

impl fmt::Display for SyncResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(resource) => write!(f, "{}:{}", self.kind.as_str(), resource),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}

// ============================================================================
// Status and Row
// ============================================================================

/// Lifecycle state of one sync-state row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
    AuthInvalid,
    Completed,
}

impl SyncStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
            Self::AuthInvalid => "auth_invalid",
            Self::Completed => "completed",
        }
    }
}

/// One sync-state bookkeeping row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStateRow {
    pub user_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub status: SyncStatus,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Opaque ETag of the last fetch; the `github:token` row stores the
    /// access token here instead (schema quirk preserved from the source)
    #[serde(default)]
    pub last_etag: Option<String>,
    #[serde(default)]
    pub sync_error: Option<String>,
    #[serde(default)]
    pub rate_limit_remaining: Option<u32>,
    #[serde(default)]
    pub rate_limit_reset: Option<DateTime<Utc>>,
    /// Free-form progress cursor (the overview sync stores its phase
    /// progress here)
    #[serde(default)]
    pub cursor: Option<serde_json::Value>,
}

impl SyncStateRow {
    fn new(user_id: &UserId, resource: &SyncResource) -> Self {
        Self {
            user_id: user_id.to_string(),
            resource_type: resource.kind.as_str().to_string(),
            resource_id: resource.resource_id.clone(),
            status: SyncStatus::Idle,
            last_synced_at: None,
            last_etag: None,
            sync_error: None,
            rate_limit_remaining: None,
            rate_limit_reset: None,
            cursor: None,
        }
    }

    fn apply_rate_limit(&mut self, rate_limit: Option<&RateLimit>) {
        if let Some(rl) = rate_limit {
            self.rate_limit_remaining = Some(rl.remaining);
            self.rate_limit_reset = Some(rl.reset_at);
        }
    }
}

/// Outcome of a `begin` attempt
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    /// The row is now `syncing` and the caller owns the sync
    Started(SyncStateRow),
    /// Another orchestrator holds this resource; do nothing
    AlreadyRunning,
}

// ============================================================================
// Tracker
// ============================================================================

/// Store-backed implementation of the sync-state machine
#[derive(Clone)]
pub struct SyncTracker {
    store: Arc<dyn EntityStore>,
}

impl SyncTracker {
    /// Create a tracker over the entity store
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Load a resource's sync-state row, if one exists
    pub async fn load(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
    ) -> Result<Option<SyncStateRow>, StoreError> {
        match self.store.get(&resource.entity_id(user_id)).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// List every sync-state row for a user
    pub async fn load_all(&self, user_id: &UserId) -> Result<Vec<SyncStateRow>, StoreError> {
        let records = self
            .store
            .query_prefix(EntityKind::SyncState, &format!("{}:", user_id))
            .await?;
        records.iter().map(|record| record.decode()).collect()
    }

    /// True when the user's token row is stamped `auth_invalid`
    ///
    /// Orchestrators consult this before scheduling any work; a stamped
    /// token means no GitHub call is made until the user reconnects.
    pub async fn is_auth_invalid(&self, user_id: &UserId) -> Result<bool, StoreError> {
        let token = self
            .load(user_id, &SyncResource::global(ResourceKind::Token))
            .await?;
        Ok(token.is_some_and(|row| row.status == SyncStatus::AuthInvalid))
    }

    /// `idle → syncing`, stamping `last_synced_at` and clearing the error
    ///
    /// Idempotent against concurrent entry: a row already `syncing` yields
    /// [`BeginOutcome::AlreadyRunning`].
    pub async fn begin(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        now: DateTime<Utc>,
    ) -> Result<BeginOutcome, StoreError> {
        let mut row = self
            .load(user_id, resource)
            .await?
            .unwrap_or_else(|| SyncStateRow::new(user_id, resource));

        if row.status == SyncStatus::Syncing {
            return Ok(BeginOutcome::AlreadyRunning);
        }

        row.status = SyncStatus::Syncing;
        row.last_synced_at = Some(now);
        row.sync_error = None;
        self.save(user_id, resource, &row, now).await?;
        Ok(BeginOutcome::Started(row))
    }

    /// `syncing → idle` (or `completed`), persisting the new ETag and the
    /// rate-limit snapshot
    pub async fn complete(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        etag: Option<String>,
        rate_limit: Option<&RateLimit>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.finish(user_id, resource, SyncStatus::Idle, etag, rate_limit, now)
            .await
    }

    /// `syncing → completed`; used by the overview sync
    pub async fn complete_terminal(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.finish(user_id, resource, SyncStatus::Completed, None, None, now)
            .await
    }

    /// `syncing → error` with a short human-readable reason
    pub async fn fail(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        error: &str,
        rate_limit: Option<&RateLimit>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut row = self
            .load(user_id, resource)
            .await?
            .unwrap_or_else(|| SyncStateRow::new(user_id, resource));
        row.status = SyncStatus::Error;
        row.sync_error = Some(error.to_string());
        row.apply_rate_limit(rate_limit);
        self.save(user_id, resource, &row, now).await
    }

    /// Stamp both the failing resource and the token row `auth_invalid`
    ///
    /// Auth failures are global for the user: every orchestrator checks the
    /// token row before scheduling work.
    pub async fn mark_auth_invalid(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        warn!(user_id = %user_id, resource = %resource, reason, "Marking auth invalid");

        for target in [resource.clone(), SyncResource::global(ResourceKind::Token)] {
            let mut row = self
                .load(user_id, &target)
                .await?
                .unwrap_or_else(|| SyncStateRow::new(user_id, &target));
            row.status = SyncStatus::AuthInvalid;
            row.sync_error = Some(reason.to_string());
            self.save(user_id, &target, &row, now).await?;
        }
        Ok(())
    }

    /// `error → idle`; the explicit retry action
    ///
    /// Rows in any other state are left untouched.
    pub async fn retry(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut row) = self.load(user_id, resource).await? else {
            return Ok(false);
        };
        if row.status != SyncStatus::Error {
            return Ok(false);
        }
        row.status = SyncStatus::Idle;
        row.sync_error = None;
        self.save(user_id, resource, &row, now).await?;
        Ok(true)
    }

    /// Clear ETag, error, and last-synced time, returning the row to `idle`
    pub async fn reset(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut row = self
            .load(user_id, resource)
            .await?
            .unwrap_or_else(|| SyncStateRow::new(user_id, resource));
        row.status = SyncStatus::Idle;
        row.last_etag = None;
        row.sync_error = None;
        row.last_synced_at = None;
        row.cursor = None;
        self.save(user_id, resource, &row, now).await
    }

    /// Delete every sync-state row for a user (disconnect)
    pub async fn reset_all(&self, user_id: &UserId) -> Result<usize, StoreError> {
        let records = self
            .store
            .query_prefix(EntityKind::SyncState, &format!("{}:", user_id))
            .await?;
        let count = records.len();
        let ops = records
            .into_iter()
            .map(|record| crate::store::StoreOp::Delete { id: record.id })
            .collect();
        self.store.transact(ops).await?;
        Ok(count)
    }

    /// Store a progress cursor on a resource's row
    pub async fn set_cursor(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        cursor: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut row = self
            .load(user_id, resource)
            .await?
            .unwrap_or_else(|| SyncStateRow::new(user_id, resource));
        row.cursor = Some(cursor);
        self.save(user_id, resource, &row, now).await
    }

    /// Flip `syncing` rows older than `threshold` back to `error`
    ///
    /// Run at startup so a crash or cancellation never wedges a resource in
    /// `syncing`.
    pub async fn recover_stale(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let records = self.store.query_kind(EntityKind::SyncState).await?;
        let mut recovered = 0;

        for record in records {
            let mut row: SyncStateRow = record.decode()?;
            let stale = row.status == SyncStatus::Syncing
                && row
                    .last_synced_at
                    .is_none_or(|at| now - at > threshold);
            if !stale {
                continue;
            }

            row.status = SyncStatus::Error;
            row.sync_error = Some("stale".to_string());
            let user_id = UserId::new(row.user_id.clone()).map_err(|e| StoreError::Storage {
                message: format!("corrupt sync-state row: {}", e),
            })?;
            let resource = SyncResource {
                kind: row
                    .resource_type
                    .parse()
                    .map_err(|e: crate::ValidationError| StoreError::Storage {
                        message: format!("corrupt sync-state row: {}", e),
                    })?,
                resource_id: row.resource_id.clone(),
            };
            self.save(&user_id, &resource, &row, now).await?;
            recovered += 1;
            info!(user_id = %user_id, resource = %resource, "Recovered stale sync state");
        }

        Ok(recovered)
    }

    pub(crate) async fn save(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        row: &SyncStateRow,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = EntityRecord::new(
            resource.entity_id(user_id),
            EntityKind::SyncState,
            row,
            now,
        )?
        .with_natural_key(resource.natural_key(user_id));
        self.store.upsert(record, Vec::new()).await
    }

    async fn finish(
        &self,
        user_id: &UserId,
        resource: &SyncResource,
        status: SyncStatus,
        etag: Option<String>,
        rate_limit: Option<&RateLimit>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut row = self
            .load(user_id, resource)
            .await?
            .unwrap_or_else(|| SyncStateRow::new(user_id, resource));
        row.status = status;
        row.sync_error = None;
        if etag.is_some() {
            row.last_etag = etag;
        }
        row.apply_rate_limit(rate_limit);
        self.save(user_id, resource, &row, now).await
    }
}
