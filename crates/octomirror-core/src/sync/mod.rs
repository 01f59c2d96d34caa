//! Pull-sync orchestrators.
//!
//! Orchestrators drive the GitHub client, feed the applier, and keep the
//! per-resource sync-state machine honest: `begin` before work, `complete`
//! with the fresh ETag on success, `fail` with a short reason otherwise,
//! and a global stop on `auth_invalid`. The [`initial`] module runs the
//! four-phase first sync; [`resources`] holds the per-resource syncs.

pub mod initial;
pub mod resources;

use crate::applier::ApplyError;
use crate::store::StoreError;
use crate::sync_state::{SyncResource, SyncTracker};
use crate::store::EntityStore;
use crate::UserId;
use chrono::{DateTime, Duration, Utc};

use octomirror_github::{ApiError, GitHubClient};
use std::sync::Arc;
use tracing::warn;

pub use initial::{run_initial_sync, InitialSyncProgress, InitialSyncStep};
pub use resources::{parse_repo_url, RepoWebhookResult, WebhookRegistrationSummary};

/// Error type for sync orchestration
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("No GitHub token is stored; connect GitHub first")]
    AuthMissing,

    #[error("GitHub authorization is invalid; reconnect GitHub")]
    AuthInvalid,

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error(transparent)]
    Api(ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Outcome of one sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Fresh data applied
    Synced { applied: usize },
    /// `304 Not Modified`; nothing written
    Unchanged,
    /// Another orchestrator already holds this resource
    AlreadyRunning,
    /// Recently synced and `force` was not set
    Fresh,
}

/// Tuning for the orchestrators
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bounded parallelism for per-repo work
    pub parallelism: usize,
    /// Deployment base URL used as the webhook target
    pub webhook_base_url: String,
    /// Shared webhook secret registered with GitHub
    pub webhook_secret: String,
    /// Allow webhook registration against loopback/private endpoints
    pub allow_local_webhooks: bool,
    /// Detail syncs within this window are skipped unless forced
    pub detail_freshness: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            webhook_base_url: String::new(),
            webhook_secret: String::new(),
            allow_local_webhooks: false,
            detail_freshness: Duration::seconds(60),
        }
    }
}

/// Everything one user's orchestrators need
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn EntityStore>,
    pub tracker: SyncTracker,
    pub client: GitHubClient,
    pub user_id: UserId,
    pub config: SyncConfig,
}

impl SyncContext {
    /// Create a context for one user's syncs
    pub fn new(
        store: Arc<dyn EntityStore>,
        client: GitHubClient,
        user_id: UserId,
        config: SyncConfig,
    ) -> Self {
        Self {
            tracker: SyncTracker::new(store.clone()),
            store,
            client,
            user_id,
            config,
        }
    }

    /// Refuse to schedule work while the token is stamped `auth_invalid`
    pub(crate) async fn ensure_authorized(&self) -> Result<(), SyncError> {
        if self.tracker.is_auth_invalid(&self.user_id).await? {
            return Err(SyncError::AuthInvalid);
        }
        Ok(())
    }

    /// Translate an API failure into sync-state updates and a [`SyncError`]
    ///
    /// Auth failures stamp the token row and stop all scheduling; everything
    /// else records `error` on the failing resource with the rate-limit
    /// snapshot for display.
    pub(crate) async fn fail_resource(
        &self,
        resource: &SyncResource,
        error: ApiError,
        now: DateTime<Utc>,
    ) -> SyncError {
        if error.is_auth_error() {
            if let Err(e) = self
                .tracker
                .mark_auth_invalid(&self.user_id, resource, &error.to_string(), now)
                .await
            {
                warn!(resource = %resource, error = %e, "Failed to stamp auth_invalid");
            }
            return SyncError::AuthInvalid;
        }

        let rate_limit = self.client.rate_limits().get("core");
        if let Err(e) = self
            .tracker
            .fail(
                &self.user_id,
                resource,
                &error.to_string(),
                rate_limit.as_ref(),
                now,
            )
            .await
        {
            warn!(resource = %resource, error = %e, "Failed to record sync error");
        }

        match error {
            ApiError::NotFound { resource } => SyncError::NotFound { resource },
            other => SyncError::Api(other),
        }
    }
}
