//! The four-phase initial sync.
//!
//! Strictly ordered: organizations, repositories, webhook registration,
//! then per-repo open pull requests. Each phase publishes a progress
//! record the UI observes, and a failure in a later phase never undoes an
//! earlier one — it is recorded against that phase and the sync moves on.
//! Because every phase rides its own ETag-guarded resource sync, an
//! interrupted initial sync resumes cheaply: already-finished phases come
//! back `304 Not Modified`.

use super::resources::WebhookRegistrationSummary;
use super::{SyncContext, SyncError, SyncOutcome};
use crate::entities::RepositoryRow;
use crate::store::{EntityKind, EntityStore};
use crate::sync_state::{BeginOutcome, ResourceKind, SyncResource};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

#[cfg(test)]
#[path = "initial_tests.rs"]
mod tests;

/// Phases of the initial sync, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialSyncStep {
    Organizations,
    Repositories,
    Webhooks,
    PullRequests,
    Completed,
}

impl InitialSyncStep {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organizations => "organizations",
            Self::Repositories => "repositories",
            Self::Webhooks => "webhooks",
            Self::PullRequests => "pull_requests",
            Self::Completed => "completed",
        }
    }
}

/// A phase failure recorded on the progress record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseError {
    pub step: InitialSyncStep,
    pub message: String,
}

/// Progress record published after each phase
///
/// Stored on the overview sync-state row's cursor, where the UI observes
/// it reactively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitialSyncProgress {
    pub step: Option<InitialSyncStep>,
    #[serde(default)]
    pub organizations: Option<usize>,
    #[serde(default)]
    pub repositories: Option<usize>,
    #[serde(default)]
    pub webhooks_installed: Option<usize>,
    #[serde(default)]
    pub pull_requests: Option<usize>,
    #[serde(default)]
    pub errors: Vec<PhaseError>,
}

impl InitialSyncProgress {
    fn record_error(&mut self, step: InitialSyncStep, error: &SyncError) {
        self.errors.push(PhaseError {
            step,
            message: error.to_string(),
        });
    }
}

/// Run the initial sync for a user
///
/// Returns the final progress record. Auth failures abort immediately
/// (the token row is already stamped); any other phase failure is
/// recorded and the remaining phases still run.
#[instrument(skip(ctx), fields(user_id = %ctx.user_id))]
pub async fn run_initial_sync(ctx: &SyncContext) -> Result<InitialSyncProgress, SyncError> {
    ctx.ensure_authorized().await?;
    let overview = SyncResource::global(ResourceKind::Overview);
    let now = Utc::now();

    match ctx.tracker.begin(&ctx.user_id, &overview, now).await? {
        BeginOutcome::AlreadyRunning => {
            info!("Initial sync already running");
            return Ok(InitialSyncProgress::default());
        }
        BeginOutcome::Started(_) => {}
    }

    let mut progress = InitialSyncProgress::default();

    // Phase 1: organizations.
    progress.step = Some(InitialSyncStep::Organizations);
    match ctx.sync_organizations().await {
        Ok(outcome) => progress.organizations = Some(applied_count(&outcome)),
        Err(SyncError::AuthInvalid) => return abort_auth(ctx, &overview, progress).await,
        Err(error) => progress.record_error(InitialSyncStep::Organizations, &error),
    }
    publish(ctx, &overview, &progress).await;

    // Phase 2: repositories.
    progress.step = Some(InitialSyncStep::Repositories);
    match ctx.sync_repositories().await {
        Ok(outcome) => progress.repositories = Some(applied_count(&outcome)),
        Err(SyncError::AuthInvalid) => return abort_auth(ctx, &overview, progress).await,
        Err(error) => progress.record_error(InitialSyncStep::Repositories, &error),
    }
    publish(ctx, &overview, &progress).await;

    // Phase 3: webhook registration across all repositories.
    progress.step = Some(InitialSyncStep::Webhooks);
    match ctx.register_all_webhooks().await {
        Ok(summary) => progress.webhooks_installed = Some(summary.installed),
        Err(SyncError::AuthInvalid) => return abort_auth(ctx, &overview, progress).await,
        Err(error) => progress.record_error(InitialSyncStep::Webhooks, &error),
    }
    publish(ctx, &overview, &progress).await;

    // Phase 4: open pull requests per repository, bounded-parallel.
    progress.step = Some(InitialSyncStep::PullRequests);
    match sync_all_repo_pulls(ctx).await {
        Ok(applied) => progress.pull_requests = Some(applied),
        Err(SyncError::AuthInvalid) => return abort_auth(ctx, &overview, progress).await,
        Err(error) => progress.record_error(InitialSyncStep::PullRequests, &error),
    }

    progress.step = Some(InitialSyncStep::Completed);
    publish(ctx, &overview, &progress).await;
    ctx.tracker
        .complete_terminal(&ctx.user_id, &overview, Utc::now())
        .await?;

    info!(
        organizations = progress.organizations.unwrap_or(0),
        repositories = progress.repositories.unwrap_or(0),
        pull_requests = progress.pull_requests.unwrap_or(0),
        errors = progress.errors.len(),
        "Initial sync completed"
    );
    Ok(progress)
}

/// Phase 4 worker: open PRs for every mirrored repository
async fn sync_all_repo_pulls(ctx: &SyncContext) -> Result<usize, SyncError> {
    let repos = ctx.store.query_kind(EntityKind::Repository).await?;
    let mut total = 0;

    let outcomes: Vec<Result<SyncOutcome, SyncError>> = stream::iter(repos)
        .map(|record| async move {
            let row: RepositoryRow = record.decode()?;
            let (owner, name) = row.full_name.split_once('/').ok_or_else(|| {
                SyncError::NotFound {
                    resource: row.full_name.clone(),
                }
            })?;
            ctx.sync_repo_pulls(owner, name).await
        })
        .buffer_unordered(ctx.config.parallelism)
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            Ok(done) => total += applied_count(&done),
            // Auth failures stop everything; per-repo failures are already
            // recorded on that repo's own sync-state.
            Err(SyncError::AuthInvalid) => return Err(SyncError::AuthInvalid),
            Err(error) => {
                warn!(error = %error, "Per-repo pull sync failed during initial sync");
            }
        }
    }

    Ok(total)
}

fn applied_count(outcome: &SyncOutcome) -> usize {
    match outcome {
        SyncOutcome::Synced { applied } => *applied,
        _ => 0,
    }
}

async fn publish(ctx: &SyncContext, overview: &SyncResource, progress: &InitialSyncProgress) {
    let cursor = match serde_json::to_value(progress) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Failed to serialize initial-sync progress");
            return;
        }
    };
    if let Err(e) = ctx
        .tracker
        .set_cursor(&ctx.user_id, overview, cursor, Utc::now())
        .await
    {
        warn!(error = %e, "Failed to publish initial-sync progress");
    }
}

async fn abort_auth(
    ctx: &SyncContext,
    overview: &SyncResource,
    progress: InitialSyncProgress,
) -> Result<InitialSyncProgress, SyncError> {
    publish(ctx, overview, &progress).await;
    // The token row is already stamped; mirror it on the overview row so
    // the UI shows why the sync stopped.
    if let Err(e) = ctx
        .tracker
        .mark_auth_invalid(
            &ctx.user_id,
            overview,
            "GitHub authorization is invalid",
            Utc::now(),
        )
        .await
    {
        warn!(error = %e, "Failed to stamp overview auth_invalid");
    }
    Err(SyncError::AuthInvalid)
}
