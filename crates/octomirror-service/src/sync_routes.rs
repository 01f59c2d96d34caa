//! On-demand sync endpoints.

use crate::errors::{ApiFailure, ErrorCode};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use octomirror_core::sync::{run_initial_sync, SyncOutcome};
use octomirror_core::sync_state::SyncResource;
use octomirror_queue::QueueStore;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Standard response for a sync trigger
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<usize>,
}

impl From<SyncOutcome> for SyncResponse {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Synced { applied } => Self {
                status: "synced",
                applied: Some(applied),
            },
            SyncOutcome::Unchanged => Self {
                status: "unchanged",
                applied: None,
            },
            SyncOutcome::AlreadyRunning => Self {
                status: "already_running",
                applied: None,
            },
            SyncOutcome::Fresh => Self {
                status: "fresh",
                applied: None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefQuery {
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

/// `POST /api/github/sync/overview` — run the initial/overview sync
#[instrument(skip_all)]
pub async fn sync_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    state.metrics.sync_requests.with_label_values(&["overview"]).inc();

    let ctx = state.sync_context(&user).await?;
    let progress = run_initial_sync(&ctx).await?;
    Ok(Json(serde_json::json!({
        "status": "completed",
        "progress": progress,
    })))
}

/// `POST /api/github/sync/:owner/:repo` — sync one repo's pull requests
#[instrument(skip(state, headers))]
pub async fn sync_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Json<SyncResponse>, ApiFailure> {
    let user = state.require_user(&headers)?;
    state.metrics.sync_requests.with_label_values(&["pulls"]).inc();

    let ctx = state.sync_context(&user).await?;
    let outcome = ctx.sync_repo_pulls(&owner, &repo).await?;
    Ok(Json(outcome.into()))
}

/// `POST /api/github/sync/:owner/:repo/pull/:number[?force=true]`
#[instrument(skip(state, headers))]
pub async fn sync_pull(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Query(params): Query<ForceQuery>,
) -> Result<Json<SyncResponse>, ApiFailure> {
    let user = state.require_user(&headers)?;
    state.metrics.sync_requests.with_label_values(&["pull"]).inc();

    let ctx = state.sync_context(&user).await?;
    let outcome = ctx
        .sync_pull_detail(&owner, &repo, number, params.force)
        .await?;
    Ok(Json(outcome.into()))
}

/// `POST /api/github/sync/:owner/:repo/issue/:number`
#[instrument(skip(state, headers))]
pub async fn sync_issue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
) -> Result<Json<SyncResponse>, ApiFailure> {
    let user = state.require_user(&headers)?;
    state.metrics.sync_requests.with_label_values(&["issue"]).inc();

    let ctx = state.sync_context(&user).await?;
    let outcome = ctx.sync_issue(&owner, &repo, number).await?;
    Ok(Json(outcome.into()))
}

/// `POST /api/github/sync/:owner/:repo/tree[?ref=...]`
#[instrument(skip(state, headers))]
pub async fn sync_tree(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<RefQuery>,
) -> Result<Json<SyncResponse>, ApiFailure> {
    let user = state.require_user(&headers)?;
    state.metrics.sync_requests.with_label_values(&["tree"]).inc();

    let ctx = state.sync_context(&user).await?;
    let outcome = ctx
        .sync_tree(&owner, &repo, params.git_ref.as_deref())
        .await?;
    Ok(Json(outcome.into()))
}

/// `POST /api/github/sync/:owner/:repo/commits[?ref=...]`
#[instrument(skip(state, headers))]
pub async fn sync_commits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<RefQuery>,
) -> Result<Json<SyncResponse>, ApiFailure> {
    let user = state.require_user(&headers)?;
    state.metrics.sync_requests.with_label_values(&["commits"]).inc();

    let ctx = state.sync_context(&user).await?;
    let outcome = ctx
        .sync_commits(&owner, &repo, params.git_ref.as_deref())
        .await?;
    Ok(Json(outcome.into()))
}

/// `POST /api/github/sync/webhooks` — register webhooks on all repos
#[instrument(skip_all)]
pub async fn sync_webhooks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    state.metrics.sync_requests.with_label_values(&["webhooks"]).inc();

    let ctx = state.sync_context(&user).await?;
    let summary = ctx.register_all_webhooks().await?;
    Ok(Json(serde_json::to_value(summary).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct AddRepoRequest {
    pub url: String,
}

/// `POST /api/github/sync/add-repo` — mirror a repo by URL
#[instrument(skip(state, headers))]
pub async fn add_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AddRepoRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    state.metrics.sync_requests.with_label_values(&["add_repo"]).inc();

    let ctx = state.sync_context(&user).await?;
    let (owner, repo) = ctx.add_repo(&request.url).await?;
    Ok(Json(serde_json::json!({
        "status": "added",
        "owner": owner,
        "repo": repo,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
}

/// `POST /api/github/sync/reset` — reset one sync-state
#[instrument(skip(state, headers))]
pub async fn reset_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let user = state.require_user(&headers)?;

    let kind = request
        .resource_type
        .parse()
        .map_err(|_| {
            ApiFailure::new(
                ErrorCode::Unprocessable,
                format!("unknown resource type '{}'", request.resource_type),
            )
        })?;
    let resource = SyncResource {
        kind,
        resource_id: request.resource_id,
    };

    state.tracker.reset(&user, &resource, Utc::now()).await?;
    Ok(Json(serde_json::json!({ "status": "reset" })))
}

/// `DELETE /api/github/sync/reset` — delete all sync-states (disconnect)
#[instrument(skip_all)]
pub async fn reset_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let deleted = state.tracker.reset_all(&user).await?;
    Ok(Json(serde_json::json!({ "status": "disconnected", "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequest {
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Replay all failed webhook deliveries instead of a pull resource
    #[serde(default)]
    pub webhooks: bool,
}

/// `POST /api/github/sync/retry` — retry a failed resource, or replay all
/// failed webhook deliveries
#[instrument(skip(state, headers))]
pub async fn retry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RetryRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let user = state.require_user(&headers)?;

    if request.webhooks {
        let requeued = state.queue.requeue_all_dead(Utc::now()).await?;
        return Ok(Json(serde_json::json!({
            "status": "requeued",
            "requeued": requeued,
        })));
    }

    let Some(resource_type) = request.resource_type else {
        return Err(ApiFailure::new(
            ErrorCode::Unprocessable,
            "provide resourceType, or webhooks: true",
        )
        .with_status(axum::http::StatusCode::BAD_REQUEST));
    };

    let kind = resource_type.parse().map_err(|_| {
        ApiFailure::new(
            ErrorCode::Unprocessable,
            format!("unknown resource type '{}'", resource_type),
        )
    })?;
    let resource = SyncResource {
        kind,
        resource_id: request.resource_id,
    };

    let retried = state.tracker.retry(&user, &resource, Utc::now()).await?;
    Ok(Json(serde_json::json!({
        "status": if retried { "retried" } else { "not_retryable" },
    })))
}
