//! Mutation endpoints: every write to GitHub, each followed by a
//! best-effort detail refresh so the local mirror converges immediately
//! instead of waiting for the webhook.

use crate::errors::ApiFailure;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use octomirror_core::applier;
use octomirror_core::store::{EntityKind, EntityStore};
use octomirror_github::client::{ReviewEvent, UpdatePullRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{instrument, warn};

/// Refresh a PR's detail after a mutation, logging rather than failing:
/// the mutation already succeeded on GitHub.
async fn refresh_detail(state: &AppState, user: &octomirror_core::UserId, owner: &str, repo: &str, number: u64) {
    match state.sync_context(user).await {
        Ok(ctx) => {
            if let Err(e) = ctx.sync_pull_detail(owner, repo, number, true).await {
                warn!(owner, repo, number, error = %e, "Post-mutation refresh failed");
            }
        }
        Err(e) => warn!(error = %e.message, "Post-mutation refresh skipped"),
    }
}

fn parse_review_event(value: Option<&str>) -> Result<Option<ReviewEvent>, ApiFailure> {
    match value {
        None => Ok(None),
        Some("approve") | Some("APPROVE") => Ok(Some(ReviewEvent::Approve)),
        Some("request_changes") | Some("REQUEST_CHANGES") => Ok(Some(ReviewEvent::RequestChanges)),
        Some("comment") | Some("COMMENT") => Ok(Some(ReviewEvent::Comment)),
        Some(other) => Err(ApiFailure::new(
            crate::errors::ErrorCode::Unprocessable,
            format!("unknown review event '{}'", other),
        )),
    }
}

// ============================================================================
// Pull Requests
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    #[serde(default = "default_merge_method")]
    pub method: String,
}

fn default_merge_method() -> String {
    "squash".to_string()
}

/// `POST /api/github/pr/:owner/:repo/:number/merge`
#[instrument(skip(state, headers))]
pub async fn merge_pull(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    let result = ctx
        .client
        .merge_pull_request(&owner, &repo, number, &request.method)
        .await?;

    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({
        "merged": result.merged,
        "sha": result.sha,
        "message": result.message,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePullBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// `PATCH /api/github/pr/:owner/:repo/:number` — title, body, or state
#[instrument(skip(state, headers))]
pub async fn update_pull(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Json(request): Json<UpdatePullBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    let update = UpdatePullRequest {
        title: request.title,
        body: request.body,
        state: request.state,
    };
    let updated = ctx
        .client
        .update_pull_request(&owner, &repo, number, &update)
        .await?;

    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({ "number": updated.number, "state": updated.state })))
}

/// `POST /api/github/pr/:owner/:repo/:number/update-branch`
#[instrument(skip(state, headers))]
pub async fn update_branch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    ctx.client.update_branch(&owner, &repo, number).await?;
    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({ "status": "updated" })))
}

// ============================================================================
// Comments
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub body: String,
}

/// `POST /api/github/pr/:owner/:repo/:number/comments`
#[instrument(skip(state, headers, request))]
pub async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Json(request): Json<CommentBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    let comment = ctx
        .client
        .create_issue_comment(&owner, &repo, number, &request.body)
        .await?;

    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({ "id": comment.id })))
}

/// `PATCH /api/github/comments/:owner/:repo/:comment_id`
#[instrument(skip(state, headers, request))]
pub async fn update_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, comment_id)): Path<(String, String, u64)>,
    Json(request): Json<CommentBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    let comment = ctx
        .client
        .update_issue_comment(&owner, &repo, comment_id, &request.body)
        .await?;
    Ok(Json(json!({ "id": comment.id })))
}

/// `DELETE /api/github/comments/:owner/:repo/:comment_id`
#[instrument(skip(state, headers))]
pub async fn delete_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, comment_id)): Path<(String, String, u64)>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    ctx.client
        .delete_issue_comment(&owner, &repo, comment_id)
        .await?;
    Ok(Json(json!({ "status": "deleted" })))
}

// ============================================================================
// Reviews
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateReviewBody {
    #[serde(default)]
    pub body: Option<String>,
    /// approve | request_changes | comment; omit for a pending draft
    #[serde(default)]
    pub event: Option<String>,
}

/// `POST /api/github/pr/:owner/:repo/:number/reviews`
#[instrument(skip(state, headers, request))]
pub async fn create_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Json(request): Json<CreateReviewBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    let event = parse_review_event(request.event.as_deref())?;
    let review = ctx
        .client
        .create_review(&owner, &repo, number, request.body.as_deref(), event)
        .await?;

    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({ "id": review.id, "state": review.state })))
}

#[derive(Debug, Deserialize)]
pub struct SubmitReviewBody {
    pub event: String,
    #[serde(default)]
    pub body: Option<String>,
}

/// `POST /api/github/pr/:owner/:repo/:number/reviews/:review_id/submit`
#[instrument(skip(state, headers, request))]
pub async fn submit_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number, review_id)): Path<(String, String, u64, u64)>,
    Json(request): Json<SubmitReviewBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    let Some(event) = parse_review_event(Some(&request.event))? else {
        return Err(ApiFailure::new(
            crate::errors::ErrorCode::Unprocessable,
            "event is required",
        ));
    };
    let review = ctx
        .client
        .submit_review(&owner, &repo, number, review_id, event, request.body.as_deref())
        .await?;

    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({ "id": review.id, "state": review.state })))
}

/// `DELETE /api/github/pr/:owner/:repo/:number/reviews/:review_id`
#[instrument(skip(state, headers))]
pub async fn discard_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number, review_id)): Path<(String, String, u64, u64)>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    ctx.client
        .discard_review(&owner, &repo, number, review_id)
        .await?;

    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({ "status": "discarded" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCommentBody {
    pub body: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub in_reply_to: Option<u64>,
    #[serde(default)]
    pub suggestion: bool,
}

/// `POST /api/github/pr/:owner/:repo/:number/review-comments` — inline or
/// suggestion comments, and thread replies
#[instrument(skip(state, headers, request))]
pub async fn create_review_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Json(request): Json<ReviewCommentBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    if request.in_reply_to.is_none()
        && (request.commit_sha.is_none() || request.path.is_none() || request.line.is_none())
    {
        return Err(ApiFailure::new(
            crate::errors::ErrorCode::Unprocessable,
            "a new inline comment needs commitSha, path, and line",
        ));
    }

    let comment = ctx
        .client
        .create_review_comment(
            &owner,
            &repo,
            number,
            &request.body,
            request.commit_sha.as_deref().unwrap_or(""),
            request.path.as_deref().unwrap_or(""),
            request.line.unwrap_or(0),
            request.in_reply_to,
            request.suggestion,
        )
        .await?;

    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({ "id": comment.id })))
}

#[derive(Debug, Deserialize)]
pub struct RequestReviewersBody {
    pub reviewers: Vec<String>,
}

/// `POST /api/github/pr/:owner/:repo/:number/request-reviewers`
#[instrument(skip(state, headers, request))]
pub async fn request_reviewers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Json(request): Json<RequestReviewersBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    ctx.client
        .request_reviewers(&owner, &repo, number, &request.reviewers)
        .await?;

    refresh_detail(&state, &user, &owner, &repo, number).await;
    Ok(Json(json!({ "status": "requested" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveThreadBody {
    pub thread_id: String,
    pub resolved: bool,
}

/// `POST /api/github/threads/resolve` — resolve or unresolve a review
/// thread
#[instrument(skip(state, headers, request))]
pub async fn resolve_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResolveThreadBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    ctx.client
        .set_thread_resolved(&request.thread_id, request.resolved)
        .await?;
    Ok(Json(json!({ "status": if request.resolved { "resolved" } else { "unresolved" } })))
}

// ============================================================================
// Branches
// ============================================================================

/// `DELETE /api/github/branch/:owner/:repo/:branch`
#[instrument(skip(state, headers))]
pub async fn delete_branch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, branch)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    // Remember the head sha so the branch is restorable.
    let sha = ctx.client.branch_head_sha(&owner, &repo, &branch).await.ok();
    ctx.client.delete_branch(&owner, &repo, &branch).await?;
    Ok(Json(json!({ "status": "deleted", "sha": sha })))
}

#[derive(Debug, Deserialize)]
pub struct RestoreBranchBody {
    pub sha: String,
}

/// `POST /api/github/branch/:owner/:repo/:branch/restore`
#[instrument(skip(state, headers, request))]
pub async fn restore_branch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, branch)): Path<(String, String, String)>,
    Json(request): Json<RestoreBranchBody>,
) -> Result<Json<Value>, ApiFailure> {
    let user = state.require_user(&headers)?;
    let ctx = state.sync_context(&user).await?;

    ctx.client
        .restore_branch(&owner, &repo, &branch, &request.sha)
        .await?;
    Ok(Json(json!({ "status": "restored" })))
}

// ============================================================================
// Viewed Files (local-only state)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SetViewedBody {
    pub path: String,
    pub viewed: bool,
}

/// `POST /api/github/pr/:owner/:repo/:number/viewed` — toggle a file's
/// reviewed-locally flag; never calls GitHub
#[instrument(skip(state, headers, request))]
pub async fn set_viewed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Json(request): Json<SetViewedBody>,
) -> Result<Json<Value>, ApiFailure> {
    state.require_user(&headers)?;

    // Resolve the PR locally by repo + number.
    let full_name = format!("{}/{}", owner, repo);
    let Some(repo_record) = state
        .store
        .find_by_natural_key(EntityKind::Repository, &full_name)
        .await?
    else {
        return Err(ApiFailure::new(
            crate::errors::ErrorCode::NotFound,
            format!("repository {} is not mirrored", full_name),
        ));
    };

    let pulls = state.store.query_kind(EntityKind::PullRequest).await?;
    let mut target = None;
    for record in pulls {
        let row: octomirror_core::entities::PullRequestRow = record.decode()?;
        if row.number != number {
            continue;
        }
        let linked = state.store.links_from(&record.id, "repository").await?;
        if linked.contains(&repo_record.id) {
            target = Some(record.id);
            break;
        }
    }
    let Some(pr_id) = target else {
        return Err(ApiFailure::new(
            crate::errors::ErrorCode::NotFound,
            format!("pull request {}#{} is not mirrored", full_name, number),
        ));
    };

    applier::set_file_viewed(
        state.store.as_ref(),
        &pr_id,
        &request.path,
        request.viewed,
        Utc::now(),
    )
    .await
    .map_err(|e| ApiFailure::internal(e.to_string()))?;

    Ok(Json(json!({ "status": "ok" })))
}
