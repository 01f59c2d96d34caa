//! Operator endpoints: rate-limit snapshot, queue health, and queue
//! management.
//!
//! The queue-management endpoints are guarded by a dedicated operator
//! token, distinct from the user bearer token, so queue surgery is not
//! exposed to every signed-in user.

use crate::errors::{ApiFailure, ErrorCode};
use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use octomirror_queue::{HealthThresholds, QueueHealth, QueueItemId, QueueStore};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

/// Require the operator token on webhook-management endpoints
fn require_webhook_ops_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiFailure> {
    let expected = &state.config.sync.ops_token;
    if expected.is_empty() {
        return Err(
            ApiFailure::new(ErrorCode::AuthMissing, "operator token is not configured")
                .with_status(StatusCode::UNAUTHORIZED),
        );
    }

    let presented = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiFailure::new(ErrorCode::AuthInvalid, "operator token rejected"))
    }
}

/// `GET /api/github/rate-limit` — current rate limit snapshot
#[instrument(skip_all)]
pub async fn rate_limit(State(state): State<AppState>) -> Json<Value> {
    let snapshots = state.rate_limits.snapshot();
    Json(json!({ "resources": snapshots }))
}

/// `GET /api/github/webhook-health` — queue health snapshot
#[instrument(skip_all)]
pub async fn webhook_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiFailure> {
    require_webhook_ops_auth(&state, &headers)?;

    let health = QueueHealth::collect(
        state.queue.as_ref(),
        &HealthThresholds::default(),
        Utc::now(),
    )
    .await?;

    Ok(Json(json!({
        "status": "ok",
        "health": health.status.as_str(),
        "alerts": health.alerts,
        "queue": {
            "pending": health.pending,
            "processing": health.processing,
            "failed": health.failed,
            "deadLetter": health.dead_letter,
            "oldestPendingAgeMs": health.oldest_pending_age_ms,
            "lastProcessedAt": health.last_processed_at,
        },
    })))
}

/// `GET /api/github/webhook-queue` — list failed and dead-lettered items
#[instrument(skip_all)]
pub async fn list_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiFailure> {
    require_webhook_ops_auth(&state, &headers)?;

    let items = state.queue.list_failed().await?;
    let rendered: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "id": item.id.to_string(),
                "deliveryId": item.delivery_id,
                "event": item.event,
                "action": item.action,
                "status": item.status.as_str(),
                "attempts": item.attempts,
                "maxAttempts": item.max_attempts,
                "lastError": item.last_error,
                "nextRetryAt": item.next_retry_at,
                "failedAt": item.failed_at,
                "createdAt": item.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "items": rendered, "count": rendered.len() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueActionRequest {
    pub action: String,
    #[serde(default)]
    pub item_id: Option<String>,
}

/// `POST /api/github/webhook-queue` — retry/discard one item or all
/// dead-lettered items
#[instrument(skip(state, headers))]
pub async fn queue_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueueActionRequest>,
) -> Result<Json<Value>, ApiFailure> {
    require_webhook_ops_auth(&state, &headers)?;
    let now = Utc::now();

    match request.action.as_str() {
        "retry" => {
            let id = parse_item_id(request.item_id.as_deref())?;
            state.queue.requeue(&id, now).await?;
            Ok(Json(json!({ "status": "requeued", "itemId": id.to_string() })))
        }
        "discard" => {
            let id = parse_item_id(request.item_id.as_deref())?;
            state.queue.discard(&id).await?;
            Ok(Json(json!({ "status": "discarded", "itemId": id.to_string() })))
        }
        "retry-all" => {
            let requeued = state.queue.requeue_all_dead(now).await?;
            Ok(Json(json!({ "status": "requeued", "count": requeued })))
        }
        "discard-all" => {
            let discarded = state.queue.discard_all_dead().await?;
            Ok(Json(json!({ "status": "discarded", "count": discarded })))
        }
        other => Err(ApiFailure::new(
            ErrorCode::Unprocessable,
            format!("unknown action '{}'", other),
        )),
    }
}

fn parse_item_id(raw: Option<&str>) -> Result<QueueItemId, ApiFailure> {
    let raw = raw.ok_or_else(|| {
        ApiFailure::new(ErrorCode::Unprocessable, "itemId is required for this action")
    })?;
    raw.parse().map_err(|_| {
        ApiFailure::new(ErrorCode::Unprocessable, format!("invalid itemId '{}'", raw))
    })
}
