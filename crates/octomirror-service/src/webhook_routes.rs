//! The public webhook receiver endpoint.

use crate::errors::ApiFailure;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use octomirror_core::webhook::{ReceiveError, ReceiveOutcome};
use serde::Serialize;
use std::collections::HashMap;
use tracing::instrument;

/// Response for an accepted (or replayed) delivery
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
}

/// `POST /api/github/webhook`
///
/// Verifies the delivery and enqueues it; never processes inline. GitHub
/// gets its response as soon as the enqueue commits.
#[instrument(skip_all)]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiFailure> {
    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_lowercase(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    match state.receiver.receive(&header_map, &body).await {
        Ok(ReceiveOutcome::Queued { queue_item_id }) => {
            state.metrics.webhooks_received.inc();
            Ok(Json(WebhookResponse {
                received: true,
                queued: Some(true),
                duplicate: None,
                queue_item_id: Some(queue_item_id.to_string()),
            }))
        }
        Ok(ReceiveOutcome::Duplicate) => {
            state.metrics.webhooks_duplicate.inc();
            Ok(Json(WebhookResponse {
                received: true,
                queued: None,
                duplicate: Some(true),
                queue_item_id: None,
            }))
        }
        Err(error) => {
            let reason = match &error {
                ReceiveError::MissingHeader { .. } => "missing_header",
                ReceiveError::InvalidSignature => "invalid_signature",
                ReceiveError::MalformedPayload { .. } => "malformed_payload",
                _ => "internal",
            };
            state
                .metrics
                .webhooks_rejected
                .with_label_values(&[reason])
                .inc();
            Err(error.into())
        }
    }
}
