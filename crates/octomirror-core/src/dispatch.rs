//! Event dispatch: the `(event, action)` → applier routing table.
//!
//! A validated queue item lands here and is routed to the same applier
//! functions the pull orchestrators use, so a webhook and a pull sync for
//! the same object produce identical store state. Unhandled event types
//! are logged and reported as handled so the queue marks them processed.

use crate::applier::{self, ApplyError};
use crate::store::{EntityKind, EntityStore, StoreError};
use crate::webhook::{mark_delivery_failed, mark_delivery_processed};
use crate::{EntityId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octomirror_github::client::{
    RemoteCommit, RemoteIssue, RemoteIssueComment, RemoteOrganization, RemotePullRequest,
    RemoteRepository, RemoteReview, RemoteReviewComment,
};
use octomirror_queue::{HandlerError, QueueHandler, QueueItem};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;

/// Error type for event dispatch
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Payload is missing required field: {field}")]
    MissingField { field: String },

    #[error("Payload field '{field}' did not decode: {message}")]
    Decode { field: String, message: String },

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Apply(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
            Self::MissingField { .. } => false,
            Self::Decode { .. } => false,
        }
    }
}

/// What the dispatcher did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event was applied to the store
    Applied,
    /// No handler exists for this event type; treated as processed
    Ignored,
}

/// Routes validated events to applier calls
#[derive(Clone)]
pub struct EventDispatcher {
    store: Arc<dyn EntityStore>,
    user_id: UserId,
}

impl EventDispatcher {
    /// Create a dispatcher applying events on behalf of the process owner
    pub fn new(store: Arc<dyn EntityStore>, user_id: UserId) -> Self {
        Self { store, user_id }
    }

    /// Route one event to its applier(s)
    pub async fn dispatch(
        &self,
        event: &str,
        action: Option<&str>,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, DispatchError> {
        debug!(op = "dispatch", event, action = action.unwrap_or(""), "Dispatching event");

        match event {
            "push" => {
                let repo_id = self.apply_payload_repository(payload, now).await?;
                self.apply_push_commits(&repo_id, payload, now).await?;
            }
            "create" | "delete" | "fork" | "repository" | "star" => {
                // All of these only change repository-level state
                // (refs, fork counts, star counts, metadata).
                self.apply_payload_repository(payload, now).await?;
            }
            "organization" => {
                let org: RemoteOrganization = decode_field(payload, "organization")?;
                applier::apply_organization(
                    self.store.as_ref(),
                    &self.user_id.entity_id(),
                    &org,
                    now,
                )
                .await?;
            }
            "pull_request" => {
                let repo_id = self.apply_payload_repository(payload, now).await?;
                let pull: RemotePullRequest = decode_field(payload, "pull_request")?;
                let pr_id =
                    applier::apply_pull_request(self.store.as_ref(), &repo_id, &pull, now).await?;
                if let Some(action) = action {
                    let actor = payload
                        .get("sender")
                        .and_then(|s| s.get("login"))
                        .and_then(|l| l.as_str());
                    // Synthetic event ID: PR id and action hash onto a
                    // stable value so replays dedup.
                    let event_id = synthetic_event_id(pull.id, action);
                    applier::apply_pr_action_event(
                        self.store.as_ref(),
                        &pr_id,
                        action,
                        actor,
                        event_id,
                        now,
                    )
                    .await?;
                }
            }
            "pull_request_review" => {
                let pr_id = self.resolve_payload_pull_request(payload, now).await?;
                let review: RemoteReview = decode_field(payload, "review")?;
                applier::apply_pr_review(self.store.as_ref(), &pr_id, &review, now).await?;
            }
            "pull_request_review_comment" => {
                let pr_id = self.resolve_payload_pull_request(payload, now).await?;
                let comment: RemoteReviewComment = decode_field(payload, "comment")?;
                applier::apply_pr_review_comment(self.store.as_ref(), &pr_id, &comment, now)
                    .await?;
            }
            "issues" => {
                let repo_id = self.apply_payload_repository(payload, now).await?;
                let issue: RemoteIssue = decode_field(payload, "issue")?;
                applier::apply_issue(self.store.as_ref(), &repo_id, &issue, now).await?;
            }
            "issue_comment" => {
                self.dispatch_issue_comment(payload, now).await?;
            }
            other => {
                info!(op = "dispatch", event = other, "No handler for event type");
                return Ok(DispatchOutcome::Ignored);
            }
        }

        Ok(DispatchOutcome::Applied)
    }

    /// `issue_comment` routes on whether the issue is a pull request
    async fn dispatch_issue_comment(
        &self,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let repo_id = self.apply_payload_repository(payload, now).await?;
        let comment: RemoteIssueComment = decode_field(payload, "comment")?;

        let issue = payload
            .get("issue")
            .ok_or(DispatchError::MissingField {
                field: "issue".to_string(),
            })?;

        if issue.get("pull_request").is_some() {
            let pull_github_id = issue
                .get("id")
                .and_then(|id| id.as_u64())
                .ok_or(DispatchError::MissingField {
                    field: "issue.id".to_string(),
                })?;
            // The PR shares the issue's number, not its id; resolve by
            // number within the repository.
            let number =
                issue
                    .get("number")
                    .and_then(|n| n.as_u64())
                    .ok_or(DispatchError::MissingField {
                        field: "issue.number".to_string(),
                    })?;
            let pr_id = self
                .find_pull_request_by_number(&repo_id, number)
                .await?
                .unwrap_or_else(|| {
                    debug!(
                        pull_github_id,
                        number, "Comment for unmirrored PR; storing against fresh id"
                    );
                    EntityId::fresh()
                });
            applier::apply_pr_issue_comment(self.store.as_ref(), &pr_id, &comment, now).await?;
        } else {
            let remote_issue: RemoteIssue = decode_field(payload, "issue")?;
            let issue_id =
                applier::apply_issue(self.store.as_ref(), &repo_id, &remote_issue, now).await?;
            applier::apply_issue_comment(self.store.as_ref(), &issue_id, &comment, now).await?;
        }
        Ok(())
    }

    async fn apply_payload_repository(
        &self,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<EntityId, DispatchError> {
        let repo: RemoteRepository = decode_field(payload, "repository")?;
        Ok(applier::apply_repository(
            self.store.as_ref(),
            &self.user_id.entity_id(),
            &repo,
            now,
        )
        .await?)
    }

    async fn apply_push_commits(
        &self,
        repo_id: &EntityId,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let Some(ref_name) = payload
            .get("ref")
            .and_then(|r| r.as_str())
            .and_then(|r| r.strip_prefix("refs/heads/"))
        else {
            // Tag pushes carry no branch commits worth mirroring.
            return Ok(());
        };

        let commits: Vec<RemoteCommit> = payload
            .get("commits")
            .and_then(|c| c.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| push_commit_to_remote(entry))
                    .collect()
            })
            .unwrap_or_default();

        if !commits.is_empty() {
            applier::apply_commits(self.store.as_ref(), repo_id, ref_name, &commits, now).await?;
        }
        Ok(())
    }

    async fn resolve_payload_pull_request(
        &self,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<EntityId, DispatchError> {
        let repo_id = self.apply_payload_repository(payload, now).await?;
        let pull: RemotePullRequest = decode_field(payload, "pull_request")?;
        Ok(applier::apply_pull_request(self.store.as_ref(), &repo_id, &pull, now).await?)
    }

    async fn find_pull_request_by_number(
        &self,
        repo_id: &EntityId,
        number: u64,
    ) -> Result<Option<EntityId>, DispatchError> {
        let pulls = self.store.query_kind(EntityKind::PullRequest).await?;
        for record in pulls {
            let row: crate::entities::PullRequestRow = record.decode()?;
            if row.number != number {
                continue;
            }
            let repos = self.store.links_from(&record.id, "repository").await?;
            if repos.contains(repo_id) {
                return Ok(Some(record.id));
            }
        }
        Ok(None)
    }
}

fn decode_field<T: DeserializeOwned>(
    payload: &serde_json::Value,
    field: &str,
) -> Result<T, DispatchError> {
    let value = payload.get(field).ok_or(DispatchError::MissingField {
        field: field.to_string(),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| DispatchError::Decode {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// Translate a push-payload commit (which has its own shape) into the REST
/// commit shape the applier consumes
fn push_commit_to_remote(entry: &serde_json::Value) -> Option<RemoteCommit> {
    let normalized = serde_json::json!({
        "sha": entry.get("id")?.as_str()?,
        "commit": {
            "message": entry.get("message").and_then(|m| m.as_str()).unwrap_or(""),
            "author": {
                "name": entry.get("author").and_then(|a| a.get("name")).and_then(|n| n.as_str()),
                "date": entry.get("timestamp").and_then(|t| t.as_str()),
            },
        },
    });
    serde_json::from_value(normalized).ok()
}

/// Derive a stable synthetic GitHub-ID-shaped value for PR action events
fn synthetic_event_id(pull_github_id: u64, action: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    pull_github_id.hash(&mut hasher);
    action.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Queue Handler
// ============================================================================

/// [`QueueHandler`] implementation wiring the queue to the dispatcher
///
/// Success marks the delivery record `processed`; failure records the
/// error and reports retryability from the underlying cause.
pub struct DispatchingHandler {
    dispatcher: EventDispatcher,
    store: Arc<dyn EntityStore>,
}

impl DispatchingHandler {
    /// Create a handler over the dispatcher and delivery-record store
    pub fn new(dispatcher: EventDispatcher, store: Arc<dyn EntityStore>) -> Self {
        Self { dispatcher, store }
    }
}

#[async_trait]
impl QueueHandler for DispatchingHandler {
    async fn handle(&self, item: &QueueItem) -> Result<(), HandlerError> {
        let now = Utc::now();
        let result = self
            .dispatcher
            .dispatch(&item.event, item.action.as_deref(), &item.payload, now)
            .await;

        match result {
            Ok(_) => {
                if let Err(e) =
                    mark_delivery_processed(self.store.as_ref(), &item.delivery_id, now).await
                {
                    warn!(
                        delivery_id = %item.delivery_id,
                        error = %e,
                        "Processed event but failed to update delivery record"
                    );
                }
                Ok(())
            }
            Err(error) => {
                let message = error.to_string();
                if let Err(e) =
                    mark_delivery_failed(self.store.as_ref(), &item.delivery_id, &message, now)
                        .await
                {
                    warn!(
                        delivery_id = %item.delivery_id,
                        error = %e,
                        "Failed to record delivery failure"
                    );
                }
                Err(HandlerError {
                    message,
                    retryable: error.is_transient(),
                })
            }
        }
    }
}
