//! Pull request operations: listing, composed detail fetch, and mutations.

use super::{Conditional, Fetched, GitHubClient};
use crate::error::ApiError;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[cfg(test)]
#[path = "pulls_tests.rs"]
mod tests;

// ============================================================================
// Wire Shapes
// ============================================================================

/// A pull request as GitHub returns it
///
/// Fields beyond the identifying core are optional with defaults; list and
/// detail endpoints return slightly different shapes and webhook payloads a
/// third, and all of them must decode.
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePullRequest {
    pub id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<super::RemoteUser>,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
    #[serde(default)]
    pub labels: Vec<RemoteLabel>,
    #[serde(default)]
    pub assignees: Vec<super::RemoteUser>,
    #[serde(default)]
    pub additions: Option<u64>,
    #[serde(default)]
    pub deletions: Option<u64>,
    #[serde(default)]
    pub changed_files: Option<u64>,
    #[serde(default)]
    pub comments: Option<u64>,
    #[serde(default)]
    pub review_comments: Option<u64>,
}

/// One side of a pull request (head or base)
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// A label attached to a pull request or issue
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteLabel {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// A changed file in a pull request
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePrFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub previous_filename: Option<String>,
}

/// A submitted or pending review
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteReview {
    pub id: u64,
    #[serde(default)]
    pub user: Option<super::RemoteUser>,
    pub state: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commit_id: Option<String>,
}

/// An inline review comment anchored to a diff position
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteReviewComment {
    pub id: u64,
    #[serde(default)]
    pub user: Option<super::RemoteUser>,
    pub body: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A conversation comment on the pull request (issue-comment shape)
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIssueComment {
    pub id: u64,
    #[serde(default)]
    pub user: Option<super::RemoteUser>,
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A timeline event (labeled, assigned, review requested, ...)
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePrEvent {
    pub id: u64,
    pub event: String,
    #[serde(default)]
    pub actor: Option<super::RemoteUser>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A commit on the pull request branch
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePrCommit {
    pub sha: String,
    pub commit: CommitDetail,
    #[serde(default)]
    pub author: Option<super::RemoteUser>,
}

/// Nested commit metadata
#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub message: String,
    #[serde(default)]
    pub author: Option<CommitSignature>,
}

/// Author or committer signature on a commit
#[derive(Debug, Clone, Deserialize)]
pub struct CommitSignature {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Everything the mirror stores about one pull request, fetched together
#[derive(Debug, Clone)]
pub struct PullRequestDetail {
    pub pull: RemotePullRequest,
    pub files: Vec<RemotePrFile>,
    pub reviews: Vec<RemoteReview>,
    pub review_comments: Vec<RemoteReviewComment>,
    pub issue_comments: Vec<RemoteIssueComment>,
    pub events: Vec<RemotePrEvent>,
    pub commits: Vec<RemotePrCommit>,
}

/// Result of a merge attempt
#[derive(Debug, Clone, Deserialize)]
pub struct MergeResult {
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Fields a PR update may change
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdatePullRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Review verdict for creating or submitting a review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEvent {
    Approve,
    RequestChanges,
    Comment,
}

impl ReviewEvent {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::RequestChanges => "REQUEST_CHANGES",
            Self::Comment => "COMMENT",
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

impl GitHubClient {
    /// Fetch pull requests for a repository, filtered by state
    pub async fn fetch_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        state: &str,
        etag: Option<&str>,
    ) -> Result<Conditional<Vec<RemotePullRequest>>, ApiError> {
        self.get_paged_conditional(
            &format!("repos/{}/{}/pulls", owner, repo),
            &[("state", state), ("sort", "updated"), ("direction", "desc")],
            etag,
        )
        .await
    }

    /// Fetch one pull request's head record
    pub async fn fetch_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Fetched<RemotePullRequest>, ApiError> {
        self.get_json(&format!("repos/{}/{}/pulls/{}", owner, repo, number))
            .await
    }

    /// Fetch a pull request with all of its children in one composed call
    ///
    /// Files, reviews, both comment kinds, timeline events, and commits are
    /// fetched concurrently once the head record arrives.
    pub async fn fetch_pull_request_detail(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestDetail, ApiError> {
        let pull = self.fetch_pull_request(owner, repo, number).await?.data;
        let base = format!("repos/{}/{}/pulls/{}", owner, repo, number);
        let issue_base = format!("repos/{}/{}/issues/{}", owner, repo, number);

        let files_path = format!("{}/files", base);
        let reviews_path = format!("{}/reviews", base);
        let review_comments_path = format!("{}/comments", base);
        let issue_comments_path = format!("{}/comments", issue_base);
        let events_path = format!("{}/events", issue_base);
        let commits_path = format!("{}/commits", base);

        let (files, reviews, review_comments, issue_comments, events, commits) = tokio::try_join!(
            self.get_paged::<RemotePrFile>(&files_path, &[], None),
            self.get_paged::<RemoteReview>(&reviews_path, &[], None),
            self.get_paged::<RemoteReviewComment>(&review_comments_path, &[], None),
            self.get_paged::<RemoteIssueComment>(&issue_comments_path, &[], None),
            self.get_paged::<RemotePrEvent>(&events_path, &[], None),
            self.get_paged::<RemotePrCommit>(&commits_path, &[], None),
        )?;

        Ok(PullRequestDetail {
            pull,
            files: files.data,
            reviews: reviews.data,
            review_comments: review_comments.data,
            issue_comments: issue_comments.data,
            events: events.data,
            commits: commits.data,
        })
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Merge a pull request
    ///
    /// A 409 from GitHub (head moved, not mergeable) surfaces as
    /// [`ApiError::Conflict`] and is never retried silently.
    pub async fn merge_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        method: &str,
    ) -> Result<MergeResult, ApiError> {
        let result: Fetched<MergeResult> = self
            .send_json(
                Method::PUT,
                &format!("repos/{}/{}/pulls/{}/merge", owner, repo, number),
                &json!({ "merge_method": method }),
            )
            .await?;
        Ok(result.data)
    }

    /// Update a pull request's title, body, or state
    pub async fn update_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        update: &UpdatePullRequest,
    ) -> Result<RemotePullRequest, ApiError> {
        let result: Fetched<RemotePullRequest> = self
            .send_json(
                Method::PATCH,
                &format!("repos/{}/{}/pulls/{}", owner, repo, number),
                update,
            )
            .await?;
        Ok(result.data)
    }

    /// Create a conversation comment on a pull request or issue
    pub async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<RemoteIssueComment, ApiError> {
        let result: Fetched<RemoteIssueComment> = self
            .send_json(
                Method::POST,
                &format!("repos/{}/{}/issues/{}/comments", owner, repo, number),
                &json!({ "body": body }),
            )
            .await?;
        Ok(result.data)
    }

    /// Edit a conversation comment
    pub async fn update_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<RemoteIssueComment, ApiError> {
        let result: Fetched<RemoteIssueComment> = self
            .send_json(
                Method::PATCH,
                &format!("repos/{}/{}/issues/comments/{}", owner, repo, comment_id),
                &json!({ "body": body }),
            )
            .await?;
        Ok(result.data)
    }

    /// Delete a conversation comment
    pub async fn delete_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
    ) -> Result<(), ApiError> {
        self.send_empty(
            Method::DELETE,
            &format!("repos/{}/{}/issues/comments/{}", owner, repo, comment_id),
        )
        .await?;
        Ok(())
    }

    /// Create a review; omit `event` to leave it pending (a draft)
    pub async fn create_review(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: Option<&str>,
        event: Option<ReviewEvent>,
    ) -> Result<RemoteReview, ApiError> {
        let mut payload = serde_json::Map::new();
        if let Some(body) = body {
            payload.insert("body".to_string(), json!(body));
        }
        if let Some(event) = event {
            payload.insert("event".to_string(), json!(event.as_str()));
        }

        let result: Fetched<RemoteReview> = self
            .send_json(
                Method::POST,
                &format!("repos/{}/{}/pulls/{}/reviews", owner, repo, number),
                &serde_json::Value::Object(payload),
            )
            .await?;
        Ok(result.data)
    }

    /// Submit a pending review with a verdict
    pub async fn submit_review(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        review_id: u64,
        event: ReviewEvent,
        body: Option<&str>,
    ) -> Result<RemoteReview, ApiError> {
        let result: Fetched<RemoteReview> = self
            .send_json(
                Method::POST,
                &format!(
                    "repos/{}/{}/pulls/{}/reviews/{}/events",
                    owner, repo, number, review_id
                ),
                &json!({ "event": event.as_str(), "body": body }),
            )
            .await?;
        Ok(result.data)
    }

    /// Discard a pending review
    pub async fn discard_review(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        review_id: u64,
    ) -> Result<(), ApiError> {
        self.send_empty(
            Method::DELETE,
            &format!(
                "repos/{}/{}/pulls/{}/reviews/{}",
                owner, repo, number, review_id
            ),
        )
        .await?;
        Ok(())
    }

    /// Create an inline review comment on a diff line
    ///
    /// Pass `in_reply_to` to continue an existing thread; `suggestion`
    /// wraps the body in a suggestion fence.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_review_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
        commit_sha: &str,
        path: &str,
        line: u64,
        in_reply_to: Option<u64>,
        suggestion: bool,
    ) -> Result<RemoteReviewComment, ApiError> {
        let body = if suggestion {
            make_suggestion_body(body)
        } else {
            body.to_string()
        };

        let mut payload = serde_json::Map::new();
        payload.insert("body".to_string(), json!(body));
        if let Some(reply_to) = in_reply_to {
            payload.insert("in_reply_to".to_string(), json!(reply_to));
        } else {
            payload.insert("commit_id".to_string(), json!(commit_sha));
            payload.insert("path".to_string(), json!(path));
            payload.insert("line".to_string(), json!(line));
            payload.insert("side".to_string(), json!("RIGHT"));
        }

        let result: Fetched<RemoteReviewComment> = self
            .send_json(
                Method::POST,
                &format!("repos/{}/{}/pulls/{}/comments", owner, repo, number),
                &serde_json::Value::Object(payload),
            )
            .await?;
        Ok(result.data)
    }

    /// Re-request reviews from the given logins
    pub async fn request_reviewers(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        reviewers: &[String],
    ) -> Result<(), ApiError> {
        let _: Fetched<serde_json::Value> = self
            .send_json(
                Method::POST,
                &format!(
                    "repos/{}/{}/pulls/{}/requested_reviewers",
                    owner, repo, number
                ),
                &json!({ "reviewers": reviewers }),
            )
            .await?;
        Ok(())
    }

    /// Resolve or unresolve a review thread (GraphQL-only operation)
    pub async fn set_thread_resolved(
        &self,
        thread_node_id: &str,
        resolved: bool,
    ) -> Result<(), ApiError> {
        let mutation = if resolved {
            "mutation($id: ID!) { resolveReviewThread(input: {threadId: $id}) { thread { id } } }"
        } else {
            "mutation($id: ID!) { unresolveReviewThread(input: {threadId: $id}) { thread { id } } }"
        };

        let result: Fetched<serde_json::Value> = self
            .send_json(
                Method::POST,
                "graphql",
                &json!({ "query": mutation, "variables": { "id": thread_node_id } }),
            )
            .await?;

        if let Some(errors) = result.data.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(ApiError::GitHub {
                    status: 200,
                    message: errors
                        .iter()
                        .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                        .collect::<Vec<_>>()
                        .join("; "),
                });
            }
        }
        Ok(())
    }

    /// Update the pull request branch with its base (merge or rebase)
    pub async fn update_branch(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<(), ApiError> {
        let _: Fetched<serde_json::Value> = self
            .send_json(
                Method::PUT,
                &format!("repos/{}/{}/pulls/{}/update-branch", owner, repo, number),
                &json!({}),
            )
            .await?;
        Ok(())
    }
}

/// Wrap a body in a GitHub suggestion fence
pub fn make_suggestion_body(replacement: &str) -> String {
    format!("```suggestion\n{}\n```", replacement)
}
