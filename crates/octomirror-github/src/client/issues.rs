//! Issue operations.

use super::pulls::{RemoteIssueComment, RemoteLabel};
use super::{Conditional, Fetched, GitHubClient};
use crate::error::ApiError;
use chrono::{DateTime, Utc};
use serde::Deserialize;

// ============================================================================
// Wire Shapes
// ============================================================================

/// An issue as GitHub returns it
///
/// GitHub's issues endpoints also return pull requests; the
/// `pull_request` marker field distinguishes them and the applier skips
/// entries that carry it.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIssue {
    pub id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub user: Option<super::RemoteUser>,
    #[serde(default)]
    pub labels: Vec<RemoteLabel>,
    #[serde(default)]
    pub assignees: Vec<super::RemoteUser>,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Present iff this "issue" is actually a pull request
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl RemoteIssue {
    /// True when this entry is a pull request in issue clothing
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

// ============================================================================
// Operations
// ============================================================================

impl GitHubClient {
    /// Fetch issues for a repository, filtered by state
    pub async fn fetch_issues(
        &self,
        owner: &str,
        repo: &str,
        state: &str,
        etag: Option<&str>,
    ) -> Result<Conditional<Vec<RemoteIssue>>, ApiError> {
        self.get_paged_conditional(
            &format!("repos/{}/{}/issues", owner, repo),
            &[("state", state), ("sort", "updated"), ("direction", "desc")],
            etag,
        )
        .await
    }

    /// Fetch one issue
    pub async fn fetch_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Fetched<RemoteIssue>, ApiError> {
        self.get_json(&format!("repos/{}/{}/issues/{}", owner, repo, number))
            .await
    }

    /// Fetch all comments on one issue
    pub async fn fetch_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Fetched<Vec<RemoteIssueComment>>, ApiError> {
        self.get_paged(
            &format!("repos/{}/{}/issues/{}/comments", owner, repo, number),
            &[],
            None,
        )
        .await
    }
}
