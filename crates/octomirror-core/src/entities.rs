//! Local entity rows the mirror stores.
//!
//! These are the canonical shapes the applier produces from GitHub wire
//! data. Label and assignee lists are stored as JSON strings because the
//! local schema treats them as opaque strings, and the per-PR viewed-files
//! state is a serialized map keyed by file path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(test)]
#[path = "entities_tests.rs"]
mod tests;

// ============================================================================
// Rows
// ============================================================================

/// The process owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub github_id: u64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// An organization the user belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRow {
    pub github_id: u64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A mirrored repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRow {
    pub github_id: u64,
    pub name: String,
    pub full_name: String,
    pub owner_login: String,
    pub private: bool,
    pub fork: bool,
    #[serde(default)]
    pub description: Option<String>,
    pub default_branch: String,
    pub star_count: u64,
    pub fork_count: u64,
    pub open_issue_count: u64,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    /// Set once the mirror's webhook is registered on this repository
    #[serde(default)]
    pub webhook_installed: bool,
    #[serde(default)]
    pub webhook_id: Option<u64>,
}

/// A mirrored pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestRow {
    pub github_id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub draft: bool,
    pub merged: bool,
    #[serde(default)]
    pub author: Option<String>,
    pub head_ref: String,
    pub head_sha: String,
    pub base_ref: String,
    /// JSON array of label names
    pub labels: String,
    /// JSON array of assignee logins
    pub assignees: String,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub comment_count: u64,
    /// Serialized map of file path to viewed flag
    #[serde(default)]
    pub viewed_files: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// A changed file within a pull request, keyed `(pr, path)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrFileRow {
    pub path: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub previous_path: Option<String>,
}

/// A review on a pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrReviewRow {
    pub github_id: u64,
    #[serde(default)]
    pub author: Option<String>,
    pub state: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Which surface a PR comment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrCommentKind {
    /// Inline review comment anchored to a diff position
    Review,
    /// Conversation comment on the PR itself
    Issue,
}

/// A comment on a pull request (either kind)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrCommentRow {
    pub github_id: u64,
    pub kind: PrCommentKind,
    #[serde(default)]
    pub author: Option<String>,
    pub body: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub in_reply_to: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A check run on the pull request's head commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrCheckRow {
    pub github_id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub details_url: Option<String>,
    pub head_sha: String,
}

/// A timeline event on a pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrEventRow {
    pub github_id: u64,
    pub event: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A commit on the pull request branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrCommitRow {
    pub sha: String,
    pub message: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub authored_at: Option<DateTime<Utc>>,
}

/// A mirrored issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRow {
    pub github_id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub author: Option<String>,
    /// JSON array of label names
    pub labels: String,
    /// JSON array of assignee logins
    pub assignees: String,
    pub comment_count: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// A comment on an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCommentRow {
    pub github_id: u64,
    #[serde(default)]
    pub author: Option<String>,
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One entry of a repository tree listing, keyed `(repo, ref, path)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEntryRow {
    pub ref_name: String,
    pub path: String,
    pub is_dir: bool,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A commit on a repository branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRow {
    pub sha: String,
    pub ref_name: String,
    pub message: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub authored_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Viewed Files
// ============================================================================

/// Per-PR map of file path to reviewed-locally flag
///
/// Stored as a JSON string on the PR row. Serialization is canonical (keys
/// sorted), so parse-then-serialize round-trips and setting a key commutes
/// with the round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewedFiles(BTreeMap<String, bool>);

impl ViewedFiles {
    /// Parse the stored form; malformed input yields the empty map
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::default();
        }
        serde_json::from_str::<BTreeMap<String, bool>>(raw)
            .map(Self)
            .unwrap_or_default()
    }

    /// Serialize to the canonical stored form
    pub fn serialize(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Set a path's viewed flag
    pub fn set(&mut self, path: &str, viewed: bool) {
        self.0.insert(path.to_string(), viewed);
    }

    /// Check a path's viewed flag
    pub fn is_viewed(&self, path: &str) -> bool {
        self.0.get(path).copied().unwrap_or(false)
    }

    /// Number of tracked paths
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
