//! Tree, commit, check-run, file-content, and branch operations.

use super::{Conditional, Fetched, GitHubClient};
use crate::error::ApiError;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

// ============================================================================
// Wire Shapes
// ============================================================================

/// One entry of a recursive tree listing
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTreeEntry {
    pub path: String,
    /// "blob" for files, "tree" for directories
    #[serde(rename = "type")]
    pub entry_type: String,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl RemoteTreeEntry {
    /// True for file entries
    pub fn is_file(&self) -> bool {
        self.entry_type == "blob"
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<serde_json::Value>,
    #[serde(default)]
    truncated: bool,
}

/// A commit on a branch as GitHub returns it
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCommit {
    pub sha: String,
    pub commit: RemoteCommitDetail,
    #[serde(default)]
    pub author: Option<super::RemoteUser>,
}

/// Nested commit metadata
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCommitDetail {
    pub message: String,
    #[serde(default)]
    pub author: Option<RemoteCommitSignature>,
}

/// Commit author signature
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCommitSignature {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// A check run attached to a commit
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCheckRun {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub details_url: Option<String>,
    #[serde(default)]
    pub head_sha: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CheckRunsResponse {
    #[serde(default)]
    check_runs: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileContentsResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BranchRef {
    object: BranchRefObject,
}

#[derive(Debug, Clone, Deserialize)]
struct BranchRefObject {
    sha: String,
}

// ============================================================================
// Operations
// ============================================================================

impl GitHubClient {
    /// Fetch the full recursive tree for a ref
    ///
    /// GitHub truncates very large trees; a truncated listing is surfaced
    /// as-is (the mirror shows what fits) with a warning log.
    pub async fn fetch_repo_tree(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        etag: Option<&str>,
    ) -> Result<Conditional<Vec<RemoteTreeEntry>>, ApiError> {
        let path = format!(
            "repos/{}/{}/git/trees/{}?recursive=1",
            owner, repo, git_ref
        );
        let conditional: Conditional<TreeResponse> =
            self.get_json_conditional(&path, etag).await?;

        match conditional {
            Conditional::Unchanged { rate_limit } => Ok(Conditional::Unchanged { rate_limit }),
            Conditional::Modified(fetched) => {
                if fetched.data.truncated {
                    tracing::warn!(
                        op = "fetch_repo_tree",
                        owner,
                        repo,
                        git_ref,
                        "GitHub truncated the tree listing"
                    );
                }
                let entries = super::decode_elements(fetched.data.tree, "fetch_repo_tree");
                Ok(Conditional::Modified(Fetched {
                    data: entries,
                    rate_limit: fetched.rate_limit,
                    etag: fetched.etag,
                }))
            }
        }
    }

    /// Fetch recent commits on a ref
    pub async fn fetch_repo_commits(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        etag: Option<&str>,
    ) -> Result<Conditional<Vec<RemoteCommit>>, ApiError> {
        self.get_paged_conditional(
            &format!("repos/{}/{}/commits", owner, repo),
            &[("sha", git_ref)],
            etag,
        )
        .await
    }

    /// List check runs for a commit
    pub async fn list_check_runs(
        &self,
        owner: &str,
        repo: &str,
        head_sha: &str,
    ) -> Result<Fetched<Vec<RemoteCheckRun>>, ApiError> {
        let fetched: Fetched<CheckRunsResponse> = self
            .get_json(&format!(
                "repos/{}/{}/commits/{}/check-runs",
                owner, repo, head_sha
            ))
            .await?;

        Ok(Fetched {
            data: super::decode_elements(fetched.data.check_runs, "list_check_runs"),
            rate_limit: fetched.rate_limit,
            etag: fetched.etag,
        })
    }

    /// Fetch and decode the contents of one file at a ref
    pub async fn get_file_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut url = format!("repos/{}/{}/contents/{}", owner, repo, path);
        if let Some(git_ref) = git_ref {
            url.push_str(&format!("?ref={}", git_ref));
        }

        let fetched: Fetched<FileContentsResponse> = self.get_json(&url).await?;
        if fetched.data.encoding != "base64" {
            return Err(ApiError::Malformed {
                message: format!("unexpected content encoding '{}'", fetched.data.encoding),
            });
        }

        let cleaned: String = fetched
            .data
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(cleaned)
            .map_err(|e| ApiError::Malformed {
                message: format!("invalid base64 content: {}", e),
            })?;

        String::from_utf8(bytes).map_err(|e| ApiError::Malformed {
            message: format!("file is not valid UTF-8: {}", e),
        })
    }

    /// Delete a branch ref
    pub async fn delete_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), ApiError> {
        self.send_empty(
            Method::DELETE,
            &format!("repos/{}/{}/git/refs/heads/{}", owner, repo, branch),
        )
        .await?;
        Ok(())
    }

    /// Restore a deleted branch by recreating its ref at a sha
    pub async fn restore_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), ApiError> {
        let _: Fetched<serde_json::Value> = self
            .send_json(
                Method::POST,
                &format!("repos/{}/{}/git/refs", owner, repo),
                &json!({ "ref": format!("refs/heads/{}", branch), "sha": sha }),
            )
            .await?;
        Ok(())
    }

    /// Resolve a branch name to its current head sha
    pub async fn branch_head_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, ApiError> {
        let fetched: Fetched<BranchRef> = self
            .get_json(&format!(
                "repos/{}/{}/git/ref/heads/{}",
                owner, repo, branch
            ))
            .await?;
        Ok(fetched.data.object.sha)
    }
}
