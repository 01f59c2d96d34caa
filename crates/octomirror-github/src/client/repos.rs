//! Organization, repository, and webhook-registration operations.

use super::{Conditional, Fetched, GitHubClient};
use crate::error::ApiError;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[cfg(test)]
#[path = "repos_tests.rs"]
mod tests;

// ============================================================================
// Wire Shapes
// ============================================================================

/// A user or organization account as GitHub returns it
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
}

/// An organization membership entry
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrganization {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A repository as GitHub returns it
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRepository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: RemoteUser,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub pushed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A repository webhook as GitHub returns it
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteHook {
    pub id: u64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Events the mirror subscribes its webhooks to
const WEBHOOK_EVENTS: [&str; 11] = [
    "push",
    "create",
    "delete",
    "fork",
    "repository",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "issues",
    "issue_comment",
    "star",
];

#[derive(Debug, Serialize)]
struct CreateHookRequest<'a> {
    name: &'a str,
    active: bool,
    events: &'a [&'a str],
    config: HookConfig<'a>,
}

#[derive(Debug, Serialize)]
struct HookConfig<'a> {
    url: &'a str,
    content_type: &'a str,
    secret: &'a str,
}

/// Outcome of a webhook registration attempt on one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Hook created
    Installed { hook_id: u64 },
    /// A hook for this endpoint already exists
    AlreadyInstalled,
    /// The token cannot administer hooks on this repository
    NoAccess,
    /// Registration skipped because the endpoint is not publicly reachable
    Suppressed,
}

/// Check whether a deployment URL is a plausible webhook target
///
/// GitHub cannot deliver to loopback or RFC1918 addresses, so registration
/// against such a `base_url` is suppressed unless explicitly overridden for
/// tunnel setups.
pub fn webhook_target_allowed(base_url: &str, allow_local: bool) -> bool {
    if allow_local {
        return true;
    }

    let host = match url::Url::parse(base_url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.to_string(),
            None => return false,
        },
        Err(_) => return false,
    };

    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local") {
        return false;
    }

    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        let private = match ip {
            std::net::IpAddr::V4(v4) => {
                v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
            }
            std::net::IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
        return !private;
    }

    true
}

// ============================================================================
// Operations
// ============================================================================

impl GitHubClient {
    /// Fetch the organizations the user belongs to
    pub async fn fetch_organizations(
        &self,
        etag: Option<&str>,
    ) -> Result<Conditional<Vec<RemoteOrganization>>, ApiError> {
        self.get_paged_conditional("user/orgs", &[], etag).await
    }

    /// Fetch every repository the user can access, most recently pushed
    /// first
    pub async fn fetch_repositories(
        &self,
        etag: Option<&str>,
    ) -> Result<Conditional<Vec<RemoteRepository>>, ApiError> {
        self.get_paged_conditional(
            "user/repos",
            &[
                ("affiliation", "owner,collaborator,organization_member"),
                ("sort", "pushed"),
                ("direction", "desc"),
            ],
            etag,
        )
        .await
    }

    /// Fetch a single repository
    pub async fn fetch_repository(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Fetched<RemoteRepository>, ApiError> {
        self.get_json(&format!("repos/{}/{}", owner, repo)).await
    }

    /// Register the mirror's webhook on one repository
    ///
    /// Idempotent: an existing hook for the same endpoint reports
    /// [`RegisterOutcome::AlreadyInstalled`] rather than an error, and a
    /// 403/404 (no admin access) reports [`RegisterOutcome::NoAccess`].
    pub async fn register_repo_webhook(
        &self,
        owner: &str,
        repo: &str,
        base_url: &str,
        secret: &str,
        allow_local: bool,
    ) -> Result<RegisterOutcome, ApiError> {
        if !webhook_target_allowed(base_url, allow_local) {
            warn!(
                op = "register_repo_webhook",
                owner,
                repo,
                base_url,
                "Webhook endpoint is not publicly reachable; skipping registration"
            );
            return Ok(RegisterOutcome::Suppressed);
        }

        let hook_url = format!(
            "{}/api/github/webhook",
            base_url.trim_end_matches('/')
        );
        let request = CreateHookRequest {
            name: "web",
            active: true,
            events: &WEBHOOK_EVENTS,
            config: HookConfig {
                url: &hook_url,
                content_type: "json",
                secret,
            },
        };

        let result: Result<Fetched<RemoteHook>, ApiError> = self
            .send_json(
                Method::POST,
                &format!("repos/{}/{}/hooks", owner, repo),
                &request,
            )
            .await;

        match result {
            Ok(created) => {
                info!(
                    op = "register_repo_webhook",
                    owner,
                    repo,
                    hook_id = created.data.id,
                    "Webhook registered"
                );
                Ok(RegisterOutcome::Installed {
                    hook_id: created.data.id,
                })
            }
            Err(ApiError::Unprocessable { message })
                if message.contains("already exists") =>
            {
                Ok(RegisterOutcome::AlreadyInstalled)
            }
            Err(ApiError::NotFound { .. }) => Ok(RegisterOutcome::NoAccess),
            Err(ApiError::GitHub { status: 403, .. }) => Ok(RegisterOutcome::NoAccess),
            Err(e) => Err(e),
        }
    }
}
