//! Per-resource sync operations.

use super::{SyncContext, SyncError, SyncOutcome};
use crate::applier;
use crate::entities::RepositoryRow;
use crate::store::{EntityKind, EntityStore};
use crate::sync_state::{BeginOutcome, ResourceKind, SyncResource};
use crate::EntityId;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use octomirror_github::client::{Conditional, RegisterOutcome};
use octomirror_github::ApiError;
use serde::Serialize;
use tracing::{info, instrument, warn};

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;

// ============================================================================
// Repository URL Parsing
// ============================================================================

/// Parse the accepted repository-reference forms into `(owner, repo)`
///
/// Accepts `https://github.com/owner/repo`, `github.com/owner/repo`, and
/// bare `owner/repo`, with an optional `.git` suffix and trailing path
/// segments ignored.
pub fn parse_repo_url(input: &str) -> Option<(String, String)> {
    let trimmed = input.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    // A full URL must be on github.com.
    if trimmed.contains("://")
        && !rest.starts_with("github.com/")
        && !rest.starts_with("www.github.com/")
    {
        return None;
    }
    let path = rest
        .strip_prefix("www.github.com/")
        .or_else(|| rest.strip_prefix("github.com/"))
        .unwrap_or(rest);

    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?.trim_end_matches(".git");

    // GitHub account names are alphanumeric plus hyphens; repo names also
    // allow underscores and dots.
    let owner_ok = !owner.is_empty()
        && owner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    let repo_ok = !repo.is_empty()
        && repo
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');

    (owner_ok && repo_ok).then(|| (owner.to_string(), repo.to_string()))
}

// ============================================================================
// Per-Resource Syncs
// ============================================================================

impl SyncContext {
    /// Sync the user's organizations
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn sync_organizations(&self) -> Result<SyncOutcome, SyncError> {
        self.ensure_authorized().await?;
        let resource = SyncResource::global(ResourceKind::Organizations);
        let now = Utc::now();

        let row = match self.tracker.begin(&self.user_id, &resource, now).await? {
            BeginOutcome::AlreadyRunning => return Ok(SyncOutcome::AlreadyRunning),
            BeginOutcome::Started(row) => row,
        };

        match self
            .client
            .fetch_organizations(row.last_etag.as_deref())
            .await
        {
            Ok(Conditional::Unchanged { rate_limit }) => {
                self.tracker
                    .complete(&self.user_id, &resource, None, rate_limit.as_ref(), now)
                    .await?;
                Ok(SyncOutcome::Unchanged)
            }
            Ok(Conditional::Modified(fetched)) => {
                let user_entity = self.user_id.entity_id();
                for org in &fetched.data {
                    applier::apply_organization(self.store.as_ref(), &user_entity, org, now)
                        .await?;
                }
                self.tracker
                    .complete(
                        &self.user_id,
                        &resource,
                        fetched.etag,
                        fetched.rate_limit.as_ref(),
                        now,
                    )
                    .await?;
                Ok(SyncOutcome::Synced {
                    applied: fetched.data.len(),
                })
            }
            Err(error) => Err(self.fail_resource(&resource, error, now).await),
        }
    }

    /// Sync every repository the user can access
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn sync_repositories(&self) -> Result<SyncOutcome, SyncError> {
        self.ensure_authorized().await?;
        let resource = SyncResource::global(ResourceKind::Repositories);
        let now = Utc::now();

        let row = match self.tracker.begin(&self.user_id, &resource, now).await? {
            BeginOutcome::AlreadyRunning => return Ok(SyncOutcome::AlreadyRunning),
            BeginOutcome::Started(row) => row,
        };

        match self
            .client
            .fetch_repositories(row.last_etag.as_deref())
            .await
        {
            Ok(Conditional::Unchanged { rate_limit }) => {
                self.tracker
                    .complete(&self.user_id, &resource, None, rate_limit.as_ref(), now)
                    .await?;
                Ok(SyncOutcome::Unchanged)
            }
            Ok(Conditional::Modified(fetched)) => {
                let user_entity = self.user_id.entity_id();
                for repo in &fetched.data {
                    applier::apply_repository(self.store.as_ref(), &user_entity, repo, now)
                        .await?;
                }
                self.tracker
                    .complete(
                        &self.user_id,
                        &resource,
                        fetched.etag,
                        fetched.rate_limit.as_ref(),
                        now,
                    )
                    .await?;
                Ok(SyncOutcome::Synced {
                    applied: fetched.data.len(),
                })
            }
            Err(error) => Err(self.fail_resource(&resource, error, now).await),
        }
    }

    /// Sync one repository's open pull requests
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn sync_repo_pulls(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<SyncOutcome, SyncError> {
        self.ensure_authorized().await?;
        let full_name = format!("{}/{}", owner, repo);
        let resource = SyncResource::scoped(ResourceKind::PullRequests, &full_name);
        let now = Utc::now();

        let row = match self.tracker.begin(&self.user_id, &resource, now).await? {
            BeginOutcome::AlreadyRunning => return Ok(SyncOutcome::AlreadyRunning),
            BeginOutcome::Started(row) => row,
        };

        match self
            .client
            .fetch_pull_requests(owner, repo, "open", row.last_etag.as_deref())
            .await
        {
            Ok(Conditional::Unchanged { rate_limit }) => {
                self.tracker
                    .complete(&self.user_id, &resource, None, rate_limit.as_ref(), now)
                    .await?;
                Ok(SyncOutcome::Unchanged)
            }
            Ok(Conditional::Modified(fetched)) => {
                let repo_id = match self.resolve_repo(owner, repo).await {
                    Ok(id) => id,
                    Err(SyncError::Api(error)) => {
                        return Err(self.fail_resource(&resource, error, now).await)
                    }
                    Err(other) => return Err(other),
                };
                for pull in &fetched.data {
                    applier::apply_pull_request(self.store.as_ref(), &repo_id, pull, now).await?;
                }
                self.tracker
                    .complete(
                        &self.user_id,
                        &resource,
                        fetched.etag,
                        fetched.rate_limit.as_ref(),
                        now,
                    )
                    .await?;
                info!(owner, repo, count = fetched.data.len(), "Synced open pull requests");
                Ok(SyncOutcome::Synced {
                    applied: fetched.data.len(),
                })
            }
            Err(error) => Err(self.fail_resource(&resource, error, now).await),
        }
    }

    /// Sync one pull request's full detail, including check runs
    ///
    /// Skipped when synced within the freshness window, unless `force`.
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn sync_pull_detail(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        force: bool,
    ) -> Result<SyncOutcome, SyncError> {
        self.ensure_authorized().await?;
        let resource = SyncResource::scoped(
            ResourceKind::PullRequest,
            format!("{}/{}#{}", owner, repo, number),
        );
        let now = Utc::now();

        if !force {
            if let Some(row) = self.tracker.load(&self.user_id, &resource).await? {
                let fresh = row
                    .last_synced_at
                    .is_some_and(|at| now - at < self.config.detail_freshness);
                if fresh && row.sync_error.is_none() {
                    return Ok(SyncOutcome::Fresh);
                }
            }
        }

        match self.tracker.begin(&self.user_id, &resource, now).await? {
            BeginOutcome::AlreadyRunning => return Ok(SyncOutcome::AlreadyRunning),
            BeginOutcome::Started(_) => {}
        }

        let detail = match self
            .client
            .fetch_pull_request_detail(owner, repo, number)
            .await
        {
            Ok(detail) => detail,
            Err(error) => return Err(self.fail_resource(&resource, error, now).await),
        };

        let checks = match self
            .client
            .list_check_runs(owner, repo, &detail.pull.head.sha)
            .await
        {
            Ok(fetched) => fetched.data,
            // Check runs are best-effort; forks and bare repos often 404.
            Err(ApiError::NotFound { .. }) => Vec::new(),
            Err(error) => return Err(self.fail_resource(&resource, error, now).await),
        };

        let repo_id = match self.resolve_repo(owner, repo).await {
            Ok(id) => id,
            Err(SyncError::Api(error)) => {
                return Err(self.fail_resource(&resource, error, now).await)
            }
            Err(other) => return Err(other),
        };

        let head_sha = detail.pull.head.sha.clone();
        let pr_id =
            applier::apply_pull_request_detail(self.store.as_ref(), &repo_id, &detail, now)
                .await?;
        applier::apply_pr_checks(self.store.as_ref(), &pr_id, &head_sha, &checks, now).await?;

        self.tracker
            .complete(
                &self.user_id,
                &resource,
                None,
                self.client.rate_limits().get("core").as_ref(),
                now,
            )
            .await?;
        Ok(SyncOutcome::Synced { applied: 1 })
    }

    /// Sync one issue with its comments
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn sync_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<SyncOutcome, SyncError> {
        self.ensure_authorized().await?;
        let resource = SyncResource::scoped(
            ResourceKind::Issue,
            format!("{}/{}#{}", owner, repo, number),
        );
        let now = Utc::now();

        match self.tracker.begin(&self.user_id, &resource, now).await? {
            BeginOutcome::AlreadyRunning => return Ok(SyncOutcome::AlreadyRunning),
            BeginOutcome::Started(_) => {}
        }

        let (issue, comments) = match futures::try_join!(
            self.client.fetch_issue(owner, repo, number),
            self.client.fetch_issue_comments(owner, repo, number),
        ) {
            Ok((issue, comments)) => (issue, comments),
            Err(error) => return Err(self.fail_resource(&resource, error, now).await),
        };

        let repo_id = match self.resolve_repo(owner, repo).await {
            Ok(id) => id,
            Err(SyncError::Api(error)) => {
                return Err(self.fail_resource(&resource, error, now).await)
            }
            Err(other) => return Err(other),
        };

        let issue_id =
            applier::apply_issue(self.store.as_ref(), &repo_id, &issue.data, now).await?;
        let applied = comments.data.len() + 1;
        for comment in &comments.data {
            applier::apply_issue_comment(self.store.as_ref(), &issue_id, comment, now).await?;
        }

        self.tracker
            .complete(
                &self.user_id,
                &resource,
                None,
                comments.rate_limit.as_ref(),
                now,
            )
            .await?;
        Ok(SyncOutcome::Synced { applied })
    }

    /// Sync a repository's tree listing at a ref (default branch when
    /// unspecified)
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn sync_tree(
        &self,
        owner: &str,
        repo: &str,
        git_ref: Option<&str>,
    ) -> Result<SyncOutcome, SyncError> {
        self.ensure_authorized().await?;
        let now = Utc::now();

        let repo_id = match self.resolve_repo(owner, repo).await {
            Ok(id) => id,
            Err(other) => return Err(other),
        };
        let ref_name = match git_ref {
            Some(r) => r.to_string(),
            None => self.default_branch(&repo_id).await?,
        };

        let resource = SyncResource::scoped(
            ResourceKind::Tree,
            format!("{}/{}@{}", owner, repo, ref_name),
        );
        let row = match self.tracker.begin(&self.user_id, &resource, now).await? {
            BeginOutcome::AlreadyRunning => return Ok(SyncOutcome::AlreadyRunning),
            BeginOutcome::Started(row) => row,
        };

        match self
            .client
            .fetch_repo_tree(owner, repo, &ref_name, row.last_etag.as_deref())
            .await
        {
            Ok(Conditional::Unchanged { rate_limit }) => {
                self.tracker
                    .complete(&self.user_id, &resource, None, rate_limit.as_ref(), now)
                    .await?;
                Ok(SyncOutcome::Unchanged)
            }
            Ok(Conditional::Modified(fetched)) => {
                let applied = applier::apply_tree(
                    self.store.as_ref(),
                    &repo_id,
                    &ref_name,
                    &fetched.data,
                    now,
                )
                .await?;
                self.tracker
                    .complete(
                        &self.user_id,
                        &resource,
                        fetched.etag,
                        fetched.rate_limit.as_ref(),
                        now,
                    )
                    .await?;
                Ok(SyncOutcome::Synced { applied })
            }
            Err(error) => Err(self.fail_resource(&resource, error, now).await),
        }
    }

    /// Sync a repository's recent commits at a ref
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn sync_commits(
        &self,
        owner: &str,
        repo: &str,
        git_ref: Option<&str>,
    ) -> Result<SyncOutcome, SyncError> {
        self.ensure_authorized().await?;
        let now = Utc::now();

        let repo_id = match self.resolve_repo(owner, repo).await {
            Ok(id) => id,
            Err(other) => return Err(other),
        };
        let ref_name = match git_ref {
            Some(r) => r.to_string(),
            None => self.default_branch(&repo_id).await?,
        };

        let resource = SyncResource::scoped(
            ResourceKind::Commits,
            format!("{}/{}@{}", owner, repo, ref_name),
        );
        let row = match self.tracker.begin(&self.user_id, &resource, now).await? {
            BeginOutcome::AlreadyRunning => return Ok(SyncOutcome::AlreadyRunning),
            BeginOutcome::Started(row) => row,
        };

        match self
            .client
            .fetch_repo_commits(owner, repo, &ref_name, row.last_etag.as_deref())
            .await
        {
            Ok(Conditional::Unchanged { rate_limit }) => {
                self.tracker
                    .complete(&self.user_id, &resource, None, rate_limit.as_ref(), now)
                    .await?;
                Ok(SyncOutcome::Unchanged)
            }
            Ok(Conditional::Modified(fetched)) => {
                let applied = applier::apply_commits(
                    self.store.as_ref(),
                    &repo_id,
                    &ref_name,
                    &fetched.data,
                    now,
                )
                .await?;
                self.tracker
                    .complete(
                        &self.user_id,
                        &resource,
                        fetched.etag,
                        fetched.rate_limit.as_ref(),
                        now,
                    )
                    .await?;
                Ok(SyncOutcome::Synced { applied })
            }
            Err(error) => Err(self.fail_resource(&resource, error, now).await),
        }
    }

    /// Add one repository by URL: mirror it, sync its open PRs, register
    /// its webhook
    pub async fn add_repo(&self, url: &str) -> Result<(String, String), SyncError> {
        let (owner, repo) = parse_repo_url(url).ok_or_else(|| SyncError::NotFound {
            resource: format!("'{}' is not a recognizable GitHub repository", url),
        })?;

        self.ensure_authorized().await?;
        let now = Utc::now();
        let repo_id = self.resolve_repo(&owner, &repo).await?;

        self.sync_repo_pulls(&owner, &repo).await?;
        self.register_webhook_for(&owner, &repo, &repo_id).await?;

        Ok((owner, repo))
    }

    // ------------------------------------------------------------------
    // Webhook registration
    // ------------------------------------------------------------------

    /// Register the webhook on every mirrored repository, bounded-parallel
    pub async fn register_all_webhooks(
        &self,
    ) -> Result<WebhookRegistrationSummary, SyncError> {
        self.ensure_authorized().await?;
        let resource = SyncResource::global(ResourceKind::Webhooks);
        let now = Utc::now();

        match self.tracker.begin(&self.user_id, &resource, now).await? {
            BeginOutcome::AlreadyRunning => {
                return Ok(WebhookRegistrationSummary::already_running())
            }
            BeginOutcome::Started(_) => {}
        }

        let repos = self.store.query_kind(EntityKind::Repository).await?;
        let mut summary = WebhookRegistrationSummary {
            total: repos.len(),
            ..WebhookRegistrationSummary::default()
        };

        let results: Vec<RepoWebhookResult> = stream::iter(repos)
            .map(|record| async move {
                let row: RepositoryRow = match record.decode() {
                    Ok(row) => row,
                    Err(e) => {
                        return RepoWebhookResult {
                            repo: record.id.to_string(),
                            outcome: "error".to_string(),
                            error: Some(e.to_string()),
                        }
                    }
                };
                let (owner, name) = match row.full_name.split_once('/') {
                    Some(parts) => parts,
                    None => {
                        return RepoWebhookResult {
                            repo: row.full_name.clone(),
                            outcome: "error".to_string(),
                            error: Some("malformed full_name".to_string()),
                        }
                    }
                };
                self.webhook_result_for(owner, name, &record.id, &row).await
            })
            .buffer_unordered(self.config.parallelism)
            .collect()
            .await;

        for result in &results {
            match result.outcome.as_str() {
                "installed" | "already_installed" => summary.installed += 1,
                "no_access" => summary.no_access += 1,
                "suppressed" => summary.suppressed += 1,
                _ => summary.errors += 1,
            }
        }
        summary.results = results;

        self.tracker
            .complete(&self.user_id, &resource, None, None, now)
            .await?;
        Ok(summary)
    }

    async fn webhook_result_for(
        &self,
        owner: &str,
        name: &str,
        repo_id: &EntityId,
        row: &RepositoryRow,
    ) -> RepoWebhookResult {
        if row.webhook_installed {
            return RepoWebhookResult {
                repo: row.full_name.clone(),
                outcome: "already_installed".to_string(),
                error: None,
            };
        }

        match self.register_webhook_for(owner, name, repo_id).await {
            Ok(outcome) => RepoWebhookResult {
                repo: row.full_name.clone(),
                outcome: outcome.to_string(),
                error: None,
            },
            Err(e) => RepoWebhookResult {
                repo: row.full_name.clone(),
                outcome: "error".to_string(),
                error: Some(e.to_string()),
            },
        }
    }

    async fn register_webhook_for(
        &self,
        owner: &str,
        repo: &str,
        repo_id: &EntityId,
    ) -> Result<&'static str, SyncError> {
        let outcome = self
            .client
            .register_repo_webhook(
                owner,
                repo,
                &self.config.webhook_base_url,
                &self.config.webhook_secret,
                self.config.allow_local_webhooks,
            )
            .await
            .map_err(SyncError::Api)?;

        let now = Utc::now();
        match outcome {
            RegisterOutcome::Installed { hook_id } => {
                applier::mark_repo_webhook(self.store.as_ref(), repo_id, Some(hook_id), now)
                    .await?;
                Ok("installed")
            }
            RegisterOutcome::AlreadyInstalled => {
                applier::mark_repo_webhook(self.store.as_ref(), repo_id, None, now).await?;
                Ok("already_installed")
            }
            RegisterOutcome::NoAccess => Ok("no_access"),
            RegisterOutcome::Suppressed => Ok("suppressed"),
        }
    }

    // ------------------------------------------------------------------
    // Shared lookups
    // ------------------------------------------------------------------

    /// Resolve a repository's local entity, mirroring it on first sight
    pub(crate) async fn resolve_repo(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<EntityId, SyncError> {
        let full_name = format!("{}/{}", owner, repo);
        if let Some(record) = self
            .store
            .find_by_natural_key(EntityKind::Repository, &full_name)
            .await?
        {
            return Ok(record.id);
        }

        let fetched = self
            .client
            .fetch_repository(owner, repo)
            .await
            .map_err(|e| match e {
                ApiError::NotFound { .. } => SyncError::NotFound {
                    resource: full_name.clone(),
                },
                other => SyncError::Api(other),
            })?;

        Ok(applier::apply_repository(
            self.store.as_ref(),
            &self.user_id.entity_id(),
            &fetched.data,
            Utc::now(),
        )
        .await?)
    }

    async fn default_branch(&self, repo_id: &EntityId) -> Result<String, SyncError> {
        let Some(record) = self.store.get(repo_id).await? else {
            warn!(repo_id = %repo_id, "Repository row vanished; assuming main");
            return Ok("main".to_string());
        };
        let row: RepositoryRow = record.decode()?;
        Ok(row.default_branch)
    }
}

// ============================================================================
// Webhook Registration Summary
// ============================================================================

/// Per-repository webhook registration result
#[derive(Debug, Clone, Serialize)]
pub struct RepoWebhookResult {
    pub repo: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of registering webhooks across all repositories
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookRegistrationSummary {
    pub total: usize,
    pub installed: usize,
    pub no_access: usize,
    pub suppressed: usize,
    pub errors: usize,
    pub results: Vec<RepoWebhookResult>,
}

impl WebhookRegistrationSummary {
    fn already_running() -> Self {
        Self::default()
    }
}
