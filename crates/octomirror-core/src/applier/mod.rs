//! Entity applier: the single place GitHub shapes become local rows.
//!
//! Every function here follows the same recipe: look up the existing row by
//! its most stable identifier (GitHub numeric ID, or the natural composite
//! key for tree entries and PR files), mint a fresh ID only when none
//! exists, produce the canonical local row, and emit one transaction per
//! coherent group. List-valued children are diffed against the stored set
//! by natural key and stale entries deleted in the same transaction — the
//! reap rule that makes re-syncing idempotent and self-healing.
//!
//! Both ingestion paths call these functions: the pull orchestrators with
//! freshly fetched data, the webhook dispatcher with decoded payloads.

mod diff;

use crate::entities::{
    CommitRow, IssueCommentRow, IssueRow, OrganizationRow, PrCheckRow, PrCommentKind,
    PrCommentRow, PrCommitRow, PrEventRow, PrFileRow, PrReviewRow, PullRequestRow, RepositoryRow,
    UserRow, ViewedFiles,
};
use crate::store::{EntityKind, EntityRecord, EntityStore, Link, StoreError, StoreOp};
use crate::{EntityId, UserId};
use chrono::{DateTime, Utc};
use octomirror_github::client::{
    PullRequestDetail, RemoteCheckRun, RemoteCommit, RemoteIssue, RemoteIssueComment,
    RemoteOrganization, RemotePrCommit, RemotePrEvent, RemotePrFile, RemotePullRequest,
    RemoteRepository, RemoteReview, RemoteReviewComment, RemoteTreeEntry,
};
use serde::Serialize;
use std::collections::HashSet;

pub use diff::{compute_stale_entries, parse_patch_stats};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

/// Error type for applier operations
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Payload is missing required field: {field}")]
    MissingField { field: String },

    #[error("Payload field has unexpected shape: {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Store write failed: {0}")]
    Store(#[from] StoreError),
}

impl ApplyError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::MissingField { .. } => false,
            Self::InvalidField { .. } => false,
        }
    }
}

// ============================================================================
// Row Helpers
// ============================================================================

/// Serialize label names to the opaque JSON-string column form
pub fn labels_json(labels: &[octomirror_github::client::RemoteLabel]) -> String {
    let names: Vec<&str> = labels.iter().map(|label| label.name.as_str()).collect();
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

/// Serialize assignee logins to the opaque JSON-string column form
pub fn assignees_json(assignees: &[octomirror_github::client::RemoteUser]) -> String {
    let logins: Vec<&str> = assignees.iter().map(|user| user.login.as_str()).collect();
    serde_json::to_string(&logins).unwrap_or_else(|_| "[]".to_string())
}

/// Find the existing local ID for a GitHub numeric ID, or mint a fresh one
async fn id_for_github(
    store: &dyn EntityStore,
    kind: EntityKind,
    github_id: u64,
) -> Result<EntityId, StoreError> {
    Ok(store
        .find_by_github_id(kind, github_id)
        .await?
        .map(|record| record.id)
        .unwrap_or_else(EntityId::fresh))
}

fn record_for<T: Serialize>(
    id: EntityId,
    kind: EntityKind,
    github_id: u64,
    row: &T,
    now: DateTime<Utc>,
) -> Result<EntityRecord, StoreError> {
    Ok(EntityRecord::new(id, kind, row, now)?.with_github_id(github_id))
}

// ============================================================================
// Users and Organizations
// ============================================================================

/// Apply the process owner's user row
pub async fn apply_user(
    store: &dyn EntityStore,
    user_id: &UserId,
    github_id: u64,
    login: &str,
    avatar_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let id = user_id.entity_id();
    let row = UserRow {
        github_id,
        login: login.to_string(),
        avatar_url: avatar_url.map(String::from),
    };
    let record = record_for(id.clone(), EntityKind::User, github_id, &row, now)?;
    store.upsert(record, Vec::new()).await?;
    Ok(id)
}

/// Apply one organization, linked to its owning user
pub async fn apply_organization(
    store: &dyn EntityStore,
    user_entity: &EntityId,
    remote: &RemoteOrganization,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let id = id_for_github(store, EntityKind::Organization, remote.id).await?;
    let row = OrganizationRow {
        github_id: remote.id,
        login: remote.login.clone(),
        avatar_url: remote.avatar_url.clone(),
        description: remote.description.clone(),
    };
    let record = record_for(id.clone(), EntityKind::Organization, remote.id, &row, now)?;
    let links = vec![Link::new(id.clone(), "owner", user_entity.clone())];
    store.upsert(record, links).await?;
    Ok(id)
}

// ============================================================================
// Repositories
// ============================================================================

/// Apply one repository, linked to its owning user and (when the owner is
/// an organization already mirrored) to that organization
pub async fn apply_repository(
    store: &dyn EntityStore,
    user_entity: &EntityId,
    remote: &RemoteRepository,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let id = id_for_github(store, EntityKind::Repository, remote.id).await?;

    // Webhook bookkeeping survives refreshes of the repository row.
    let (webhook_installed, webhook_id) = match store.get(&id).await? {
        Some(existing) => {
            let row: RepositoryRow = existing.decode()?;
            (row.webhook_installed, row.webhook_id)
        }
        None => (false, None),
    };

    let row = RepositoryRow {
        github_id: remote.id,
        name: remote.name.clone(),
        full_name: remote.full_name.clone(),
        owner_login: remote.owner.login.clone(),
        private: remote.private,
        fork: remote.fork,
        description: remote.description.clone(),
        default_branch: remote
            .default_branch
            .clone()
            .unwrap_or_else(|| "main".to_string()),
        star_count: remote.stargazers_count,
        fork_count: remote.forks_count,
        open_issue_count: remote.open_issues_count,
        pushed_at: remote.pushed_at,
        webhook_installed,
        webhook_id,
    };

    let record = record_for(id.clone(), EntityKind::Repository, remote.id, &row, now)?
        .with_natural_key(remote.full_name.clone());
    let mut links = vec![Link::new(id.clone(), "owner", user_entity.clone())];

    if remote.owner.account_type.as_deref() == Some("Organization") {
        if let Some(org) = store
            .find_by_github_id(EntityKind::Organization, remote.owner.id)
            .await?
        {
            links.push(Link::new(id.clone(), "organization", org.id));
        }
    }

    store.upsert(record, links).await?;
    Ok(id)
}

/// Record the webhook registration result on a repository row
pub async fn mark_repo_webhook(
    store: &dyn EntityStore,
    repo_id: &EntityId,
    webhook_id: Option<u64>,
    now: DateTime<Utc>,
) -> Result<(), ApplyError> {
    let Some(record) = store.get(repo_id).await? else {
        return Err(ApplyError::MissingField {
            field: "repository".to_string(),
        });
    };
    let mut row: RepositoryRow = record.decode()?;
    row.webhook_installed = true;
    if webhook_id.is_some() {
        row.webhook_id = webhook_id;
    }
    let github_id = row.github_id;
    let natural = row.full_name.clone();
    let updated = record_for(repo_id.clone(), EntityKind::Repository, github_id, &row, now)?
        .with_natural_key(natural);
    store.upsert(updated, Vec::new()).await?;
    Ok(())
}

// ============================================================================
// Pull Requests
// ============================================================================

fn pull_request_row(remote: &RemotePullRequest, viewed_files: String) -> PullRequestRow {
    PullRequestRow {
        github_id: remote.id,
        number: remote.number,
        title: remote.title.clone(),
        body: remote.body.clone(),
        state: remote.state.clone(),
        draft: remote.draft,
        merged: remote.merged || remote.merged_at.is_some(),
        author: remote.user.as_ref().map(|user| user.login.clone()),
        head_ref: remote.head.ref_name.clone(),
        head_sha: remote.head.sha.clone(),
        base_ref: remote.base.ref_name.clone(),
        labels: labels_json(&remote.labels),
        assignees: assignees_json(&remote.assignees),
        additions: remote.additions.unwrap_or(0),
        deletions: remote.deletions.unwrap_or(0),
        changed_files: remote.changed_files.unwrap_or(0),
        comment_count: remote.comments.unwrap_or(0) + remote.review_comments.unwrap_or(0),
        viewed_files,
        created_at: remote.created_at,
        merged_at: remote.merged_at,
        closed_at: remote.closed_at,
    }
}

/// Apply one pull request head row, linked to its repository
pub async fn apply_pull_request(
    store: &dyn EntityStore,
    repo_id: &EntityId,
    remote: &RemotePullRequest,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let id = id_for_github(store, EntityKind::PullRequest, remote.id).await?;

    // Viewed-file flags are local state; carry them across refreshes.
    let viewed_files = match store.get(&id).await? {
        Some(existing) => existing.decode::<PullRequestRow>()?.viewed_files,
        None => String::new(),
    };

    let row = pull_request_row(remote, viewed_files);
    let record = record_for(id.clone(), EntityKind::PullRequest, remote.id, &row, now)?;
    let links = vec![Link::new(id.clone(), "repository", repo_id.clone())];
    store.upsert(record, links).await?;
    Ok(id)
}

/// Apply a pull request and all of its children in one transaction
///
/// PR files are reaped by path; reviews, comments, events, and commits are
/// keyed upserts by GitHub ID (or sha).
pub async fn apply_pull_request_detail(
    store: &dyn EntityStore,
    repo_id: &EntityId,
    detail: &PullRequestDetail,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let pr_id = id_for_github(store, EntityKind::PullRequest, detail.pull.id).await?;
    let viewed_files = match store.get(&pr_id).await? {
        Some(existing) => existing.decode::<PullRequestRow>()?.viewed_files,
        None => String::new(),
    };

    let mut ops: Vec<StoreOp> = Vec::new();

    let pr_row = pull_request_row(&detail.pull, viewed_files);
    ops.push(StoreOp::Upsert {
        record: record_for(
            pr_id.clone(),
            EntityKind::PullRequest,
            detail.pull.id,
            &pr_row,
            now,
        )?,
        links: vec![Link::new(pr_id.clone(), "repository", repo_id.clone())],
    });

    // Files: diff incoming against stored, reap the rest.
    let existing_files = store
        .query_prefix(EntityKind::PrFile, &format!("{}:", pr_id))
        .await?;
    let incoming_paths: HashSet<String> =
        detail.files.iter().map(|f| f.filename.clone()).collect();
    let existing_by_path: Vec<(EntityId, String)> = existing_files
        .iter()
        .filter_map(|record| {
            record
                .natural_key
                .as_ref()
                .and_then(|key| key.split_once(':'))
                .map(|(_, path)| (record.id.clone(), path.to_string()))
        })
        .collect();

    for stale in compute_stale_entries(&existing_by_path, &incoming_paths) {
        ops.push(StoreOp::Delete { id: stale });
    }
    for file in &detail.files {
        ops.push(pr_file_upsert(&pr_id, &existing_by_path, file, now)?);
    }

    for review in &detail.reviews {
        ops.push(
            pr_child_upsert(
                store,
                &pr_id,
                EntityKind::PrReview,
                review.id,
                &review_row(review),
                now,
            )
            .await?,
        );
    }
    for comment in &detail.review_comments {
        ops.push(
            pr_child_upsert(
                store,
                &pr_id,
                EntityKind::PrComment,
                comment.id,
                &review_comment_row(comment),
                now,
            )
            .await?,
        );
    }
    for comment in &detail.issue_comments {
        ops.push(
            pr_child_upsert(
                store,
                &pr_id,
                EntityKind::PrComment,
                comment.id,
                &issue_comment_as_pr_row(comment),
                now,
            )
            .await?,
        );
    }
    for event in &detail.events {
        ops.push(
            pr_child_upsert(
                store,
                &pr_id,
                EntityKind::PrEvent,
                event.id,
                &event_row(event),
                now,
            )
            .await?,
        );
    }
    for commit in &detail.commits {
        ops.push(pr_commit_upsert(store, &pr_id, commit, now).await?);
    }

    store.transact(ops).await?;
    Ok(pr_id)
}

fn pr_file_upsert(
    pr_id: &EntityId,
    existing_by_path: &[(EntityId, String)],
    file: &RemotePrFile,
    now: DateTime<Utc>,
) -> Result<StoreOp, ApplyError> {
    let id = existing_by_path
        .iter()
        .find(|(_, path)| path == &file.filename)
        .map(|(id, _)| id.clone())
        .unwrap_or_else(EntityId::fresh);

    // Patch counts fall back to parsing the diff when GitHub omits them.
    let (additions, deletions) = if file.additions == 0 && file.deletions == 0 {
        file.patch
            .as_deref()
            .map(parse_patch_stats)
            .unwrap_or((0, 0))
    } else {
        (file.additions, file.deletions)
    };

    let row = PrFileRow {
        path: file.filename.clone(),
        status: file.status.clone(),
        additions,
        deletions,
        patch: file.patch.clone(),
        previous_path: file.previous_filename.clone(),
    };

    let record = EntityRecord::new(id.clone(), EntityKind::PrFile, &row, now)?
        .with_natural_key(format!("{}:{}", pr_id, file.filename));
    Ok(StoreOp::Upsert {
        record,
        links: vec![Link::new(id, "pull_request", pr_id.clone())],
    })
}

async fn pr_child_upsert<T: Serialize>(
    store: &dyn EntityStore,
    pr_id: &EntityId,
    kind: EntityKind,
    github_id: u64,
    row: &T,
    now: DateTime<Utc>,
) -> Result<StoreOp, ApplyError> {
    let id = id_for_github(store, kind, github_id).await?;
    let record = record_for(id.clone(), kind, github_id, row, now)?
        .with_natural_key(format!("{}:{}", pr_id, github_id));
    Ok(StoreOp::Upsert {
        record,
        links: vec![Link::new(id, "pull_request", pr_id.clone())],
    })
}

async fn pr_commit_upsert(
    store: &dyn EntityStore,
    pr_id: &EntityId,
    commit: &RemotePrCommit,
    now: DateTime<Utc>,
) -> Result<StoreOp, ApplyError> {
    let natural = format!("{}:{}", pr_id, commit.sha);
    let id = store
        .find_by_natural_key(EntityKind::PrCommit, &natural)
        .await?
        .map(|record| record.id)
        .unwrap_or_else(EntityId::fresh);

    let row = PrCommitRow {
        sha: commit.sha.clone(),
        message: commit.commit.message.clone(),
        author: commit
            .author
            .as_ref()
            .map(|user| user.login.clone())
            .or_else(|| {
                commit
                    .commit
                    .author
                    .as_ref()
                    .and_then(|sig| sig.name.clone())
            }),
        authored_at: commit.commit.author.as_ref().and_then(|sig| sig.date),
    };

    let record =
        EntityRecord::new(id.clone(), EntityKind::PrCommit, &row, now)?.with_natural_key(natural);
    Ok(StoreOp::Upsert {
        record,
        links: vec![Link::new(id, "pull_request", pr_id.clone())],
    })
}

fn review_row(review: &RemoteReview) -> PrReviewRow {
    PrReviewRow {
        github_id: review.id,
        author: review.user.as_ref().map(|user| user.login.clone()),
        state: review.state.clone(),
        body: review.body.clone(),
        submitted_at: review.submitted_at,
    }
}

fn review_comment_row(comment: &RemoteReviewComment) -> PrCommentRow {
    PrCommentRow {
        github_id: comment.id,
        kind: PrCommentKind::Review,
        author: comment.user.as_ref().map(|user| user.login.clone()),
        body: comment.body.clone(),
        path: comment.path.clone(),
        line: comment.line,
        in_reply_to: comment.in_reply_to_id,
        created_at: comment.created_at,
    }
}

fn issue_comment_as_pr_row(comment: &RemoteIssueComment) -> PrCommentRow {
    PrCommentRow {
        github_id: comment.id,
        kind: PrCommentKind::Issue,
        author: comment.user.as_ref().map(|user| user.login.clone()),
        body: comment.body.clone(),
        path: None,
        line: None,
        in_reply_to: None,
        created_at: comment.created_at,
    }
}

fn event_row(event: &RemotePrEvent) -> PrEventRow {
    PrEventRow {
        github_id: event.id,
        event: event.event.clone(),
        actor: event.actor.as_ref().map(|user| user.login.clone()),
        created_at: event.created_at,
    }
}

/// Apply a standalone review (webhook path)
pub async fn apply_pr_review(
    store: &dyn EntityStore,
    pr_id: &EntityId,
    review: &RemoteReview,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let op = pr_child_upsert(
        store,
        pr_id,
        EntityKind::PrReview,
        review.id,
        &review_row(review),
        now,
    )
    .await?;
    let id = op_id(&op);
    store.transact(vec![op]).await?;
    Ok(id)
}

/// Apply a standalone review comment (webhook path)
pub async fn apply_pr_review_comment(
    store: &dyn EntityStore,
    pr_id: &EntityId,
    comment: &RemoteReviewComment,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let op = pr_child_upsert(
        store,
        pr_id,
        EntityKind::PrComment,
        comment.id,
        &review_comment_row(comment),
        now,
    )
    .await?;
    let id = op_id(&op);
    store.transact(vec![op]).await?;
    Ok(id)
}

/// Apply a standalone conversation comment on a PR (webhook path)
pub async fn apply_pr_issue_comment(
    store: &dyn EntityStore,
    pr_id: &EntityId,
    comment: &RemoteIssueComment,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let op = pr_child_upsert(
        store,
        pr_id,
        EntityKind::PrComment,
        comment.id,
        &issue_comment_as_pr_row(comment),
        now,
    )
    .await?;
    let id = op_id(&op);
    store.transact(vec![op]).await?;
    Ok(id)
}

/// Record a PR lifecycle event from a webhook action
pub async fn apply_pr_action_event(
    store: &dyn EntityStore,
    pr_id: &EntityId,
    action: &str,
    actor: Option<&str>,
    github_event_id: u64,
    now: DateTime<Utc>,
) -> Result<(), ApplyError> {
    let row = PrEventRow {
        github_id: github_event_id,
        event: action.to_string(),
        actor: actor.map(String::from),
        created_at: Some(now),
    };
    let op = pr_child_upsert(store, pr_id, EntityKind::PrEvent, github_event_id, &row, now)
        .await?;
    store.transact(vec![op]).await?;
    Ok(())
}

/// Replace the check runs for a PR head commit
///
/// Checks for superseded head commits are reaped in the same transaction.
pub async fn apply_pr_checks(
    store: &dyn EntityStore,
    pr_id: &EntityId,
    head_sha: &str,
    checks: &[RemoteCheckRun],
    now: DateTime<Utc>,
) -> Result<(), ApplyError> {
    let existing = store
        .query_prefix(EntityKind::PrCheck, &format!("{}:", pr_id))
        .await?;
    let incoming: HashSet<String> = checks.iter().map(|check| check.id.to_string()).collect();

    let mut ops: Vec<StoreOp> = Vec::new();
    for record in &existing {
        let keep = record
            .natural_key
            .as_deref()
            .and_then(|key| key.rsplit_once(':'))
            .is_some_and(|(_, check_id)| incoming.contains(check_id));
        if !keep {
            ops.push(StoreOp::Delete {
                id: record.id.clone(),
            });
        }
    }

    for check in checks {
        let row = PrCheckRow {
            github_id: check.id,
            name: check.name.clone(),
            status: check.status.clone(),
            conclusion: check.conclusion.clone(),
            details_url: check.details_url.clone(),
            head_sha: check
                .head_sha
                .clone()
                .unwrap_or_else(|| head_sha.to_string()),
        };
        ops.push(pr_child_upsert(store, pr_id, EntityKind::PrCheck, check.id, &row, now).await?);
    }

    store.transact(ops).await?;
    Ok(())
}

/// Toggle a file's viewed flag on a pull request
pub async fn set_file_viewed(
    store: &dyn EntityStore,
    pr_id: &EntityId,
    path: &str,
    viewed: bool,
    now: DateTime<Utc>,
) -> Result<(), ApplyError> {
    let Some(record) = store.get(pr_id).await? else {
        return Err(ApplyError::MissingField {
            field: "pull_request".to_string(),
        });
    };
    let mut row: PullRequestRow = record.decode()?;

    let mut viewed_files = ViewedFiles::parse(&row.viewed_files);
    viewed_files.set(path, viewed);
    row.viewed_files = viewed_files.serialize();

    let github_id = row.github_id;
    let updated = record_for(pr_id.clone(), EntityKind::PullRequest, github_id, &row, now)?;
    store.upsert(updated, Vec::new()).await?;
    Ok(())
}

// ============================================================================
// Issues
// ============================================================================

/// Apply one issue, linked to its repository
///
/// Pull requests wearing the issue shape are rejected; they belong to
/// [`apply_pull_request`].
pub async fn apply_issue(
    store: &dyn EntityStore,
    repo_id: &EntityId,
    remote: &RemoteIssue,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    if remote.is_pull_request() {
        return Err(ApplyError::InvalidField {
            field: "issue".to_string(),
            message: "entry is a pull request".to_string(),
        });
    }

    let id = id_for_github(store, EntityKind::Issue, remote.id).await?;
    let row = IssueRow {
        github_id: remote.id,
        number: remote.number,
        title: remote.title.clone(),
        body: remote.body.clone(),
        state: remote.state.clone(),
        author: remote.user.as_ref().map(|user| user.login.clone()),
        labels: labels_json(&remote.labels),
        assignees: assignees_json(&remote.assignees),
        comment_count: remote.comments,
        created_at: remote.created_at,
        closed_at: remote.closed_at,
    };
    let record = record_for(id.clone(), EntityKind::Issue, remote.id, &row, now)?;
    let links = vec![Link::new(id.clone(), "repository", repo_id.clone())];
    store.upsert(record, links).await?;
    Ok(id)
}

/// Apply one comment on an issue
pub async fn apply_issue_comment(
    store: &dyn EntityStore,
    issue_id: &EntityId,
    comment: &RemoteIssueComment,
    now: DateTime<Utc>,
) -> Result<EntityId, ApplyError> {
    let id = id_for_github(store, EntityKind::IssueComment, comment.id).await?;
    let row = IssueCommentRow {
        github_id: comment.id,
        author: comment.user.as_ref().map(|user| user.login.clone()),
        body: comment.body.clone(),
        created_at: comment.created_at,
    };
    let record = record_for(id.clone(), EntityKind::IssueComment, comment.id, &row, now)?
        .with_natural_key(format!("{}:{}", issue_id, comment.id));
    let links = vec![Link::new(id.clone(), "issue", issue_id.clone())];
    store.upsert(record, links).await?;
    Ok(id)
}

// ============================================================================
// Trees and Commits
// ============================================================================

/// Build the deterministic ID for a tree entry
///
/// Equal inputs always produce the same ID, independent of time.
pub fn build_tree_entry_id(repo_id: &EntityId, ref_name: &str, path: &str) -> EntityId {
    EntityId::tree_entry(repo_id, ref_name, path)
}

/// Replace a repository tree listing at a ref
///
/// Entries absent from the incoming listing are deleted in the same
/// transaction that inserts the new ones, so no ghost entries linger.
pub async fn apply_tree(
    store: &dyn EntityStore,
    repo_id: &EntityId,
    ref_name: &str,
    entries: &[RemoteTreeEntry],
    now: DateTime<Utc>,
) -> Result<usize, ApplyError> {
    let prefix = format!("{}:{}:", repo_id, ref_name);
    let existing = store.query_prefix(EntityKind::TreeEntry, &prefix).await?;

    let incoming_paths: HashSet<String> =
        entries.iter().map(|entry| entry.path.clone()).collect();
    let existing_by_path: Vec<(EntityId, String)> = existing
        .iter()
        .filter_map(|record| {
            record
                .natural_key
                .as_deref()
                .and_then(|key| key.strip_prefix(&prefix))
                .map(|path| (record.id.clone(), path.to_string()))
        })
        .collect();

    let mut ops: Vec<StoreOp> = Vec::new();
    for stale in compute_stale_entries(&existing_by_path, &incoming_paths) {
        ops.push(StoreOp::Delete { id: stale });
    }

    for entry in entries {
        let id = build_tree_entry_id(repo_id, ref_name, &entry.path);
        let row = crate::entities::TreeEntryRow {
            ref_name: ref_name.to_string(),
            path: entry.path.clone(),
            is_dir: !entry.is_file(),
            sha: entry.sha.clone(),
            size: entry.size,
        };
        let record = EntityRecord::new(id.clone(), EntityKind::TreeEntry, &row, now)?
            .with_natural_key(format!("{}{}", prefix, entry.path));
        ops.push(StoreOp::Upsert {
            record,
            links: vec![Link::new(id, "repository", repo_id.clone())],
        });
    }

    let applied = entries.len();
    store.transact(ops).await?;
    Ok(applied)
}

/// Apply recent commits on a repository ref
pub async fn apply_commits(
    store: &dyn EntityStore,
    repo_id: &EntityId,
    ref_name: &str,
    commits: &[RemoteCommit],
    now: DateTime<Utc>,
) -> Result<usize, ApplyError> {
    let mut ops: Vec<StoreOp> = Vec::new();

    for commit in commits {
        let natural = format!("{}:{}:{}", repo_id, ref_name, commit.sha);
        let id = store
            .find_by_natural_key(EntityKind::Commit, &natural)
            .await?
            .map(|record| record.id)
            .unwrap_or_else(EntityId::fresh);

        let row = CommitRow {
            sha: commit.sha.clone(),
            ref_name: ref_name.to_string(),
            message: commit.commit.message.clone(),
            author: commit
                .author
                .as_ref()
                .map(|user| user.login.clone())
                .or_else(|| {
                    commit
                        .commit
                        .author
                        .as_ref()
                        .and_then(|sig| sig.name.clone())
                }),
            authored_at: commit.commit.author.as_ref().and_then(|sig| sig.date),
        };

        let record =
            EntityRecord::new(id.clone(), EntityKind::Commit, &row, now)?.with_natural_key(natural);
        ops.push(StoreOp::Upsert {
            record,
            links: vec![Link::new(id, "repository", repo_id.clone())],
        });
    }

    let applied = commits.len();
    store.transact(ops).await?;
    Ok(applied)
}

fn op_id(op: &StoreOp) -> EntityId {
    match op {
        StoreOp::Upsert { record, .. } => record.id.clone(),
        StoreOp::Link(link) => link.from.clone(),
        StoreOp::Delete { id } => id.clone(),
    }
}
