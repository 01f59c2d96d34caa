//! Tests for the four-phase initial sync, including resume.

use super::*;
use crate::store::MemoryStore;
use crate::sync::{SyncConfig, SyncContext};
use crate::sync_state::{ResourceKind, SyncResource, SyncStatus};
use crate::UserId;
use octomirror_github::auth::AccessToken;
use octomirror_github::{ClientConfig, GitHubClient};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context(server: &MockServer) -> SyncContext {
    let store = Arc::new(MemoryStore::new());
    let client = GitHubClient::new(
        "u-1",
        AccessToken::new("gho_test"),
        ClientConfig::default().with_api_url(server.uri()),
    )
    .unwrap();
    SyncContext::new(
        store,
        client,
        UserId::new("u-1").unwrap(),
        SyncConfig {
            webhook_base_url: "https://mirror.example.com".to_string(),
            webhook_secret: "hook-secret".to_string(),
            ..SyncConfig::default()
        },
    )
}

fn org_json() -> serde_json::Value {
    serde_json::json!([{ "id": 10, "login": "acme" }])
}

fn repos_json() -> serde_json::Value {
    serde_json::json!([{
        "id": 500,
        "name": "mirror",
        "full_name": "octocat/mirror",
        "owner": { "id": 7, "login": "octocat", "type": "User" },
        "private": false,
        "default_branch": "main",
    }])
}

fn pulls_json() -> serde_json::Value {
    serde_json::json!([{
        "id": 9001,
        "number": 1,
        "title": "First",
        "state": "open",
        "head": { "ref": "feature", "sha": "abc" },
        "base": { "ref": "main", "sha": "def" },
    }])
}

async fn mount_happy_mocks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/user/orgs"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"orgs-1\"")
                .set_body_json(org_json()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"repos-1\"")
                .set_body_json(repos_json()),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octocat/mirror/hooks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": 77 })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/mirror/pulls"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"pulls-1\"")
                .set_body_json(pulls_json()),
        )
        .mount(server)
        .await;
}

/// The four phases run in order, progress reaches completed, and the
/// overview row ends in the completed status.
#[tokio::test]
async fn test_initial_sync_runs_all_phases() {
    let server = MockServer::start().await;
    mount_happy_mocks(&server).await;

    let ctx = context(&server);
    let progress = run_initial_sync(&ctx).await.unwrap();

    assert_eq!(progress.step, Some(InitialSyncStep::Completed));
    assert_eq!(progress.organizations, Some(1));
    assert_eq!(progress.repositories, Some(1));
    assert_eq!(progress.webhooks_installed, Some(1));
    assert_eq!(progress.pull_requests, Some(1));
    assert!(progress.errors.is_empty());

    let overview = ctx
        .tracker
        .load(&ctx.user_id, &SyncResource::global(ResourceKind::Overview))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(overview.status, SyncStatus::Completed);

    // The published progress record is observable on the overview cursor.
    let cursor: InitialSyncProgress =
        serde_json::from_value(overview.cursor.unwrap()).unwrap();
    assert_eq!(cursor.step, Some(InitialSyncStep::Completed));
}

/// Re-running after completion is cheap: phases 1-2 come back 304 and no
/// rows are duplicated.
#[tokio::test]
async fn test_rerun_uses_etags_and_stays_convergent() {
    let server = MockServer::start().await;
    mount_happy_mocks(&server).await;
    // Conditional requests short-circuit on the stored ETags.
    for (p, etag) in [
        ("/user/orgs", "\"orgs-1\""),
        ("/user/repos", "\"repos-1\""),
        ("/repos/octocat/mirror/pulls", "\"pulls-1\""),
    ] {
        Mock::given(method("GET"))
            .and(path(p))
            .and(header("if-none-match", etag))
            .respond_with(ResponseTemplate::new(304))
            // Must outrank the unconditional 200 mocks mounted above.
            .with_priority(1)
            .mount(&server)
            .await;
    }

    let ctx = context(&server);
    run_initial_sync(&ctx).await.unwrap();
    let progress = run_initial_sync(&ctx).await.unwrap();

    assert_eq!(progress.step, Some(InitialSyncStep::Completed));
    assert!(progress.errors.is_empty());
    // 304s apply nothing, and nothing was duplicated.
    assert_eq!(progress.repositories, Some(0));
    assert_eq!(
        ctx.store.query_kind(EntityKind::Repository).await.unwrap().len(),
        1
    );
    assert_eq!(
        ctx.store.query_kind(EntityKind::PullRequest).await.unwrap().len(),
        1
    );
}

/// A failing later phase records an error but does not undo earlier
/// phases, and the sync still reaches completed.
#[tokio::test]
async fn test_later_phase_failure_does_not_undo_earlier_phases() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/orgs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(org_json()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repos_json()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octocat/mirror/hooks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": 77 })))
        .mount(&server)
        .await;
    // Phase 4 blows up.
    Mock::given(method("GET"))
        .and(path("/repos/octocat/mirror/pulls"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let ctx = context(&server);
    let progress = run_initial_sync(&ctx).await.unwrap();

    assert_eq!(progress.step, Some(InitialSyncStep::Completed));
    assert_eq!(progress.organizations, Some(1));
    assert_eq!(progress.repositories, Some(1));

    // Earlier phases' data survives.
    assert_eq!(
        ctx.store.query_kind(EntityKind::Repository).await.unwrap().len(),
        1
    );

    // The per-repo failure is recorded on that repo's own sync-state.
    let pulls = ctx
        .tracker
        .load(
            &ctx.user_id,
            &SyncResource::scoped(ResourceKind::PullRequests, "octocat/mirror"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pulls.status, SyncStatus::Error);
}

/// With the token stamped auth_invalid, the initial sync refuses to start.
#[tokio::test]
async fn test_auth_invalid_blocks_initial_sync() {
    let server = MockServer::start().await;
    let ctx = context(&server);

    ctx.tracker
        .mark_auth_invalid(
            &ctx.user_id,
            &SyncResource::global(ResourceKind::Token),
            "Bad credentials",
            chrono::Utc::now(),
        )
        .await
        .unwrap();

    let result = run_initial_sync(&ctx).await;
    assert!(matches!(result, Err(SyncError::AuthInvalid)));
    assert!(server.received_requests().await.unwrap().is_empty());
}
