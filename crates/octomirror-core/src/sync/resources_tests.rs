//! Tests for per-resource syncs: URL parsing, ETag short-circuits,
//! rate-limit recording, and auth propagation.

use super::*;
use crate::store::MemoryStore;
use crate::sync::{SyncConfig, SyncContext, SyncError, SyncOutcome};
use crate::sync_state::SyncStatus;
use crate::UserId;
use chrono::Utc as ChronoUtc;
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

fn repo_json() -> serde_json::Value {
    serde_json::json!({
        "id": 500,
        "name": "mirror",
        "full_name": "octocat/mirror",
        "owner": { "id": 7, "login": "octocat", "type": "User" },
        "private": false,
        "default_branch": "main",
    })
}

fn pr_json(number: u64) -> serde_json::Value {
    serde_json::json!({
        "id": 9000 + number,
        "number": number,
        "title": format!("PR #{}", number),
        "state": "open",
        "head": { "ref": "feature", "sha": "abc" },
        "base": { "ref": "main", "sha": "def" },
        "user": { "id": 7, "login": "octocat" },
    })
}

// ============================================================================
// URL parsing
// ============================================================================

mod parse_repo_url_tests {
    use super::*;

    /// All three accepted forms resolve to (owner, repo).
    #[test]
    fn test_accepted_forms() {
        let expected = Some(("octocat".to_string(), "mirror".to_string()));

        assert_eq!(parse_repo_url("https://github.com/octocat/mirror"), expected);
        assert_eq!(parse_repo_url("github.com/octocat/mirror"), expected);
        assert_eq!(parse_repo_url("octocat/mirror"), expected);
        assert_eq!(parse_repo_url("https://github.com/octocat/mirror.git"), expected);
        assert_eq!(
            parse_repo_url("https://github.com/octocat/mirror/pull/7"),
            expected
        );
        assert_eq!(parse_repo_url("  octocat/mirror  "), expected);
    }

    /// Non-GitHub hosts and malformed references are rejected.
    #[test]
    fn test_rejected_forms() {
        assert_eq!(parse_repo_url("https://gitlab.com/octocat/mirror"), None);
        assert_eq!(parse_repo_url("octocat"), None);
        assert_eq!(parse_repo_url(""), None);
        assert_eq!(parse_repo_url("https://github.com/"), None);
        assert_eq!(parse_repo_url("not a url at all"), None);
    }
}

// ============================================================================
// Pull sync behavior
// ============================================================================

mod sync_repo_pulls_tests {
    use super::*;

    /// A fresh sync applies PRs, stores the ETag, and leaves the resource
    /// idle; the next sync sends If-None-Match and writes nothing on 304.
    #[tokio::test]
    async fn test_etag_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/mirror"))
            .respond_with(ResponseTemplate::new(200).set_body_json(repo_json()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/mirror/pulls"))
            .and(header("if-none-match", "\"etag-1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/mirror/pulls"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"etag-1\"")
                    .set_body_json(serde_json::json!([pr_json(1), pr_json(2)])),
            )
            .mount(&server)
            .await;

        let ctx = context(&server);

        let first = ctx.sync_repo_pulls("octocat", "mirror").await.unwrap();
        assert_eq!(first, SyncOutcome::Synced { applied: 2 });

        let resource = crate::sync_state::SyncResource::scoped(
            crate::sync_state::ResourceKind::PullRequests,
            "octocat/mirror",
        );
        let row = ctx.tracker.load(&ctx.user_id, &resource).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Idle);
        assert_eq!(row.last_etag.as_deref(), Some("\"etag-1\""));

        let second = ctx.sync_repo_pulls("octocat", "mirror").await.unwrap();
        assert_eq!(second, SyncOutcome::Unchanged);
    }

    /// An exhausted rate limit records error plus the rate-limit snapshot
    /// and does not retry by itself.
    #[tokio::test]
    async fn test_rate_limited_sync_records_error() {
        let server = MockServer::start().await;
        let reset = (ChronoUtc::now() + chrono::Duration::seconds(60)).timestamp();
        Mock::given(method("GET"))
            .and(path("/repos/octocat/mirror/pulls"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-limit", "5000")
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                    .set_body_json(serde_json::json!({
                        "message": "API rate limit exceeded",
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server);
        let error = ctx.sync_repo_pulls("octocat", "mirror").await.unwrap_err();
        assert!(matches!(error, SyncError::Api(_)));

        let resource = crate::sync_state::SyncResource::scoped(
            crate::sync_state::ResourceKind::PullRequests,
            "octocat/mirror",
        );
        let row = ctx.tracker.load(&ctx.user_id, &resource).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Error);
        assert_eq!(row.rate_limit_remaining, Some(0));
        assert!(row.sync_error.is_some());
    }

    /// A 401 stamps the token auth_invalid, and subsequent syncs bail out
    /// before calling GitHub.
    #[tokio::test]
    async fn test_auth_error_propagates_and_gates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/mirror/pulls"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "message": "Bad credentials" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server);

        let error = ctx.sync_repo_pulls("octocat", "mirror").await.unwrap_err();
        assert!(matches!(error, SyncError::AuthInvalid));
        assert!(ctx.tracker.is_auth_invalid(&ctx.user_id).await.unwrap());

        // Gated: the single expected request above is not repeated.
        let again = ctx.sync_repo_pulls("octocat", "mirror").await.unwrap_err();
        assert!(matches!(again, SyncError::AuthInvalid));
    }
}

// ============================================================================
// Tree sync behavior
// ============================================================================

mod sync_tree_tests {
    use super::*;
    use crate::applier::build_tree_entry_id;
    use crate::store::{EntityKind, EntityStore};

    fn tree_body(paths: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "truncated": false,
            "tree": paths
                .iter()
                .map(|p| serde_json::json!({ "path": p, "type": "blob", "sha": format!("sha-{}", p) }))
                .collect::<Vec<_>>(),
        })
    }

    /// Tree syncs reap vanished paths across runs (end-to-end S6).
    #[tokio::test]
    async fn test_tree_sync_reaps_stale_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/mirror"))
            .respond_with(ResponseTemplate::new(200).set_body_json(repo_json()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/mirror/git/trees/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tree_body(&["a.ts", "b.ts"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/mirror/git/trees/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tree_body(&["a.ts", "c.ts"])))
            .mount(&server)
            .await;

        let ctx = context(&server);

        let first = ctx.sync_tree("octocat", "mirror", None).await.unwrap();
        assert_eq!(first, SyncOutcome::Synced { applied: 2 });

        let second = ctx.sync_tree("octocat", "mirror", None).await.unwrap();
        assert_eq!(second, SyncOutcome::Synced { applied: 2 });

        let repo = ctx
            .store
            .find_by_natural_key(EntityKind::Repository, "octocat/mirror")
            .await
            .unwrap()
            .unwrap();
        assert!(ctx
            .store
            .get(&build_tree_entry_id(&repo.id, "main", "b.ts"))
            .await
            .unwrap()
            .is_none());
        assert!(ctx
            .store
            .get(&build_tree_entry_id(&repo.id, "main", "c.ts"))
            .await
            .unwrap()
            .is_some());
    }
}
