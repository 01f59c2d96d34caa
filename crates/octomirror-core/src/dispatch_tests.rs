//! Tests for event dispatch: routing, convergence with the pull path,
//! and end-to-end queue processing.

use super::*;
use crate::entities::{IssueRow, PrCommentKind, PrCommentRow, PullRequestRow, RepositoryRow};
use crate::store::MemoryStore;
use octomirror_queue::{
    MemoryQueueStore, NewQueueItem, ProcessorConfig, QueueItemStatus, QueueProcessor, QueueStore,
};

fn dispatcher(store: Arc<MemoryStore>) -> EventDispatcher {
    EventDispatcher::new(store, UserId::new("u-1").unwrap())
}

fn repo_payload() -> serde_json::Value {
    serde_json::json!({
        "id": 500,
        "name": "mirror",
        "full_name": "octocat/mirror",
        "owner": { "id": 7, "login": "octocat", "type": "User" },
        "private": false,
        "default_branch": "main",
        "stargazers_count": 12,
    })
}

fn pull_request_event(number: u64) -> serde_json::Value {
    serde_json::json!({
        "action": "opened",
        "repository": repo_payload(),
        "sender": { "login": "octocat" },
        "pull_request": {
            "id": 9000 + number,
            "number": number,
            "title": format!("PR #{}", number),
            "state": "open",
            "head": { "ref": "feature", "sha": "abc" },
            "base": { "ref": "main", "sha": "def" },
            "user": { "id": 7, "login": "octocat" },
        },
    })
}

// ============================================================================
// Routing
// ============================================================================

mod routing_tests {
    use super::*;

    /// pull_request events mirror the repo, the PR, and a lifecycle event.
    #[tokio::test]
    async fn test_pull_request_event_applies_pr() {
        let store = Arc::new(MemoryStore::new());
        let payload = pull_request_event(7);

        let outcome = dispatcher(store.clone())
            .dispatch("pull_request", Some("opened"), &payload, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Applied);

        let repo = store
            .find_by_github_id(EntityKind::Repository, 500)
            .await
            .unwrap()
            .expect("repository mirrored");
        let pr = store
            .find_by_github_id(EntityKind::PullRequest, 9007)
            .await
            .unwrap()
            .expect("pull request mirrored");

        let pr_row: PullRequestRow = pr.decode().unwrap();
        assert_eq!(pr_row.number, 7);

        // Linked to the right repository.
        let linked = store.links_from(&pr.id, "repository").await.unwrap();
        assert_eq!(linked, vec![repo.id]);
    }

    /// star events refresh repository counters.
    #[tokio::test]
    async fn test_star_event_updates_repo() {
        let store = Arc::new(MemoryStore::new());
        let mut payload = serde_json::json!({ "repository": repo_payload() });
        payload["repository"]["stargazers_count"] = serde_json::json!(99);

        dispatcher(store.clone())
            .dispatch("star", Some("created"), &payload, Utc::now())
            .await
            .unwrap();

        let repo: RepositoryRow = store
            .find_by_github_id(EntityKind::Repository, 500)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(repo.star_count, 99);
    }

    /// issue_comment on a plain issue lands as an issue comment.
    #[tokio::test]
    async fn test_issue_comment_routes_to_issue() {
        let store = Arc::new(MemoryStore::new());
        let payload = serde_json::json!({
            "action": "created",
            "repository": repo_payload(),
            "issue": {
                "id": 600,
                "number": 3,
                "title": "Bug report",
                "state": "open",
                "user": { "id": 7, "login": "octocat" },
            },
            "comment": {
                "id": 700,
                "body": "me too",
                "user": { "id": 8, "login": "hubber" },
            },
        });

        dispatcher(store.clone())
            .dispatch("issue_comment", Some("created"), &payload, Utc::now())
            .await
            .unwrap();

        let issue = store
            .find_by_github_id(EntityKind::Issue, 600)
            .await
            .unwrap()
            .expect("issue mirrored");
        let issue_row: IssueRow = issue.decode().unwrap();
        assert_eq!(issue_row.number, 3);

        assert!(store
            .find_by_github_id(EntityKind::IssueComment, 700)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_github_id(EntityKind::PrComment, 700)
            .await
            .unwrap()
            .is_none());
    }

    /// issue_comment with a pull_request marker lands as a PR comment.
    #[tokio::test]
    async fn test_issue_comment_routes_to_pr_when_marked() {
        let store = Arc::new(MemoryStore::new());

        // Mirror the PR first, as a webhook for it would have.
        dispatcher(store.clone())
            .dispatch("pull_request", Some("opened"), &pull_request_event(3), Utc::now())
            .await
            .unwrap();

        let payload = serde_json::json!({
            "action": "created",
            "repository": repo_payload(),
            "issue": {
                "id": 601,
                "number": 3,
                "title": "PR #3",
                "state": "open",
                "pull_request": { "url": "https://api.github.com/..." },
            },
            "comment": {
                "id": 701,
                "body": "nice change",
                "user": { "id": 8, "login": "hubber" },
            },
        });

        dispatcher(store.clone())
            .dispatch("issue_comment", Some("created"), &payload, Utc::now())
            .await
            .unwrap();

        let comment = store
            .find_by_github_id(EntityKind::PrComment, 701)
            .await
            .unwrap()
            .expect("stored as PR comment");
        let row: PrCommentRow = comment.decode().unwrap();
        assert_eq!(row.kind, PrCommentKind::Issue);

        // Linked to the mirrored PR.
        let pr = store
            .find_by_github_id(EntityKind::PullRequest, 9003)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.links_from(&comment.id, "pull_request").await.unwrap(),
            vec![pr.id]
        );
    }

    /// push events mirror branch commits.
    #[tokio::test]
    async fn test_push_event_applies_commits() {
        let store = Arc::new(MemoryStore::new());
        let payload = serde_json::json!({
            "ref": "refs/heads/main",
            "repository": repo_payload(),
            "commits": [
                {
                    "id": "c0ffee",
                    "message": "tighten bolts",
                    "timestamp": "2026-07-01T10:00:00Z",
                    "author": { "name": "octocat" },
                },
            ],
        });

        dispatcher(store.clone())
            .dispatch("push", None, &payload, Utc::now())
            .await
            .unwrap();

        let commits = store.query_kind(EntityKind::Commit).await.unwrap();
        assert_eq!(commits.len(), 1);
        let row: crate::entities::CommitRow = commits[0].decode().unwrap();
        assert_eq!(row.sha, "c0ffee");
        assert_eq!(row.ref_name, "main");
        assert_eq!(row.author.as_deref(), Some("octocat"));
    }

    /// Unknown events are ignored without error.
    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let outcome = dispatcher(store)
            .dispatch("workflow_job", Some("queued"), &serde_json::json!({}), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Ignored);
    }

    /// Applying the same payload twice converges on identical rows.
    #[tokio::test]
    async fn test_dispatch_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let payload = pull_request_event(7);
        let d = dispatcher(store.clone());

        d.dispatch("pull_request", Some("opened"), &payload, Utc::now())
            .await
            .unwrap();
        d.dispatch("pull_request", Some("opened"), &payload, Utc::now())
            .await
            .unwrap();

        assert_eq!(store.query_kind(EntityKind::PullRequest).await.unwrap().len(), 1);
        assert_eq!(store.query_kind(EntityKind::Repository).await.unwrap().len(), 1);
        // The synthetic lifecycle event dedups too.
        assert_eq!(store.query_kind(EntityKind::PrEvent).await.unwrap().len(), 1);
    }
}

// ============================================================================
// Queue integration
// ============================================================================

mod handler_tests {
    use super::*;
    use crate::webhook::{DeliveryStatus, WebhookDeliveryRow};
    use crate::store::EntityRecord;

    async fn seed_delivery(store: &MemoryStore, delivery_id: &str) {
        let row = WebhookDeliveryRow {
            delivery_id: delivery_id.to_string(),
            event: "pull_request".to_string(),
            status: DeliveryStatus::Received,
            received_at: Utc::now(),
            processed_at: None,
            error: None,
        };
        let record = EntityRecord::new(
            crate::EntityId::delivery(delivery_id),
            EntityKind::WebhookDelivery,
            &row,
            Utc::now(),
        )
        .unwrap()
        .with_natural_key(delivery_id.to_string());
        store.upsert(record, Vec::new()).await.unwrap();
    }

    /// Webhook happy path end to end: enqueue, process, PR row exists,
    /// item processed, delivery record processed.
    #[tokio::test]
    async fn test_queue_to_store_happy_path() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueueStore::new());
        seed_delivery(&store, "d-1").await;

        queue
            .enqueue(NewQueueItem {
                delivery_id: "d-1".to_string(),
                event: "pull_request".to_string(),
                action: Some("opened".to_string()),
                payload: pull_request_event(7),
                max_attempts: 5,
            })
            .await
            .unwrap();

        let handler = Arc::new(DispatchingHandler::new(
            dispatcher(store.clone()),
            store.clone(),
        ));
        let processor = QueueProcessor::new(queue.clone(), handler, ProcessorConfig::default());
        let stats = processor.process_once(Utc::now()).await.unwrap();
        assert_eq!(stats.processed, 1);

        // The PR is mirrored.
        assert!(store
            .find_by_github_id(EntityKind::PullRequest, 9007)
            .await
            .unwrap()
            .is_some());

        // The queue item is processed.
        let item = queue.find_by_delivery("d-1").await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Processed);

        // The delivery ledger agrees.
        let delivery: WebhookDeliveryRow = store
            .get(&crate::EntityId::delivery("d-1"))
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Processed);
    }

    /// A payload with a missing required field fails permanently: the item
    /// dead-letters and the delivery records the error.
    #[tokio::test]
    async fn test_permanent_failure_dead_letters() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueueStore::new());
        seed_delivery(&store, "d-2").await;

        queue
            .enqueue(NewQueueItem {
                delivery_id: "d-2".to_string(),
                event: "pull_request".to_string(),
                action: Some("opened".to_string()),
                // No repository field.
                payload: serde_json::json!({ "action": "opened" }),
                max_attempts: 5,
            })
            .await
            .unwrap();

        let handler = Arc::new(DispatchingHandler::new(
            dispatcher(store.clone()),
            store.clone(),
        ));
        let processor = QueueProcessor::new(queue.clone(), handler, ProcessorConfig::default());
        let stats = processor.process_once(Utc::now()).await.unwrap();
        assert_eq!(stats.dead_lettered, 1);

        let item = queue.find_by_delivery("d-2").await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::DeadLetter);

        let delivery: WebhookDeliveryRow = store
            .get(&crate::EntityId::delivery("d-2"))
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert!(delivery.error.is_some());
    }
}
