//! Tests for the sync-state machine's transitions.

use super::*;
use crate::store::MemoryStore;

fn tracker() -> SyncTracker {
    SyncTracker::new(Arc::new(MemoryStore::new()))
}

fn user() -> UserId {
    UserId::new("u-1").unwrap()
}

fn pulls_resource() -> SyncResource {
    SyncResource::scoped(ResourceKind::PullRequests, "octocat/mirror")
}

mod begin_tests {
    use super::*;

    /// begin creates the row, moves it to syncing, and stamps the time.
    #[tokio::test]
    async fn test_begin_creates_and_marks_syncing() {
        let tracker = tracker();
        let now = Utc::now();

        let outcome = tracker.begin(&user(), &pulls_resource(), now).await.unwrap();
        let BeginOutcome::Started(row) = outcome else {
            panic!("expected Started");
        };
        assert_eq!(row.status, SyncStatus::Syncing);
        assert_eq!(row.last_synced_at, Some(now));

        let stored = tracker.load(&user(), &pulls_resource()).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Syncing);
    }

    /// Re-entering a syncing resource is an idempotent no-op.
    #[tokio::test]
    async fn test_begin_is_idempotent_while_syncing() {
        let tracker = tracker();
        tracker.begin(&user(), &pulls_resource(), Utc::now()).await.unwrap();

        let second = tracker.begin(&user(), &pulls_resource(), Utc::now()).await.unwrap();
        assert!(matches!(second, BeginOutcome::AlreadyRunning));
    }
}

mod transition_tests {
    use super::*;

    /// complete returns to idle, persisting the ETag.
    #[tokio::test]
    async fn test_complete_persists_etag() {
        let tracker = tracker();
        let now = Utc::now();
        tracker.begin(&user(), &pulls_resource(), now).await.unwrap();
        tracker
            .complete(&user(), &pulls_resource(), Some("\"etag-9\"".to_string()), None, now)
            .await
            .unwrap();

        let row = tracker.load(&user(), &pulls_resource()).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Idle);
        assert_eq!(row.last_etag.as_deref(), Some("\"etag-9\""));
        assert!(row.sync_error.is_none());
    }

    /// fail records the error string and keeps the prior ETag.
    #[tokio::test]
    async fn test_fail_records_error() {
        let tracker = tracker();
        let now = Utc::now();
        tracker.begin(&user(), &pulls_resource(), now).await.unwrap();
        tracker
            .complete(&user(), &pulls_resource(), Some("\"e\"".to_string()), None, now)
            .await
            .unwrap();

        tracker.begin(&user(), &pulls_resource(), now).await.unwrap();
        tracker
            .fail(&user(), &pulls_resource(), "rate limited", None, now)
            .await
            .unwrap();

        let row = tracker.load(&user(), &pulls_resource()).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Error);
        assert_eq!(row.sync_error.as_deref(), Some("rate limited"));
        assert_eq!(row.last_etag.as_deref(), Some("\"e\""));
    }

    /// retry only moves error rows back to idle.
    #[tokio::test]
    async fn test_retry_requires_error_state() {
        let tracker = tracker();
        let now = Utc::now();

        // No row yet: nothing to retry.
        assert!(!tracker.retry(&user(), &pulls_resource(), now).await.unwrap());

        tracker.begin(&user(), &pulls_resource(), now).await.unwrap();
        // Syncing is not retryable.
        assert!(!tracker.retry(&user(), &pulls_resource(), now).await.unwrap());

        tracker
            .fail(&user(), &pulls_resource(), "boom", None, now)
            .await
            .unwrap();
        assert!(tracker.retry(&user(), &pulls_resource(), now).await.unwrap());

        let row = tracker.load(&user(), &pulls_resource()).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Idle);
        assert!(row.sync_error.is_none());
    }

    /// reset clears the ETag, error, and timestamps.
    #[tokio::test]
    async fn test_reset_clears_bookkeeping() {
        let tracker = tracker();
        let now = Utc::now();
        tracker.begin(&user(), &pulls_resource(), now).await.unwrap();
        tracker
            .complete(&user(), &pulls_resource(), Some("\"e\"".to_string()), None, now)
            .await
            .unwrap();

        tracker.reset(&user(), &pulls_resource(), now).await.unwrap();

        let row = tracker.load(&user(), &pulls_resource()).await.unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Idle);
        assert!(row.last_etag.is_none());
        assert!(row.last_synced_at.is_none());
        assert!(row.sync_error.is_none());
    }
}

mod auth_tests {
    use super::*;

    /// mark_auth_invalid stamps both the failing resource and the token
    /// row, and is_auth_invalid reads the token row.
    #[tokio::test]
    async fn test_auth_invalid_is_global() {
        let tracker = tracker();
        let now = Utc::now();
        tracker.begin(&user(), &pulls_resource(), now).await.unwrap();

        assert!(!tracker.is_auth_invalid(&user()).await.unwrap());

        tracker
            .mark_auth_invalid(&user(), &pulls_resource(), "Bad credentials", now)
            .await
            .unwrap();

        assert!(tracker.is_auth_invalid(&user()).await.unwrap());

        let resource_row = tracker.load(&user(), &pulls_resource()).await.unwrap().unwrap();
        assert_eq!(resource_row.status, SyncStatus::AuthInvalid);

        let token_row = tracker
            .load(&user(), &SyncResource::global(ResourceKind::Token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token_row.status, SyncStatus::AuthInvalid);
        assert_eq!(token_row.sync_error.as_deref(), Some("Bad credentials"));
    }
}

mod recovery_tests {
    use super::*;

    /// Stale syncing rows flip to error("stale"); fresh ones survive.
    #[tokio::test]
    async fn test_recover_stale_flips_old_syncing_rows() {
        let tracker = tracker();
        let stale_start = Utc::now() - Duration::minutes(10);
        tracker.begin(&user(), &pulls_resource(), stale_start).await.unwrap();

        let fresh_resource = SyncResource::global(ResourceKind::Repositories);
        tracker.begin(&user(), &fresh_resource, Utc::now()).await.unwrap();

        let recovered = tracker
            .recover_stale(Duration::minutes(5), Utc::now())
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let stale_row = tracker.load(&user(), &pulls_resource()).await.unwrap().unwrap();
        assert_eq!(stale_row.status, SyncStatus::Error);
        assert_eq!(stale_row.sync_error.as_deref(), Some("stale"));

        let fresh_row = tracker.load(&user(), &fresh_resource).await.unwrap().unwrap();
        assert_eq!(fresh_row.status, SyncStatus::Syncing);
    }
}

mod uniqueness_tests {
    use super::*;

    /// One row per (user, resource type, resource id): repeated writes
    /// never create a second row.
    #[tokio::test]
    async fn test_at_most_one_row_per_resource() {
        let tracker = tracker();
        let now = Utc::now();
        for _ in 0..3 {
            tracker.begin(&user(), &pulls_resource(), now).await.unwrap();
            tracker
                .complete(&user(), &pulls_resource(), None, None, now)
                .await
                .unwrap();
        }

        let all = tracker.load_all(&user()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    /// reset_all removes every row for the user.
    #[tokio::test]
    async fn test_reset_all_deletes_rows() {
        let tracker = tracker();
        let now = Utc::now();
        tracker.begin(&user(), &pulls_resource(), now).await.unwrap();
        tracker
            .begin(&user(), &SyncResource::global(ResourceKind::Organizations), now)
            .await
            .unwrap();

        let deleted = tracker.reset_all(&user()).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(tracker.load_all(&user()).await.unwrap().is_empty());
    }
}
