//! Tests for queue item construction and lifecycle predicates.

use super::*;
use chrono::{Duration, Utc};

fn sample_new_item(delivery: &str) -> NewQueueItem {
    NewQueueItem {
        delivery_id: delivery.to_string(),
        event: "pull_request".to_string(),
        action: Some("opened".to_string()),
        payload: serde_json::json!({"number": 7}),
        max_attempts: 5,
    }
}

mod into_item_tests {
    use super::*;

    /// A freshly built item is pending, immediately due, and untouched.
    #[test]
    fn test_new_item_starts_pending_and_due() {
        let now = Utc::now();
        let item = sample_new_item("d-1").into_item(now);

        assert_eq!(item.status, QueueItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.max_attempts, 5);
        assert_eq!(item.next_retry_at, now);
        assert!(item.is_due(now));
        assert!(item.last_error.is_none());
        assert!(item.processed_at.is_none());
        assert!(item.failed_at.is_none());
        assert!(item.lease.is_none());
    }

    /// Two items built from the same input get distinct IDs.
    #[test]
    fn test_item_ids_are_unique() {
        let now = Utc::now();
        let a = sample_new_item("d-1").into_item(now);
        let b = sample_new_item("d-1").into_item(now);
        assert_ne!(a.id, b.id);
    }
}

mod is_due_tests {
    use super::*;

    /// An item scheduled for the future is not due.
    #[test]
    fn test_future_retry_is_not_due() {
        let now = Utc::now();
        let mut item = sample_new_item("d-1").into_item(now);
        item.next_retry_at = now + Duration::seconds(30);

        assert!(!item.is_due(now));
        assert!(item.is_due(now + Duration::seconds(31)));
    }

    /// Only pending items are due, regardless of schedule.
    #[test]
    fn test_non_pending_items_are_never_due() {
        let now = Utc::now();
        let mut item = sample_new_item("d-1").into_item(now);
        item.status = QueueItemStatus::Processed;
        assert!(!item.is_due(now));

        item.status = QueueItemStatus::DeadLetter;
        assert!(!item.is_due(now));
    }
}

mod is_retrying_tests {
    use super::*;

    /// A pending item with at least one attempt counts as retrying.
    #[test]
    fn test_pending_with_attempts_is_retrying() {
        let now = Utc::now();
        let mut item = sample_new_item("d-1").into_item(now);
        assert!(!item.is_retrying());

        item.attempts = 1;
        assert!(item.is_retrying());
    }
}

mod lease_expired_tests {
    use super::*;

    /// Leases expire strictly past the horizon, and only on processing items.
    #[test]
    fn test_lease_expiry_respects_horizon_and_status() {
        let now = Utc::now();
        let horizon = Duration::minutes(5);
        let mut item = sample_new_item("d-1").into_item(now);

        item.status = QueueItemStatus::Processing;
        item.lease = Some(Lease {
            worker_id: "w-1".to_string(),
            leased_at: now - Duration::minutes(6),
        });
        assert!(item.lease_expired(horizon, now));

        item.lease = Some(Lease {
            worker_id: "w-1".to_string(),
            leased_at: now - Duration::minutes(4),
        });
        assert!(!item.lease_expired(horizon, now));

        item.status = QueueItemStatus::Pending;
        assert!(!item.lease_expired(horizon, now));
    }
}

mod id_parsing_tests {
    use super::*;

    /// Queue item IDs round-trip through their string form.
    #[test]
    fn test_id_display_round_trip() {
        let id = QueueItemId::new();
        let parsed: QueueItemId = id.to_string().parse().expect("valid ULID");
        assert_eq!(id, parsed);
    }
}
