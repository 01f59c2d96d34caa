//! Tests for the queue processor's retry, dead-letter, and backoff behavior.

use super::*;
use crate::item::{NewQueueItem, QueueItemId};
use crate::memory::MemoryQueueStore;
use crate::store::EnqueueOutcome;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// Helpers
// ============================================================================

/// Handler whose scripted responses are consumed one per call; the last
/// response repeats once the script runs dry.
struct ScriptedHandler {
    script: Mutex<Vec<Result<(), HandlerError>>>,
    calls: AtomicUsize,
}

impl ScriptedHandler {
    fn new(script: Vec<Result<(), HandlerError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueHandler for ScriptedHandler {
    async fn handle(&self, _item: &QueueItem) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        }
    }
}

fn test_config() -> ProcessorConfig {
    ProcessorConfig {
        worker_id: "test-worker".to_string(),
        batch_size: 10,
        base_delay: std::time::Duration::from_secs(2),
        max_delay: std::time::Duration::from_secs(300),
        ..ProcessorConfig::default()
    }
}

async fn enqueue(store: &MemoryQueueStore, delivery: &str, max_attempts: u32) -> QueueItemId {
    let outcome = store
        .enqueue(NewQueueItem {
            delivery_id: delivery.to_string(),
            event: "pull_request".to_string(),
            action: Some("opened".to_string()),
            payload: serde_json::json!({"number": 3}),
            max_attempts,
        })
        .await
        .unwrap();
    match outcome {
        EnqueueOutcome::Enqueued(id) => id,
        EnqueueOutcome::Duplicate(id) => id,
    }
}

// ============================================================================
// process_once tests
// ============================================================================

mod process_once_tests {
    use super::*;

    /// A successful handler run marks the item processed.
    #[tokio::test]
    async fn test_success_marks_processed() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler = ScriptedHandler::new(vec![Ok(())]);
        let id = enqueue(&store, "d-1", 5).await;

        let processor = QueueProcessor::new(store.clone(), handler.clone(), test_config());
        let stats = processor.process_once(Utc::now()).await.unwrap();

        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(handler.calls(), 1);

        let item = store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Processed);
    }

    /// A retryable failure reschedules the item with a future retry time.
    #[tokio::test]
    async fn test_retryable_failure_schedules_retry() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler = ScriptedHandler::new(vec![Err(HandlerError::retryable("503 from GitHub"))]);
        let id = enqueue(&store, "d-1", 5).await;

        let processor = QueueProcessor::new(store.clone(), handler, test_config());
        let now = Utc::now();
        let stats = processor.process_once(now).await.unwrap();

        assert_eq!(stats.retried, 1);
        assert_eq!(stats.dead_lettered, 0);

        let item = store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Pending);
        assert_eq!(item.attempts, 1);
        assert!(item.next_retry_at > now);
        assert_eq!(item.last_error.as_deref(), Some("503 from GitHub"));
    }

    /// An item reaches dead_letter only once attempts hit max_attempts;
    /// before that every failure returns it to pending.
    #[tokio::test]
    async fn test_dead_letter_only_after_max_attempts() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler = ScriptedHandler::new(vec![Err(HandlerError::retryable("boom"))]);
        let id = enqueue(&store, "d-1", 3).await;

        let processor = QueueProcessor::new(store.clone(), handler, test_config());

        // Drive each retry by advancing past the scheduled time.
        let mut now = Utc::now();
        for expected_attempts in 1..3u32 {
            let stats = processor.process_once(now).await.unwrap();
            assert_eq!(stats.retried, 1, "attempt {}", expected_attempts);

            let item = store.get(&id).await.unwrap().unwrap();
            assert_eq!(item.status, QueueItemStatus::Pending);
            assert_eq!(item.attempts, expected_attempts);
            now = item.next_retry_at + Duration::seconds(1);
        }

        let stats = processor.process_once(now).await.unwrap();
        assert_eq!(stats.dead_lettered, 1);

        let item = store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::DeadLetter);
        assert!(item.attempts >= item.max_attempts);
        assert!(item.failed_at.is_some());
    }

    /// A permanent failure dead-letters without burning the retry budget.
    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler =
            ScriptedHandler::new(vec![Err(HandlerError::permanent("malformed payload"))]);
        let id = enqueue(&store, "d-1", 5).await;

        let processor = QueueProcessor::new(store.clone(), handler.clone(), test_config());
        let stats = processor.process_once(Utc::now()).await.unwrap();

        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(handler.calls(), 1);

        let item = store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::DeadLetter);
        assert!(item.attempts >= item.max_attempts);
    }

    /// A failure then success sequence ends processed.
    #[tokio::test]
    async fn test_retry_then_success() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler = ScriptedHandler::new(vec![
            Err(HandlerError::retryable("first attempt fails")),
            Ok(()),
        ]);
        let id = enqueue(&store, "d-1", 5).await;

        let processor = QueueProcessor::new(store.clone(), handler, test_config());
        let now = Utc::now();
        processor.process_once(now).await.unwrap();

        let retry_at = store.get(&id).await.unwrap().unwrap().next_retry_at;
        let stats = processor
            .process_once(retry_at + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stats.processed, 1);

        let item = store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Processed);
    }
}

// ============================================================================
// backoff_delay tests
// ============================================================================

mod backoff_tests {
    use super::*;

    /// Backoff grows with the attempt number until it reaches the cap.
    #[test]
    fn test_backoff_grows_and_caps() {
        let config = test_config();

        let d1 = backoff_delay(&config, 1);
        let d3 = backoff_delay(&config, 3);
        let d20 = backoff_delay(&config, 20);

        assert!(d1 < d3, "delay must grow: {:?} vs {:?}", d1, d3);
        assert!(d20 <= config.max_delay, "delay must be capped");
        // Even with jitter the first retry stays within [0.75x, 1.25x] of 2*base.
        let base = config.base_delay.as_millis() as f64;
        let d1_ms = d1.as_millis() as f64;
        assert!(d1_ms >= base * 2.0 * 0.75 && d1_ms <= base * 2.0 * 1.25);
    }

    /// Jitter is deterministic per attempt number.
    #[test]
    fn test_backoff_is_deterministic() {
        let config = test_config();
        assert_eq!(backoff_delay(&config, 2), backoff_delay(&config, 2));
    }
}

// ============================================================================
// Lease reclaim integration
// ============================================================================

mod lease_reclaim_tests {
    use super::*;

    /// A pass reclaims abandoned leases before claiming, so a crashed
    /// worker's item gets reprocessed.
    #[tokio::test]
    async fn test_abandoned_lease_is_reprocessed() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler = ScriptedHandler::new(vec![Ok(())]);
        let id = enqueue(&store, "d-1", 5).await;

        // Simulate another worker claiming and then crashing.
        let claim_time = Utc::now() - Duration::minutes(10);
        store.claim_due("crashed-worker", 1, claim_time).await.unwrap();

        let processor = QueueProcessor::new(store.clone(), handler, test_config());
        let stats = processor.process_once(Utc::now()).await.unwrap();

        assert_eq!(stats.leases_reclaimed, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            QueueItemStatus::Processed
        );
    }
}

// ============================================================================
// Cleanup integration
// ============================================================================

mod cleanup_tests {
    use super::*;

    /// cleanup_once applies the configured retention windows.
    #[tokio::test]
    async fn test_cleanup_once_uses_retention_windows() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler = ScriptedHandler::new(vec![Ok(())]);
        let id = enqueue(&store, "d-1", 5).await;

        let old = Utc::now() - Duration::hours(48);
        store.claim_due("w", 1, old).await.unwrap();
        store.mark_processed(&id, old).await.unwrap();

        let processor = QueueProcessor::new(store.clone(), handler, test_config());
        let stats = processor.cleanup_once(Utc::now()).await.unwrap();

        assert_eq!(stats.processed_deleted, 1);
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
