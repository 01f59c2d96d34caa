//! Tests for token storage through the `github:token` sync-state row.

use super::*;
use crate::store::MemoryStore;
use crate::sync_state::SyncTracker;
use octomirror_github::error::AuthError;

fn setup() -> (Arc<MemoryStore>, SyncStateTokenStore) {
    let store = Arc::new(MemoryStore::new());
    let tokens = SyncStateTokenStore::new(store.clone());
    (store, tokens)
}

/// A saved token loads back, and the value rides in the last_etag slot of
/// the github:token row.
#[tokio::test]
async fn test_save_then_load_round_trips_through_etag_slot() {
    let (store, tokens) = setup();

    tokens
        .save("u-1", &AccessToken::new("gho_secret"))
        .await
        .unwrap();

    let loaded = tokens.load("u-1").await.unwrap();
    assert_eq!(loaded.reveal(), "gho_secret");

    let tracker = SyncTracker::new(store);
    let row = tracker
        .load(
            &UserId::new("u-1").unwrap(),
            &SyncResource::global(ResourceKind::Token),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.last_etag.as_deref(), Some("gho_secret"));
    assert_eq!(row.status, SyncStatus::Idle);
}

/// Loading with no stored token reports TokenMissing.
#[tokio::test]
async fn test_load_without_token_is_missing() {
    let (_, tokens) = setup();
    let result = tokens.load("u-1").await;
    assert!(matches!(result, Err(AuthError::TokenMissing { .. })));
}

/// invalidate flips the row so subsequent loads fail without a GitHub
/// call, until a fresh save reconnects.
#[tokio::test]
async fn test_invalidate_blocks_loads_until_resave() {
    let (store, tokens) = setup();
    tokens
        .save("u-1", &AccessToken::new("gho_old"))
        .await
        .unwrap();

    tokens.invalidate("u-1", "Bad credentials").await.unwrap();

    let result = tokens.load("u-1").await;
    assert!(matches!(result, Err(AuthError::TokenInvalid { .. })));

    let tracker = SyncTracker::new(store);
    assert!(tracker
        .is_auth_invalid(&UserId::new("u-1").unwrap())
        .await
        .unwrap());

    // Reconnecting with a fresh token clears the flag.
    tokens
        .save("u-1", &AccessToken::new("gho_new"))
        .await
        .unwrap();
    assert_eq!(tokens.load("u-1").await.unwrap().reveal(), "gho_new");
}
