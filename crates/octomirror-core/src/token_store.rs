//! Token storage bridged through the sync-state machine.
//!
//! The OAuth access token lives in the `last_etag` column of the
//! `github:token` sync-state row, a quirk inherited from the original
//! schema and preserved because it makes token lookup and invalidation one
//! row: a 401 flips `sync_status` on exactly the row the next lookup
//! reads.

use crate::store::EntityStore;
use crate::sync_state::{ResourceKind, SyncResource, SyncStatus, SyncTracker};
use crate::UserId;
use async_trait::async_trait;
use chrono::Utc;
use octomirror_github::auth::{AccessToken, TokenStore};
use octomirror_github::error::AuthError;
use std::sync::Arc;

#[cfg(test)]
#[path = "token_store_tests.rs"]
mod tests;

/// [`TokenStore`] implementation over the `github:token` sync-state row
#[derive(Clone)]
pub struct SyncStateTokenStore {
    tracker: SyncTracker,
}

impl SyncStateTokenStore {
    /// Create a token store over the entity store
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            tracker: SyncTracker::new(store),
        }
    }

    fn resource() -> SyncResource {
        SyncResource::global(ResourceKind::Token)
    }

    fn parse_user(user_id: &str) -> Result<UserId, AuthError> {
        UserId::new(user_id).map_err(|e| AuthError::Storage {
            message: format!("invalid user id: {}", e),
        })
    }
}

#[async_trait]
impl TokenStore for SyncStateTokenStore {
    async fn load(&self, user_id: &str) -> Result<AccessToken, AuthError> {
        let user = Self::parse_user(user_id)?;
        let row = self
            .tracker
            .load(&user, &Self::resource())
            .await
            .map_err(|e| AuthError::Storage {
                message: e.to_string(),
            })?;

        match row {
            Some(row) if row.status == SyncStatus::AuthInvalid => {
                Err(AuthError::TokenInvalid {
                    user_id: user_id.to_string(),
                })
            }
            Some(row) => match row.last_etag {
                Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
                _ => Err(AuthError::TokenMissing {
                    user_id: user_id.to_string(),
                }),
            },
            None => Err(AuthError::TokenMissing {
                user_id: user_id.to_string(),
            }),
        }
    }

    async fn save(&self, user_id: &str, token: &AccessToken) -> Result<(), AuthError> {
        let user = Self::parse_user(user_id)?;
        let now = Utc::now();
        let resource = Self::resource();

        let mut row = self
            .tracker
            .load(&user, &resource)
            .await
            .map_err(|e| AuthError::Storage {
                message: e.to_string(),
            })?
            .unwrap_or_else(|| crate::sync_state::SyncStateRow {
                user_id: user.to_string(),
                resource_type: ResourceKind::Token.as_str().to_string(),
                resource_id: None,
                status: SyncStatus::Idle,
                last_synced_at: None,
                last_etag: None,
                sync_error: None,
                rate_limit_remaining: None,
                rate_limit_reset: None,
                cursor: None,
            });

        row.status = SyncStatus::Idle;
        row.last_etag = Some(token.reveal().to_string());
        row.sync_error = None;
        row.last_synced_at = Some(now);

        self.tracker
            .save(&user, &resource, &row, now)
            .await
            .map_err(|e| AuthError::Storage {
                message: e.to_string(),
            })
    }

    async fn invalidate(&self, user_id: &str, reason: &str) -> Result<(), AuthError> {
        let user = Self::parse_user(user_id)?;
        let resource = Self::resource();
        self.tracker
            .mark_auth_invalid(&user, &resource, reason, Utc::now())
            .await
            .map_err(|e| AuthError::Storage {
                message: e.to_string(),
            })
    }
}
