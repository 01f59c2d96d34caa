//! Installation token exchange and caching.
//!
//! An App JWT is exchanged at
//! `POST /app/installations/{installation_id}/access_tokens` for an
//! installation-scoped token with an expiry (about an hour). Tokens are
//! cached in-process per installation and refreshed once they come within a
//! safety margin of expiring.

use crate::auth::jwt::AppAuthenticator;
use crate::error::{ApiError, AuthError};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[cfg(test)]
#[path = "installation_tests.rs"]
mod tests;

/// Refresh tokens this long before they actually expire
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// An installation-scoped token with its expiry
#[derive(Clone)]
pub struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl InstallationToken {
    /// Get the token value for a Bearer header
    pub fn reveal(&self) -> &str {
        &self.token
    }

    /// Get when this token expires
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check whether the token is within the refresh margin of expiry
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::minutes(EXPIRY_MARGIN_MINUTES) >= self.expires_at
    }
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// In-process cache of installation tokens keyed by installation ID
pub struct InstallationTokenCache {
    authenticator: Arc<dyn AppAuthenticator>,
    http: reqwest::Client,
    api_url: String,
    tokens: Mutex<HashMap<u64, InstallationToken>>,
}

impl InstallationTokenCache {
    /// Create a cache that exchanges JWTs at the given API base URL
    pub fn new(
        authenticator: Arc<dyn AppAuthenticator>,
        http: reqwest::Client,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            authenticator,
            http,
            api_url: api_url.into(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Get a valid token for an installation, exchanging a fresh one when
    /// the cached token is absent or near expiry
    pub async fn token(&self, installation_id: u64) -> Result<InstallationToken, AuthError> {
        let now = Utc::now();

        // Holding the lock across the exchange serializes refreshes per
        // process, which keeps GitHub from seeing a thundering herd.
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(&installation_id) {
            if !cached.needs_refresh(now) {
                return Ok(cached.clone());
            }
        }

        let fresh = self.exchange(installation_id).await?;
        debug!(
            installation_id,
            expires_at = %fresh.expires_at,
            "Minted installation token"
        );
        tokens.insert(installation_id, fresh.clone());
        Ok(fresh)
    }

    /// Drop a cached token (e.g. after GitHub rejects it)
    pub async fn evict(&self, installation_id: u64) {
        self.tokens.lock().await.remove(&installation_id);
    }

    async fn exchange(&self, installation_id: u64) -> Result<InstallationToken, AuthError> {
        let jwt = self.authenticator.app_jwt().await?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt.token())
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::Exchange(Box::new(ApiError::from(e))))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(Box::new(ApiError::GitHub {
                status: status.as_u16(),
                message,
            })));
        }

        let body: TokenExchangeResponse =
            response
                .json()
                .await
                .map_err(|e| AuthError::Exchange(Box::new(ApiError::Malformed {
                    message: e.to_string(),
                })))?;

        Ok(InstallationToken {
            token: body.token,
            expires_at: body.expires_at,
        })
    }
}
