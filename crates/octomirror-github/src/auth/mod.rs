//! Authentication types and the token-store seam.
//!
//! Two token sources feed the client: the user's OAuth access token, owned
//! by a [`TokenStore`] implementation so lookup and invalidation stay atomic
//! with the token's sync state, and short-lived App installation tokens
//! minted from an RS256 JWT (see [`jwt`] and [`installation`]).

pub mod installation;
pub mod jwt;

use crate::error::AuthError;
use async_trait::async_trait;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

// ============================================================================
// Access Tokens
// ============================================================================

/// OAuth access token for a user
///
/// The token value is zeroized on drop and never appears in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token value
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token value for use in an Authorization header
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AccessToken").field(&"<REDACTED>").finish()
    }
}

/// Storage seam for the per-user OAuth access token
///
/// The store keeps the token alongside its sync state so that a 401 from
/// GitHub can mark the token `auth_invalid` in the same transaction that
/// future lookups consult.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the stored access token for a user
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenMissing`] when no token was ever stored and
    /// [`AuthError::TokenInvalid`] when the stored token has been marked
    /// `auth_invalid`.
    async fn load(&self, user_id: &str) -> Result<AccessToken, AuthError>;

    /// Persist a freshly exchanged access token and reset its sync state
    async fn save(&self, user_id: &str, token: &AccessToken) -> Result<(), AuthError>;

    /// Mark the stored token invalid; future loads fail until the user
    /// reconnects
    async fn invalidate(&self, user_id: &str, reason: &str) -> Result<(), AuthError>;
}

// ============================================================================
// OAuth Scopes
// ============================================================================

/// OAuth scopes the mirror needs to sync and register webhooks
pub const REQUIRED_SCOPES: [&str; 5] =
    ["repo", "read:org", "read:user", "user:email", "admin:repo_hook"];

/// Compute the required scopes missing from an `x-oauth-scopes` header
///
/// The header is the authoritative list of granted scopes; the
/// token-exchange response body is not trusted for this. Comparison
/// tolerates whitespace and treats a granted `repo` as covering nothing
/// else (GitHub scope implication is not modeled beyond exact match).
pub fn missing_scopes(granted_header: &str) -> Vec<&'static str> {
    let granted: Vec<&str> = granted_header
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    REQUIRED_SCOPES
        .iter()
        .copied()
        .filter(|required| !granted.contains(required))
        .collect()
}

/// Validate a granted-scopes header, producing a human-readable error when
/// scopes are missing
pub fn validate_scopes(granted_header: &str) -> Result<(), AuthError> {
    let missing = missing_scopes(granted_header);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AuthError::MissingScopes {
            missing: missing.join(", "),
        })
    }
}
