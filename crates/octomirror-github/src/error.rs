//! Error types for GitHub API operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error type for all GitHub API operations
///
/// The variants mirror the retry semantics the sync engine needs: transport
/// and 5xx failures are retryable, rate limits are retryable after a delay,
/// auth failures are global and sticky until the user reconnects, and
/// 409/422 are surfaced verbatim to the mutation caller.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {message}")]
    Transport { message: String },

    #[error("Rate limited: {remaining} requests remaining, resets at {reset_at}")]
    RateLimited {
        retry_after_ms: u64,
        remaining: u32,
        reset_at: DateTime<Utc>,
    },

    #[error("Authentication rejected by GitHub ({status}): {message}")]
    AuthInvalid { status: u16, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Merge conflict: {message}")]
    Conflict { message: String },

    #[error("Unprocessable: {message}")]
    Unprocessable { message: String },

    #[error("GitHub returned {status}: {message}")]
    GitHub { status: u16, message: String },

    #[error("Response could not be decoded: {message}")]
    Malformed { message: String },

    #[error("Client configuration error: {message}")]
    Configuration { message: String },
}

impl ApiError {
    /// True iff the response was 401, or 403 with bad credentials
    ///
    /// Auth errors are global for the user: the caller must flip the token's
    /// sync state to `auth_invalid` and stop scheduling pull syncs.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthInvalid { .. })
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::RateLimited { .. } => true,
            Self::GitHub { status, .. } => *status >= 500,
            Self::AuthInvalid { .. } => false,
            Self::NotFound { .. } => false,
            Self::Conflict { .. } => false,
            Self::Unprocessable { .. } => false,
            Self::Malformed { .. } => false,
            Self::Configuration { .. } => false,
        }
    }

    /// Suggested delay before retrying, when one is known
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }
}

/// Error type for authentication and token operations
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No GitHub token stored for user {user_id}")]
    TokenMissing { user_id: String },

    #[error("Stored GitHub token for user {user_id} is marked invalid")]
    TokenInvalid { user_id: String },

    #[error("App private key rejected: {message}")]
    InvalidPrivateKey { message: String },

    #[error("JWT signing failed: {message}")]
    JwtSigningFailed { message: String },

    #[error("Installation token exchange failed: {0}")]
    Exchange(#[from] Box<ApiError>),

    #[error("Missing required OAuth scopes: {missing}")]
    MissingScopes { missing: String },

    #[error("Token storage failed: {message}")]
    Storage { message: String },
}
