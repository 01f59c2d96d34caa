//! # Octomirror GitHub Client
//!
//! Authenticated, rate-limit-aware access to the GitHub REST API for one
//! user at a time.
//!
//! The crate covers the three concerns every ingestion path shares:
//!
//! - **Auth** ([`auth`]): the user's OAuth access token (held behind the
//!   [`auth::TokenStore`] seam so revocation is atomic with sync state),
//!   RS256 App JWTs, and cached installation tokens.
//! - **Rate limits** ([`rate_limit`]): every response's
//!   `x-ratelimit-*` headers feed a per-resource tracker; exhausted limits
//!   reject with [`ApiError::RateLimited`] and let the caller decide.
//! - **The client** ([`client`]): typed operations with conditional
//!   requests (ETags), `per_page=100` pagination, and lenient per-element
//!   decoding so a single malformed item never aborts a page.

pub mod auth;
pub mod client;
pub mod error;
pub mod oauth;
pub mod rate_limit;

pub use auth::{AccessToken, TokenStore};
pub use client::{ClientConfig, Conditional, Fetched, GitHubClient};
pub use error::ApiError;
pub use oauth::{OAuthConfig, OAuthExchange};
pub use rate_limit::{parse_rate_limit_headers, RateLimit, RateLimitTracker};
