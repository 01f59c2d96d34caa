//! Rate limit tracking for GitHub API operations.
//!
//! GitHub reports the caller's quota on every response:
//! `x-ratelimit-limit`, `x-ratelimit-remaining`, `x-ratelimit-reset`
//! (unix seconds), and `x-ratelimit-resource`. The tracker keeps the latest
//! snapshot per resource and rejects requests once a window is exhausted;
//! the orchestrator decides whether to wait or record an error.

use crate::error::ApiError;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;

/// Rate limit snapshot from GitHub response headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    /// Maximum requests allowed in the current window
    pub limit: u32,
    /// Requests remaining in the current window
    pub remaining: u32,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
    /// The resource this limit applies to (e.g. "core", "search", "graphql")
    pub resource: String,
}

impl RateLimit {
    /// Check if the window is exhausted
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Milliseconds until the window resets, zero if already past
    pub fn retry_after_ms(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_milliseconds().max(0) as u64
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

/// Parse rate limit information from GitHub response headers
///
/// Returns `None` when the limit/remaining/reset triple is absent or
/// unparseable; the resource defaults to "core".
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> Option<RateLimit> {
    let limit = header_u64(headers, "x-ratelimit-limit")?;
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset = header_u64(headers, "x-ratelimit-reset")?;

    let reset_at = Utc.timestamp_opt(reset as i64, 0).single()?;
    let resource = headers
        .get("x-ratelimit-resource")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("core")
        .to_string();

    Some(RateLimit {
        limit: limit as u32,
        remaining: remaining as u32,
        reset_at,
        resource,
    })
}

/// Thread-safe rate limit tracker shared by all operations of a client
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    limits: RwLock<HashMap<String, RateLimit>>,
}

impl RateLimitTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the rate limit headers of a response
    pub fn record(&self, headers: &HeaderMap) -> Option<RateLimit> {
        let parsed = parse_rate_limit_headers(headers)?;
        let mut limits = self.limits.write().unwrap_or_else(|e| e.into_inner());
        limits.insert(parsed.resource.clone(), parsed.clone());
        Some(parsed)
    }

    /// Reject with [`ApiError::RateLimited`] when the resource's window is
    /// exhausted and has not yet reset
    ///
    /// Policy is reject rather than wait: the orchestrator owns the decision
    /// of whether to sleep, reschedule, or surface the error.
    pub fn check(&self, resource: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
        let limits = self.limits.read().unwrap_or_else(|e| e.into_inner());
        if let Some(limit) = limits.get(resource) {
            if limit.is_exhausted() && now < limit.reset_at {
                return Err(ApiError::RateLimited {
                    retry_after_ms: limit.retry_after_ms(now),
                    remaining: limit.remaining,
                    reset_at: limit.reset_at,
                });
            }
        }
        Ok(())
    }

    /// Latest snapshot for one resource
    pub fn get(&self, resource: &str) -> Option<RateLimit> {
        let limits = self.limits.read().unwrap_or_else(|e| e.into_inner());
        limits.get(resource).cloned()
    }

    /// Latest snapshots for every resource seen so far
    pub fn snapshot(&self) -> Vec<RateLimit> {
        let limits = self.limits.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<RateLimit> = limits.values().cloned().collect();
        all.sort_by(|a, b| a.resource.cmp(&b.resource));
        all
    }
}
