//! GitHub API client for authenticated operations.
//!
//! One [`GitHubClient`] exists per `(user, access token)` pair. Every
//! request flows through the same plumbing: a rate-limit check before the
//! call, header capture after it, and status classification into
//! [`ApiError`] variants that carry the retry semantics the sync engine
//! keys off.

mod git;
mod issues;
mod pulls;
mod repos;

use crate::auth::AccessToken;
use crate::error::ApiError;
use crate::rate_limit::{parse_rate_limit_headers, RateLimit, RateLimitTracker};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use git::{RemoteCheckRun, RemoteCommit, RemoteTreeEntry};
pub use issues::RemoteIssue;
pub use pulls::{
    make_suggestion_body, MergeResult, PullRequestDetail, PullRequestRef, RemoteIssueComment,
    RemoteLabel, RemotePrCommit, RemotePrEvent, RemotePrFile, RemotePullRequest, RemoteReview,
    RemoteReviewComment, ReviewEvent, UpdatePullRequest,
};
pub use repos::{RegisterOutcome, RemoteHook, RemoteOrganization, RemoteRepository, RemoteUser};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

/// Page size used for every list endpoint
const PER_PAGE: u32 = 100;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for GitHub API client behavior
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GitHub API base URL
    pub api_url: String,
    /// User agent string (required by GitHub)
    pub user_agent: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            user_agent: "octomirror/0.1.0".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Override the API base URL (tests, GitHub Enterprise)
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Result Shapes
// ============================================================================

/// A decoded response plus the rate-limit snapshot that came with it
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub data: T,
    pub rate_limit: Option<RateLimit>,
    /// ETag of the response, for the next conditional request
    pub etag: Option<String>,
}

/// Outcome of a conditional request made with a prior ETag
#[derive(Debug, Clone)]
pub enum Conditional<T> {
    /// `304 Not Modified`; the caller's cached state is current
    Unchanged { rate_limit: Option<RateLimit> },
    /// Fresh data and the ETag to store for next time
    Modified(Fetched<T>),
}

impl<T> Conditional<T> {
    /// Check whether the resource was unchanged
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged { .. })
    }
}

// ============================================================================
// Client
// ============================================================================

/// GitHub API client bound to one user's access token
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: AccessToken,
    user_id: String,
    config: ClientConfig,
    rate_limits: Arc<RateLimitTracker>,
}

impl GitHubClient {
    /// Create a client for a user's token
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Configuration`] when the HTTP client cannot be
    /// constructed.
    pub fn new(
        user_id: impl Into<String>,
        token: AccessToken,
        config: ClientConfig,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ApiError::Configuration {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            token,
            user_id: user_id.into(),
            config,
            rate_limits: Arc::new(RateLimitTracker::new()),
        })
    }

    /// The user this client acts for
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Share a rate-limit tracker with other clients
    ///
    /// The service injects one tracker per process so the rate-limit
    /// snapshot survives across per-request client instances.
    pub fn with_shared_rate_limits(mut self, tracker: Arc<RateLimitTracker>) -> Self {
        self.rate_limits = tracker;
        self
    }

    /// Shared rate-limit tracker for display in sync state
    pub fn rate_limits(&self) -> &RateLimitTracker {
        &self.rate_limits
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(self.token.reveal())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Send a request, record rate-limit headers, and classify failures
    ///
    /// Returns the response for 2xx and 304; every other status becomes an
    /// [`ApiError`].
    pub(crate) async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        self.rate_limits.check("core", chrono::Utc::now())?;

        let response = builder.send().await?;
        let rate_limit = self.rate_limits.record(response.headers());
        let status = response.status();

        if status.is_success() || status == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(response);
        }

        let message = extract_error_message(response).await;
        Err(classify_status(status.as_u16(), message, rate_limit))
    }

    /// GET a single JSON resource
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Fetched<T>, ApiError> {
        let response = self.send(self.request(reqwest::Method::GET, path)).await?;
        self.decode_response(response).await
    }

    /// GET a single JSON resource with a conditional ETag
    pub(crate) async fn get_json_conditional<T: DeserializeOwned>(
        &self,
        path: &str,
        etag: Option<&str>,
    ) -> Result<Conditional<T>, ApiError> {
        let mut builder = self.request(reqwest::Method::GET, path);
        if let Some(etag) = etag {
            builder = builder.header("If-None-Match", etag);
        }

        let response = self.send(builder).await?;
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(Conditional::Unchanged {
                rate_limit: parse_rate_limit_headers(response.headers()),
            });
        }
        Ok(Conditional::Modified(self.decode_response(response).await?))
    }

    /// GET a paginated list, following `Link: rel="next"` with
    /// `per_page=100`, decoding each element leniently
    ///
    /// `max_pages` lets the orchestrator cut the sequence short; `None`
    /// follows every page.
    pub(crate) async fn get_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        max_pages: Option<usize>,
    ) -> Result<Fetched<Vec<T>>, ApiError> {
        let per_page = PER_PAGE.to_string();
        let mut builder = self
            .request(reqwest::Method::GET, path)
            .query(&[("per_page", per_page.as_str())])
            .query(query);

        let mut items = Vec::new();
        let mut etag = None;
        let mut rate_limit = None;
        let mut pages = 0usize;

        loop {
            let response = self.send(builder).await?;
            if pages == 0 {
                etag = header_string(response.headers(), "etag");
            }
            rate_limit = parse_rate_limit_headers(response.headers()).or(rate_limit);
            let next = next_page_url(response.headers());

            let page: Vec<serde_json::Value> = response.json().await.map_err(|e| {
                ApiError::Malformed {
                    message: format!("page {} of {}: {}", pages + 1, path, e),
                }
            })?;
            items.extend(decode_elements(page, path));
            pages += 1;

            match next {
                Some(url) if max_pages.is_none_or(|max| pages < max) => {
                    builder = self
                        .http
                        .get(url)
                        .bearer_auth(self.token.reveal())
                        .header("Accept", "application/vnd.github+json")
                        .header("X-GitHub-Api-Version", "2022-11-28");
                }
                _ => break,
            }
        }

        Ok(Fetched {
            data: items,
            rate_limit,
            etag,
        })
    }

    /// Conditional variant of [`get_paged`]: the ETag guards the first page
    pub(crate) async fn get_paged_conditional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        etag: Option<&str>,
    ) -> Result<Conditional<Vec<T>>, ApiError> {
        if let Some(etag) = etag {
            let per_page = PER_PAGE.to_string();
            let builder = self
                .request(reqwest::Method::GET, path)
                .query(&[("per_page", per_page.as_str())])
                .query(query)
                .header("If-None-Match", etag);

            let response = self.send(builder).await?;
            if response.status() == reqwest::StatusCode::NOT_MODIFIED {
                return Ok(Conditional::Unchanged {
                    rate_limit: parse_rate_limit_headers(response.headers()),
                });
            }
            // Changed: decode this first page, then walk the rest.
            let first_etag = header_string(response.headers(), "etag");
            let rate_limit = parse_rate_limit_headers(response.headers());
            let next = next_page_url(response.headers());
            let page: Vec<serde_json::Value> =
                response.json().await.map_err(|e| ApiError::Malformed {
                    message: format!("first page of {}: {}", path, e),
                })?;
            let mut items = decode_elements(page, path);

            if let Some(url) = next {
                let rest: Fetched<Vec<T>> = self.get_paged_from(url).await?;
                items.extend(rest.data);
            }

            return Ok(Conditional::Modified(Fetched {
                data: items,
                rate_limit,
                etag: first_etag,
            }));
        }

        let fetched = self.get_paged(path, query, None).await?;
        Ok(Conditional::Modified(fetched))
    }

    /// Follow pagination from an absolute URL (continuation pages)
    async fn get_paged_from<T: DeserializeOwned>(
        &self,
        start_url: String,
    ) -> Result<Fetched<Vec<T>>, ApiError> {
        let mut url = Some(start_url);
        let mut items = Vec::new();
        let mut rate_limit = None;

        while let Some(current) = url.take() {
            let builder = self
                .http
                .get(&current)
                .bearer_auth(self.token.reveal())
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28");
            let response = self.send(builder).await?;
            rate_limit = parse_rate_limit_headers(response.headers()).or(rate_limit);
            url = next_page_url(response.headers());

            let page: Vec<serde_json::Value> =
                response.json().await.map_err(|e| ApiError::Malformed {
                    message: format!("continuation page {}: {}", current, e),
                })?;
            items.extend(decode_elements(page, &current));
        }

        Ok(Fetched {
            data: items,
            rate_limit,
            etag: None,
        })
    }

    /// Send a JSON body with the given method and decode the JSON response
    pub(crate) async fn send_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<Fetched<T>, ApiError> {
        let response = self
            .send(self.request(method, path).json(body))
            .await?;
        self.decode_response(response).await
    }

    /// Send a bodyless request and ignore the response body
    pub(crate) async fn send_empty(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<Option<RateLimit>, ApiError> {
        let response = self.send(self.request(method, path)).await?;
        Ok(parse_rate_limit_headers(response.headers()))
    }

    async fn decode_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Fetched<T>, ApiError> {
        let etag = header_string(response.headers(), "etag");
        let rate_limit = parse_rate_limit_headers(response.headers());
        let data = response.json().await.map_err(|e| ApiError::Malformed {
            message: e.to_string(),
        })?;
        Ok(Fetched {
            data,
            rate_limit,
            etag,
        })
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("user_id", &self.user_id)
            .field("config", &self.config)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

// ============================================================================
// Response Plumbing
// ============================================================================

/// Decode array elements one by one, skipping and logging failures
///
/// GitHub occasionally ships elements that drift from the documented shape;
/// dropping the element (with its index and reason) keeps the rest of the
/// page usable.
pub(crate) fn decode_elements<T: DeserializeOwned>(
    values: Vec<serde_json::Value>,
    context: &str,
) -> Vec<T> {
    let mut decoded = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value(value) {
            Ok(item) => decoded.push(item),
            Err(error) => {
                warn!(
                    op = %context,
                    index,
                    error = %error,
                    "Skipping malformed element in GitHub response"
                );
            }
        }
    }
    decoded
}

async fn extract_error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body),
        Err(_) => format!("HTTP {}", status),
    }
}

/// Map a non-success status to the matching [`ApiError`] variant
///
/// 403 is ambiguous at GitHub: it is used for both exhausted rate limits
/// and revoked credentials, so the body and the rate-limit headers decide.
pub(crate) fn classify_status(
    status: u16,
    message: String,
    rate_limit: Option<RateLimit>,
) -> ApiError {
    match status {
        401 => ApiError::AuthInvalid { status, message },
        403 | 429 => {
            let exhausted = rate_limit.as_ref().is_some_and(|rl| rl.is_exhausted());
            if exhausted || message.to_lowercase().contains("rate limit") {
                let (remaining, reset_at) = rate_limit
                    .map(|rl| (rl.remaining, rl.reset_at))
                    .unwrap_or((0, chrono::Utc::now()));
                ApiError::RateLimited {
                    retry_after_ms: (reset_at - chrono::Utc::now()).num_milliseconds().max(0)
                        as u64,
                    remaining,
                    reset_at,
                }
            } else if message.to_lowercase().contains("bad credentials") {
                ApiError::AuthInvalid { status, message }
            } else {
                ApiError::GitHub { status, message }
            }
        }
        404 => ApiError::NotFound { resource: message },
        409 => ApiError::Conflict { message },
        422 => ApiError::Unprocessable { message },
        _ => ApiError::GitHub { status, message },
    }
}

fn header_string(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Extract the `rel="next"` URL from a Link header
pub(crate) fn next_page_url(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let link = headers.get("link")?.to_str().ok()?;
    for part in link.split(',') {
        let mut sections = part.split(';');
        let url = sections.next()?.trim();
        let is_next = sections
            .any(|section| section.trim() == "rel=\"next\"");
        if is_next {
            return Some(
                url.trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            );
        }
    }
    None
}
