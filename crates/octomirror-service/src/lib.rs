//! # Octomirror HTTP Service
//!
//! The application-local HTTP surface over the mirror: the public webhook
//! receiver, the OAuth connect flow, on-demand sync triggers, mutation
//! endpoints, and the operator tooling for the webhook queue.
//!
//! All endpoints speak JSON with the `{error, code, details?}` envelope on
//! failure. User endpoints authenticate with an opaque user-ID bearer
//! token mapped to the stored OAuth access token; the webhook endpoint
//! authenticates GitHub with the shared HMAC secret; the queue-management
//! endpoints require a separate operator token.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod mutation_routes;
pub mod oauth_routes;
pub mod ops_routes;
pub mod sync_routes;
pub mod webhook_routes;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderMap;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use errors::ApiFailure;
use metrics::ServiceMetrics;
use octomirror_core::store::EntityStore;
use octomirror_core::sync::{SyncConfig, SyncContext};
use octomirror_core::sync_state::SyncTracker;
use octomirror_core::webhook::WebhookReceiver;
use octomirror_core::{MemoryStore, SyncStateTokenStore, UserId};
use octomirror_github::auth::installation::InstallationTokenCache;
use octomirror_github::auth::jwt::AppJwtSigner;
use octomirror_github::auth::TokenStore;
use octomirror_github::oauth::OAuthConfig;
use octomirror_github::{ClientConfig, GitHubClient, RateLimitTracker};
use octomirror_queue::{MemoryQueueStore, QueueStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub use crate::config::ServiceConfig;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub queue: Arc<dyn QueueStore>,
    pub receiver: Arc<WebhookReceiver>,
    pub tracker: SyncTracker,
    pub tokens: Arc<SyncStateTokenStore>,
    pub rate_limits: Arc<RateLimitTracker>,
    pub metrics: Arc<ServiceMetrics>,
    pub config: Arc<ServiceConfig>,
    /// Installation-token cache, present when App credentials are
    /// configured; used for installation-scoped API calls
    pub app_tokens: Option<Arc<InstallationTokenCache>>,
}

impl AppState {
    /// Build state over in-memory backends
    pub fn new(config: ServiceConfig) -> Result<Self, anyhow::Error> {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        let queue: Arc<dyn QueueStore> = Arc::new(MemoryQueueStore::new());
        Self::from_parts(config, store, queue)
    }

    /// Build state over injected backends
    pub fn from_parts(
        config: ServiceConfig,
        store: Arc<dyn EntityStore>,
        queue: Arc<dyn QueueStore>,
    ) -> Result<Self, anyhow::Error> {
        let receiver = Arc::new(
            WebhookReceiver::new(
                store.clone(),
                queue.clone(),
                config.github.webhook_secret.clone(),
            )
            .with_max_attempts(config.queue.max_attempts),
        );

        // App credentials are optional; when present the key is validated
        // at startup and installation tokens become available.
        let app_tokens = match (&config.github.app_id, &config.github.app_private_key) {
            (Some(app_id), Some(key)) => {
                let signer = AppJwtSigner::new(app_id.clone(), key)
                    .map_err(|e| anyhow::anyhow!("GITHUB_APP_PRIVATE_KEY rejected: {}", e))?;
                Some(Arc::new(InstallationTokenCache::new(
                    Arc::new(signer),
                    reqwest::Client::new(),
                    config.github.api_url.clone(),
                )))
            }
            _ => None,
        };

        Ok(Self {
            tracker: SyncTracker::new(store.clone()),
            tokens: Arc::new(SyncStateTokenStore::new(store.clone())),
            receiver,
            store,
            queue,
            rate_limits: Arc::new(RateLimitTracker::new()),
            metrics: Arc::new(ServiceMetrics::new()?),
            config: Arc::new(config),
            app_tokens,
        })
    }

    /// The OAuth configuration for this deployment
    pub fn oauth_config(&self) -> OAuthConfig {
        let mut oauth = OAuthConfig::new(
            &self.config.github.client_id,
            &self.config.github.client_secret,
            &self.config.github.base_url,
        );
        oauth.github_url = self.config.github.web_url.clone();
        oauth.api_url = self.config.github.api_url.clone();
        oauth
    }

    /// Resolve the bearer token to a user ID
    ///
    /// The bearer value is the opaque local user ID; the stored OAuth
    /// token is looked up server-side per call.
    pub fn require_user(&self, headers: &HeaderMap) -> Result<UserId, ApiFailure> {
        let bearer = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(ApiFailure::auth_missing)?;

        UserId::new(bearer).map_err(|_| ApiFailure::auth_missing())
    }

    /// Build a sync context for a user, loading their stored token
    ///
    /// Fails with `auth_missing` / `auth_invalid` before any GitHub call
    /// when no usable token exists.
    pub async fn sync_context(&self, user: &UserId) -> Result<SyncContext, ApiFailure> {
        let token = self.tokens.load(user.as_str()).await?;

        let client = GitHubClient::new(
            user.as_str(),
            token,
            ClientConfig::default().with_api_url(self.config.github.api_url.clone()),
        )
        .map_err(ApiFailure::from)?
        .with_shared_rate_limits(self.rate_limits.clone());

        Ok(SyncContext::new(
            self.store.clone(),
            client,
            user.clone(),
            SyncConfig {
                parallelism: self.config.sync.parallelism,
                webhook_base_url: self.config.github.base_url.clone(),
                webhook_secret: self.config.github.webhook_secret.clone(),
                allow_local_webhooks: self.config.github.allow_local_webhook_registration,
                ..SyncConfig::default()
            },
        ))
    }
}

// ============================================================================
// Router and Server
// ============================================================================

/// Create the HTTP router with every endpoint
pub fn create_router(state: AppState) -> Router {
    let max_body = state.config.server.max_body_size;

    Router::new()
        // Public webhook intake.
        .route("/api/github/webhook", post(webhook_routes::handle_webhook))
        // OAuth connect flow.
        .route("/api/github/oauth/", get(oauth_routes::start))
        .route("/api/github/oauth/callback", get(oauth_routes::callback))
        // Sync triggers.
        .route("/api/github/sync/overview", post(sync_routes::sync_overview))
        .route("/api/github/sync/webhooks", post(sync_routes::sync_webhooks))
        .route("/api/github/sync/add-repo", post(sync_routes::add_repo))
        .route(
            "/api/github/sync/reset",
            post(sync_routes::reset_one).delete(sync_routes::reset_all),
        )
        .route("/api/github/sync/retry", post(sync_routes::retry))
        .route("/api/github/sync/:owner/:repo", post(sync_routes::sync_repo))
        .route(
            "/api/github/sync/:owner/:repo/pull/:number",
            post(sync_routes::sync_pull),
        )
        .route(
            "/api/github/sync/:owner/:repo/issue/:number",
            post(sync_routes::sync_issue),
        )
        .route("/api/github/sync/:owner/:repo/tree", post(sync_routes::sync_tree))
        .route(
            "/api/github/sync/:owner/:repo/commits",
            post(sync_routes::sync_commits),
        )
        // Mutations.
        .route(
            "/api/github/pr/:owner/:repo/:number/merge",
            post(mutation_routes::merge_pull),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number",
            patch(mutation_routes::update_pull),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number/comments",
            post(mutation_routes::create_comment),
        )
        .route(
            "/api/github/comments/:owner/:repo/:comment_id",
            patch(mutation_routes::update_comment).delete(mutation_routes::delete_comment),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number/reviews",
            post(mutation_routes::create_review),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number/reviews/:review_id/submit",
            post(mutation_routes::submit_review),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number/reviews/:review_id",
            delete(mutation_routes::discard_review),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number/review-comments",
            post(mutation_routes::create_review_comment),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number/request-reviewers",
            post(mutation_routes::request_reviewers),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number/update-branch",
            post(mutation_routes::update_branch),
        )
        .route(
            "/api/github/pr/:owner/:repo/:number/viewed",
            post(mutation_routes::set_viewed),
        )
        .route("/api/github/threads/resolve", post(mutation_routes::resolve_thread))
        .route(
            "/api/github/branch/:owner/:repo/:branch",
            delete(mutation_routes::delete_branch),
        )
        .route(
            "/api/github/branch/:owner/:repo/:branch/restore",
            post(mutation_routes::restore_branch),
        )
        // Observability and operator tooling.
        .route("/api/github/rate-limit", get(ops_routes::rate_limit))
        .route("/api/github/webhook-health", get(ops_routes::webhook_health))
        .route(
            "/api/github/webhook-queue",
            get(ops_routes::list_queue).post(ops_routes::queue_action),
        )
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn start_server(state: AppState) -> Result<(), anyhow::Error> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    )
    .parse()?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Ambient Endpoints
// ============================================================================

async fn healthz(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "app_auth": state.app_tokens.is_some(),
    }))
}

async fn metrics_endpoint(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> String {
    state.metrics.render()
}
