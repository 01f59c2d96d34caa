//! OAuth connect flow: redirect to GitHub, exchange the code, kick off
//! the initial sync.

use crate::errors::ApiFailure;
use crate::AppState;
use axum::extract::{Query, State};
use axum::response::Redirect;
use octomirror_core::sync::run_initial_sync;
use octomirror_core::{applier, UserId};
use octomirror_github::auth::TokenStore;
use octomirror_github::error::AuthError;
use octomirror_github::oauth;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// `GET /api/github/oauth/` — start the flow
#[instrument(skip_all)]
pub async fn start(State(state): State<AppState>) -> Redirect {
    let url = state
        .oauth_config()
        .authorize_url(&state.config.sync.primary_user);
    Redirect::temporary(&url)
}

/// `GET /api/github/oauth/callback` — exchange the code, validate scopes,
/// persist the token, kick off the initial sync
///
/// Always redirects back into the app, with `?github=connected` on
/// success or `?error=...` otherwise.
#[instrument(skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let base = state.config.github.base_url.trim_end_matches('/').to_string();

    let Some(code) = params.code else {
        let reason = params
            .error_description
            .unwrap_or_else(|| "missing authorization code".to_string());
        return Redirect::temporary(&format!("{}/?error={}", base, urlencode(&reason)));
    };

    match connect(&state, &code).await {
        Ok(()) => Redirect::temporary(&format!("{}/?github=connected", base)),
        Err(failure) => {
            warn!(error = %failure.message, "OAuth connect failed");
            Redirect::temporary(&format!("{}/?error={}", base, urlencode(&failure.message)))
        }
    }
}

async fn connect(state: &AppState, code: &str) -> Result<(), ApiFailure> {
    let http = reqwest_client()?;
    let oauth_config = state.oauth_config();
    let user = UserId::new(state.config.sync.primary_user.clone())
        .map_err(|e| ApiFailure::internal(e.to_string()))?;

    let exchange = match oauth::exchange_code(&http, &oauth_config, code).await {
        Ok(exchange) => exchange,
        Err(AuthError::MissingScopes { missing }) => {
            // Insufficient scopes park the token row auth_invalid with a
            // readable reason; the initial sync is skipped.
            let message = format!("Missing required OAuth scopes: {}", missing);
            state
                .tokens
                .invalidate(user.as_str(), &message)
                .await
                .map_err(ApiFailure::from)?;
            return Err(ApiFailure::auth_invalid()
                .with_details(serde_json::json!({ "missing_scopes": missing })));
        }
        Err(other) => return Err(other.into()),
    };

    state.tokens.save(user.as_str(), &exchange.token).await?;
    applier::apply_user(
        state.store.as_ref(),
        &user,
        exchange.github_id,
        &exchange.login,
        None,
        chrono::Utc::now(),
    )
    .await
    .map_err(|e| ApiFailure::internal(e.to_string()))?;

    info!(login = %exchange.login, "GitHub connected; starting initial sync");

    // The initial sync runs in the background; the browser redirect does
    // not wait for four phases of GitHub traffic.
    let ctx = state.sync_context(&user).await?;
    tokio::spawn(async move {
        if let Err(e) = run_initial_sync(&ctx).await {
            error!(error = %e, "Initial sync failed");
        }
    });

    Ok(())
}

fn reqwest_client() -> Result<reqwest::Client, ApiFailure> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| ApiFailure::internal(e.to_string()))
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
