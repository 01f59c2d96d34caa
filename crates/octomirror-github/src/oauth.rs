//! OAuth authorization-code flow for user login.
//!
//! The service redirects the browser to GitHub's authorize URL, then
//! exchanges the returned code for an access token. Granted scopes are read
//! from the `x-oauth-scopes` header of a follow-up `/user` call — the
//! header is authoritative, the token-exchange response body is not.

use crate::auth::{validate_scopes, AccessToken, REQUIRED_SCOPES};
use crate::error::{ApiError, AuthError};
use serde::Deserialize;

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;

/// OAuth app credentials and endpoints
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base URL of this deployment, used to build the callback URL
    pub base_url: String,
    /// GitHub web origin, overridable for tests
    pub github_url: String,
    /// GitHub API origin, overridable for tests
    pub api_url: String,
}

impl OAuthConfig {
    /// Standard configuration against github.com
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: base_url.into(),
            github_url: "https://github.com".to_string(),
            api_url: "https://api.github.com".to_string(),
        }
    }

    /// The callback URL registered with the OAuth app
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/github/oauth/callback",
            self.base_url.trim_end_matches('/')
        )
    }

    /// The authorize URL to redirect the browser to
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/login/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
            self.github_url,
            self.client_id,
            urlencode(&self.callback_url()),
            urlencode(&REQUIRED_SCOPES.join(" ")),
            urlencode(state),
        )
    }
}

/// Result of a completed code exchange
#[derive(Debug)]
pub struct OAuthExchange {
    pub token: AccessToken,
    /// The authenticated user's login
    pub login: String,
    /// The authenticated user's numeric GitHub ID
    pub github_id: u64,
    /// Raw `x-oauth-scopes` header value
    pub granted_scopes: String,
}

#[derive(Debug, Deserialize)]
struct CodeExchangeResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthenticatedUser {
    id: u64,
    login: String,
}

/// Exchange an authorization code for an access token and verify scopes
///
/// # Errors
///
/// Returns [`AuthError::MissingScopes`] when the granted scopes do not
/// cover [`REQUIRED_SCOPES`]; the caller records that as `auth_invalid`
/// with a human-readable message and skips initial sync.
pub async fn exchange_code(
    http: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
) -> Result<OAuthExchange, AuthError> {
    let token_url = format!("{}/login/oauth/access_token", config.github_url);

    let response = http
        .post(&token_url)
        .header("Accept", "application/json")
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
        ])
        .send()
        .await
        .map_err(|e| AuthError::Exchange(Box::new(ApiError::from(e))))?;

    let body: CodeExchangeResponse = response
        .json()
        .await
        .map_err(|e| AuthError::Exchange(Box::new(ApiError::Malformed {
            message: e.to_string(),
        })))?;

    let access_token = body.access_token.ok_or_else(|| {
        AuthError::Exchange(Box::new(ApiError::GitHub {
            status: 400,
            message: body
                .error_description
                .unwrap_or_else(|| "code exchange rejected".to_string()),
        }))
    })?;
    let token = AccessToken::new(access_token);

    // Granted scopes come from the x-oauth-scopes header of an API call
    // made with the new token, not from the exchange response body.
    let user_url = format!("{}/user", config.api_url);
    let user_response = http
        .get(&user_url)
        .bearer_auth(token.reveal())
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .map_err(|e| AuthError::Exchange(Box::new(ApiError::from(e))))?;

    let granted_scopes = user_response
        .headers()
        .get("x-oauth-scopes")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let user: AuthenticatedUser = user_response
        .json()
        .await
        .map_err(|e| AuthError::Exchange(Box::new(ApiError::Malformed {
            message: e.to_string(),
        })))?;

    validate_scopes(&granted_scopes)?;

    Ok(OAuthExchange {
        token,
        login: user.login,
        github_id: user.id,
        granted_scopes,
    })
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
