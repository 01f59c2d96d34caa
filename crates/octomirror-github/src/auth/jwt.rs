//! RS256 JWT generation for GitHub App authentication.
//!
//! GitHub Apps authenticate with a JWT signed by the app's private key:
//! RS256, `iss` = app ID, and a lifetime of at most ten minutes. The JWT is
//! only ever used to mint installation tokens (see [`super::installation`]).

use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;

/// GitHub's maximum JWT lifetime
const MAX_JWT_LIFETIME_MINUTES: i64 = 10;

/// Claims GitHub requires in an App JWT
#[derive(Debug, Serialize)]
struct AppClaims {
    /// App ID
    iss: String,
    /// Issued at (unix seconds, backdated 30s for clock skew)
    iat: i64,
    /// Expiration (unix seconds)
    exp: i64,
}

/// A signed App JWT with its expiry
#[derive(Clone)]
pub struct AppJwt {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AppJwt {
    /// Wrap an already-signed JWT
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Get the encoded JWT for a Bearer header
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Get when this JWT expires
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl std::fmt::Debug for AppJwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppJwt")
            .field("token", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Seam for App JWT signing, so installation-token tests can inject a fake
#[async_trait]
pub trait AppAuthenticator: Send + Sync {
    /// Produce a currently valid App JWT
    async fn app_jwt(&self) -> Result<AppJwt, AuthError>;
}

/// RS256 signer over the app's private key
pub struct AppJwtSigner {
    app_id: String,
    encoding_key: EncodingKey,
    lifetime: Duration,
}

impl AppJwtSigner {
    /// Create a signer from a PEM-encoded RSA private key
    ///
    /// Environment-sourced keys often arrive with literal `\n` escapes; they
    /// are unescaped before parsing.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPrivateKey`] when the PEM cannot be
    /// parsed as an RSA key.
    pub fn new(app_id: impl Into<String>, private_key_pem: &str) -> Result<Self, AuthError> {
        let pem = normalize_pem(private_key_pem);

        if !pem.contains("-----BEGIN") || !pem.contains("-----END") {
            return Err(AuthError::InvalidPrivateKey {
                message: "missing PEM BEGIN/END markers".to_string(),
            });
        }

        let encoding_key =
            EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| AuthError::InvalidPrivateKey {
                message: format!("not a valid RSA private key: {}", e),
            })?;

        Ok(Self {
            app_id: app_id.into(),
            encoding_key,
            lifetime: Duration::minutes(MAX_JWT_LIFETIME_MINUTES),
        })
    }
}

#[async_trait]
impl AppAuthenticator for AppJwtSigner {
    async fn app_jwt(&self) -> Result<AppJwt, AuthError> {
        let now = Utc::now();
        let expires_at = now + self.lifetime;
        let claims = AppClaims {
            iss: self.app_id.clone(),
            iat: (now - Duration::seconds(30)).timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::JwtSigningFailed {
                message: e.to_string(),
            })?;

        Ok(AppJwt { token, expires_at })
    }
}

/// Undo `\n` escaping applied when a PEM key travels through an environment
/// variable
pub fn normalize_pem(pem: &str) -> String {
    pem.trim().replace("\\n", "\n")
}
