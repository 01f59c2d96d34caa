//! The JSON error envelope every endpoint speaks.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use octomirror_core::sync::SyncError;
use octomirror_core::webhook::ReceiveError;
use octomirror_github::error::AuthError;
use octomirror_github::ApiError;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Error codes the HTTP surface exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthMissing,
    AuthInvalid,
    NotFound,
    MergeConflict,
    Unprocessable,
    GithubError,
    InternalError,
}

impl ErrorCode {
    fn status(&self) -> StatusCode {
        match self {
            Self::AuthMissing | Self::AuthInvalid => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MergeConflict => StatusCode::CONFLICT,
            Self::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GithubError => StatusCode::BAD_GATEWAY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A failure rendered as `{error, code, details?}`
#[derive(Debug)]
pub struct ApiFailure {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
    /// Override for endpoints whose contract pins a specific status
    pub status: Option<StatusCode>,
}

impl ApiFailure {
    /// Build a failure with a code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            status: None,
        }
    }

    /// Attach a details payload
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Pin the HTTP status
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Missing bearer token
    pub fn auth_missing() -> Self {
        Self::new(ErrorCode::AuthMissing, "GitHub is not connected")
    }

    /// Stored token is stamped invalid
    pub fn auth_invalid() -> Self {
        Self::new(
            ErrorCode::AuthInvalid,
            "GitHub authorization is invalid; reconnect GitHub",
        )
    }

    /// Catch-all internal failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: &'a Option<Value>,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.status.unwrap_or_else(|| self.code.status());
        if status.is_server_error() {
            error!(code = ?self.code, message = %self.message, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: &self.message,
                code: self.code,
                details: &self.details,
            }),
        )
            .into_response()
    }
}

impl From<ApiError> for ApiFailure {
    fn from(error: ApiError) -> Self {
        let code = match &error {
            ApiError::AuthInvalid { .. } => ErrorCode::AuthInvalid,
            ApiError::NotFound { .. } => ErrorCode::NotFound,
            ApiError::Conflict { .. } => ErrorCode::MergeConflict,
            ApiError::Unprocessable { .. } => ErrorCode::Unprocessable,
            ApiError::RateLimited { .. }
            | ApiError::GitHub { .. }
            | ApiError::Transport { .. }
            | ApiError::Malformed { .. } => ErrorCode::GithubError,
            ApiError::Configuration { .. } => ErrorCode::InternalError,
        };
        Self::new(code, error.to_string())
    }
}

impl From<SyncError> for ApiFailure {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::AuthMissing => Self::auth_missing(),
            SyncError::AuthInvalid => Self::auth_invalid(),
            SyncError::NotFound { resource } => {
                Self::new(ErrorCode::NotFound, format!("Not found: {}", resource))
            }
            SyncError::Api(api) => api.into(),
            SyncError::Store(e) => Self::internal(e.to_string()),
            SyncError::Apply(e) => Self::internal(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiFailure {
    fn from(error: AuthError) -> Self {
        let message = error.to_string();
        match error {
            AuthError::TokenMissing { .. } => Self::auth_missing(),
            AuthError::TokenInvalid { .. } => Self::auth_invalid(),
            AuthError::MissingScopes { .. } => {
                Self::auth_invalid().with_details(serde_json::json!({ "reason": message }))
            }
            _ => Self::internal(message),
        }
    }
}

impl From<ReceiveError> for ApiFailure {
    fn from(error: ReceiveError) -> Self {
        match &error {
            ReceiveError::MissingHeader { .. } | ReceiveError::MalformedPayload { .. } => {
                Self::new(ErrorCode::Unprocessable, error.to_string())
                    .with_status(StatusCode::BAD_REQUEST)
            }
            ReceiveError::InvalidSignature => {
                Self::new(ErrorCode::AuthInvalid, error.to_string())
                    .with_status(StatusCode::UNAUTHORIZED)
            }
            ReceiveError::Store(_) | ReceiveError::Queue(_) => {
                Self::internal(error.to_string())
            }
        }
    }
}

impl From<octomirror_core::store::StoreError> for ApiFailure {
    fn from(error: octomirror_core::store::StoreError) -> Self {
        Self::internal(error.to_string())
    }
}

impl From<octomirror_queue::QueueError> for ApiFailure {
    fn from(error: octomirror_queue::QueueError) -> Self {
        match &error {
            octomirror_queue::QueueError::ItemNotFound { .. } => {
                Self::new(ErrorCode::NotFound, error.to_string())
            }
            _ => Self::internal(error.to_string()),
        }
    }
}
