use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the ohmage-auth service.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // ── Credential Errors ───────────────────────────────────────────────
    #[error("{0}")]
    Authentication(String),

    #[error("The given refresh token is unknown.")]
    UnknownToken,

    #[error("This token has been invalidated.")]
    AlreadyInvalidated,

    #[error("This token has already been refreshed.")]
    AlreadyRefreshed,

    // ── Account State ───────────────────────────────────────────────────
    #[error("{0}")]
    AccountNotSetup(String),

    #[error("{0}")]
    AccountNotActivated(String),

    // ── Request Errors ──────────────────────────────────────────────────
    #[error("{0}")]
    InvalidArgument(String),

    // ── Provider Errors ─────────────────────────────────────────────────
    #[error("Provider {0} is unknown")]
    UnknownProvider(String),

    #[error("The provider rejected the access token: {0}")]
    ProviderTokenInvalid(String),

    #[error("Could not communicate with the provider: {0}")]
    ProviderUnreachable(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Authentication(_) => "authentication_error",
            AuthError::UnknownToken => "unknown_token",
            AuthError::AlreadyInvalidated => "token_invalidated",
            AuthError::AlreadyRefreshed => "token_already_refreshed",
            AuthError::AccountNotSetup(_) => "account_not_setup",
            AuthError::AccountNotActivated(_) => "account_not_activated",
            AuthError::InvalidArgument(_) => "invalid_argument",
            AuthError::UnknownProvider(_) => "unknown_provider",
            AuthError::ProviderTokenInvalid(_) => "provider_token_invalid",
            AuthError::ProviderUnreachable(_) => "provider_unreachable",
            AuthError::IllegalState(_) => "illegal_state",
            AuthError::Database(_) => "database_error",
            AuthError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Authentication(_)
            | AuthError::AlreadyInvalidated
            | AuthError::AlreadyRefreshed
            | AuthError::ProviderTokenInvalid(_) => StatusCode::UNAUTHORIZED,
            AuthError::AccountNotSetup(_) | AuthError::AccountNotActivated(_) => {
                StatusCode::CONFLICT
            }
            AuthError::UnknownToken => StatusCode::NOT_FOUND,
            AuthError::InvalidArgument(_) | AuthError::UnknownProvider(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthError::ProviderUnreachable(_) => StatusCode::BAD_GATEWAY,
            AuthError::IllegalState(_) | AuthError::Database(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        AuthError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        (self.status(), axum::Json(body)).into_response()
    }
}
