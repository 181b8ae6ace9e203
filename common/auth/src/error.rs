use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header missing")]
    MissingAuthorization,
    #[error("authorization header malformed")]
    InvalidAuthorization,
    #[error("token verification failed: {0}")]
    Verification(String),
    #[error("token expired")]
    Expired,
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("X-API-Key header missing")]
    MissingApiKey,
    #[error("X-API-Key header malformed")]
    InvalidApiKey,
    #[error("requires at least the '{0}' role")]
    InsufficientRole(&'static str),
    #[error("JWT secret must be at least {0} bytes")]
    WeakSecret(usize),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl From<AuthError> for common_http_errors::ApiError {
    fn from(err: AuthError) -> Self {
        use common_http_errors::ApiError;
        use AuthError::*;
        match err {
            InsufficientRole(role) => ApiError::ForbiddenMissingRole { role },
            MissingApiKey | InvalidApiKey => {
                ApiError::Unauthorized { code: "api_key", message: err.to_string() }
            }
            WeakSecret(_) | PasswordHash(_) => {
                let (api_err, error_id) = ApiError::internal();
                tracing::error!(%error_id, context = "auth internals", detail = %err, "internal error");
                api_err
            }
            other => ApiError::Unauthorized { code: "auth_token", message: other.to_string() },
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        match value.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Verification(value.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    code: &'static str,
    error: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::MissingAuthorization | AuthError::InvalidAuthorization => {
                (StatusCode::UNAUTHORIZED, "auth_header")
            }
            AuthError::Verification(_) | AuthError::Expired => {
                (StatusCode::UNAUTHORIZED, "auth_token")
            }
            AuthError::InvalidClaim(_, _) => (StatusCode::UNAUTHORIZED, "auth_claims"),
            AuthError::MissingApiKey | AuthError::InvalidApiKey => {
                (StatusCode::UNAUTHORIZED, "api_key")
            }
            AuthError::InsufficientRole(_) => (StatusCode::FORBIDDEN, "missing_role"),
            AuthError::WeakSecret(_) | AuthError::PasswordHash(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "auth_internal")
            }
        };

        let body = ErrorBody {
            success: false,
            code,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
