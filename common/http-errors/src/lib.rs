use axum::{http::{StatusCode, HeaderValue}, response::{IntoResponse, Response}, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub mod envelope;

pub use envelope::{ok, ok_paginated, Envelope, Pagination};

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")] pub missing_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")] pub error_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Wire-level error taxonomy. Every 4xx carries a message safe to display;
/// internal errors expose only an opaque id the caller can quote.
#[derive(Debug)]
pub enum ApiError {
    Validation { code: &'static str, message: String, details: Option<Value> },
    Unauthorized { code: &'static str, message: String },
    Forbidden { message: String },
    ForbiddenMissingRole { role: &'static str },
    NotFound { resource: &'static str },
    Conflict { code: &'static str, message: String },
    ComplianceViolation { message: String, details: Option<Value> },
    RateLimited { message: String },
    ResourceBusy { code: &'static str, message: String },
    Unavailable { code: &'static str, message: String },
    Storage { code: &'static str, message: String, upstream: bool },
    Internal { error_id: Uuid },
}

impl ApiError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { code, message: message.into(), details: None }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { code: "authentication_failed", message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict { code, message: message.into() }
    }

    pub fn compliance(message: impl Into<String>) -> Self {
        Self::ComplianceViolation { message: message.into(), details: None }
    }

    pub fn busy(code: &'static str, message: impl Into<String>) -> Self {
        Self::ResourceBusy { code, message: message.into() }
    }

    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable { code, message: message.into() }
    }

    /// Mint an opaque error id for an unexpected failure. The caller is
    /// expected to log the underlying error against the returned id.
    pub fn internal() -> (Self, Uuid) {
        let error_id = Uuid::new_v4();
        (Self::Internal { error_id }, error_id)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } | ApiError::ForbiddenMissingRole { .. } => {
                StatusCode::FORBIDDEN
            }
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::ComplianceViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ResourceBusy { .. } | ApiError::Unavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Storage { upstream: true, .. } => StatusCode::BAD_GATEWAY,
            ApiError::Storage { upstream: false, .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { code, .. }
            | ApiError::Unauthorized { code, .. }
            | ApiError::Conflict { code, .. }
            | ApiError::ResourceBusy { code, .. }
            | ApiError::Unavailable { code, .. }
            | ApiError::Storage { code, .. } => code,
            ApiError::Forbidden { .. } => "forbidden",
            ApiError::ForbiddenMissingRole { .. } => "missing_role",
            ApiError::NotFound { .. } => "not_found",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::ComplianceViolation { .. } => "compliance_violation",
            ApiError::Internal { .. } => "internal_error",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation { message, .. } => write!(f, "{message}"),
            ApiError::Unauthorized { message, .. } => write!(f, "{message}"),
            ApiError::Forbidden { message } => write!(f, "{message}"),
            ApiError::ForbiddenMissingRole { role } => {
                write!(f, "Requires at least the '{role}' role")
            }
            ApiError::NotFound { resource } => write!(f, "{resource} not found"),
            ApiError::Conflict { message, .. } => write!(f, "{message}"),
            ApiError::ComplianceViolation { message, .. } => write!(f, "{message}"),
            ApiError::RateLimited { message } => write!(f, "{message}"),
            ApiError::ResourceBusy { message, .. } => write!(f, "{message}"),
            ApiError::Unavailable { message, .. } => write!(f, "{message}"),
            ApiError::Storage { message, .. } => write!(f, "{message}"),
            ApiError::Internal { error_id } => {
                write!(f, "internal error (id: {error_id})")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();
        let mut body = ErrorBody {
            success: false,
            error: String::new(),
            code: error_code.into(),
            details: None,
            missing_role: None,
            error_id: None,
            timestamp: Utc::now(),
        };
        match self {
            ApiError::Validation { message, details, .. } => {
                body.error = message;
                body.details = details;
            }
            ApiError::Unauthorized { message, .. }
            | ApiError::Forbidden { message }
            | ApiError::Conflict { message, .. }
            | ApiError::RateLimited { message }
            | ApiError::ResourceBusy { message, .. }
            | ApiError::Unavailable { message, .. }
            | ApiError::Storage { message, .. } => body.error = message,
            ApiError::ForbiddenMissingRole { role } => {
                body.error = format!("Requires at least the '{role}' role");
                body.missing_role = Some(role.into());
            }
            ApiError::NotFound { resource } => body.error = format!("{resource} not found"),
            ApiError::ComplianceViolation { message, details } => {
                body.error = message;
                body.details = details;
            }
            ApiError::Internal { error_id } => {
                body.error =
                    "An unexpected error occurred. Quote the error id when reporting.".into();
                body.error_id = Some(error_id);
            }
        }
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
