//! Interceptor error taxonomy with a consistent API response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::config::ConfigError;
use crate::models::scan::DenyReason;
use crate::services::metadata::EncodeError;

/// Error detail in the API response envelope.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Consistent JSON envelope for all API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap a successful result in the envelope.
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            data: Some(data),
            error: None,
        })
    }

    /// Wrap an error in the envelope.
    pub fn error(code: &str, message: &str) -> Json<Self> {
        Json(Self {
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        })
    }
}

/// Why an interceptor refused to return a transaction.
///
/// `Denied` is a scan outcome (infection or scan service failure). Every other
/// variant is a processing failure and is never reported as a denial.
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown transaction type: {0}")]
    Type(String),

    #[error("Body stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upstream body stream error: {0}")]
    Upstream(std::io::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("{0}")]
    Denied(DenyReason),
}

impl InterceptError {
    /// Check if this error is a scan denial rather than a processing failure.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }

    /// Denial reason, if this error is a denial.
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Denied(reason) => Some(reason),
            _ => None,
        }
    }
}

impl IntoResponse for InterceptError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            InterceptError::Denied(reason) => {
                (StatusCode::FORBIDDEN, "CONTENT_BLOCKED", reason.to_string())
            }
            InterceptError::Io(e) => {
                tracing::warn!(error = %e, "Body stream error");
                (
                    StatusCode::BAD_REQUEST,
                    "BODY_UNREADABLE",
                    "The message body could not be read".to_string(),
                )
            }
            InterceptError::Upstream(e) => {
                tracing::warn!(error = %e, "Upstream body stream error");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_UNREADABLE",
                    "The upstream response body could not be read".to_string(),
                )
            }
            InterceptError::Type(msg) => {
                tracing::error!(error = %msg, "Transaction type error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INVALID_TRANSACTION",
                    "An internal error occurred".to_string(),
                )
            }
            InterceptError::Encode(e) => {
                tracing::error!(error = %e, "Metadata encode error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            InterceptError::Config(e) => {
                tracing::error!(error = %e, "Configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()> {
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message,
            }),
        };

        (status, Json(body)).into_response()
    }
}
