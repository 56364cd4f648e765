//! Health check endpoints for liveness and readiness probes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::errors::ApiResponse;
use crate::AppState;

/// Readiness probe detail.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub clamd: String,
    pub clamd_version: Option<String>,
}

/// Liveness probe: always returns OK if the process is running.
pub async fn live() -> &'static str {
    "OK"
}

/// Readiness probe: checks the scanner answers `PING`.
pub async fn ready(State(state): State<AppState>) -> Response {
    if let Err(e) = state.clamd.ping().await {
        tracing::warn!(error = %e, address = %state.clamd.address(), "clamd health check failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiResponse::<()>::error("SCANNER_UNAVAILABLE", &e.to_string()),
        )
            .into_response();
    }

    let clamd_version = match state.clamd.version().await {
        Ok(version) => Some(version),
        Err(e) => {
            tracing::warn!(error = %e, "clamd version query failed");
            None
        }
    };

    ApiResponse::success(HealthStatus {
        status: "ok".to_string(),
        clamd: "connected".to_string(),
        clamd_version,
    })
    .into_response()
}
