//! Route definitions for the clamshield API.

pub mod health;
pub mod scan;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::middleware::scan::{scan_request, scan_response};
use crate::AppState;

/// Build the application router.
///
/// Request scanning wraps response scanning, so a denied request is
/// answered before the handler or the response scan runs.
pub fn router(state: AppState) -> Router {
    let scanned = Router::new()
        .route("/api/v1/scan", post(scan::accept))
        .route("/api/v1/scan/{name}", post(scan::accept_named))
        .route_layer(from_fn_with_state(state.clone(), scan_response))
        .route_layer(from_fn_with_state(state.clone(), scan_request));

    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .merge(scanned)
        .with_state(state)
}
