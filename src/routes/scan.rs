//! Scan endpoints. The scanning middleware does the work; a handler only
//! runs for admitted requests and acknowledges what it received.

use axum::{body::Bytes, extract::Path, Json};
use serde::Serialize;

use crate::errors::ApiResponse;

/// Acknowledgement for an admitted payload.
#[derive(Debug, Serialize)]
pub struct ScanReceipt {
    pub status: &'static str,
    pub name: Option<String>,
    /// Bytes that reached the handler after scanning.
    pub bytes: usize,
}

/// POST /api/v1/scan: accept any payload that passed scanning.
pub async fn accept(body: Bytes) -> Json<ApiResponse<ScanReceipt>> {
    ApiResponse::success(ScanReceipt {
        status: "clean",
        name: None,
        bytes: body.len(),
    })
}

/// POST /api/v1/scan/{name}: same, attributed to a named upload.
pub async fn accept_named(
    Path(name): Path<String>,
    body: Bytes,
) -> Json<ApiResponse<ScanReceipt>> {
    ApiResponse::success(ScanReceipt {
        status: "clean",
        name: Some(name),
        bytes: body.len(),
    })
}
