use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::sync::SyncError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Always "error"
    pub status: String,
    /// Failure category: "connectivity" or "write"
    pub kind: String,
    pub message: String,
}

/// Log a fatal sync error and map it to an HTTP 500 with a structured body.
pub fn sync_error(err: SyncError) -> (StatusCode, Json<ErrorResponse>) {
    error!(error = %err, "Departure sync failed");

    let kind = match err {
        SyncError::Connectivity(_) => "connectivity",
        SyncError::Write(_) => "write",
    };

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            status: "error".to_string(),
            kind: kind.to_string(),
            message: err.to_string(),
        }),
    )
}
