use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::error::{sync_error, ErrorResponse};
use crate::sync::DeparturesSync;

#[derive(Clone)]
pub struct SyncState {
    pub sync: Arc<DeparturesSync>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    /// Always "success"
    pub status: String,
    /// Rows written by this run, after window filtering and deduplication
    pub inserted_rows: u64,
}

/// Run one liveboard sync cycle and replace the departures snapshot
#[utoipa::path(
    get,
    path = "/fetch_leuven_departures",
    responses(
        (status = 200, description = "Sync completed, snapshot replaced", body = SyncResponse),
        (status = 500, description = "Sync failed", body = ErrorResponse)
    ),
    tag = "departures"
)]
pub async fn fetch_leuven_departures(
    State(state): State<SyncState>,
) -> Result<Json<SyncResponse>, (StatusCode, Json<ErrorResponse>)> {
    let report = state.sync.run().await.map_err(sync_error)?;

    Ok(Json(SyncResponse {
        status: "success".to_string(),
        inserted_rows: report.inserted_rows,
    }))
}

pub fn router(sync: Arc<DeparturesSync>) -> Router {
    Router::new()
        .route("/fetch_leuven_departures", get(fetch_leuven_departures))
        .with_state(SyncState { sync })
}
