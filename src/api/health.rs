use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::sync::STATION;

#[derive(Clone)]
pub struct HealthState {
    pub pool: PgPool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Whether the departures database answers a test query
    pub database_reachable: bool,
    /// Station whose liveboard is mirrored
    pub station: String,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    let database_reachable = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    Json(HealthResponse {
        healthy: true,
        database_reachable,
        station: STATION.to_string(),
    })
}

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/", get(health_check))
        .with_state(HealthState { pool })
}
