pub mod departures;
pub mod error;
pub mod health;

pub use error::ErrorResponse;

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;

use crate::sync::DeparturesSync;

pub fn router(pool: PgPool, sync: Arc<DeparturesSync>) -> Router {
    Router::new()
        .merge(departures::router(sync))
        .nest("/health", health::router(pool))
}
