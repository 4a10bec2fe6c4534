pub mod api;
mod config;
mod providers;
mod sync;

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use config::Config;
use sync::DeparturesSync;

#[derive(OpenApi)]
#[openapi(
    info(title = "Leuven Departures Sync", version = "0.2.0"),
    paths(
        api::departures::fetch_leuven_departures,
        api::health::health_check,
    ),
    components(schemas(
        api::departures::SyncResponse,
        api::ErrorResponse,
        api::health::HealthResponse,
    )),
    tags(
        (name = "departures", description = "Departure snapshot sync trigger"),
        (name = "health", description = "Service health check")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load and validate configuration before touching anything else
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(server = %config.server, database = %config.database, "Loaded configuration");

    // Connections are established lazily so an unreachable database
    // surfaces as a per-run connectivity error instead of a startup crash.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy_with(config.connect_options());

    let migrator = sqlx::migrate!("./migrations");
    match migrator.run(&pool).await {
        Ok(()) => tracing::info!(
            migrations = migrator.migrations.len(),
            "Database migrations completed"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not run migrations, continuing"),
    }

    let departures_sync = Arc::new(
        DeparturesSync::new(pool.clone(), config.sync.clone())
            .expect("Failed to initialize departure sync"),
    );

    // Build the app
    let app = Router::new()
        .route("/", get(root))
        .merge(api::router(pool, departures_sync))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("Failed to bind to port 3000");

    tracing::info!("Server running on http://localhost:3000");
    tracing::info!("Swagger UI: http://localhost:3000/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "Leuven Departures Sync"
}
