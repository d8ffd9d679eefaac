use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod errors;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(extractors::USER_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1/test-series", attempt_routes())
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn attempt_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/{series_id}/papers/{paper_id}/attempts",
            post(handlers::attempts::start_attempt),
        )
        .route(
            "/{series_id}/papers/{paper_id}/attempts/current",
            get(handlers::attempts::get_current_attempt),
        )
        .route(
            "/{series_id}/papers/{paper_id}/attempts/{attempt_id}",
            patch(handlers::attempts::update_progress),
        )
        .route(
            "/{series_id}/papers/{paper_id}/attempts/{attempt_id}/submit",
            post(handlers::attempts::submit_attempt),
        )
        .route(
            "/{series_id}/papers/{paper_id}/attempts/{attempt_id}/results",
            get(handlers::attempts::get_results),
        )
        // Latest completed attempt when no attempt id is given
        .route(
            "/{series_id}/papers/{paper_id}/results",
            get(handlers::attempts::get_latest_results),
        )
        .route("/{series_id}/attempts", get(handlers::attempts::list_attempts))
}
