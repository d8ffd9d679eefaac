use axum::Router;
use std::sync::Arc;

use examdesk_api::{config::Config, create_router, services::AppState};

/// Builds the real router against a lazily-connecting MongoDB client. The
/// validation paths under test reject requests before any database I/O, so
/// no live database is required.
pub async fn create_test_app() -> Router {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = Config {
        mongo_uri: "mongodb://127.0.0.1:27017".to_string(),
        mongo_database: "examdesk_test".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
    };

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to parse test MongoDB URI");

    let app_state = Arc::new(AppState::new(config, mongo_client));

    create_router(app_state)
}
