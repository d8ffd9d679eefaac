use std::sync::Arc;

use examdesk_api::{config::Config, create_router, services::AppState};
use examdesk_api::services::attempt_service::AttemptService;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "examdesk_api=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting ExamDesk attempt API");

    // Load configuration
    let config = Config::load().expect("Failed to load configuration");
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    // Initialize database connection
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to MongoDB");
    tracing::info!("MongoDB connected");

    let bind_addr = config.bind_addr.clone();
    let app_state = Arc::new(AppState::new(config, mongo_client));

    // The unique in-progress index is load-bearing for concurrent starts;
    // warn loudly if it cannot be created but keep serving.
    let attempt_service = AttemptService::new(app_state.mongo.clone());
    if let Err(e) = attempt_service.ensure_indexes().await {
        tracing::warn!("Failed to create attempt indexes: {}", e);
    }

    // Build router
    let app = create_router(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
