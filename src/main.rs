use ad_moderation::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgStore},
    routes,
    services::{cache::RedisResultCache, inference::InferenceEngine, queue::StreamPublisher},
};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing moderation API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Connecting to Redis result cache");
    let cache = RedisResultCache::new(&config.redis_url, config.cache_ttl())
        .expect("Failed to initialize result cache");

    tracing::info!(topic = %config.moderation_topic, "Connecting to work queue");
    let publisher = StreamPublisher::new(config.broker_url(), config.queue_partitions)
        .expect("Failed to initialize work queue producer");

    tracing::info!(path = %config.model_path, "Loading moderation model");
    let engine = InferenceEngine::new(&config.model_path);
    engine.init().expect("Failed to initialize inference engine");

    let state = AppState::new(
        Arc::new(PgStore::new(db_pool)),
        Arc::new(cache),
        Arc::new(publisher),
        Arc::new(engine),
        &config.moderation_topic,
        config.max_retries,
    );

    let app = routes::router(state)
        .merge(
            Router::new()
                .route("/metrics", get(routes::metrics::prometheus_metrics))
                .with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
