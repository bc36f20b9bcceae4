use ad_moderation::{
    config::AppConfig,
    db::{self, PgStore},
    services::{
        clock::TokioSleeper,
        inference::InferenceEngine,
        queue::{StreamConsumer, StreamPublisher},
        worker::{ModerationWorker, WorkerSettings},
    },
};
use std::sync::Arc;
use tokio::sync::watch;
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

    tracing::info!("Starting moderation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!(path = %config.model_path, "Loading moderation model");
    let engine = InferenceEngine::new(&config.model_path);
    engine.init().expect("Failed to initialize inference engine");

    let partitions = config
        .assigned_partitions()
        .expect("Invalid partition assignment");
    tracing::info!(
        topic = %config.moderation_topic,
        group = %config.consumer_group,
        consumer = %config.consumer_name,
        partitions = ?partitions,
        "Joining consumer group"
    );
    let consumer = StreamConsumer::new(
        config.broker_url(),
        &config.moderation_topic,
        &partitions,
        &config.consumer_group,
        &config.consumer_name,
        config.poll_interval(),
        config.claim_min_idle(),
    )
    .expect("Failed to initialize work queue consumer");
    consumer
        .ensure_group()
        .await
        .expect("Failed to create consumer group");

    let publisher = StreamPublisher::new(config.broker_url(), config.queue_partitions)
        .expect("Failed to initialize DLQ producer");

    let worker = ModerationWorker::new(
        Arc::new(PgStore::new(db_pool)),
        Arc::new(engine),
        Arc::new(consumer),
        Arc::new(publisher),
        Arc::new(TokioSleeper),
        WorkerSettings {
            dlq_topic: config.moderation_dlq_topic.clone(),
            max_retries: config.max_retries,
            max_retry_delay: config.max_retry_delay(),
            error_backoff: config.poll_interval(),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received, finishing in-flight message");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;

    tracing::info!("Worker stopped");
}
