use ad_moderation::{
    config::AppConfig,
    db::{self, EntityStore, PgStore},
    models::listing::{Advertisement, User},
    models::prediction::{PredictionResult, TASK_ACCEPTED},
    models::task::TaskStatus,
    services::{
        cache::{RedisResultCache, ResultCache},
        clock::TokioSleeper,
        inference::{InferenceEngine, LogisticModel},
        queue::{StreamConsumer, StreamPublisher},
        submitter::TaskSubmitter,
        worker::{ModerationWorker, Outcome, WorkerSettings},
    },
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Ids unlikely to collide with rows left by other runs.
fn unique_id() -> i64 {
    (Uuid::new_v4().as_u128() % 1_000_000_000_000) as i64 + 1
}

/// Integration test: submit → stream → worker → Postgres, plus the Redis cache
///
/// Note: This requires a running PostgreSQL and Redis instance
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");
    let store = Arc::new(PgStore::new(db_pool));

    // Isolated topic so leftovers from other runs are never consumed
    let topic = format!("moderation_it_{}", Uuid::new_v4().simple());
    let dlq_topic = format!("{topic}_dlq");
    let publisher = Arc::new(StreamPublisher::new(config.broker_url(), 1).expect("Failed to init producer"));
    let consumer = StreamConsumer::new(
        config.broker_url(),
        &topic,
        &[0],
        "integration",
        "integration-1",
        Duration::from_millis(500),
        Duration::from_secs(60),
    )
    .expect("Failed to init consumer");
    consumer.ensure_group().await.expect("Failed to create group");

    let engine = Arc::new(InferenceEngine::with_model(LogisticModel::default()).unwrap());

    // 1. Seed a seller and an advertisement
    let seller_id = unique_id();
    let item_id = unique_id();
    store
        .create_user(&User {
            seller_id,
            is_verified_seller: false,
        })
        .await
        .expect("Failed to create user");
    store
        .create_advertisement(&Advertisement {
            item_id,
            seller_id,
            name: "Integration listing".to_string(),
            description: "no photos".to_string(),
            category: 3,
            images_qty: 0,
            is_closed: false,
        })
        .await
        .expect("Failed to create advertisement");

    // 2. Submit twice: one task, deduplicated
    let submitter = TaskSubmitter::new(store.clone(), publisher.clone(), &topic, 3);
    let accepted = submitter.submit(item_id).await.expect("Submit failed");
    assert_eq!(accepted.message, TASK_ACCEPTED);
    let again = submitter.submit(item_id).await.expect("Resubmit failed");
    assert_eq!(again.task_id, accepted.task_id);

    // 3. Worker drains the stream
    let worker = ModerationWorker::new(
        store.clone(),
        engine,
        Arc::new(consumer),
        publisher,
        Arc::new(TokioSleeper),
        WorkerSettings {
            dlq_topic,
            max_retries: 3,
            max_retry_delay: Duration::from_secs(1),
            error_backoff: Duration::from_millis(100),
        },
    );
    let outcome = worker
        .process_next()
        .await
        .expect("Worker failed")
        .expect("No message delivered");
    assert!(matches!(outcome, Outcome::Completed { .. }));

    let task = store.get_task(accepted.task_id).await.expect("Task lookup failed");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.is_violation, Some(true));

    // 4. Terminal tasks reject further updates
    assert!(store.fail_task(task.id, "late", 0).await.is_err());

    // 5. Cache round trip
    let cache = RedisResultCache::new(&config.redis_url, Duration::from_secs(60))
        .expect("Failed to init cache");
    let verdict = PredictionResult {
        is_violation: true,
        probability: 0.9,
    };
    cache.put(item_id, &verdict).await.expect("Cache put failed");
    assert_eq!(cache.get(item_id).await.expect("Cache get failed"), Some(verdict));
    cache.invalidate(item_id).await.expect("Cache invalidate failed");
    assert_eq!(cache.get(item_id).await.expect("Cache get failed"), None);

    // Cleanup
    store.delete_task(task.id).await.expect("Failed to delete task");
    store
        .delete_advertisement(item_id)
        .await
        .expect("Failed to delete advertisement");
    store.delete_user(seller_id).await.expect("Failed to delete user");
}
