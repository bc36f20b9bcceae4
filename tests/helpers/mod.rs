//! In-process wiring of the moderation pipeline for tests
#![allow(dead_code)]

use ad_moderation::app_state::AppState;
use ad_moderation::db::EntityStore;
use ad_moderation::models::listing::{Advertisement, User};
use ad_moderation::services::clock::Sleeper;
use ad_moderation::services::inference::{InferenceEngine, LogisticModel};
use ad_moderation::services::prediction::PredictionService;
use ad_moderation::services::queue::DeadLetterMessage;
use ad_moderation::services::submitter::TaskSubmitter;
use ad_moderation::services::worker::{ModerationWorker, WorkerSettings};
use ad_moderation::testing::{ManualClock, MemoryCache, MemoryQueue, MemoryStore, RecordingSleeper};
use std::sync::Arc;
use std::time::Duration;

pub const TOPIC: &str = "moderation";
pub const DLQ_TOPIC: &str = "moderation_dlq";
pub const PARTITIONS: usize = 2;
pub const CACHE_TTL: Duration = Duration::from_secs(30 * 60);
pub const WORKER: &str = "worker-1";
pub const CLAIM_IDLE_SECS: i64 = 60;
pub const ERROR_BACKOFF: Duration = Duration::from_millis(10);

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: MemoryQueue,
    pub cache: Arc<MemoryCache>,
    pub clock: Arc<ManualClock>,
    pub sleeper: Arc<RecordingSleeper>,
    pub engine: Arc<InferenceEngine>,
    pub submitter: TaskSubmitter,
    pub worker: ModerationWorker,
    pub predictions: PredictionService,
    pub settings: WorkerSettings,
    pub max_retries: u32,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ready_engine(), 3, Duration::from_secs(10))
    }

    pub fn with_retries(max_retries: u32, max_retry_delay: Duration) -> Self {
        Self::build(ready_engine(), max_retries, max_retry_delay)
    }

    /// Pipeline whose engine was never initialized.
    pub fn without_model() -> Self {
        Self::build(
            Arc::new(InferenceEngine::new("never-loaded.json")),
            3,
            Duration::from_secs(10),
        )
    }

    fn build(engine: Arc<InferenceEngine>, max_retries: u32, max_retry_delay: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let queue = MemoryQueue::with_clock(
            PARTITIONS,
            clock.clone(),
            chrono::Duration::seconds(CLAIM_IDLE_SECS),
        );
        let cache = Arc::new(MemoryCache::new(clock.clone(), CACHE_TTL));
        let sleeper = Arc::new(RecordingSleeper::new());

        let submitter = TaskSubmitter::new(
            store.clone(),
            Arc::new(queue.clone()),
            TOPIC,
            max_retries,
        );
        let settings = WorkerSettings {
            dlq_topic: DLQ_TOPIC.to_string(),
            max_retries,
            max_retry_delay,
            error_backoff: ERROR_BACKOFF,
        };
        let worker = ModerationWorker::new(
            store.clone(),
            engine.clone(),
            Arc::new(queue.consumer(TOPIC, WORKER)),
            Arc::new(queue.clone()),
            sleeper.clone(),
            settings.clone(),
        );
        let predictions = PredictionService::new(store.clone(), cache.clone(), engine.clone());

        Self {
            store,
            queue,
            cache,
            clock,
            sleeper,
            engine,
            submitter,
            worker,
            predictions,
            settings,
            max_retries,
        }
    }

    /// Another member of the consumer group over the same doubles.
    pub fn worker_with(&self, consumer: &str, sleeper: Arc<dyn Sleeper>) -> ModerationWorker {
        ModerationWorker::new(
            self.store.clone(),
            self.engine.clone(),
            Arc::new(self.queue.consumer(TOPIC, consumer)),
            Arc::new(self.queue.clone()),
            sleeper,
            self.settings.clone(),
        )
    }

    pub async fn seed(&self, user: User, listings: &[Advertisement]) {
        self.store.create_user(&user).await.unwrap();
        for listing in listings {
            self.store.create_advertisement(listing).await.unwrap();
        }
    }

    /// Router state over the same doubles.
    pub fn state(&self) -> AppState {
        AppState::new(
            self.store.clone(),
            self.cache.clone(),
            Arc::new(self.queue.clone()),
            self.engine.clone(),
            TOPIC,
            self.max_retries,
        )
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterMessage> {
        self.queue
            .messages(DLQ_TOPIC)
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }
}

fn ready_engine() -> Arc<InferenceEngine> {
    Arc::new(InferenceEngine::with_model(LogisticModel::default()).unwrap())
}
