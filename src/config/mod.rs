use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Redis connection string for the result cache
    pub redis_url: String,

    /// Redis connection string for the work queue streams; falls back to `redis_url`
    #[serde(default)]
    pub broker_url: Option<String>,

    /// Input topic carrying task ids
    #[serde(default = "default_moderation_topic")]
    pub moderation_topic: String,

    /// Dead-letter topic for messages that exhausted their retries
    #[serde(default = "default_moderation_dlq_topic")]
    pub moderation_dlq_topic: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Name of this worker inside the consumer group. Must be stable across
    /// restarts and unique per replica.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Idle time after which another consumer's unacknowledged entry is claimed
    #[serde(default = "default_claim_min_idle_ms")]
    pub claim_min_idle_ms: u64,

    /// Number of partitions per topic
    #[serde(default = "default_queue_partitions")]
    pub queue_partitions: usize,

    /// Partitions consumed by this worker instance (comma-separated); all when unset
    #[serde(default)]
    pub worker_partitions: Option<Vec<usize>>,

    /// Processing attempts per message before dead-lettering
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound of the backoff between attempts, in seconds
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// How long a broker poll blocks when the topic is idle
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// TTL of cached predictions, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Location of the model coefficients (JSON)
    #[serde(default = "default_model_path")]
    pub model_path: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_db_min_connections() -> u32 {
    5
}

fn default_db_acquire_timeout_secs() -> u64 {
    10
}

fn default_moderation_topic() -> String {
    "moderation".to_string()
}

fn default_moderation_dlq_topic() -> String {
    "moderation_dlq".to_string()
}

fn default_consumer_group() -> String {
    "moderation_workers".to_string()
}

fn default_consumer_name() -> String {
    "moderation-worker".to_string()
}

fn default_claim_min_idle_ms() -> u64 {
    60_000
}

fn default_queue_partitions() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_retry_delay_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_model_path() -> String {
    "model.json".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn broker_url(&self) -> &str {
        self.broker_url.as_deref().unwrap_or(&self.redis_url)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_min_idle(&self) -> Duration {
        Duration::from_millis(self.claim_min_idle_ms)
    }

    /// Partitions this worker should consume. Out-of-range entries are
    /// dropped; an assignment left empty is an error.
    pub fn assigned_partitions(&self) -> Result<Vec<usize>, ConfigError> {
        let partitions: Vec<usize> = match &self.worker_partitions {
            Some(list) if !list.is_empty() => list
                .iter()
                .copied()
                .filter(|p| *p < self.queue_partitions)
                .collect(),
            _ => (0..self.queue_partitions).collect(),
        };

        if partitions.is_empty() {
            return Err(ConfigError::NoPartitions {
                requested: self.worker_partitions.clone().unwrap_or_default(),
                available: self.queue_partitions,
            });
        }
        Ok(partitions)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Worker partitions {requested:?} select none of the {available} queue partitions")]
    NoPartitions {
        requested: Vec<usize>,
        available: usize,
    },
}
