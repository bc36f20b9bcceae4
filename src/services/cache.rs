use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::prediction::PredictionResult;

const KEY_PREFIX: &str = "advertisement:item:";

/// Cache key of a stored prediction.
pub fn cache_key(item_id: i64) -> String {
    format!("{KEY_PREFIX}{item_id}")
}

/// Read-side cache of computed predictions.
///
/// Entries are advisory: callers treat every error as a miss.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, item_id: i64) -> Result<Option<PredictionResult>, CacheError>;
    async fn put(&self, item_id: i64, result: &PredictionResult) -> Result<(), CacheError>;
    async fn invalidate(&self, item_id: i64) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

/// Redis-backed prediction cache using `SET EX` for expiry.
pub struct RedisResultCache {
    client: redis::Client,
    ttl: Duration,
}

impl RedisResultCache {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, ttl })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    async fn get(&self, item_id: i64) -> Result<Option<PredictionResult>, CacheError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(cache_key(item_id)).await?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, item_id: i64, result: &PredictionResult) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(result)?;
        conn.set_ex::<_, _, ()>(cache_key(item_id), payload, self.ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn invalidate(&self, item_id: i64) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(cache_key(item_id)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
