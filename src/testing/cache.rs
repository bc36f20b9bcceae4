use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::lock;
use crate::models::prediction::PredictionResult;
use crate::services::cache::{CacheError, ResultCache};
use crate::services::clock::Clock;

/// TTL cache evaluated against an injected clock.
pub struct MemoryCache {
    entries: Mutex<HashMap<i64, (PredictionResult, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    offline: AtomicBool,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365)),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Whether an entry is stored for `item_id`, expired or not.
    pub fn contains(&self, item_id: i64) -> bool {
        lock(&self.entries).contains_key(&item_id)
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(redis::RedisError::from((redis::ErrorKind::IoError, "cache offline")).into());
        }
        Ok(())
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, item_id: i64) -> Result<Option<PredictionResult>, CacheError> {
        self.check_online()?;
        let now = self.clock.now();
        let mut entries = lock(&self.entries);

        match entries.get(&item_id) {
            Some((result, expires_at)) if now < *expires_at => Ok(Some(*result)),
            Some(_) => {
                entries.remove(&item_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, item_id: i64, result: &PredictionResult) -> Result<(), CacheError> {
        self.check_online()?;
        let expires_at = self.clock.now() + self.ttl;
        lock(&self.entries).insert(item_id, (*result, expires_at));
        Ok(())
    }

    async fn invalidate(&self, item_id: i64) -> Result<(), CacheError> {
        self.check_online()?;
        lock(&self.entries).remove(&item_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check_online()
    }
}
