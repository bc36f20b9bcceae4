use async_trait::async_trait;
use strum::Display;

use crate::models::listing::{Advertisement, User};
use crate::models::prediction::PredictionResult;
use crate::models::task::{ModerationTask, NewModerationTask, TaskStatus};

/// Kind of record a store error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Entity {
    #[strum(serialize = "user")]
    User,
    #[strum(serialize = "advertisement")]
    Advertisement,
    #[strum(serialize = "moderation task")]
    ModerationTask,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {key} not found")]
    NotFound { entity: Entity, key: i64 },

    #[error("{entity} {key} already exists")]
    AlreadyExists { entity: Entity, key: i64 },

    #[error("moderation task {task_id} is already {status}")]
    InvalidState { task_id: i64, status: TaskStatus },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(entity: Entity, key: i64) -> Self {
        StoreError::NotFound { entity, key }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Durable storage for users, advertisements and moderation tasks.
///
/// Single-record lookups return `StoreError::NotFound` on a miss; `find_*`
/// lookups return `Ok(None)`. Implementations acquire a connection per call.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<User, StoreError>;
    async fn get_user(&self, seller_id: i64) -> Result<User, StoreError>;
    async fn delete_user(&self, seller_id: i64) -> Result<User, StoreError>;

    /// Fails with `NotFound` for an unknown seller and `AlreadyExists` for a
    /// duplicate `item_id`.
    async fn create_advertisement(&self, ad: &Advertisement) -> Result<Advertisement, StoreError>;
    async fn get_advertisement(&self, item_id: i64) -> Result<Advertisement, StoreError>;
    async fn advertisement_exists(&self, item_id: i64) -> Result<bool, StoreError>;
    async fn delete_advertisement(&self, item_id: i64) -> Result<Advertisement, StoreError>;

    /// Inserts a pending task. A second pending task for the same `item_id`
    /// is rejected with `AlreadyExists`.
    async fn create_task(&self, task: &NewModerationTask) -> Result<ModerationTask, StoreError>;
    async fn get_task(&self, task_id: i64) -> Result<ModerationTask, StoreError>;
    async fn find_pending_task(&self, item_id: i64) -> Result<Option<ModerationTask>, StoreError>;

    /// Pending → completed. Terminal tasks are rejected with `InvalidState`.
    async fn complete_task(
        &self,
        task_id: i64,
        result: &PredictionResult,
        retry_count: i32,
    ) -> Result<ModerationTask, StoreError>;

    /// Pending → failed. Terminal tasks are rejected with `InvalidState`.
    async fn fail_task(
        &self,
        task_id: i64,
        error_message: &str,
        retry_count: i32,
    ) -> Result<ModerationTask, StoreError>;

    async fn delete_task(&self, task_id: i64) -> Result<ModerationTask, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
