use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::listing::{Advertisement, User};
use crate::models::prediction::PredictionResult;
use crate::models::task::{ModerationTask, NewModerationTask};

pub mod queries;
pub mod store;

pub use store::{Entity, EntityStore, StoreError};

/// Initialize PostgreSQL connection pool
pub async fn init_pool(config: &AppConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Postgres-backed entity store. Every call checks a connection out of the
/// pool and returns it when the query finishes.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn create_user(&self, user: &User) -> Result<User, StoreError> {
        queries::create_user(&self.pool, user).await
    }

    async fn get_user(&self, seller_id: i64) -> Result<User, StoreError> {
        queries::get_user(&self.pool, seller_id).await
    }

    async fn delete_user(&self, seller_id: i64) -> Result<User, StoreError> {
        queries::delete_user(&self.pool, seller_id).await
    }

    async fn create_advertisement(&self, ad: &Advertisement) -> Result<Advertisement, StoreError> {
        queries::create_advertisement(&self.pool, ad).await
    }

    async fn get_advertisement(&self, item_id: i64) -> Result<Advertisement, StoreError> {
        queries::get_advertisement(&self.pool, item_id).await
    }

    async fn advertisement_exists(&self, item_id: i64) -> Result<bool, StoreError> {
        queries::advertisement_exists(&self.pool, item_id).await
    }

    async fn delete_advertisement(&self, item_id: i64) -> Result<Advertisement, StoreError> {
        queries::delete_advertisement(&self.pool, item_id).await
    }

    async fn create_task(&self, task: &NewModerationTask) -> Result<ModerationTask, StoreError> {
        queries::create_task(&self.pool, task).await
    }

    async fn get_task(&self, task_id: i64) -> Result<ModerationTask, StoreError> {
        queries::get_task(&self.pool, task_id).await
    }

    async fn find_pending_task(&self, item_id: i64) -> Result<Option<ModerationTask>, StoreError> {
        queries::find_pending_task(&self.pool, item_id).await
    }

    async fn complete_task(
        &self,
        task_id: i64,
        result: &PredictionResult,
        retry_count: i32,
    ) -> Result<ModerationTask, StoreError> {
        queries::complete_task(&self.pool, task_id, result, retry_count).await
    }

    async fn fail_task(
        &self,
        task_id: i64,
        error_message: &str,
        retry_count: i32,
    ) -> Result<ModerationTask, StoreError> {
        queries::fail_task(&self.pool, task_id, error_message, retry_count).await
    }

    async fn delete_task(&self, task_id: i64) -> Result<ModerationTask, StoreError> {
        queries::delete_task(&self.pool, task_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
