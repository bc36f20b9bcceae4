use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::lock;
use crate::db::{Entity, EntityStore, StoreError};
use crate::models::listing::{Advertisement, User};
use crate::models::prediction::PredictionResult;
use crate::models::task::{ModerationTask, NewModerationTask, TaskStatus};

#[derive(Default)]
struct Tables {
    users: HashMap<i64, User>,
    advertisements: HashMap<i64, Advertisement>,
    tasks: BTreeMap<i64, ModerationTask>,
    next_task_id: i64,
}

/// Entity store held in memory. Enforces the same rules as the Postgres
/// schema: unique keys, a known seller per advertisement, at most one pending
/// task per advertisement and no updates to terminal tasks.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    offline: AtomicBool,
    hidden_pending_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Answer the next `lookups` pending-task searches with `None`, the view
    /// of a submitter racing another one that has not committed yet.
    pub fn hide_pending_tasks(&self, lookups: usize) {
        self.hidden_pending_lookups.store(lookups, Ordering::SeqCst);
    }

    pub fn tasks(&self) -> Vec<ModerationTask> {
        lock(&self.tables).tasks.values().cloned().collect()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn finish_task(
        &self,
        task_id: i64,
        update: impl FnOnce(&mut ModerationTask),
    ) -> Result<ModerationTask, StoreError> {
        self.check_online()?;
        let mut tables = lock(&self.tables);
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::not_found(Entity::ModerationTask, task_id))?;

        if task.status.is_terminal() {
            return Err(StoreError::InvalidState {
                task_id,
                status: task.status,
            });
        }

        let now = Utc::now();
        update(task);
        task.updated_at = now;
        task.processed_at = Some(now);
        Ok(task.clone())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<User, StoreError> {
        self.check_online()?;
        let mut tables = lock(&self.tables);
        if tables.users.contains_key(&user.seller_id) {
            return Err(StoreError::AlreadyExists {
                entity: Entity::User,
                key: user.seller_id,
            });
        }
        tables.users.insert(user.seller_id, user.clone());
        Ok(user.clone())
    }

    async fn get_user(&self, seller_id: i64) -> Result<User, StoreError> {
        self.check_online()?;
        lock(&self.tables)
            .users
            .get(&seller_id)
            .cloned()
            .ok_or(StoreError::not_found(Entity::User, seller_id))
    }

    async fn delete_user(&self, seller_id: i64) -> Result<User, StoreError> {
        self.check_online()?;
        lock(&self.tables)
            .users
            .remove(&seller_id)
            .ok_or(StoreError::not_found(Entity::User, seller_id))
    }

    async fn create_advertisement(&self, ad: &Advertisement) -> Result<Advertisement, StoreError> {
        self.check_online()?;
        let mut tables = lock(&self.tables);
        if !tables.users.contains_key(&ad.seller_id) {
            return Err(StoreError::not_found(Entity::User, ad.seller_id));
        }
        if tables.advertisements.contains_key(&ad.item_id) {
            return Err(StoreError::AlreadyExists {
                entity: Entity::Advertisement,
                key: ad.item_id,
            });
        }
        tables.advertisements.insert(ad.item_id, ad.clone());
        Ok(ad.clone())
    }

    async fn get_advertisement(&self, item_id: i64) -> Result<Advertisement, StoreError> {
        self.check_online()?;
        lock(&self.tables)
            .advertisements
            .get(&item_id)
            .cloned()
            .ok_or(StoreError::not_found(Entity::Advertisement, item_id))
    }

    async fn advertisement_exists(&self, item_id: i64) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(lock(&self.tables).advertisements.contains_key(&item_id))
    }

    async fn delete_advertisement(&self, item_id: i64) -> Result<Advertisement, StoreError> {
        self.check_online()?;
        lock(&self.tables)
            .advertisements
            .remove(&item_id)
            .ok_or(StoreError::not_found(Entity::Advertisement, item_id))
    }

    async fn create_task(&self, task: &NewModerationTask) -> Result<ModerationTask, StoreError> {
        self.check_online()?;
        let mut tables = lock(&self.tables);
        let pending_exists = tables
            .tasks
            .values()
            .any(|t| t.item_id == task.item_id && t.status == TaskStatus::Pending);
        if pending_exists {
            return Err(StoreError::AlreadyExists {
                entity: Entity::ModerationTask,
                key: task.item_id,
            });
        }

        tables.next_task_id += 1;
        let now = Utc::now();
        let created = ModerationTask {
            id: tables.next_task_id,
            item_id: task.item_id,
            status: TaskStatus::Pending,
            is_violation: None,
            probability: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            retry_count: 0,
            max_retries: task.max_retries,
        };
        tables.tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_task(&self, task_id: i64) -> Result<ModerationTask, StoreError> {
        self.check_online()?;
        lock(&self.tables)
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::not_found(Entity::ModerationTask, task_id))
    }

    async fn find_pending_task(&self, item_id: i64) -> Result<Option<ModerationTask>, StoreError> {
        self.check_online()?;
        let hidden = self
            .hidden_pending_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(None);
        }
        Ok(lock(&self.tables)
            .tasks
            .values()
            .find(|t| t.item_id == item_id && t.status == TaskStatus::Pending)
            .cloned())
    }

    async fn complete_task(
        &self,
        task_id: i64,
        result: &PredictionResult,
        retry_count: i32,
    ) -> Result<ModerationTask, StoreError> {
        self.finish_task(task_id, |task| {
            task.status = TaskStatus::Completed;
            task.is_violation = Some(result.is_violation);
            task.probability = Some(result.probability);
            task.retry_count = retry_count;
        })
    }

    async fn fail_task(
        &self,
        task_id: i64,
        error_message: &str,
        retry_count: i32,
    ) -> Result<ModerationTask, StoreError> {
        self.finish_task(task_id, |task| {
            task.status = TaskStatus::Failed;
            task.error_message = Some(error_message.to_string());
            task.retry_count = retry_count;
        })
    }

    async fn delete_task(&self, task_id: i64) -> Result<ModerationTask, StoreError> {
        self.check_online()?;
        lock(&self.tables)
            .tasks
            .remove(&task_id)
            .ok_or(StoreError::not_found(Entity::ModerationTask, task_id))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_pending_task_for_an_item_is_rejected() {
        let store = MemoryStore::new();
        let first = store.create_task(&NewModerationTask::pending(5, 3)).await.unwrap();

        let err = store
            .create_task(&NewModerationTask::pending(5, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        store.fail_task(first.id, "boom", 2).await.unwrap();
        let second = store.create_task(&NewModerationTask::pending(5, 3)).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn terminal_tasks_reject_further_updates() {
        let store = MemoryStore::new();
        let task = store.create_task(&NewModerationTask::pending(1, 3)).await.unwrap();
        let verdict = PredictionResult {
            is_violation: false,
            probability: 0.1,
        };

        let done = store.complete_task(task.id, &verdict, 0).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.processed_at.is_some());

        let err = store.fail_task(task.id, "late", 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidState { status: TaskStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn hidden_pending_task_reappears_after_the_lookups_run_out() {
        let store = MemoryStore::new();
        let task = store.create_task(&NewModerationTask::pending(4, 3)).await.unwrap();
        store.hide_pending_tasks(1);

        assert_eq!(store.find_pending_task(4).await.unwrap(), None);
        assert_eq!(store.find_pending_task(4).await.unwrap(), Some(task));
    }

    #[tokio::test]
    async fn advertisement_requires_known_seller() {
        let store = MemoryStore::new();
        let ad = Advertisement {
            item_id: 1,
            seller_id: 9,
            name: "Lamp".to_string(),
            description: String::new(),
            category: 2,
            images_qty: 1,
            is_closed: false,
        };

        let err = store.create_advertisement(&ad).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
