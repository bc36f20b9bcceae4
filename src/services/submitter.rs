use std::sync::Arc;

use crate::db::{EntityStore, StoreError};
use crate::error::ModerationError;
use crate::models::prediction::{SubmitResponse, TASK_ACCEPTED, TASK_ALREADY_EXISTS};
use crate::models::task::{ModerationTask, NewModerationTask};
use crate::services::queue::{MessagePublisher, ModerationMessage};

/// Accepts async moderation requests: one pending task per advertisement,
/// one work message per created task.
pub struct TaskSubmitter {
    store: Arc<dyn EntityStore>,
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
    max_retries: i32,
}

impl TaskSubmitter {
    pub fn new(
        store: Arc<dyn EntityStore>,
        publisher: Arc<dyn MessagePublisher>,
        topic: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            publisher,
            topic: topic.into(),
            max_retries: i32::try_from(max_retries).unwrap_or(i32::MAX),
        }
    }

    pub async fn submit(&self, item_id: i64) -> Result<SubmitResponse, ModerationError> {
        if !self.store.advertisement_exists(item_id).await? {
            tracing::warn!(item_id, "Advertisement not found, submission rejected");
            return Err(ModerationError::NotFound(format!(
                "advertisement {item_id} not found"
            )));
        }

        if let Some(existing) = self.store.find_pending_task(item_id).await? {
            return Ok(Self::deduplicated(existing));
        }

        let task = match self
            .store
            .create_task(&NewModerationTask::pending(item_id, self.max_retries))
            .await
        {
            Ok(task) => task,
            // Lost a race against a concurrent submission for the same item.
            Err(StoreError::AlreadyExists { .. }) => {
                match self.store.find_pending_task(item_id).await? {
                    Some(existing) => return Ok(Self::deduplicated(existing)),
                    None => {
                        return Err(ModerationError::AlreadyExists(format!(
                            "moderation task for advertisement {item_id} could not be created"
                        )))
                    }
                }
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(task_id = task.id, item_id, "Moderation task created");
        metrics::counter!("moderation_tasks_submitted_total").increment(1);

        self.publish(&task).await;

        Ok(SubmitResponse {
            task_id: task.id,
            status: task.status,
            message: TASK_ACCEPTED.to_string(),
        })
    }

    /// Publish the work message. Failures leave the task pending and are
    /// only logged.
    async fn publish(&self, task: &ModerationTask) {
        let payload = match serde_json::to_string(&ModerationMessage::for_task(task.id)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(task_id = task.id, error = %e, "Failed to encode work message");
                return;
            }
        };

        if let Err(e) = self
            .publisher
            .publish(&self.topic, &task.id.to_string(), &payload)
            .await
        {
            metrics::counter!("moderation_publish_failures_total").increment(1);
            tracing::error!(
                task_id = task.id,
                item_id = task.item_id,
                topic = %self.topic,
                error = %e,
                "Failed to publish work message, task left pending"
            );
        }
    }

    fn deduplicated(existing: ModerationTask) -> SubmitResponse {
        tracing::warn!(
            task_id = existing.id,
            item_id = existing.item_id,
            "Moderation task already pending"
        );
        metrics::counter!("moderation_tasks_deduplicated_total").increment(1);

        SubmitResponse {
            task_id: existing.id,
            status: existing.status,
            message: TASK_ALREADY_EXISTS.to_string(),
        }
    }
}
