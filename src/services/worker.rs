use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::db::{EntityStore, StoreError};
use crate::error::ModerationError;
use crate::models::listing::ListingFeatures;
use crate::models::task::{ModerationTask, TaskStatus};
use crate::services::clock::Sleeper;
use crate::services::inference::Classifier;
use crate::services::queue::{
    DeadLetterMessage, Delivery, MessagePublisher, ModerationMessage, QueueConsumer, QueueError,
};

/// Backoff before attempt `attempt + 1`: `min(2^attempt s, cap)`.
pub fn retry_delay(attempt: u32, cap: Duration) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(cap)
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub dlq_topic: String,
    /// Attempts per message, including the first one. Only used until the
    /// task is loaded; from then on the task's stored budget applies.
    pub max_retries: u32,
    pub max_retry_delay: Duration,
    /// Pause after a broker error before polling again.
    pub error_backoff: Duration,
}

/// Terminal outcome of one delivered message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Task classified and offset committed.
    Completed { task: ModerationTask, attempts: u32 },
    /// Redelivery of a task that is no longer pending; committed untouched.
    Skipped { task_id: i64, status: TaskStatus },
    /// Dead-lettered and committed.
    Escalated {
        task_id: Option<i64>,
        attempts: u32,
        error: String,
    },
    /// Dead-letter publish failed; offset left uncommitted for redelivery.
    Deferred { task_id: Option<i64>, error: String },
}

enum Attempt {
    Completed(ModerationTask),
    AlreadyTerminal(TaskStatus),
}

/// What earlier attempts learned about the task behind a message.
struct TaskContext {
    item_id: Option<i64>,
    /// Attempt budget; the stored task's own once it has been loaded.
    max_attempts: u32,
}

enum AttemptError {
    /// The task id itself does not resolve; retrying cannot help.
    TaskMissing(ModerationError),
    Retryable(ModerationError),
}

/// Sequential consumer of the moderation topic.
///
/// Retries happen in-process: the next message is not polled until the
/// current one reaches a terminal outcome.
pub struct ModerationWorker {
    store: Arc<dyn EntityStore>,
    classifier: Arc<dyn Classifier>,
    consumer: Arc<dyn QueueConsumer>,
    publisher: Arc<dyn MessagePublisher>,
    sleeper: Arc<dyn Sleeper>,
    settings: WorkerSettings,
}

impl ModerationWorker {
    pub fn new(
        store: Arc<dyn EntityStore>,
        classifier: Arc<dyn Classifier>,
        consumer: Arc<dyn QueueConsumer>,
        publisher: Arc<dyn MessagePublisher>,
        sleeper: Arc<dyn Sleeper>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            classifier,
            consumer,
            publisher,
            sleeper,
            settings,
        }
    }

    /// Poll until `shutdown` flips to `true`. The in-flight message is always
    /// finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(dlq_topic = %self.settings.dlq_topic, "Worker ready, starting message loop");

        loop {
            if *shutdown.borrow_and_update() {
                tracing::info!("Shutdown requested, stopping worker loop");
                break;
            }

            match self.process_next().await {
                Ok(Some(outcome @ Outcome::Deferred { .. })) => {
                    tracing::warn!(outcome = ?outcome, "Message left pending, backing off");
                    self.back_off(&mut shutdown).await;
                }
                Ok(Some(outcome)) => {
                    tracing::debug!(outcome = ?outcome, "Message processed, polling next");
                }
                Ok(None) => {
                    tracing::trace!("No messages available");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error processing message, will retry");
                    self.back_off(&mut shutdown).await;
                }
            }
        }
    }

    /// Sleep `error_backoff`, cut short by a shutdown request.
    async fn back_off(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = self.sleeper.sleep(self.settings.error_backoff) => {}
            Ok(()) = shutdown.changed() => {}
        }
    }

    /// Process the next message from the queue.
    /// Returns `Ok(None)` when the poll came back empty.
    pub async fn process_next(&self) -> Result<Option<Outcome>, WorkerError> {
        let Some(delivery) = self.consumer.poll().await? else {
            return Ok(None);
        };
        self.handle(&delivery).await.map(Some)
    }

    /// Drive one delivered message to a terminal outcome.
    pub async fn handle(&self, delivery: &Delivery) -> Result<Outcome, WorkerError> {
        let message: ModerationMessage = match serde_json::from_str(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    partition = %delivery.partition,
                    offset = %delivery.offset,
                    error = %e,
                    "Undecodable message"
                );
                return self
                    .escalate(delivery, None, None, 0, format!("Malformed message: {e}"))
                    .await;
            }
        };

        let task_id = message.item_id;
        let started = Instant::now();
        let mut context = TaskContext {
            item_id: None,
            max_attempts: self.settings.max_retries.max(1),
        };
        let mut attempt = 1;

        tracing::info!(task_id, partition = %delivery.partition, offset = %delivery.offset, "Processing moderation task");

        loop {
            match self.attempt(task_id, attempt, &mut context).await {
                Ok(Attempt::Completed(task)) => {
                    self.consumer.commit(delivery).await?;

                    metrics::counter!("moderation_tasks_completed_total").increment(1);
                    metrics::histogram!("moderation_processing_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::info!(
                        task_id,
                        item_id = task.item_id,
                        is_violation = ?task.is_violation,
                        probability = ?task.probability,
                        attempts = attempt,
                        "Moderation task completed"
                    );

                    return Ok(Outcome::Completed { task, attempts: attempt });
                }
                Ok(Attempt::AlreadyTerminal(status)) => {
                    tracing::warn!(task_id, status = %status, "Task already processed, acknowledging redelivery");
                    self.consumer.commit(delivery).await?;
                    return Ok(Outcome::Skipped { task_id, status });
                }
                Err(AttemptError::TaskMissing(e)) => {
                    tracing::error!(task_id, error = %e, "Task not found, dead-lettering without retry");
                    return self
                        .escalate(delivery, None, None, attempt, e.to_string())
                        .await;
                }
                Err(AttemptError::Retryable(e)) if attempt < context.max_attempts => {
                    let delay = retry_delay(attempt, self.settings.max_retry_delay);
                    tracing::warn!(
                        task_id,
                        attempt,
                        max_attempts = context.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Retryable(e)) => {
                    let terminal = ModerationError::Terminal {
                        attempts: attempt,
                        last_error: e.to_string(),
                    };
                    tracing::error!(task_id, error = %terminal, "Retry budget exhausted, sending to DLQ");
                    return self
                        .escalate(delivery, Some(task_id), context.item_id, attempt, e.to_string())
                        .await;
                }
            }
        }
    }

    /// Steps 2-6: resolve task, advertisement and seller, classify, record.
    async fn attempt(
        &self,
        task_id: i64,
        attempt: u32,
        context: &mut TaskContext,
    ) -> Result<Attempt, AttemptError> {
        let task = self.store.get_task(task_id).await.map_err(|e| {
            if e.is_not_found() {
                AttemptError::TaskMissing(e.into())
            } else {
                AttemptError::Retryable(e.into())
            }
        })?;
        context.item_id = Some(task.item_id);
        context.max_attempts = u32::try_from(task.max_retries).unwrap_or(1).max(1);

        if task.status.is_terminal() {
            return Ok(Attempt::AlreadyTerminal(task.status));
        }

        let advertisement = self
            .store
            .get_advertisement(task.item_id)
            .await
            .map_err(retryable)?;
        let user = self
            .store
            .get_user(advertisement.seller_id)
            .await
            .map_err(retryable)?;

        let listing = ListingFeatures::from_entities(&advertisement, &user);
        let result = self.classifier.classify(&listing).map_err(retryable)?;

        let retry_count = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        match self.store.complete_task(task.id, &result, retry_count).await {
            Ok(task) => Ok(Attempt::Completed(task)),
            Err(StoreError::InvalidState { status, .. }) => Ok(Attempt::AlreadyTerminal(status)),
            Err(e) => Err(retryable(e)),
        }
    }

    /// Publish to the DLQ, commit, then mark the task failed (when one is
    /// given). A failed DLQ publish leaves the offset uncommitted.
    async fn escalate(
        &self,
        delivery: &Delivery,
        task_to_fail: Option<i64>,
        item_id: Option<i64>,
        attempts: u32,
        error: String,
    ) -> Result<Outcome, WorkerError> {
        let dead_letter = DeadLetterMessage {
            item_id,
            error: format!("All retries failed: {error}"),
            original_message: delivery.payload.clone(),
        };
        let payload = serde_json::to_string(&dead_letter)?;
        let key = task_to_fail
            .map(|id| id.to_string())
            .unwrap_or_else(|| delivery.offset.clone());

        if let Err(e) = self
            .publisher
            .publish(&self.settings.dlq_topic, &key, &payload)
            .await
        {
            tracing::error!(
                task_id = ?task_to_fail,
                dlq_topic = %self.settings.dlq_topic,
                error = %e,
                "Failed to publish to DLQ, leaving message uncommitted"
            );
            return Ok(Outcome::Deferred {
                task_id: task_to_fail,
                error: e.to_string(),
            });
        }

        self.consumer.commit(delivery).await?;
        metrics::counter!("moderation_dlq_messages_total").increment(1);
        tracing::info!(task_id = ?task_to_fail, attempts, "Message sent to DLQ");

        if let Some(task_id) = task_to_fail {
            let retry_count = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
            match self.store.fail_task(task_id, &error, retry_count).await {
                Ok(_) => metrics::counter!("moderation_tasks_failed_total").increment(1),
                Err(e) => tracing::error!(task_id, error = %e, "Failed to mark task as failed"),
            }
        }

        Ok(Outcome::Escalated {
            task_id: task_to_fail,
            attempts,
            error,
        })
    }
}

fn retryable(err: impl Into<ModerationError>) -> AttemptError {
    AttemptError::Retryable(err.into())
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
