use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Status of a moderation task in the async pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

/// A moderation task as stored in `moderation_results`.
///
/// `is_violation`/`probability` are set only once the task is completed and
/// `error_message` only once it has failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationTask {
    pub id: i64,
    pub item_id: i64,
    pub status: TaskStatus,
    pub is_violation: Option<bool>,
    pub probability: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
}

pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Insert payload for a fresh pending task.
#[derive(Debug, Clone)]
pub struct NewModerationTask {
    pub item_id: i64,
    pub max_retries: i32,
}

impl NewModerationTask {
    pub fn pending(item_id: i64, max_retries: i32) -> Self {
        Self {
            item_id,
            max_retries: max_retries.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_column_text() {
        for status in [TaskStatus::Pending, TaskStatus::Completed, TaskStatus::Failed] {
            let text = status.to_string();
            assert_eq!(text.parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!(TaskStatus::Completed.to_string(), "completed");
        assert!("processing".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn new_task_keeps_at_least_one_attempt() {
        assert_eq!(NewModerationTask::pending(7, 0).max_retries, 1);
        assert_eq!(NewModerationTask::pending(7, DEFAULT_MAX_RETRIES).max_retries, 3);
    }

    #[test]
    fn status_serializes_in_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }
}
