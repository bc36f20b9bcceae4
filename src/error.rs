use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::StoreError;
use crate::services::cache::CacheError;
use crate::services::inference::InferenceError;
use crate::services::queue::QueueError;

/// Failure taxonomy shared by the submitter, the worker and the sync handlers.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    /// Referenced advertisement, user or task does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate create that could not be resolved to an existing record.
    #[error("{0}")]
    AlreadyExists(String),

    /// Task is no longer pending.
    #[error("{0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Model is not initialized")]
    Uninitialized,

    /// Store, broker, cache or model I/O failure; retryable.
    #[error("{0}")]
    Transient(String),

    /// Retry budget exhausted.
    #[error("All {attempts} attempts failed: {last_error}")]
    Terminal { attempts: u32, last_error: String },
}

impl ModerationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModerationError::NotFound(_))
    }
}

impl From<StoreError> for ModerationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ModerationError::NotFound(err.to_string()),
            StoreError::AlreadyExists { .. } => ModerationError::AlreadyExists(err.to_string()),
            StoreError::InvalidState { .. } => ModerationError::Conflict(err.to_string()),
            StoreError::Database(_) | StoreError::Corrupt(_) => {
                ModerationError::Transient(err.to_string())
            }
        }
    }
}

impl From<InferenceError> for ModerationError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Uninitialized => ModerationError::Uninitialized,
            other => ModerationError::Transient(other.to_string()),
        }
    }
}

impl From<QueueError> for ModerationError {
    fn from(err: QueueError) -> Self {
        ModerationError::Transient(err.to_string())
    }
}

impl From<CacheError> for ModerationError {
    fn from(err: CacheError) -> Self {
        ModerationError::Transient(err.to_string())
    }
}

impl From<garde::Report> for ModerationError {
    fn from(report: garde::Report) -> Self {
        ModerationError::Validation(report.to_string())
    }
}

impl IntoResponse for ModerationError {
    fn into_response(self) -> Response {
        let status = match &self {
            ModerationError::NotFound(_) => StatusCode::NOT_FOUND,
            ModerationError::AlreadyExists(_) | ModerationError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            ModerationError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ModerationError::Uninitialized => StatusCode::SERVICE_UNAVAILABLE,
            ModerationError::Transient(_) | ModerationError::Terminal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Entity;

    #[test]
    fn store_not_found_keeps_its_category() {
        let err: ModerationError = StoreError::not_found(Entity::Advertisement, 5).into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "advertisement 5 not found");
    }

    #[test]
    fn uninitialized_engine_maps_to_service_unavailable() {
        let err: ModerationError = InferenceError::Uninitialized.into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn internal_errors_hide_their_cause() {
        let response = ModerationError::Transient("connection reset".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
