use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod health;
pub mod metrics;
pub mod moderation;

/// API routes without the metrics endpoint or middleware layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/predict", post(moderation::predict))
        .route("/simple_predict", post(moderation::simple_predict))
        .route("/async_predict", post(moderation::async_predict))
        .route(
            "/moderation_result/{task_id}",
            get(moderation::moderation_result),
        )
        .route("/close/{item_id}", post(moderation::close))
        .with_state(state)
}
