use axum::extract::{Path, State};
use axum::Json;

use crate::app_state::AppState;
use crate::error::ModerationError;
use crate::models::listing::Advertisement;
use crate::models::prediction::{ItemRequest, PredictionRequest, PredictionResult, SubmitResponse};
use crate::models::task::ModerationTask;
use garde::Validate;

/// POST /predict: classify a listing given in the request body.
pub async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResult>, ModerationError> {
    state.predictions.predict(request).map(Json)
}

/// POST /simple_predict: cached prediction for a stored advertisement.
pub async fn simple_predict(
    State(state): State<AppState>,
    Json(request): Json<ItemRequest>,
) -> Result<Json<PredictionResult>, ModerationError> {
    request.validate()?;
    let result = state.predictions.predict_cached(request.item_id).await?;
    Ok(Json(result))
}

/// POST /async_predict: queue a moderation task.
pub async fn async_predict(
    State(state): State<AppState>,
    Json(request): Json<ItemRequest>,
) -> Result<Json<SubmitResponse>, ModerationError> {
    request.validate()?;
    let response = state.submitter.submit(request.item_id).await?;
    Ok(Json(response))
}

/// GET /moderation_result/{task_id}
pub async fn moderation_result(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Json<ModerationTask>, ModerationError> {
    let task = state.predictions.moderation_result(task_id).await?;
    Ok(Json(task))
}

/// POST /close/{item_id}: remove an advertisement and its cached prediction.
pub async fn close(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<Json<Advertisement>, ModerationError> {
    let closed = state.predictions.close_advertisement(item_id).await?;
    Ok(Json(closed))
}
