use garde::Validate;
use std::sync::Arc;

use crate::db::EntityStore;
use crate::error::ModerationError;
use crate::models::listing::{Advertisement, ListingFeatures};
use crate::models::prediction::{PredictionRequest, PredictionResult};
use crate::models::task::ModerationTask;
use crate::services::cache::ResultCache;
use crate::services::inference::Classifier;

/// Synchronous read paths: direct prediction, cache-aside prediction by
/// item id, task lookup and advertisement closure.
pub struct PredictionService {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn ResultCache>,
    classifier: Arc<dyn Classifier>,
}

impl PredictionService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn ResultCache>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            store,
            cache,
            classifier,
        }
    }

    /// Classify a listing given in full. Touches neither store nor cache.
    pub fn predict(&self, request: PredictionRequest) -> Result<PredictionResult, ModerationError> {
        request.validate()?;
        if !self.classifier.is_ready() {
            return Err(ModerationError::Uninitialized);
        }

        let item_id = request.item_id;
        let result = self.classifier.classify(&ListingFeatures::from(request))?;
        tracing::info!(
            item_id,
            is_violation = result.is_violation,
            probability = result.probability,
            "Prediction computed"
        );
        Ok(result)
    }

    /// Cache-aside prediction for a stored advertisement.
    pub async fn predict_cached(&self, item_id: i64) -> Result<PredictionResult, ModerationError> {
        match self.cache.get(item_id).await {
            Ok(Some(hit)) => {
                metrics::counter!("moderation_cache_hits_total").increment(1);
                tracing::debug!(item_id, "Prediction served from cache");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(item_id, error = %e, "Cache read failed, computing prediction"),
        }
        metrics::counter!("moderation_cache_misses_total").increment(1);

        let advertisement = self.store.get_advertisement(item_id).await?;
        let user = self.store.get_user(advertisement.seller_id).await?;
        let result = self
            .classifier
            .classify(&ListingFeatures::from_entities(&advertisement, &user))?;

        if let Err(e) = self.cache.put(item_id, &result).await {
            tracing::warn!(item_id, error = %e, "Cache write failed");
        }

        tracing::info!(
            item_id,
            is_violation = result.is_violation,
            probability = result.probability,
            "Prediction computed"
        );
        Ok(result)
    }

    pub async fn moderation_result(&self, task_id: i64) -> Result<ModerationTask, ModerationError> {
        Ok(self.store.get_task(task_id).await?)
    }

    /// Delete the advertisement, then drop its cached prediction.
    pub async fn close_advertisement(&self, item_id: i64) -> Result<Advertisement, ModerationError> {
        let closed = self.store.delete_advertisement(item_id).await?;

        if let Err(e) = self.cache.invalidate(item_id).await {
            tracing::warn!(item_id, error = %e, "Cache invalidation failed");
        }

        tracing::info!(item_id, seller_id = closed.seller_id, "Advertisement closed");
        Ok(closed)
    }
}
