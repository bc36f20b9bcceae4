use std::sync::Arc;

use crate::db::EntityStore;
use crate::services::{
    cache::ResultCache,
    inference::Classifier,
    prediction::PredictionService,
    queue::MessagePublisher,
    submitter::TaskSubmitter,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub cache: Arc<dyn ResultCache>,
    pub publisher: Arc<dyn MessagePublisher>,
    pub classifier: Arc<dyn Classifier>,
    pub submitter: Arc<TaskSubmitter>,
    pub predictions: Arc<PredictionService>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn ResultCache>,
        publisher: Arc<dyn MessagePublisher>,
        classifier: Arc<dyn Classifier>,
        topic: &str,
        max_retries: u32,
    ) -> Self {
        let submitter = TaskSubmitter::new(
            Arc::clone(&store),
            Arc::clone(&publisher),
            topic,
            max_retries,
        );
        let predictions = PredictionService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&classifier),
        );

        Self {
            store,
            cache,
            publisher,
            classifier,
            submitter: Arc::new(submitter),
            predictions: Arc::new(predictions),
        }
    }
}
