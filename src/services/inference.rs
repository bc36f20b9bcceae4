use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::models::listing::{FieldValue, ListingFeatures};
use crate::models::prediction::PredictionResult;

/// Suffix marking a feature computed as the length of another text field.
const LENGTH_SUFFIX: &str = "_len";

/// One entry of the static feature list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSpec {
    pub name: String,
    /// Divisor applied to the raw value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalize: Option<f64>,
}

impl FeatureSpec {
    fn new(name: &str, normalize: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            normalize,
        }
    }
}

/// Coefficients of the logistic classifier, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogisticModel {
    pub features: Vec<FeatureSpec>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl Default for LogisticModel {
    /// Built-in coefficients: unverified sellers posting few images are
    /// flagged, everything else passes.
    fn default() -> Self {
        Self {
            features: vec![
                FeatureSpec::new("is_verified_seller", None),
                FeatureSpec::new("images_qty", Some(10.0)),
                FeatureSpec::new("description_len", Some(1000.0)),
                FeatureSpec::new("category", Some(100.0)),
            ],
            weights: vec![-6.0, -8.0, -0.5, 0.2],
            intercept: 3.0,
            threshold: default_threshold(),
        }
    }
}

impl LogisticModel {
    fn validate(&self) -> Result<(), InferenceError> {
        if self.features.len() != self.weights.len() {
            return Err(InferenceError::Model(format!(
                "{} features but {} weights",
                self.features.len(),
                self.weights.len()
            )));
        }
        if let Some(spec) = self.features.iter().find(|f| f.normalize == Some(0.0)) {
            return Err(InferenceError::Model(format!(
                "feature '{}' normalizes by zero",
                spec.name
            )));
        }
        Ok(())
    }

    fn feature_value(spec: &FeatureSpec, listing: &ListingFeatures) -> Result<f64, InferenceError> {
        let raw = match spec.name.strip_suffix(LENGTH_SUFFIX) {
            Some(source) => match listing.field(source) {
                Some(FieldValue::Text(text)) => text.chars().count() as f64,
                _ => return Err(InferenceError::UnknownFeature(spec.name.clone())),
            },
            None => match listing.field(&spec.name) {
                Some(FieldValue::Flag(flag)) => {
                    if flag {
                        1.0
                    } else {
                        0.0
                    }
                }
                Some(FieldValue::Number(n)) => n,
                Some(FieldValue::Text(_)) | None => {
                    return Err(InferenceError::UnknownFeature(spec.name.clone()))
                }
            },
        };

        Ok(match spec.normalize {
            Some(divisor) => raw / divisor,
            None => raw,
        })
    }

    pub fn extract(&self, listing: &ListingFeatures) -> Result<Vec<f64>, InferenceError> {
        self.features
            .iter()
            .map(|spec| Self::feature_value(spec, listing))
            .collect()
    }

    pub fn predict(&self, features: &[f64]) -> Result<PredictionResult, InferenceError> {
        if features.len() != self.weights.len() {
            return Err(InferenceError::Dimension {
                expected: self.weights.len(),
                actual: features.len(),
            });
        }

        let logit = self.intercept
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        let probability = 1.0 / (1.0 + (-logit).exp());

        Ok(PredictionResult {
            is_violation: probability >= self.threshold,
            probability,
        })
    }
}

/// Feature extraction + prediction, the seam the worker and the sync
/// handlers are built against.
pub trait Classifier: Send + Sync {
    fn is_ready(&self) -> bool;
    fn extract_features(&self, listing: &ListingFeatures) -> Result<Vec<f64>, InferenceError>;
    fn predict(&self, features: &[f64]) -> Result<PredictionResult, InferenceError>;

    fn classify(&self, listing: &ListingFeatures) -> Result<PredictionResult, InferenceError> {
        let features = self.extract_features(listing)?;
        self.predict(&features)
    }
}

/// Process-wide classifier with an explicit lifecycle: calls fail with
/// `Uninitialized` until `init` has run once.
pub struct InferenceEngine {
    model_path: PathBuf,
    model: OnceLock<LogisticModel>,
}

impl InferenceEngine {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            model: OnceLock::new(),
        }
    }

    /// An engine that is ready immediately with the given coefficients.
    pub fn with_model(model: LogisticModel) -> Result<Self, InferenceError> {
        model.validate()?;
        let engine = Self::new(PathBuf::new());
        let _ = engine.model.set(model);
        Ok(engine)
    }

    /// Load coefficients from the model file, or persist the built-in ones
    /// when the file does not exist yet. Idempotent.
    pub fn init(&self) -> Result<(), InferenceError> {
        if self.model.get().is_some() {
            return Ok(());
        }

        let model = if self.model_path.exists() {
            tracing::info!(path = %self.model_path.display(), "Loading model from file");
            load_model(&self.model_path)?
        } else {
            tracing::info!(
                path = %self.model_path.display(),
                "Model file not found, saving built-in coefficients"
            );
            let model = LogisticModel::default();
            save_model(&self.model_path, &model)?;
            model
        };
        model.validate()?;

        // A concurrent init may have won; either value came from the same file.
        let _ = self.model.set(model);
        tracing::info!("Inference engine ready");
        Ok(())
    }

    fn model(&self) -> Result<&LogisticModel, InferenceError> {
        self.model.get().ok_or(InferenceError::Uninitialized)
    }
}

impl Classifier for InferenceEngine {
    fn is_ready(&self) -> bool {
        self.model.get().is_some()
    }

    fn extract_features(&self, listing: &ListingFeatures) -> Result<Vec<f64>, InferenceError> {
        let features = self.model()?.extract(listing)?;
        tracing::debug!(
            item_id = listing.item_id,
            seller_id = listing.seller_id,
            features = ?features,
            "Feature vector prepared"
        );
        Ok(features)
    }

    fn predict(&self, features: &[f64]) -> Result<PredictionResult, InferenceError> {
        self.model()?.predict(features)
    }
}

fn load_model(path: &Path) -> Result<LogisticModel, InferenceError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn save_model(path: &Path, model: &LogisticModel) -> Result<(), InferenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(model)?)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model is not initialized")]
    Uninitialized,

    #[error("Unknown feature '{0}'")]
    UnknownFeature(String),

    #[error("Feature vector has {actual} values, model expects {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("Invalid model: {0}")]
    Model(String),

    #[error("Model file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model file is not valid JSON: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(verified: bool, images_qty: i32, description: &str) -> ListingFeatures {
        ListingFeatures {
            seller_id: 1,
            is_verified_seller: verified,
            item_id: 2,
            name: "Phone".to_string(),
            description: description.to_string(),
            category: 5,
            images_qty,
        }
    }

    fn ready_engine() -> InferenceEngine {
        InferenceEngine::with_model(LogisticModel::default()).unwrap()
    }

    #[test]
    fn calls_before_init_fail_with_uninitialized() {
        let engine = InferenceEngine::new("unused.json");

        assert!(!engine.is_ready());
        assert!(matches!(
            engine.extract_features(&listing(true, 1, "")),
            Err(InferenceError::Uninitialized)
        ));
        assert!(matches!(
            engine.predict(&[0.0, 0.0, 0.0, 0.0]),
            Err(InferenceError::Uninitialized)
        ));
    }

    #[test]
    fn features_follow_the_declared_transforms() {
        let engine = ready_engine();
        let features = engine
            .extract_features(&listing(true, 5, "twenty characters!!!"))
            .unwrap();

        assert_eq!(features.len(), 4);
        assert_eq!(features[0], 1.0);
        assert!((features[1] - 0.5).abs() < 1e-12);
        assert!((features[2] - 0.02).abs() < 1e-12);
        assert!((features[3] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn unverified_seller_without_images_is_a_violation() {
        let result = ready_engine().classify(&listing(false, 0, "cheap")).unwrap();

        assert!(result.is_violation);
        assert!(result.probability > 0.9 && result.probability <= 1.0);
    }

    #[test]
    fn verified_seller_with_images_passes() {
        let result = ready_engine()
            .classify(&listing(true, 5, "a detailed description"))
            .unwrap();

        assert!(!result.is_violation);
        assert!(result.probability >= 0.0 && result.probability < 0.1);
    }

    #[test]
    fn wrong_vector_length_is_rejected() {
        assert!(matches!(
            ready_engine().predict(&[1.0]),
            Err(InferenceError::Dimension { expected: 4, actual: 1 })
        ));
    }

    #[test]
    fn unknown_feature_is_reported() {
        let model = LogisticModel {
            features: vec![FeatureSpec::new("price", None)],
            weights: vec![1.0],
            intercept: 0.0,
            threshold: 0.5,
        };
        let engine = InferenceEngine::with_model(model).unwrap();

        assert!(matches!(
            engine.extract_features(&listing(true, 1, "")),
            Err(InferenceError::UnknownFeature(name)) if name == "price"
        ));
    }

    #[test]
    fn mismatched_coefficients_are_refused() {
        let model = LogisticModel {
            weights: vec![1.0],
            ..LogisticModel::default()
        };
        assert!(matches!(
            InferenceEngine::with_model(model),
            Err(InferenceError::Model(_))
        ));
    }

    #[test]
    fn init_writes_default_model_then_reloads_it() {
        let dir = std::env::temp_dir().join(format!("ad-moderation-{}", uuid::Uuid::new_v4()));
        let path = dir.join("model.json");

        let first = InferenceEngine::new(&path);
        first.init().unwrap();
        first.init().unwrap();
        assert!(first.is_ready());
        assert!(path.exists());

        let second = InferenceEngine::new(&path);
        second.init().unwrap();
        assert_eq!(second.model().unwrap(), &LogisticModel::default());

        std::fs::remove_dir_all(&dir).ok();
    }
}
