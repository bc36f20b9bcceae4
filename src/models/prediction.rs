use garde::Validate;
use serde::{Deserialize, Serialize};

use super::listing::ListingFeatures;
use super::task::TaskStatus;

/// Request body of `POST /predict`: the full listing, no store lookups.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PredictionRequest {
    #[garde(range(min = 1))]
    pub seller_id: i64,

    #[garde(skip)]
    pub is_verified_seller: bool,

    #[garde(range(min = 1))]
    pub item_id: i64,

    #[garde(length(min = 1, max = 256))]
    pub name: String,

    #[garde(length(max = 16384))]
    pub description: String,

    #[garde(range(min = 1))]
    pub category: i32,

    #[garde(range(min = 0))]
    pub images_qty: i32,
}

impl From<PredictionRequest> for ListingFeatures {
    fn from(request: PredictionRequest) -> Self {
        Self {
            seller_id: request.seller_id,
            is_verified_seller: request.is_verified_seller,
            item_id: request.item_id,
            name: request.name,
            description: request.description,
            category: request.category,
            images_qty: request.images_qty,
        }
    }
}

/// Request body addressing a stored advertisement.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ItemRequest {
    #[garde(range(min = 1))]
    pub item_id: i64,
}

/// Classifier verdict; also the cached value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    pub is_violation: bool,
    pub probability: f64,
}

/// Response of a task submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResponse {
    pub task_id: i64,
    pub status: TaskStatus,
    pub message: String,
}

pub const TASK_ACCEPTED: &str = "Moderation request accepted";
pub const TASK_ALREADY_EXISTS: &str = "Moderation task already exists";
