//! Sample sellers and listings shared by the integration tests
#![allow(dead_code)]

use ad_moderation::models::listing::{Advertisement, User};
use ad_moderation::models::prediction::PredictionRequest;

pub const UNVERIFIED_SELLER: i64 = 10;
pub const VERIFIED_SELLER: i64 = 11;

/// Listing the default model flags: unverified seller, no images.
pub const FLAGGED_ITEM: i64 = 2;
/// Listing the default model passes: verified seller, several images.
pub const CLEAN_ITEM: i64 = 3;

pub fn unverified_seller() -> User {
    User {
        seller_id: UNVERIFIED_SELLER,
        is_verified_seller: false,
    }
}

pub fn verified_seller() -> User {
    User {
        seller_id: VERIFIED_SELLER,
        is_verified_seller: true,
    }
}

pub fn flagged_listing() -> Advertisement {
    Advertisement {
        item_id: FLAGGED_ITEM,
        seller_id: UNVERIFIED_SELLER,
        name: "iPhone 15 Pro".to_string(),
        description: "cheap, write in messenger".to_string(),
        category: 1,
        images_qty: 0,
        is_closed: false,
    }
}

pub fn clean_listing() -> Advertisement {
    Advertisement {
        item_id: CLEAN_ITEM,
        seller_id: VERIFIED_SELLER,
        name: "Road bike".to_string(),
        description: "Aluminium frame, 54 cm, serviced last month. Pickup only.".to_string(),
        category: 7,
        images_qty: 6,
        is_closed: false,
    }
}

pub fn prediction_request(verified: bool, images_qty: i32) -> PredictionRequest {
    PredictionRequest {
        seller_id: 42,
        is_verified_seller: verified,
        item_id: 420,
        name: "Sofa".to_string(),
        description: "Three-seat sofa".to_string(),
        category: 4,
        images_qty,
    }
}
