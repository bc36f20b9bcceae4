use serde::{Deserialize, Serialize};

/// Seller reference data used for feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub seller_id: i64,
    pub is_verified_seller: bool,
}

/// A listing submitted for moderation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Advertisement {
    pub item_id: i64,
    pub seller_id: i64,
    pub name: String,
    pub description: String,
    pub category: i32,
    pub images_qty: i32,
    #[serde(default)]
    pub is_closed: bool,
}

/// Flattened advertisement + seller fields, the input of feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingFeatures {
    pub seller_id: i64,
    pub is_verified_seller: bool,
    pub item_id: i64,
    pub name: String,
    pub description: String,
    pub category: i32,
    pub images_qty: i32,
}

impl ListingFeatures {
    pub fn from_entities(advertisement: &Advertisement, user: &User) -> Self {
        Self {
            seller_id: advertisement.seller_id,
            is_verified_seller: user.is_verified_seller,
            item_id: advertisement.item_id,
            name: advertisement.name.clone(),
            description: advertisement.description.clone(),
            category: advertisement.category,
            images_qty: advertisement.images_qty,
        }
    }

    /// Raw value of a named field.
    pub fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        Some(match name {
            "seller_id" => FieldValue::Number(self.seller_id as f64),
            "is_verified_seller" => FieldValue::Flag(self.is_verified_seller),
            "item_id" => FieldValue::Number(self.item_id as f64),
            "name" => FieldValue::Text(&self.name),
            "description" => FieldValue::Text(&self.description),
            "category" => FieldValue::Number(f64::from(self.category)),
            "images_qty" => FieldValue::Number(f64::from(self.images_qty)),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Flag(bool),
    Number(f64),
    Text(&'a str),
}
