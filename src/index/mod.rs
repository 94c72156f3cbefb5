//! Catalog index module
//!
//! This module provides functionality for managing the product catalog and
//! its embedding index, including database operations and merchant metadata
//! management.

mod database;
pub mod error;
mod schema;
pub mod vector;

pub use database::{CandidateFilter, Database, VectorHit};
pub use error::DbError;

/// Represents a merchant in the catalog
#[derive(Debug, Clone)]
pub struct Merchant {
    /// ID of the merchant
    pub id: i64,

    /// Display name of the merchant
    pub name: String,

    /// City the merchant operates in
    pub city: Option<String>,
}

/// Represents a product in the catalog
#[derive(Debug, Clone)]
pub struct Product {
    /// ID of the product
    pub id: i64,

    /// ID of the merchant selling this product
    pub merchant_id: i64,

    /// Product title
    pub title: String,

    /// Free-form product description
    pub description: Option<String>,

    /// Brand name
    pub brand: Option<String>,

    /// Product category
    pub category: Option<String>,

    /// Package size amount
    pub size_value: Option<f64>,

    /// Package size unit, e.g. "l" or "kom"
    pub size_unit: Option<String>,

    /// Regular price
    pub price: f64,

    /// Discounted price, if a discount is defined
    pub discount_price: Option<f64>,

    /// Unix timestamp when the discount starts, if bounded
    pub discount_starts_at: Option<i64>,

    /// Unix timestamp when the discount ends, if bounded
    pub discount_ends_at: Option<i64>,

    /// Generated description used as embedding input
    pub enriched_description: Option<String>,
}

impl Product {
    /// Whether the discount is active at `now`.
    ///
    /// A discount outside its validity window is treated as absent, so an
    /// expired discount never leaks into prices or filters.
    pub fn discount_active(&self, now: i64) -> bool {
        if self.discount_price.is_none() {
            return false;
        }
        if let Some(starts) = self.discount_starts_at {
            if starts > now {
                return false;
            }
        }
        if let Some(ends) = self.discount_ends_at {
            if ends < now {
                return false;
            }
        }
        true
    }

    /// Effective price at `now`
    pub fn current_price(&self, now: i64) -> f64 {
        if self.discount_active(now) {
            self.discount_price.unwrap_or(self.price)
        } else {
            self.price
        }
    }

    /// Discount percentage at `now`, if a discount is active
    pub fn discount_percentage(&self, now: i64) -> Option<f64> {
        if !self.discount_active(now) || self.price <= 0.0 {
            return None;
        }
        self.discount_price
            .map(|d| ((1.0 - d / self.price) * 100.0).round())
    }

    /// Absolute savings at `now`, if a discount is active
    pub fn savings(&self, now: i64) -> Option<f64> {
        if !self.discount_active(now) {
            return None;
        }
        self.discount_price.map(|d| self.price - d)
    }
}

/// A product joined with its merchant, as read from the catalog
#[derive(Debug, Clone)]
pub struct ProductRecord {
    /// The product itself
    pub product: Product,

    /// Name of the selling merchant
    pub merchant_name: String,

    /// City of the selling merchant
    pub merchant_city: Option<String>,
}

/// A stored embedding for one product
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    /// ID of the embedded product
    pub product_id: i64,

    /// The exact text the vector was computed from
    pub embedding_text: String,

    /// Embedding model that produced the vector
    pub model_version: String,

    /// Hash of the embedding input, used to skip unchanged products
    pub content_hash: String,

    /// The embedding vector
    pub embedding: Vec<f32>,

    /// Unix timestamp of the first refresh
    pub created_at: i64,

    /// Unix timestamp of the last refresh
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_with_discount(
        price: f64,
        discount: Option<f64>,
        starts: Option<i64>,
        ends: Option<i64>,
    ) -> Product {
        Product {
            id: 1,
            merchant_id: 1,
            title: "Kafa mljevena".to_string(),
            description: None,
            brand: None,
            category: None,
            size_value: None,
            size_unit: None,
            price,
            discount_price: discount,
            discount_starts_at: starts,
            discount_ends_at: ends,
            enriched_description: None,
        }
    }

    #[test]
    fn test_current_price_without_discount() {
        let product = product_with_discount(10.0, None, None, None);
        assert_eq!(product.current_price(1_000), 10.0);
        assert_eq!(product.discount_percentage(1_000), None);
    }

    #[test]
    fn test_current_price_with_active_discount() {
        let product = product_with_discount(10.0, Some(7.5), Some(500), Some(2_000));
        assert_eq!(product.current_price(1_000), 7.5);
        assert_eq!(product.discount_percentage(1_000), Some(25.0));
        assert_eq!(product.savings(1_000), Some(2.5));
    }

    #[test]
    fn test_expired_discount_is_ignored() {
        let product = product_with_discount(10.0, Some(7.5), Some(100), Some(500));
        assert!(!product.discount_active(1_000));
        assert_eq!(product.current_price(1_000), 10.0);
        assert_eq!(product.savings(1_000), None);
    }

    #[test]
    fn test_future_discount_is_ignored() {
        let product = product_with_discount(10.0, Some(7.5), Some(2_000), None);
        assert!(!product.discount_active(1_000));
        assert_eq!(product.current_price(1_000), 10.0);
    }

    #[test]
    fn test_unbounded_discount_is_active() {
        let product = product_with_discount(10.0, Some(8.0), None, None);
        assert!(product.discount_active(1_000));
        assert_eq!(product.current_price(1_000), 8.0);
    }
}
