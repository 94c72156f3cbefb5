//! # Product Enrichment Module
//!
//! This module builds the text representations that feed the embedding and
//! lexical indexes, and fingerprints them for change detection.
//!
//! ## Key Components
//!
//! - `build_enriched_description`: Deterministic human-readable expansion of
//!   a product (title, brand, category, size, price summary, merchant)
//! - `build_embedding_text`: The exact string sent to the embedding model,
//!   with a concise header so the most distinguishing tokens dominate
//! - `content_hash`: SHA-256 fingerprint over the embedding input and model
//!   version; equal hash means the stored vector can be reused
//! - `refresh`: The batch job that keeps the embedding index in sync with
//!   the catalog
//!
//! The builders are pure functions of catalog fields. Running them twice on
//! the same product always yields the same bytes, which is what makes the
//! incremental refresh able to skip unchanged products.

use sha2::{Digest, Sha256};

use crate::index::ProductRecord;

pub mod refresh;

pub use refresh::{RefreshMode, RefreshReport, refresh_embeddings};

/// Collapse all whitespace runs into single spaces
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map unit spellings found in the catalog to their canonical short form
fn canonical_unit(unit: &str) -> String {
    match unit.trim().to_lowercase().as_str() {
        "litra" | "litar" | "litre" | "l" => "l".to_string(),
        "mililitara" | "mililitar" | "ml" => "ml".to_string(),
        "komada" | "komad" | "kom" => "kom".to_string(),
        "kilograma" | "kilogram" | "kg" => "kg".to_string(),
        "grama" | "gram" | "g" => "g".to_string(),
        other => other.to_string(),
    }
}

/// Format a package size like "1 l" or "10 kom"
fn format_size(value: f64, unit: &str) -> String {
    let amount = if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    };
    format!("{} {}", amount, canonical_unit(unit))
}

/// Build the deterministic enriched description for a product.
///
/// Field order is fixed and whitespace is normalized so the output is stable
/// across refresh runs. Price information uses the effective price at `now`;
/// an expired discount reads exactly like no discount at all.
pub fn build_enriched_description(record: &ProductRecord, now: i64, describe_city: bool) -> String {
    let product = &record.product;
    let mut parts: Vec<String> = Vec::new();

    parts.push(normalize_whitespace(&product.title));

    if let Some(brand) = &product.brand {
        parts.push(format!("brend {}", normalize_whitespace(brand)));
    }

    if let Some(category) = &product.category {
        parts.push(format!("kategorija {}", normalize_whitespace(category)));
    }

    if let (Some(value), Some(unit)) = (product.size_value, product.size_unit.as_deref()) {
        parts.push(format!("pakovanje {}", format_size(value, unit)));
    }

    if let Some(description) = &product.description {
        let trimmed = normalize_whitespace(description);
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    if product.discount_active(now) {
        parts.push(format!(
            "cijena {:.2} KM (snizeno sa {:.2} KM)",
            product.current_price(now),
            product.price
        ));
    } else {
        parts.push(format!("cijena {:.2} KM", product.price));
    }

    let merchant = match (&record.merchant_city, describe_city) {
        (Some(city), true) => format!(
            "prodaje {} iz {}",
            normalize_whitespace(&record.merchant_name),
            normalize_whitespace(city)
        ),
        _ => format!("prodaje {}", normalize_whitespace(&record.merchant_name)),
    };
    parts.push(merchant);

    parts.join(", ")
}

/// Build the text that gets embedded.
///
/// A short header of the most distinguishing fields comes first, followed by
/// the full enriched description.
pub fn build_embedding_text(record: &ProductRecord, enriched_description: &str) -> String {
    let product = &record.product;
    let mut header = normalize_whitespace(&product.title);

    let mut details: Vec<String> = Vec::new();
    if let Some(brand) = &product.brand {
        details.push(normalize_whitespace(brand));
    }
    if let Some(category) = &product.category {
        details.push(normalize_whitespace(category));
    }
    if let (Some(value), Some(unit)) = (product.size_value, product.size_unit.as_deref()) {
        details.push(format_size(value, unit));
    }

    if !details.is_empty() {
        header.push_str(" — ");
        header.push_str(&details.join(" "));
    }

    format!("{}\n{}", header, enriched_description)
}

/// Fingerprint the embedding input.
///
/// The model version is folded into the hash so switching models invalidates
/// every stored vector without a separate migration step.
pub fn content_hash(embedding_text: &str, model_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(embedding_text.as_bytes());
    hasher.update([0x1f]);
    hasher.update(model_version.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Product;

    fn record() -> ProductRecord {
        ProductRecord {
            product: Product {
                id: 1,
                merchant_id: 1,
                title: "Mlijeko   svjeze".to_string(),
                description: Some("Kravlje mlijeko".to_string()),
                brand: Some("Meggle".to_string()),
                category: Some("Mlijecni proizvodi".to_string()),
                size_value: Some(1.0),
                size_unit: Some("litra".to_string()),
                price: 2.50,
                discount_price: None,
                discount_starts_at: None,
                discount_ends_at: None,
                enriched_description: None,
            },
            merchant_name: "Bingo".to_string(),
            merchant_city: Some("Sarajevo".to_string()),
        }
    }

    #[test]
    fn test_enriched_description_is_deterministic() {
        let r = record();
        let a = build_enriched_description(&r, 1_000, true);
        let b = build_enriched_description(&r, 1_000, true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_enriched_description_content() {
        let enriched = build_enriched_description(&record(), 1_000, true);
        assert_eq!(
            enriched,
            "Mlijeko svjeze, brend Meggle, kategorija Mlijecni proizvodi, \
             pakovanje 1 l, Kravlje mlijeko, cijena 2.50 KM, prodaje Bingo iz Sarajevo"
        );
    }

    #[test]
    fn test_enriched_description_without_city() {
        let enriched = build_enriched_description(&record(), 1_000, false);
        assert!(enriched.ends_with("prodaje Bingo"));
        assert!(!enriched.contains("Sarajevo"));
    }

    #[test]
    fn test_active_discount_shows_both_prices() {
        let mut r = record();
        r.product.discount_price = Some(2.00);
        r.product.discount_starts_at = Some(500);
        r.product.discount_ends_at = Some(2_000);

        let enriched = build_enriched_description(&r, 1_000, true);
        assert!(enriched.contains("cijena 2.00 KM (snizeno sa 2.50 KM)"));
    }

    #[test]
    fn test_expired_discount_reads_like_no_discount() {
        let mut discounted = record();
        discounted.product.discount_price = Some(2.00);
        discounted.product.discount_ends_at = Some(500);

        let plain = record();
        assert_eq!(
            build_enriched_description(&discounted, 1_000, true),
            build_enriched_description(&plain, 1_000, true)
        );
    }

    #[test]
    fn test_unit_canonicalization() {
        assert_eq!(format_size(1.0, "litra"), "1 l");
        assert_eq!(format_size(10.0, "komada"), "10 kom");
        assert_eq!(format_size(0.5, "kg"), "0.5 kg");
        assert_eq!(format_size(500.0, "grama"), "500 g");
    }

    #[test]
    fn test_embedding_text_header() {
        let r = record();
        let enriched = build_enriched_description(&r, 1_000, true);
        let text = build_embedding_text(&r, &enriched);

        let header = text.lines().next().unwrap();
        assert_eq!(header, "Mlijeko svjeze — Meggle Mlijecni proizvodi 1 l");
        assert!(text.ends_with(&enriched));
    }

    #[test]
    fn test_embedding_text_without_details_has_no_separator() {
        let mut r = record();
        r.product.brand = None;
        r.product.category = None;
        r.product.size_value = None;
        r.product.size_unit = None;

        let text = build_embedding_text(&r, "opis");
        assert_eq!(text.lines().next().unwrap(), "Mlijeko svjeze");
    }

    #[test]
    fn test_content_hash_changes_with_text_and_model() {
        let a = content_hash("Mlijeko", "text-embedding-3-small");
        let b = content_hash("Mlijeko 1l", "text-embedding-3-small");
        let c = content_hash("Mlijeko", "text-embedding-3-large");

        assert_eq!(a, content_hash("Mlijeko", "text-embedding-3-small"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
