//! # Hybrid Retriever Module
//!
//! For a single search item this module fuses two retrieval branches into
//! one ranked hit list:
//!
//! - the dense branch embeds the item's expanded query and asks the index
//!   for nearest products by cosine similarity
//! - the lexical branch scores trigram similarity of the item's canonical
//!   query against product titles and enriched descriptions
//!
//! A candidate qualifies when either branch clears its floor, the fused
//! score is `vector_weight * vector + text_weight * text`, and ties break by
//! higher vector score and then lower product ID so results are
//! deterministic. When the embedding provider is down the retriever degrades
//! to lexical-only instead of failing the query.

use std::collections::HashMap;

use tracing::{debug, instrument, warn};

use crate::config::SearchConfig;
use crate::error::Result;
use crate::index::{CandidateFilter, Database, ProductRecord, VectorHit};
use crate::lexical::{self, TextScore};
use crate::provider::{Embedder, RetryPolicy, retry_with_backoff};
use crate::query::SearchItem;

/// Caller-facing filters for one search request
#[derive(Debug, Clone, Default)]
pub struct Filters {
    /// Restrict results to these merchants (empty means all)
    pub merchant_ids: Vec<i64>,

    /// Keep only products with an active discount
    pub only_discounted: bool,

    /// Keep only products whose effective price is at most this
    pub max_price: Option<f64>,
}

impl Filters {
    fn to_candidate_filter(&self, now: i64) -> CandidateFilter {
        CandidateFilter {
            merchant_ids: self.merchant_ids.clone(),
            only_discounted: self.only_discounted,
            max_price: self.max_price,
            now,
        }
    }
}

/// One ranked product for one search item
#[derive(Debug, Clone)]
pub struct ScoredHit {
    /// The matched product
    pub record: ProductRecord,

    /// Dense branch score in [0, 1], 0 when absent from that branch
    pub vector_score: f64,

    /// Lexical branch score in [0, 1], 0 when absent from that branch
    pub text_score: f64,

    /// Weighted fusion of the two branch scores
    pub combined_score: f64,

    /// Index of the search item this hit was scored under
    pub matched_item_index: usize,
}

/// Result of retrieval for one search item
#[derive(Debug, Clone, Default)]
pub struct ItemHits {
    /// Ranked hits, best first
    pub hits: Vec<ScoredHit>,

    /// True when the dense branch was skipped because embedding failed
    pub degraded: bool,
}

/// The dense branch output: the item's query vector, if one could be made
struct Embedded {
    query_vector: Option<Vec<f32>>,
    degraded: bool,
}

/// One merged candidate before thresholding
struct Fused {
    record: ProductRecord,
    vector_score: f64,
    text_score: f64,
    text_qualified: bool,
}

/// Retrieve the top-k fused hits for one search item.
///
/// Only store failures surface as errors; provider failures degrade.
#[instrument(skip(db, embedder, config, item, filters), fields(query = %item.query))]
pub async fn retrieve<E: Embedder>(
    db: &Database,
    embedder: &E,
    config: &SearchConfig,
    item: &SearchItem,
    item_index: usize,
    k: usize,
    filters: &Filters,
) -> Result<ItemHits> {
    let now = chrono::Utc::now().timestamp();
    let filter = filters.to_candidate_filter(now);
    let candidate_limit = std::cmp::max(50, 10 * k);

    let embedded = embed_stage(embedder, config, item).await;

    let lexical_query = if item.query.trim().is_empty() {
        item.original.as_str()
    } else {
        item.query.as_str()
    };

    let (vector_hits, lexical_records) = match &embedded.query_vector {
        Some(query_vector) => {
            // The two branches are independent, issue them together
            let (vector, lexical) = futures::join!(
                db.vector_candidates(query_vector, &filter, candidate_limit),
                db.lexical_candidates(&filter),
            );
            (vector?, lexical?)
        }
        None => (Vec::new(), db.lexical_candidates(&filter).await?),
    };

    let lexical_only = embedded.query_vector.is_none();
    let hits = fuse(
        vector_hits,
        lexical_records,
        lexical_query,
        config,
        k,
        item_index,
        lexical_only,
    );

    debug!(
        "Item {} retrieved {} hits (degraded: {})",
        item_index,
        hits.len(),
        embedded.degraded
    );

    Ok(ItemHits {
        hits,
        degraded: embedded.degraded,
    })
}

/// Embed the item's expanded query, degrading on provider failure
async fn embed_stage<E: Embedder>(
    embedder: &E,
    config: &SearchConfig,
    item: &SearchItem,
) -> Embedded {
    let text = if item.expanded_query.trim().is_empty() {
        item.original.as_str()
    } else {
        item.expanded_query.as_str()
    };

    if text.trim().is_empty() {
        return Embedded {
            query_vector: None,
            degraded: false,
        };
    }

    let policy = RetryPolicy::new(config.retry_max_attempts, config.retry_base_ms);
    match retry_with_backoff(policy, || embedder.embed(text)).await {
        Ok(vector) => Embedded {
            query_vector: Some(vector),
            degraded: false,
        },
        Err(failure) => {
            warn!(
                "Query embedding failed after {} attempts ({}), going lexical-only",
                failure.attempts, failure.error
            );
            Embedded {
                query_vector: None,
                degraded: true,
            }
        }
    }
}

/// Merge the branch outputs, apply floors, rank, and truncate.
///
/// In lexical-only mode the text score stands in for the fused score,
/// otherwise the weighted sum would sink every hit below the final floor
/// just because the dense branch was unavailable.
#[allow(clippy::too_many_arguments)]
fn fuse(
    vector_hits: Vec<VectorHit>,
    lexical_records: Vec<ProductRecord>,
    lexical_query: &str,
    config: &SearchConfig,
    k: usize,
    item_index: usize,
    lexical_only: bool,
) -> Vec<ScoredHit> {
    let mut merged: HashMap<i64, Fused> = HashMap::new();

    for hit in vector_hits {
        merged.insert(
            hit.record.product.id,
            Fused {
                vector_score: hit.score.clamp(0.0, 1.0),
                text_score: 0.0,
                text_qualified: false,
                record: hit.record,
            },
        );
    }

    for record in lexical_records {
        let score: TextScore = lexical::score(lexical_query, &record);
        if !score.qualifies(config.min_text_score) {
            continue;
        }
        let text_score = score.combined();
        merged
            .entry(record.product.id)
            .and_modify(|fused| {
                fused.text_score = text_score;
                fused.text_qualified = true;
            })
            .or_insert(Fused {
                vector_score: 0.0,
                text_score,
                text_qualified: true,
                record,
            });
    }

    let mut hits: Vec<ScoredHit> = merged
        .into_values()
        .filter(|fused| fused.vector_score >= config.min_vector_score || fused.text_qualified)
        .map(|fused| ScoredHit {
            combined_score: if lexical_only {
                fused.text_score
            } else {
                config.vector_weight * fused.vector_score
                    + config.text_weight * fused.text_score
            },
            vector_score: fused.vector_score,
            text_score: fused.text_score,
            record: fused.record,
            matched_item_index: item_index,
        })
        .filter(|hit| hit.combined_score >= config.min_similarity)
        .collect();

    hits.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.vector_score
                    .partial_cmp(&a.vector_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.record.product.id.cmp(&b.record.product.id))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EMBEDDING_DIMENSIONS;
    use crate::index::{Merchant, Product};
    use crate::provider::mock::MockEmbedder;
    use tempfile::tempdir;

    fn record(id: i64, title: &str) -> ProductRecord {
        ProductRecord {
            product: Product {
                id,
                merchant_id: 1,
                title: title.to_string(),
                description: None,
                brand: None,
                category: None,
                size_value: None,
                size_unit: None,
                price: 1.0,
                discount_price: None,
                discount_starts_at: None,
                discount_ends_at: None,
                enriched_description: None,
            },
            merchant_name: "Bingo".to_string(),
            merchant_city: None,
        }
    }

    fn vector_hit(id: i64, title: &str, score: f64) -> VectorHit {
        VectorHit {
            record: record(id, title),
            score,
        }
    }

    fn test_config() -> SearchConfig {
        SearchConfig::default()
    }

    #[test]
    fn test_fuse_applies_both_floors() {
        let config = test_config();

        // Below the vector floor and no lexical support: dropped
        let hits = fuse(
            vec![vector_hit(1, "nevezano", 0.2)],
            vec![],
            "kafa",
            &config,
            5,
            0,
            false,
        );
        assert!(hits.is_empty());

        // Above the vector floor but fused score below the final floor:
        // 0.6 * 0.3 = 0.18 < 0.20
        let hits = fuse(
            vec![vector_hit(1, "nevezano", 0.3)],
            vec![],
            "kafa",
            &config,
            5,
            0,
            false,
        );
        assert!(hits.is_empty());

        // Clears everything: 0.6 * 0.5 = 0.30
        let hits = fuse(
            vec![vector_hit(1, "nevezano", 0.5)],
            vec![],
            "kafa",
            &config,
            5,
            0,
            false,
        );
        assert_eq!(hits.len(), 1);
        assert!((hits[0].combined_score - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_merges_branches_for_same_product() {
        let config = test_config();
        let hits = fuse(
            vec![vector_hit(1, "Kafa mljevena", 0.8)],
            vec![record(1, "Kafa mljevena")],
            "kafa",
            &config,
            5,
            3,
            false,
        );

        assert_eq!(hits.len(), 1);
        assert!(hits[0].vector_score > 0.0);
        assert!(hits[0].text_score > 0.0);
        assert_eq!(hits[0].matched_item_index, 3);
        let expected = 0.6 * hits[0].vector_score + 0.4 * hits[0].text_score;
        assert!((hits[0].combined_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_tie_breaks_by_vector_then_id() {
        // Equal weights make the two combined scores exactly 0.5 each:
        // a pure vector hit (v=1.0) against a pure lexical hit (t=1.0)
        let config = SearchConfig::builder().weights(0.5, 0.5).build();

        let hits = fuse(
            vec![vector_hit(9, "nevezano", 1.0)],
            vec![record(2, "kafa")],
            "kafa",
            &config,
            5,
            0,
            false,
        );

        assert_eq!(hits.len(), 2);
        assert!((hits[0].combined_score - hits[1].combined_score).abs() < 1e-9);
        // Higher vector score wins the tie despite the higher product ID
        assert_eq!(hits[0].record.product.id, 9);

        // Fully identical scores: lower product ID first
        let hits = fuse(
            vec![vector_hit(7, "a", 0.6), vector_hit(3, "b", 0.6)],
            vec![],
            "kafa",
            &config,
            5,
            0,
            false,
        );
        assert_eq!(hits[0].record.product.id, 3);
        assert_eq!(hits[1].record.product.id, 7);
    }

    #[test]
    fn test_fuse_truncates_to_k() {
        let config = test_config();
        let hits = fuse(
            vec![
                vector_hit(1, "a", 0.9),
                vector_hit(2, "b", 0.8),
                vector_hit(3, "c", 0.7),
            ],
            vec![],
            "kafa",
            &config,
            2,
            0,
            false,
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.product.id, 1);
    }

    async fn seeded_db() -> (Database, tempfile::TempDir) {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("test.db").to_string_lossy().to_string();
        let db = Database::new_from_path(&path).await.unwrap();

        db.upsert_merchant(&Merchant {
            id: 1,
            name: "Bingo".to_string(),
            city: None,
        })
        .await
        .unwrap();

        for (id, title) in [(1, "Kafa mljevena 500g"), (2, "Mlijeko 1l")] {
            let mut product = record(id, title).product;
            product.enriched_description = Some(title.to_string());
            db.upsert_product(&product).await.unwrap();
            db.update_enriched_description(id, title).await.unwrap();
        }

        let shared = vec![0.5f32; EMBEDDING_DIMENSIONS];
        db.upsert_embedding(1, "Kafa", "m", "h1", &shared).await.unwrap();
        db.upsert_embedding(2, "Mlijeko", "m", "h2", &shared).await.unwrap();

        (db, tmp)
    }

    #[tokio::test]
    async fn test_retrieve_combines_vector_and_text() {
        let (db, _tmp) = seeded_db().await;
        // Every embedding is identical, so both products score 1.0 on the
        // dense branch and ranking is decided by the lexical branch
        let embedder = MockEmbedder::constant(vec![0.5; EMBEDDING_DIMENSIONS], EMBEDDING_DIMENSIONS);

        let item = SearchItem::identity("kafa");
        let result = retrieve(&db, &embedder, &test_config(), &item, 0, 5, &Filters::default())
            .await
            .unwrap();

        assert!(!result.degraded);
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].record.product.id, 1);
        assert!(result.hits[0].text_score > result.hits[1].text_score);
    }

    #[tokio::test]
    async fn test_retrieve_degrades_to_lexical_only() {
        let (db, _tmp) = seeded_db().await;
        let embedder = MockEmbedder::new(EMBEDDING_DIMENSIONS).fail_first(100);

        let mut config = test_config();
        config.retry_max_attempts = 1;
        config.retry_base_ms = 1;

        let item = SearchItem::identity("kafa");
        let result = retrieve(&db, &embedder, &config, &item, 0, 5, &Filters::default())
            .await
            .unwrap();

        assert!(result.degraded);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].record.product.id, 1);
        assert_eq!(result.hits[0].vector_score, 0.0);
    }

    #[tokio::test]
    async fn test_retrieve_honors_merchant_filter() {
        let (db, _tmp) = seeded_db().await;
        let embedder = MockEmbedder::constant(vec![0.5; EMBEDDING_DIMENSIONS], EMBEDDING_DIMENSIONS);

        let filters = Filters {
            merchant_ids: vec![99],
            ..Filters::default()
        };
        let item = SearchItem::identity("kafa");
        let result = retrieve(&db, &embedder, &test_config(), &item, 0, 5, &filters)
            .await
            .unwrap();

        assert!(result.hits.is_empty());
    }
}
