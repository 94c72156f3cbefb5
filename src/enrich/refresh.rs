//! Embedding refresh job
//!
//! Walks the catalog in batches, rebuilds the enriched description and
//! embedding text for every product, and re-embeds only those whose content
//! hash changed. Failed products keep their previous vector and the job
//! keeps going; one bad product must not sink the whole run.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::SearchConfig;
use crate::enrich::{build_embedding_text, build_enriched_description, content_hash};
use crate::error::Result;
use crate::index::Database;
use crate::provider::{Embedder, RetryPolicy, retry_with_backoff};

/// How much of the catalog a refresh run re-examines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Re-embed only products whose content hash or model version changed
    Incremental,

    /// Re-embed everything regardless of stored fingerprints
    Full,
}

/// Statistics for one refresh run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// Products examined
    pub processed: usize,

    /// Products re-embedded and upserted
    pub succeeded: usize,

    /// Products skipped because their fingerprint was unchanged
    pub skipped: usize,

    /// Products that failed even after retries
    pub failed: usize,

    /// (product_id, error) for every failure
    pub failures: Vec<(i64, String)>,
}

/// Refresh product embeddings.
///
/// With `product_ids` set only those products are examined; otherwise the
/// whole catalog is walked. Work happens in batches of
/// `config.embedding_batch_size` with a pause between batches, so the job is
/// polite to the embedding provider and cancellation-safe at batch
/// boundaries.
#[instrument(skip(db, embedder, config, product_ids), fields(mode = ?mode))]
pub async fn refresh_embeddings<E: Embedder>(
    db: &Database,
    embedder: &E,
    config: &SearchConfig,
    mode: RefreshMode,
    product_ids: Option<&[i64]>,
) -> Result<RefreshReport> {
    let records = db.product_records(product_ids).await?;
    let fingerprints = db.embedding_fingerprints().await?;

    info!(
        "Starting embedding refresh of {} products (mode {:?})",
        records.len(),
        mode
    );

    let now = chrono::Utc::now().timestamp();
    let policy = RetryPolicy::new(config.retry_max_attempts, config.retry_base_ms);
    let mut report = RefreshReport::default();
    let batch_count = records.len().div_ceil(config.embedding_batch_size.max(1));

    for (batch_index, batch) in records.chunks(config.embedding_batch_size.max(1)).enumerate() {
        for record in batch {
            report.processed += 1;
            let product_id = record.product.id;

            let enriched = build_enriched_description(record, now, config.describe_city);
            let embedding_text = build_embedding_text(record, &enriched);
            let hash = content_hash(&embedding_text, &config.embedding_model);

            let unchanged = fingerprints
                .get(&product_id)
                .is_some_and(|(model, stored_hash)| {
                    *model == config.embedding_model && *stored_hash == hash
                });

            if mode == RefreshMode::Incremental && unchanged {
                debug!("Product {} unchanged, keeping stored vector", product_id);
                report.skipped += 1;
                continue;
            }

            let embedded = retry_with_backoff(policy, || embedder.embed(&embedding_text)).await;

            let vector = match embedded {
                Ok(vector) => vector,
                Err(failure) => {
                    warn!(
                        "Embedding failed for product {} after {} attempts: {}",
                        product_id, failure.attempts, failure.error
                    );
                    report.failed += 1;
                    report.failures.push((product_id, failure.error.to_string()));
                    continue;
                }
            };

            let stored = async {
                db.update_enriched_description(product_id, &enriched).await?;
                db.upsert_embedding(
                    product_id,
                    &embedding_text,
                    &config.embedding_model,
                    &hash,
                    &vector,
                )
                .await
            }
            .await;

            match stored {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!("Failed to store embedding for product {}: {}", product_id, e);
                    report.failed += 1;
                    report.failures.push((product_id, e.to_string()));
                }
            }
        }

        if batch_index + 1 < batch_count && config.embedding_batch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.embedding_batch_delay_ms)).await;
        }
    }

    info!(
        "Embedding refresh finished: {} processed, {} succeeded, {} skipped, {} failed",
        report.processed, report.succeeded, report.skipped, report.failed
    );

    Ok(report)
}
