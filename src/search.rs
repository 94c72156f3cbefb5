//! # Search Orchestrator Module
//!
//! The public surface of the search core. `SearchSystem` owns the provider
//! handles, the catalog database, and the configuration, and exposes two
//! operations: `search` for queries and `refresh_embeddings` for the batch
//! pipeline.
//!
//! A search run parses the query into items, retrieves hits per item in
//! item order, and builds a deduplicated flat list where each product
//! appears only under the earliest item that scored it. The whole request
//! runs under one deadline; when it expires, whatever items finished are
//! returned with `partial=true` instead of an error.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::config::SearchConfig;
use crate::enrich::{self, RefreshMode, RefreshReport};
use crate::error::Result;
use crate::index::Database;
use crate::openai;
use crate::provider::{
    ChatModel, Embedder, OpenAiChatModel, OpenAiEmbedder, RateLimitedChatModel,
    RateLimitedEmbedder,
};
use crate::query::{self, SearchItem};
use crate::retriever::{self, Filters, ScoredHit};

/// Why a search returned nothing for some or all items
pub const REASON_NO_MATCH: &str = "no_match";

/// Per-request flags and timings
#[derive(Debug, Clone, Default)]
pub struct SearchMetadata {
    /// True when any item fell back to lexical-only retrieval
    pub degraded: bool,

    /// True when the query deadline expired before every item finished
    pub partial: bool,

    /// Set to "no_match" when no item produced any hit
    pub reason: Option<&'static str>,

    /// Wall-clock duration of the request
    pub elapsed_ms: u64,
}

/// Full response of one search request
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    /// The parsed search items, in query order
    pub items: Vec<SearchItem>,

    /// Ranked hits per item, aligned with `items`
    pub results_per_item: Vec<Vec<ScoredHit>>,

    /// Hits across all items with each product appearing only under the
    /// earliest item that scored it
    pub flat_results: Vec<ScoredHit>,

    /// Request flags and timings
    pub metadata: SearchMetadata,
}

/// The assembled search core: database, providers, configuration
#[derive(Clone)]
pub struct SearchSystem<E, C>
where
    E: Embedder,
    C: ChatModel,
{
    db: Database,
    embedder: E,
    chat: C,
    config: SearchConfig,
}

impl
    SearchSystem<
        RateLimitedEmbedder<OpenAiEmbedder>,
        RateLimitedChatModel<OpenAiChatModel>,
    >
{
    /// Assemble the system against the OpenAI API.
    ///
    /// Both providers get a token-bucket limiter so batch refreshes cannot
    /// burn through the API quota.
    pub fn new_openai(db: Database, api_key: impl Into<String>, config: SearchConfig) -> Self {
        let client = openai::Client::new(api_key);
        let embedder = RateLimitedEmbedder::per_minute(
            OpenAiEmbedder::new(
                client.clone(),
                config.embedding_model.clone(),
                config.embed_timeout_secs,
            ),
            1000,
        );
        let chat = RateLimitedChatModel::per_minute(
            OpenAiChatModel::new(
                client,
                config.chat_model.clone(),
                config.chat_timeout_secs,
            ),
            200,
        );
        Self::new(db, embedder, chat, config)
    }
}

impl<E, C> SearchSystem<E, C>
where
    E: Embedder,
    C: ChatModel,
{
    /// Assemble the system from explicit parts
    pub fn new(db: Database, embedder: E, chat: C, config: SearchConfig) -> Self {
        Self {
            db,
            embedder,
            chat,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run one search request.
    ///
    /// Total for well-formed input: provider failures degrade, deadline
    /// expiry yields partial results, and only store failures surface as
    /// errors.
    #[instrument(skip(self, filters), fields(query = %query))]
    pub async fn search(
        &self,
        query: &str,
        k: Option<usize>,
        filters: Filters,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.query_timeout_secs);
        let k = k.unwrap_or(self.config.default_k);

        // A price phrase in the query acts like an explicit filter, unless
        // the caller already set one
        let mut filters = filters;
        if filters.max_price.is_none() {
            filters.max_price = query::extract_max_price(query);
        }

        let mut partial = false;

        let items = match tokio::time::timeout(
            deadline.saturating_sub(started.elapsed()),
            query::parse_query(&self.chat, &self.config, query),
        )
        .await
        {
            Ok(items) => items,
            Err(_) => {
                warn!("Query parsing hit the request deadline");
                partial = true;
                vec![SearchItem::identity(query)]
            }
        };

        let mut results_per_item: Vec<Vec<ScoredHit>> = Vec::with_capacity(items.len());
        let mut degraded = false;

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            partial = true;
            results_per_item.resize(items.len(), Vec::new());
        } else {
            // Items are independent, fan them out; output stays in item order
            let filters = &filters;
            let retrievals = items.iter().enumerate().map(|(index, item)| async move {
                tokio::time::timeout(
                    remaining,
                    retriever::retrieve(
                        &self.db,
                        &self.embedder,
                        &self.config,
                        item,
                        index,
                        k,
                        filters,
                    ),
                )
                .await
            });

            for (index, outcome) in futures::future::join_all(retrievals)
                .await
                .into_iter()
                .enumerate()
            {
                match outcome {
                    Ok(result) => {
                        let item_hits = result?;
                        degraded |= item_hits.degraded;
                        results_per_item.push(item_hits.hits);
                    }
                    Err(_) => {
                        warn!("Item {} hit the request deadline", index);
                        partial = true;
                        results_per_item.push(Vec::new());
                    }
                }
            }
        }

        let flat_results = flatten(&results_per_item);
        let reason = (flat_results.is_empty() && !partial).then_some(REASON_NO_MATCH);

        let metadata = SearchMetadata {
            degraded,
            partial,
            reason,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Search finished: {} items, {} unique hits, degraded={}, partial={}",
            items.len(),
            flat_results.len(),
            metadata.degraded,
            metadata.partial
        );

        Ok(SearchResponse {
            items,
            results_per_item,
            flat_results,
            metadata,
        })
    }

    /// Refresh product embeddings through this system's provider
    pub async fn refresh_embeddings(
        &self,
        mode: RefreshMode,
        product_ids: Option<&[i64]>,
    ) -> Result<RefreshReport> {
        enrich::refresh_embeddings(&self.db, &self.embedder, &self.config, mode, product_ids)
            .await
    }
}

/// Deduplicate hits across items, keeping item order and each item's
/// internal ranking. A product stays under the earliest item that scored it.
fn flatten(results_per_item: &[Vec<ScoredHit>]) -> Vec<ScoredHit> {
    let mut seen: HashSet<i64> = HashSet::new();
    let mut flat = Vec::new();

    for hits in results_per_item {
        for hit in hits {
            if seen.insert(hit.record.product.id) {
                flat.push(hit.clone());
            }
        }
    }

    flat
}
