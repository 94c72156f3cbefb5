//! # Search Core Configuration Module
//!
//! This module consolidates every tunable knob of the search core into a
//! single configuration record with defaults resolved at construction time.
//!
//! ## Key Components
//!
//! - `SearchConfig`: Complete configuration for retrieval, parsing, and the
//!   embedding refresh pipeline
//! - `SearchConfigBuilder`: Builder pattern implementation for easier
//!   configuration
//!
//! The weights and thresholds here directly control ranking: the hybrid
//! score is `vector_weight * vector_score + text_weight * text_score`, a
//! candidate qualifies when either branch clears its own floor, and the
//! fused score must clear `min_similarity` to be returned at all.

/// Dimension of the embedding vectors produced by the default model.
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// Configuration for the hybrid search core
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Weight of the dense vector score in the fused ranking
    pub vector_weight: f64,

    /// Weight of the trigram text score in the fused ranking
    pub text_weight: f64,

    /// Minimum vector similarity for a candidate to qualify on the dense branch
    pub min_vector_score: f64,

    /// Minimum trigram similarity for a candidate to qualify on the lexical branch
    pub min_text_score: f64,

    /// Floor applied to the fused score
    pub min_similarity: f64,

    /// Default number of results per search item
    pub default_k: usize,

    /// Embedding model identifier, stamped into every embedding row
    pub embedding_model: String,

    /// Chat model used for query understanding
    pub chat_model: String,

    /// Temperature for general chat completions
    pub chat_temperature: f64,

    /// Temperature for the query parser (kept low for stable JSON output)
    pub parser_temperature: f64,

    /// Number of products embedded per batch during refresh
    pub embedding_batch_size: usize,

    /// Delay between refresh batches, in milliseconds
    pub embedding_batch_delay_ms: u64,

    /// Maximum attempts for a single provider call (initial try included)
    pub retry_max_attempts: u32,

    /// Base delay for exponential backoff between retries, in milliseconds
    pub retry_base_ms: u64,

    /// Per-call timeout for embedding requests, in seconds
    pub embed_timeout_secs: u64,

    /// Per-call timeout for chat requests, in seconds
    pub chat_timeout_secs: u64,

    /// End-to-end deadline for one search request, in seconds
    pub query_timeout_secs: u64,

    /// Whether the enriched description mentions the merchant's city
    pub describe_city: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            text_weight: 0.4,
            min_vector_score: 0.25,
            min_text_score: 0.10,
            min_similarity: 0.20,
            default_k: 5,
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            chat_temperature: 0.3,
            parser_temperature: 0.2,
            embedding_batch_size: 32,
            embedding_batch_delay_ms: 500,
            retry_max_attempts: 3,
            retry_base_ms: 500,
            embed_timeout_secs: 5,
            chat_timeout_secs: 15,
            query_timeout_secs: 20,
            describe_city: true,
        }
    }
}

/// Builder for SearchConfig
#[derive(Debug, Default)]
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
        }
    }

    /// Set the fusion weights
    pub fn weights(mut self, vector_weight: f64, text_weight: f64) -> Self {
        self.config.vector_weight = vector_weight;
        self.config.text_weight = text_weight;
        self
    }

    /// Set the per-branch qualification floors
    pub fn branch_floors(mut self, min_vector_score: f64, min_text_score: f64) -> Self {
        self.config.min_vector_score = min_vector_score;
        self.config.min_text_score = min_text_score;
        self
    }

    /// Set the fused score floor
    pub fn min_similarity(mut self, min_similarity: f64) -> Self {
        self.config.min_similarity = min_similarity;
        self
    }

    /// Set the default result count per search item
    pub fn default_k(mut self, default_k: usize) -> Self {
        self.config.default_k = default_k;
        self
    }

    /// Set the embedding model identifier
    pub fn embedding_model(mut self, embedding_model: impl Into<String>) -> Self {
        self.config.embedding_model = embedding_model.into();
        self
    }

    /// Set the chat model identifier
    pub fn chat_model(mut self, chat_model: impl Into<String>) -> Self {
        self.config.chat_model = chat_model.into();
        self
    }

    /// Set the refresh batch size
    pub fn embedding_batch_size(mut self, embedding_batch_size: usize) -> Self {
        self.config.embedding_batch_size = embedding_batch_size;
        self
    }

    /// Set the delay between refresh batches
    pub fn embedding_batch_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.embedding_batch_delay_ms = delay_ms;
        self
    }

    /// Set the retry policy for provider calls
    pub fn retries(mut self, max_attempts: u32, base_ms: u64) -> Self {
        self.config.retry_max_attempts = max_attempts;
        self.config.retry_base_ms = base_ms;
        self
    }

    /// Set the end-to-end search deadline
    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.config.query_timeout_secs = secs;
        self
    }

    /// Set whether the enriched description mentions the merchant's city
    pub fn describe_city(mut self, describe_city: bool) -> Self {
        self.config.describe_city = describe_city;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SearchConfig {
        self.config
    }
}

impl SearchConfig {
    /// Create a new builder
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::new()
    }
}
