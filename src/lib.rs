//! # Pijaca - Hybrid Product Search for a Grocery Marketplace
//!
//! This crate implements the search core of a grocery marketplace for the
//! Bosnian market. Products from local merchants are enriched into natural
//! language descriptions, embedded with OpenAI, and stored in a LibSQL
//! database with a vector index. Queries run through two branches in
//! parallel: dense retrieval over the embeddings and trigram matching over
//! the text, fused into one ranked list.
//!
//! ## Features
//!
//! - Query understanding: a chat model splits free-form shopping queries
//!   into individual product items with expanded local synonyms
//! - Hybrid retrieval with weighted fusion of vector and text scores
//! - Graceful degradation to lexical-only search when the embedding
//!   provider is down
//! - Incremental embedding refresh driven by content hashes, so unchanged
//!   products never hit the provider again
//! - Merchant, discount, and price filtering pushed down into SQL
//! - Rate-limited providers with automatic retries
//! - Async API with Tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use pijaca_search::config::SearchConfig;
//! use pijaca_search::index::Database;
//! use pijaca_search::retriever::Filters;
//! use pijaca_search::search::SearchSystem;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new_from_path("pijaca.db").await?;
//!     let api_key = std::env::var("OPENAI_API_KEY")?;
//!     let system = SearchSystem::new_openai(db, api_key, SearchConfig::default());
//!
//!     let response = system
//!         .search("kafa i mlijeko ispod 10 KM", None, Filters::default())
//!         .await?;
//!
//!     for hit in &response.flat_results {
//!         println!("{} ({:.2})", hit.record.product.title, hit.combined_score);
//!     }
//!     Ok(())
//! }
//! ```

mod error;
pub mod openai;
pub mod provider;

// Search core modules
pub mod config;
pub mod enrich;
pub mod index;
pub mod lexical;
pub mod query;
pub mod retriever;
pub mod search;

pub use error::Error;

/// Re-export of common types for public use
pub mod prelude {
    pub use crate::config::SearchConfig;
    pub use crate::enrich::{RefreshMode, RefreshReport};
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::index::Database;
    pub use crate::retriever::Filters;
    pub use crate::search::{SearchResponse, SearchSystem};
}
