//! Crate-level error types

use thiserror::Error;

/// Result type for search-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for search-core operations
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider API returned an error response
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code
        status_code: u16,
        /// Error message
        message: String,
    },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Please retry after {retry_after_secs} seconds")]
    RateLimit {
        /// Seconds to wait before retrying
        retry_after_secs: u64,
    },

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unexpected response format
    #[error("Unexpected response format: {0}")]
    UnexpectedResponse(String),

    /// Embedding or chat provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Embedding refresh error
    #[error("Refresh error: {0}")]
    Refresh(String),

    /// Search error
    #[error("Search error: {0}")]
    Search(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
