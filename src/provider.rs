//! # Model Provider Module
//!
//! This module defines the traits the search core uses to talk to embedding
//! and chat models, with built-in rate limiting to prevent API quota
//! exhaustion.
//!
//! ## Key Components
//!
//! - `Embedder` / `ChatModel`: The two seams the rest of the crate depends on
//! - `RateLimitedEmbedder` / `RateLimitedChatModel`: Wrappers that add rate
//!   limiting to any provider implementation
//! - `OpenAiEmbedder` / `OpenAiChatModel`: Implementations backed by the
//!   OpenAI API client
//! - `retry::retry_with_backoff`: Exponential backoff with jitter for
//!   transient provider failures
//!
//! Every provider call is bounded by a per-call timeout so a stalled upstream
//! cannot hold a search request past its deadline.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{Instrument, debug_span, info_span};

use crate::config::EMBEDDING_DIMENSIONS;
use crate::error::Error;
use crate::openai;

pub mod mock;
pub mod retry;

pub use retry::{RetryFailure, RetryPolicy, retry_with_backoff};

/// Errors surfaced by embedding and chat providers.
///
/// The classification drives retry behavior: `Transient`, `RateLimited`, and
/// `Timeout` failures are retried with backoff, everything else fails fast.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Temporary failure that is worth retrying
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider rejected the call due to rate limiting
    #[error("provider rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Suggested wait before the next attempt
        retry_after_secs: u64,
    },

    /// The call exceeded its per-call timeout
    #[error("provider call timed out after {0}s")]
    Timeout(u64),

    /// The input itself was rejected and retrying will not help
    #[error("invalid provider input: {0}")]
    InvalidInput(String),

    /// Unrecoverable failure (bad credentials, malformed response, ...)
    #[error("provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Whether a retry with backoff could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
        )
    }
}

impl From<Error> for ProviderError {
    fn from(err: Error) -> Self {
        match err {
            Error::RateLimit { retry_after_secs } => {
                ProviderError::RateLimited { retry_after_secs }
            }
            Error::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::Transient(e.to_string())
                } else {
                    ProviderError::Permanent(e.to_string())
                }
            }
            Error::Api {
                status_code,
                message,
            } if status_code >= 500 => {
                ProviderError::Transient(format!("server error {}: {}", status_code, message))
            }
            Error::InvalidRequest(msg) => ProviderError::InvalidInput(msg),
            other => ProviderError::Permanent(other.to_string()),
        }
    }
}

/// A model that turns text into a dense vector
pub trait Embedder: Send + Sync {
    /// Dimension of the vectors this model produces
    fn dimensions(&self) -> usize;

    /// Embed a single text
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, ProviderError>> + Send;
}

/// A chat model used for query understanding
pub trait ChatModel: Send + Sync {
    /// Run a completion from a system prompt and a user message
    fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: Option<f64>,
        json_mode: bool,
    ) -> impl std::future::Future<Output = Result<String, ProviderError>> + Send;
}

/// Embedder backed by the OpenAI embeddings endpoint
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: openai::Client,
    model: String,
    timeout_secs: u64,
}

impl OpenAiEmbedder {
    pub fn new(client: openai::Client, model: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client,
            model: model.into(),
            timeout_secs,
        }
    }
}

impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }

        let call = self.client.embed(&self.model, text);
        let vector = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
            .instrument(info_span!("embed", model = %self.model))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout_secs))??;

        if vector.len() != EMBEDDING_DIMENSIONS {
            return Err(ProviderError::Permanent(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                EMBEDDING_DIMENSIONS
            )));
        }
        Ok(vector)
    }
}

/// Chat model backed by the OpenAI chat completions endpoint
#[derive(Clone)]
pub struct OpenAiChatModel {
    client: openai::Client,
    model: String,
    timeout_secs: u64,
}

impl OpenAiChatModel {
    pub fn new(client: openai::Client, model: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client,
            model: model.into(),
            timeout_secs,
        }
    }
}

impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: Option<f64>,
        json_mode: bool,
    ) -> Result<String, ProviderError> {
        let call = self
            .client
            .chat(&self.model, system, user, temperature, json_mode);
        let text = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
            .instrument(info_span!("chat", model = %self.model))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout_secs))??;
        Ok(text)
    }
}

/// Wrapper that rate limits an embedder
#[derive(Clone)]
pub struct RateLimitedEmbedder<E: Embedder> {
    inner: E,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<E: Embedder> RateLimitedEmbedder<E> {
    pub fn new(inner: E, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            inner,
            limiter: Arc::new(limiter),
        }
    }

    /// Wrap with a per-minute quota
    pub fn per_minute(inner: E, calls: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(calls.max(1)).unwrap_or(NonZeroU32::MIN));
        Self::new(inner, RateLimiter::direct(quota))
    }
}

impl<E: Embedder> Embedder for RateLimitedEmbedder<E> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.limiter
            .until_ready()
            .instrument(debug_span!("limiter"))
            .await;
        self.inner.embed(text).await
    }
}

/// Wrapper that rate limits a chat model
#[derive(Clone)]
pub struct RateLimitedChatModel<C: ChatModel> {
    inner: C,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<C: ChatModel> RateLimitedChatModel<C> {
    pub fn new(inner: C, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            inner,
            limiter: Arc::new(limiter),
        }
    }

    /// Wrap with a per-minute quota
    pub fn per_minute(inner: C, calls: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(calls.max(1)).unwrap_or(NonZeroU32::MIN));
        Self::new(inner, RateLimiter::direct(quota))
    }
}

impl<C: ChatModel> ChatModel for RateLimitedChatModel<C> {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: Option<f64>,
        json_mode: bool,
    ) -> Result<String, ProviderError> {
        self.limiter
            .until_ready()
            .instrument(debug_span!("limiter"))
            .await;
        self.inner.complete(system, user, temperature, json_mode).await
    }
}
