//! # Mock Providers for Testing
//!
//! Provides `MockEmbedder` and `MockChatModel` implementations of the
//! provider traits for use in tests. They return scripted responses, count
//! calls, and can fail a configurable number of times to exercise the retry
//! path without making actual API calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::provider::{ChatModel, Embedder, ProviderError};

/// A mock embedder that returns deterministic vectors.
///
/// By default each text maps to a stable pseudo-random unit vector derived
/// from a hash of the text, so identical texts always embed identically and
/// different texts land far apart.
#[derive(Clone)]
pub struct MockEmbedder {
    dimensions: usize,
    fixed: Option<Vec<f32>>,
    fail_first: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
}

impl MockEmbedder {
    /// Create a mock that derives a stable vector from each input text
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fixed: None,
            fail_first: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Create a mock that returns the same vector for every input
    pub fn constant(vector: Vec<f32>, dimensions: usize) -> Self {
        Self {
            dimensions,
            fixed: Some(vector),
            fail_first: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail the next `n` calls with a transient error before succeeding
    pub fn fail_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Number of embed calls made so far
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn derive_vector(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vector = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let byte = digest[i % digest.len()];
            // Mix the position in so long vectors do not repeat every 32 slots
            let mixed = byte.wrapping_mul(31).wrapping_add((i / digest.len()) as u8);
            vector.push((mixed as f32 / 255.0) - 0.5);
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Embedder for MockEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient("mock failure".to_string()));
        }

        match &self.fixed {
            Some(vector) => Ok(vector.clone()),
            None => Ok(self.derive_vector(text)),
        }
    }
}

/// A mock chat model that returns scripted replies in order.
///
/// Once the script is exhausted it keeps returning the last reply. An empty
/// script yields an empty string.
#[derive(Clone)]
pub struct MockChatModel {
    replies: Arc<Mutex<Vec<String>>>,
    fail_first: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
}

impl MockChatModel {
    pub fn replies(replies: Vec<String>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            fail_first: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A mock that always answers with the same text
    pub fn always(reply: impl Into<String>) -> Self {
        Self::replies(vec![reply.into()])
    }

    /// Fail the next `n` calls with a transient error before succeeding
    pub fn fail_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Number of complete calls made so far
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChatModel for MockChatModel {
    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _temperature: Option<f64>,
        _json_mode: bool,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient("mock failure".to_string()));
        }

        let mut replies = self.replies.lock().await;
        if replies.is_empty() {
            return Ok(String::new());
        }
        if replies.len() == 1 {
            return Ok(replies[0].clone());
        }
        Ok(replies.remove(0))
    }
}
