//! Request and response types for the OpenAI API

use serde::{Deserialize, Serialize};

/// Options for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Whether to automatically retry requests when rate limited
    pub retry_on_rate_limit: bool,

    /// Maximum number of retry attempts for rate-limited requests
    pub max_retries: u32,

    /// Default retry delay in seconds if no Retry-After header is provided
    pub default_retry_after_secs: u64,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            retry_on_rate_limit: true,
            max_retries: 3,
            default_retry_after_secs: 2,
            timeout_secs: 120,
        }
    }
}

/// Request body for the embeddings endpoint
#[derive(Debug, Serialize)]
pub struct EmbeddingRequest {
    /// Model identifier
    pub model: String,

    /// Text to embed
    pub input: String,
}

/// One embedding in an embeddings response
#[derive(Debug, Deserialize)]
pub struct EmbeddingData {
    /// The embedding vector
    pub embedding: Vec<f32>,
}

/// Response body for the embeddings endpoint
#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    /// Returned embeddings, in input order
    pub data: Vec<EmbeddingData>,

    /// Model that produced the embeddings
    #[serde(default)]
    pub model: String,
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the author ("system", "user", "assistant")
    pub role: String,

    /// Message text
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response format directive for JSON-only completions
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    /// Format type, e.g. "json_object"
    #[serde(rename = "type")]
    pub format_type: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            format_type: "json_object".to_string(),
        }
    }
}

/// Request body for the chat completions endpoint
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    /// Model identifier
    pub model: String,

    /// Conversation so far
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Optional response format (JSON mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// One choice in a chat completions response
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    /// The generated message
    pub message: ChatMessage,
}

/// Response body for the chat completions endpoint
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    /// Generated choices
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, or an empty string if there are none
    pub fn text(&self) -> String {
        self.choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}
