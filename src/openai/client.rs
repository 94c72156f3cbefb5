//! Client implementation for the OpenAI API
//!
//! This module provides the main entry point for the embeddings and chat
//! completions endpoints used by the search core.

use crate::error::{Error, Result};
use crate::openai::http::HttpClient;
use crate::openai::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, EmbeddingRequest,
    EmbeddingResponse, HttpOptions, ResponseFormat,
};
use tracing::{debug, instrument};

/// Client for the OpenAI API
#[derive(Clone)]
pub struct Client {
    http_client: HttpClient,
}

impl Client {
    /// Create a new client with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: HttpClient::new(api_key.into()),
        }
    }

    /// Create a new client with custom HTTP options
    pub fn with_options(api_key: impl Into<String>, options: HttpOptions) -> Self {
        Self {
            http_client: HttpClient::with_options(api_key.into(), options),
        }
    }

    /// Create a new client from the OPENAI_API_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Generate an embedding for a single text
    #[instrument(skip(self, input), level = "debug", fields(model = model))]
    pub async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: model.to_string(),
            input: input.to_string(),
        };

        debug!("Requesting embedding for {} chars", input.len());
        let response: EmbeddingResponse = self.http_client.post("embeddings", &request).await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::UnexpectedResponse("Embeddings response was empty".to_string()))
    }

    /// Generate a chat completion from a system prompt and a user message
    #[instrument(skip(self, system, user), level = "debug", fields(model = model))]
    pub async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
        temperature: Option<f64>,
        json_mode: bool,
    ) -> Result<String> {
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature,
            response_format: json_mode.then(ResponseFormat::json_object),
        };

        let response: ChatCompletionResponse =
            self.http_client.post("chat/completions", &request).await?;

        let text = response.text();
        if text.is_empty() {
            return Err(Error::UnexpectedResponse(
                "Chat completion had no choices".to_string(),
            ));
        }
        Ok(text)
    }

    #[cfg(test)]
    pub(crate) fn http_client_mut(&mut self) -> &mut HttpClient {
        &mut self.http_client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_embed() {
        let mut server = Server::new_async().await;
        let mock_server = server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [{"embedding": [0.25, -0.5, 0.75]}], "model": "text-embedding-3-small"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut client = Client::new("test-key");
        client.http_client_mut().set_base_url(server.url());

        let vector = client.embed("text-embedding-3-small", "mlijeko").await.unwrap();
        assert_eq!(vector, vec![0.25, -0.5, 0.75]);

        mock_server.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_json_mode() {
        let mut server = Server::new_async().await;
        let mock_server = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "[]"}}]}"#)
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "response_format": {"type": "json_object"}
            })))
            .expect(1)
            .create_async()
            .await;

        let mut client = Client::new("test-key");
        client.http_client_mut().set_base_url(server.url());

        let text = client
            .chat("gpt-4o-mini", "system prompt", "kafa", Some(0.2), true)
            .await
            .unwrap();
        assert_eq!(text, "[]");

        mock_server.assert_async().await;
    }
}
