//! HTTP client for the OpenAI API
//!
//! Handles authentication, request formatting, response parsing, and
//! automatic retries for rate-limited requests.

use crate::error::{Error, Result};
use crate::openai::types::HttpOptions;
use rand::{thread_rng, Rng};
use reqwest::{Client as ReqwestClient, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, instrument};
use url::Url;

/// HTTP client for making requests to the OpenAI API
///
/// The client can be configured to automatically retry requests when rate
/// limited (HTTP 429 responses). This behavior is controlled by the
/// `retry_on_rate_limit`, `max_retries`, and `default_retry_after_secs`
/// options in the `HttpOptions` struct.
#[derive(Clone)]
pub struct HttpClient {
    /// The underlying reqwest client
    client: ReqwestClient,

    /// Base URL for API requests
    base_url: String,

    /// API key for authentication
    api_key: String,

    /// Whether to automatically retry requests when rate limited
    retry_on_rate_limit: bool,

    /// Maximum number of retry attempts for rate-limited requests
    max_retries: u32,

    /// Default retry delay in seconds if no Retry-After header is provided
    default_retry_after_secs: u64,
}

#[cfg(test)]
impl HttpClient {
    /// Set the base URL (for testing only)
    pub fn set_base_url(&mut self, url: String) {
        self.base_url = url;
    }
}

impl HttpClient {
    /// Create a new HTTP client with an API key
    pub fn new(api_key: String) -> Self {
        Self::with_options(api_key, HttpOptions::default())
    }

    /// Create a new HTTP client with an API key and custom options
    pub fn with_options(api_key: String, options: HttpOptions) -> Self {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: "https://api.openai.com".to_string(),
            api_key,
            retry_on_rate_limit: options.retry_on_rate_limit,
            max_retries: options.max_retries,
            default_retry_after_secs: options.default_retry_after_secs,
        }
    }

    /// Build a URL for an API path
    fn build_url(&self, path: &str) -> Result<Url> {
        let url = format!("{}/v1/{}", self.base_url, path);
        Url::parse(&url).map_err(|e| Error::Other(format!("Invalid URL: {}", e)))
    }

    /// Send a POST request with a JSON body
    #[instrument(skip(self, body), level = "debug")]
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.build_url(path)?;
        let request = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body);

        debug!("Sending POST request to {}", path);
        self.execute_request(request).await
    }

    /// Execute an HTTP request and handle the response
    async fn execute_request<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let mut attempts = 0;

        loop {
            let request_clone = request
                .try_clone()
                .ok_or_else(|| Error::Other("Failed to clone request for retry".to_string()))?;

            let response = request_clone.send().await.map_err(Error::Http)?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                attempts += 1;

                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(self.default_retry_after_secs);

                let response_text = response.text().await.map_err(Error::Http)?;
                error!("API error: {} - {}", status, response_text);

                if self.retry_on_rate_limit && attempts <= self.max_retries {
                    // Exponential backoff with jitter, capped at 60 seconds
                    let exp_factor = u64::pow(2, attempts - 1);
                    let mut delay = retry_after.saturating_mul(exp_factor);

                    if delay > 1 {
                        let jitter_factor = thread_rng().gen_range(0.8..1.2);
                        delay = ((delay as f64) * jitter_factor) as u64;
                    }
                    delay = std::cmp::min(delay, 60);

                    debug!(
                        "Rate limited. Retrying after {} seconds (attempt {}/{})",
                        delay, attempts, self.max_retries
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    continue;
                }

                return Err(Error::RateLimit {
                    retry_after_secs: retry_after,
                });
            }

            let response_text = response.text().await.map_err(Error::Http)?;

            if status.is_success() {
                return serde_json::from_str(&response_text).map_err(|e| {
                    error!("Failed to parse response: {}", e);
                    Error::UnexpectedResponse(format!("Failed to parse response: {}", e))
                });
            }

            error!("API error: {} - {}", status, response_text);

            return if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                Err(Error::Auth("Invalid API key or credentials".to_string()))
            } else if status == StatusCode::BAD_REQUEST {
                Err(Error::InvalidRequest(response_text))
            } else {
                Err(Error::Api {
                    status_code: status.as_u16(),
                    message: response_text,
                })
            };
        }
    }
}
