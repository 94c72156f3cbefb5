//! OpenAI API client
//!
//! This module provides the HTTP transport for the embedding and chat
//! providers, including retry-on-rate-limit behavior and error mapping.

pub mod client;
pub mod http;
pub mod types;

pub use client::Client;
pub use http::HttpClient;
pub use types::HttpOptions;
