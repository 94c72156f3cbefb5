//! # Query Understanding Module
//!
//! Turns a free-form shopping query into a list of structured `SearchItem`s
//! using the chat model, plus a small amount of local extraction for price
//! constraints.
//!
//! The parser is total: whatever the model returns (malformed JSON, fenced
//! output, a bare object instead of a list) or however the provider fails,
//! the caller always gets at least one item covering the whole query.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::provider::ChatModel;

/// One shopping concept extracted from a user query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    /// The raw fragment of the user's query this item came from
    #[serde(default)]
    pub original: String,

    /// Canonical product name
    #[serde(default)]
    pub query: String,

    /// Canonical name plus synonyms and related local terms
    #[serde(default)]
    pub expanded_query: String,
}

impl SearchItem {
    /// An item that passes the query through unchanged
    pub fn identity(query: &str) -> Self {
        Self {
            original: query.to_string(),
            query: query.to_string(),
            expanded_query: query.to_string(),
        }
    }

    /// Fill empty fields from the ones that are present
    fn normalized(mut self) -> Option<Self> {
        if self.query.trim().is_empty() {
            self.query = self.original.trim().to_string();
        }
        if self.query.is_empty() {
            return None;
        }
        if self.original.trim().is_empty() {
            self.original = self.query.clone();
        }
        if self.expanded_query.trim().is_empty() {
            self.expanded_query = self.query.clone();
        }
        Some(self)
    }
}

const PARSER_SYSTEM_PROMPT: &str = "\
Ti si parser upita za marketplace u Bosni i Hercegovini. Korisnikov upit \
podijeli na pojedinacne proizvode koje trazi.

Za svaki proizvod vrati:
- \"original\": dio upita koji se odnosi na taj proizvod
- \"query\": kanonski naziv proizvoda (npr. \"mlijeko\", \"kafa\")
- \"expanded_query\": kanonski naziv plus sinonimi i srodni lokalni izrazi \
(npr. za \"kafa\": \"kafa, kahva, espresso, mljevena kafa\")

VAZNO: Odgovori ISKLJUCIVO JSON listom objekata, bez dodatnog teksta. \
NIKADA ne postavljaj dodatna pitanja.

Primjer za upit \"treba mi kafa i mlijeko\":
[{\"original\": \"kafa\", \"query\": \"kafa\", \"expanded_query\": \"kafa, kahva, espresso\"}, \
{\"original\": \"mlijeko\", \"query\": \"mlijeko\", \"expanded_query\": \"mlijeko, svjeze mlijeko, kravlje mlijeko\"}]";

/// Strip markdown code fences the model sometimes wraps its JSON in
fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}

/// Parse the model's reply into search items.
///
/// A bare object is treated as a single-element list. Items without a usable
/// query are dropped; if nothing usable remains the identity fallback covers
/// the whole query.
fn parse_response(raw: &str, query: &str) -> Vec<SearchItem> {
    let text = strip_code_fences(raw);

    let parsed: Result<Vec<SearchItem>, _> = serde_json::from_str::<serde_json::Value>(text)
        .map(|value| match value {
            serde_json::Value::Array(_) => value,
            other => serde_json::Value::Array(vec![other]),
        })
        .and_then(serde_json::from_value);

    let items: Vec<SearchItem> = match parsed {
        Ok(items) => items
            .into_iter()
            .filter_map(SearchItem::normalized)
            .collect(),
        Err(e) => {
            warn!("Query parser returned unparseable JSON: {}", e);
            Vec::new()
        }
    };

    if items.is_empty() {
        vec![SearchItem::identity(query)]
    } else {
        items
    }
}

/// Parse a user query into search items using the chat model.
///
/// Never fails; a provider error degrades to the identity item.
pub async fn parse_query<C: ChatModel>(
    chat: &C,
    config: &SearchConfig,
    query: &str,
) -> Vec<SearchItem> {
    let query = query.trim();
    if query.is_empty() {
        return vec![SearchItem::identity(query)];
    }

    match chat
        .complete(
            PARSER_SYSTEM_PROMPT,
            query,
            Some(config.parser_temperature),
            true,
        )
        .await
    {
        Ok(reply) => {
            let items = parse_response(&reply, query);
            debug!("Parsed query into {} items", items.len());
            items
        }
        Err(e) => {
            warn!("Query parser unavailable ({}), falling back to raw query", e);
            vec![SearchItem::identity(query)]
        }
    }
}

/// Extract a "cheaper than X" constraint from the query text.
///
/// Understands the usual local phrasings: "ispod 10 KM", "do 5 KM", "< 3",
/// "10 KM max".
pub fn extract_max_price(query: &str) -> Option<f64> {
    static PATTERNS: OnceLock<Vec<regex::Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"(?i)ispod\s+(\d+(?:\.\d+)?)\s*(?:KM)?",
            r"(?i)do\s+(\d+(?:\.\d+)?)\s*(?:KM)?",
            r"(?i)<\s*(\d+(?:\.\d+)?)\s*(?:KM)?",
            r"(?i)(\d+(?:\.\d+)?)\s*KM\s+max",
        ]
        .iter()
        .map(|p| regex::Regex::new(p).expect("price pattern must compile"))
        .collect()
    });

    for pattern in patterns {
        if let Some(captures) = pattern.captures(query) {
            if let Ok(price) = captures[1].parse::<f64>() {
                return Some(price);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockChatModel;

    fn config() -> SearchConfig {
        SearchConfig::default()
    }

    #[tokio::test]
    async fn test_parses_item_list() {
        let chat = MockChatModel::always(
            r#"[{"original": "kafa", "query": "kafa", "expanded_query": "kafa, kahva, espresso"},
                {"original": "mlijeko", "query": "mlijeko", "expanded_query": "mlijeko, kravlje mlijeko"}]"#,
        );

        let items = parse_query(&chat, &config(), "treba mi kafa i mlijeko").await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].query, "kafa");
        assert_eq!(items[1].expanded_query, "mlijeko, kravlje mlijeko");
    }

    #[tokio::test]
    async fn test_strips_code_fences() {
        let chat = MockChatModel::always(
            "```json\n[{\"original\": \"hljeb\", \"query\": \"hljeb\", \"expanded_query\": \"hljeb, kruh\"}]\n```",
        );

        let items = parse_query(&chat, &config(), "hljeb").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].expanded_query, "hljeb, kruh");
    }

    #[tokio::test]
    async fn test_wraps_bare_object() {
        let chat = MockChatModel::always(
            r#"{"original": "kafa", "query": "kafa", "expanded_query": "kafa, kahva"}"#,
        );

        let items = parse_query(&chat, &config(), "kafa").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].query, "kafa");
    }

    #[tokio::test]
    async fn test_malformed_json_falls_back_to_identity() {
        let chat = MockChatModel::always("izvini, ne mogu to");

        let items = parse_query(&chat, &config(), "kafa i mlijeko").await;
        assert_eq!(items, vec![SearchItem::identity("kafa i mlijeko")]);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_identity() {
        let chat = MockChatModel::always("[]").fail_first(1);

        let items = parse_query(&chat, &config(), "kafa").await;
        assert_eq!(items, vec![SearchItem::identity("kafa")]);
    }

    #[tokio::test]
    async fn test_empty_list_falls_back_to_identity() {
        let chat = MockChatModel::always("[]");

        let items = parse_query(&chat, &config(), "kafa").await;
        assert_eq!(items, vec![SearchItem::identity("kafa")]);
    }

    #[test]
    fn test_missing_fields_are_filled() {
        let items = parse_response(r#"[{"query": "kafa"}]"#, "kafa");
        assert_eq!(items[0].original, "kafa");
        assert_eq!(items[0].expanded_query, "kafa");

        let items = parse_response(r#"[{"original": "mlijeko"}]"#, "mlijeko");
        assert_eq!(items[0].query, "mlijeko");
    }

    #[test]
    fn test_unusable_items_are_dropped() {
        let items = parse_response(
            r#"[{"original": "", "query": ""}, {"query": "kafa"}]"#,
            "nesto",
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].query, "kafa");
    }

    #[test]
    fn test_extract_max_price() {
        assert_eq!(extract_max_price("meso ispod 10 KM"), Some(10.0));
        assert_eq!(extract_max_price("mlijeko do 5.50 KM"), Some(5.5));
        assert_eq!(extract_max_price("kafa < 3"), Some(3.0));
        assert_eq!(extract_max_price("nesto 10 km max"), Some(10.0));
        assert_eq!(extract_max_price("obicna kafa"), None);
    }
}
