//! Trigram text matching for the lexical retrieval branch
//!
//! Similarity follows the usual trigram definition: words are lowercased,
//! non-alphanumeric characters act as separators, every word is padded with
//! two leading and one trailing space, and the score is the Jaccard ratio of
//! the two trigram sets. Misspelled queries like "mlijko" still land close to
//! "mlijeko", which is the whole point of keeping this branch next to the
//! dense one.

use std::collections::HashSet;

use crate::index::ProductRecord;

/// Weight applied to description similarity relative to title similarity
const DESCRIPTION_WEIGHT: f64 = 0.8;

/// Trigram similarity scores for one product against one query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextScore {
    /// Similarity against the product title
    pub title: f64,

    /// Similarity against the product description
    pub description: f64,
}

impl TextScore {
    /// The score used for ranking: the better of the title similarity and
    /// the down-weighted description similarity
    pub fn combined(&self) -> f64 {
        self.title.max(self.description * DESCRIPTION_WEIGHT)
    }

    /// Whether either raw similarity clears the given floor
    pub fn qualifies(&self, min_score: f64) -> bool {
        self.title >= min_score || self.description >= min_score
    }
}

/// Extract the trigram set of a text
fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let mut set = HashSet::new();

    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = std::iter::repeat_n(' ', 2)
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();

        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }

    set
}

/// Trigram similarity between two texts, in [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);

    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    if union == 0 {
        return 0.0;
    }
    shared as f64 / union as f64
}

/// Score a product against a query term.
///
/// The description side prefers the enriched description and falls back to
/// the raw one for products the refresh job has not reached yet.
pub fn score(query: &str, record: &ProductRecord) -> TextScore {
    let title = similarity(query, &record.product.title);
    let description = record
        .product
        .enriched_description
        .as_deref()
        .or(record.product.description.as_deref())
        .map(|d| similarity(query, d))
        .unwrap_or(0.0);

    TextScore { title, description }
}
