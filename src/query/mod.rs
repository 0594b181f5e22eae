//! Query normalization and intent detection
//!
//! The normalizer collapses whitespace, keeps the original casing for
//! retrieval and logging, and classifies a lowercased copy.

mod expansion;
mod intent;

pub use expansion::expand_query;
pub use intent::{default_rules, IntentClassifier, IntentKind, IntentRule};

use serde::Serialize;

/// A cleaned query plus its detected intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedQuery {
    /// Trimmed, whitespace-collapsed, original casing
    pub text: String,
    /// Lowercased form used for rule matching
    pub match_text: String,
    pub intent: IntentKind,
}

impl NormalizedQuery {
    /// Empty queries are a caller error; the normalizer itself never fails
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Cleans raw queries and classifies them
#[derive(Debug, Clone)]
pub struct QueryNormalizer {
    classifier: IntentClassifier,
}

impl QueryNormalizer {
    pub fn new(classifier: IntentClassifier) -> Self {
        Self { classifier }
    }

    pub fn normalize(&self, raw: &str) -> NormalizedQuery {
        let text = collapse_whitespace(raw);
        let match_text = text.to_lowercase();
        let intent = self.classifier.classify(&match_text);

        NormalizedQuery {
            text,
            match_text,
            intent,
        }
    }
}

/// Trim and collapse every whitespace run to a single space
pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
