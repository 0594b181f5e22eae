//! Retry strategies for results that come back below `confident`

use crate::types::{ConfidenceBranch, FusedResult, RetrievalMeta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Results below this count are widened rather than spread across documents
const WIDEN_BELOW: usize = 3;

/// How a retry changes the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Synonym-expanded query, fused with a more lexical weight split
    ExpandQuery,
    /// Same query, larger candidate pools
    WidenSearch,
    /// Larger candidate pools with a per-document cap
    MultiDoc,
}

impl FallbackStrategy {
    /// Pick a strategy from the current contexts.
    ///
    /// No keyword support at all points at a vocabulary mismatch, so the query
    /// is expanded when `expandable`. Thin result lists are widened; otherwise
    /// results are spread across documents.
    pub fn choose(contexts: &[FusedResult], expandable: bool) -> Self {
        let keyword_support = contexts.iter().any(|r| r.fusion_meta.lexical_rank.is_some());
        if !keyword_support && expandable {
            FallbackStrategy::ExpandQuery
        } else if contexts.len() < WIDEN_BELOW {
            FallbackStrategy::WidenSearch
        } else {
            FallbackStrategy::MultiDoc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStrategy::ExpandQuery => "expand_query",
            FallbackStrategy::WidenSearch => "widen_search",
            FallbackStrategy::MultiDoc => "multi_doc",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a retry beat the current result: a better branch wins, then more
/// contexts, then a higher top score.
pub fn improves(current: (&RetrievalMeta, usize), candidate: (&RetrievalMeta, usize)) -> bool {
    let (meta, count) = current;
    let (new_meta, new_count) = candidate;

    let rank = |b: ConfidenceBranch| match b {
        ConfidenceBranch::Confident => 2,
        ConfidenceBranch::Partial => 1,
        ConfidenceBranch::OutOfScope => 0,
    };

    match rank(new_meta.confidence_branch).cmp(&rank(meta.confidence_branch)) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            new_count > count || (new_count == count && new_meta.top1_score > meta.top1_score)
        }
    }
}
