//! Hybrid retrieval: rank fusion, diversity filtering and confidence scoring
//!
//! Two independent ranked lists (vector and lexical) are merged with weighted
//! Reciprocal Rank Fusion, re-ranked by intent and thread hints, capped per
//! section, and classified into a confidence branch for answer generation.
//! Results below `confident` can optionally be retried with a wider search.

mod confidence;
mod deduplication;
mod diversity;
mod engine;
mod fallback;
mod fusion;

pub use confidence::ConfidenceScorer;
pub use deduplication::deduplicate_chunks;
pub use diversity::{DiversityFilter, FilterOutcome};
pub use engine::RetrievalEngine;
pub use fallback::{improves, FallbackStrategy};
pub use fusion::{weighted_reciprocal_rank_fusion, FusionError, FusionWeights};
