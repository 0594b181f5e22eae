//! Weighted Reciprocal Rank Fusion for combining vector and lexical rankings

use crate::types::{Chunk, ChunkKey, FusedResult, FusionMeta, RetrievalSource, ScoredChunk};
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be finite, non-negative and not both zero")]
    InvalidWeights,

    #[error("Invalid rank constant: k must be at least 1")]
    InvalidRankConstant,
}

/// Configuration for the fusion algorithm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    /// Weight for the vector ranking
    pub vector: f64,

    /// Weight for the lexical ranking
    pub lexical: f64,

    /// RRF rank constant; larger values flatten the rank curve
    pub k: u32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            lexical: 0.3,
            k: 60,
        }
    }
}

impl FusionWeights {
    pub fn new(vector: f64, lexical: f64, k: u32) -> Result<Self, FusionError> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(vector) || !valid(lexical) || vector + lexical <= 0.0 {
            return Err(FusionError::InvalidWeights);
        }
        if k == 0 {
            return Err(FusionError::InvalidRankConstant);
        }

        Ok(Self { vector, lexical, k })
    }

    /// `weight / (k + rank)` for a 1-based rank
    fn contribution(&self, weight: f64, rank: usize) -> f64 {
        weight / (self.k as f64 + rank as f64)
    }
}

struct Entry {
    chunk: Chunk,
    vector: Option<(usize, f32)>,
    lexical: Option<(usize, f32)>,
}

/// Apply weighted RRF to two ranked lists
///
/// score(id) = w_vector / (k + rank_vector) + w_lexical / (k + rank_lexical)
///
/// Ranks are 1-based positions in each input list; a source the chunk is
/// absent from contributes nothing. A chunk repeated within one list keeps its
/// first (best) position. Output is sorted by fused score descending; ties
/// keep the order in which chunks were first seen (vector list, then lexical).
pub fn weighted_reciprocal_rank_fusion(
    vector_results: &[ScoredChunk],
    lexical_results: &[ScoredChunk],
    weights: &FusionWeights,
) -> Vec<FusedResult> {
    let mut entries: Vec<Entry> = Vec::with_capacity(vector_results.len() + lexical_results.len());
    let mut by_key: HashMap<ChunkKey, usize> = HashMap::new();

    for (pos, hit) in vector_results.iter().enumerate() {
        let idx = *by_key.entry(hit.chunk.key()).or_insert_with(|| {
            entries.push(Entry {
                chunk: hit.chunk.clone(),
                vector: None,
                lexical: None,
            });
            entries.len() - 1
        });
        entries[idx].vector.get_or_insert((pos + 1, hit.score));
    }

    for (pos, hit) in lexical_results.iter().enumerate() {
        let idx = *by_key.entry(hit.chunk.key()).or_insert_with(|| {
            entries.push(Entry {
                chunk: hit.chunk.clone(),
                vector: None,
                lexical: None,
            });
            entries.len() - 1
        });
        entries[idx].lexical.get_or_insert((pos + 1, hit.score));
    }

    let mut fused: Vec<FusedResult> = Vec::with_capacity(entries.len());
    for entry in entries {
        let source = match (entry.vector, entry.lexical) {
            (Some(_), Some(_)) => RetrievalSource::Both,
            (Some(_), None) => RetrievalSource::Vector,
            (None, Some(_)) => RetrievalSource::Lexical,
            (None, None) => {
                debug_assert!(
                    false,
                    "fused chunk {} has no source rank; merge-by-key is broken",
                    entry.chunk.id
                );
                tracing::error!(chunk_id = %entry.chunk.id, "Fused chunk has no source rank, dropping");
                continue;
            }
        };

        let mut score = 0.0;
        if let Some((rank, _)) = entry.vector {
            score += weights.contribution(weights.vector, rank);
        }
        if let Some((rank, _)) = entry.lexical {
            score += weights.contribution(weights.lexical, rank);
        }

        fused.push(FusedResult {
            chunk: entry.chunk,
            fused_score: score,
            source,
            fusion_meta: FusionMeta {
                vector_rank: entry.vector.map(|(r, _)| r),
                vector_score: entry.vector.map(|(_, s)| s),
                lexical_rank: entry.lexical.map(|(r, _)| r),
                lexical_score: entry.lexical.map(|(_, s)| s),
                boost: 0.0,
            },
        });
    }

    // Stable sort keeps first-seen order among equal scores
    fused.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));

    tracing::debug!(
        vector_count = vector_results.len(),
        lexical_count = lexical_results.len(),
        unique = fused.len(),
        both = fused
            .iter()
            .filter(|r| r.source == RetrievalSource::Both)
            .count(),
        "Weighted RRF fusion complete"
    );

    fused
}
