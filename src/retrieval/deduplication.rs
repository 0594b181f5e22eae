//! Result deduplication by (dataset, chunk id)

use crate::types::{ChunkKey, ScoredChunk};
use ahash::{HashSet, HashSetExt};

/// Deduplicate chunks by their dataset-scoped key, keeping the first instance
///
/// Input is expected in rank order, so the first instance is the best one.
/// Surviving chunks are re-ranked 1..=n.
pub fn deduplicate_chunks(chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut seen: HashSet<ChunkKey> = HashSet::new();

    chunks
        .into_iter()
        .filter(|hit| seen.insert(hit.chunk.key()))
        .enumerate()
        .map(|(pos, mut hit)| {
            hit.rank = pos + 1;
            hit
        })
        .collect()
}
