//! HNSW cosine-similarity retriever over precomputed chunk embeddings

use super::{EmbeddingProvider, Retriever, RetrieverError};
use crate::error::{DocfuseError, Result};
use crate::types::{Chunk, RetrievalSource, ScoredChunk, Scope};
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use std::sync::Arc;

/// Graph parameters for the HNSW index
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Max connections per node per layer
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Layers in the graph; hnsw_rs caps this at 16
const MAX_LAYERS: usize = 16;

/// Neighbours fetched per requested result on the first walk
const SCOPE_OVERFETCH: usize = 4;

struct Inner {
    index: Hnsw<'static, f32, DistCosine>,
    chunks: Vec<Chunk>,
    dimension: usize,
    ef_search: usize,
    provider: Arc<dyn EmbeddingProvider>,
}

/// Semantic retriever: embeds the query and walks the HNSW graph.
///
/// The graph is shared across tenants, so scope is applied by over-fetching
/// neighbours and dropping the ones outside the request scope. When too few
/// survive, the walk is repeated with twice the fetch until `k` in-scope
/// hits are found or the whole graph has been visited.
#[derive(Clone)]
pub struct HnswVectorRetriever {
    inner: Arc<Inner>,
}

impl HnswVectorRetriever {
    /// Build the graph from chunks and their embeddings.
    ///
    /// Every embedding must have the provider's dimension.
    pub fn build(
        entries: Vec<(Chunk, Vec<f32>)>,
        provider: Arc<dyn EmbeddingProvider>,
        params: HnswParams,
    ) -> Result<Self> {
        let dimension = provider.dimension();
        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            entries.len().max(1),
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        let mut chunks = Vec::with_capacity(entries.len());
        for (slot, (chunk, embedding)) in entries.into_iter().enumerate() {
            if embedding.len() != dimension {
                return Err(DocfuseError::Index(format!(
                    "Chunk {} has a {}-dimensional embedding, model {} produces {}",
                    chunk.id,
                    embedding.len(),
                    provider.model_name(),
                    dimension
                )));
            }
            index.insert((embedding.as_slice(), slot));
            chunks.push(chunk);
        }

        tracing::info!(
            chunks = chunks.len(),
            dimension,
            model = provider.model_name(),
            "Vector index built"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                index,
                chunks,
                dimension,
                ef_search: params.ef_search,
                provider,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.chunks.is_empty()
    }
}

impl Inner {
    fn search(
        &self,
        query: &str,
        scope: &Scope,
        k: usize,
    ) -> std::result::Result<Vec<ScoredChunk>, RetrieverError> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.provider.embed(query)?;
        if embedding.len() != self.dimension {
            return Err(RetrieverError::Query(format!(
                "Query embedding has dimension {}, index expects {}",
                embedding.len(),
                self.dimension
            )));
        }

        let k = k.min(self.chunks.len());
        let mut fetch = k.saturating_mul(SCOPE_OVERFETCH).min(self.chunks.len());
        loop {
            let ef = self.ef_search.max(fetch);
            let neighbours = self.index.search(&embedding, fetch, ef);

            let hits: Vec<ScoredChunk> = neighbours
                .into_iter()
                .filter_map(|n| {
                    let chunk = self.chunks.get(n.d_id)?;
                    scope.allows(chunk).then_some((chunk, n.distance))
                })
                .take(k)
                .enumerate()
                .map(|(i, (chunk, distance))| {
                    ScoredChunk::new(chunk.clone(), 1.0 - distance, RetrievalSource::Vector, i + 1)
                })
                .collect();

            if hits.len() == k || fetch >= self.chunks.len() {
                return Ok(hits);
            }

            tracing::debug!(
                fetch,
                in_scope = hits.len(),
                k,
                "Scope filter left too few neighbours, widening"
            );
            fetch = fetch.saturating_mul(2).min(self.chunks.len());
        }
    }
}

#[async_trait]
impl Retriever for HnswVectorRetriever {
    fn name(&self) -> &str {
        "hnsw-cosine"
    }

    async fn search(
        &self,
        query: &str,
        scope: &Scope,
        k: usize,
    ) -> std::result::Result<Vec<ScoredChunk>, RetrieverError> {
        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        let scope = scope.clone();

        // Embedding and graph walk are CPU bound
        tokio::task::spawn_blocking(move || inner.search(&query, &scope, k))
            .await
            .map_err(|e| RetrieverError::Unavailable(format!("Search task failed: {}", e)))?
    }
}
