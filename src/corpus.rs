//! Local chunk corpus used to build the in-process backends
//!
//! Accepts either a JSON array of chunk records or JSON Lines. A record is a
//! chunk plus an optional precomputed `embedding`.

use crate::config::Config;
use crate::error::{DocfuseError, Result};
use crate::retriever::{
    EmbeddingProvider, HnswParams, HnswVectorRetriever, TantivyLexicalRetriever,
};
use crate::types::{Chunk, ChunkKey};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// One line (or array element) of a corpus file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(flatten)]
    pub chunk: Chunk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl From<Chunk> for CorpusRecord {
    fn from(chunk: Chunk) -> Self {
        Self {
            chunk,
            embedding: None,
        }
    }
}

/// A validated, read-only set of chunks
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    records: Vec<CorpusRecord>,
}

impl Corpus {
    /// Load a corpus file, detecting array vs. JSON Lines from the first character
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DocfuseError::Io {
            source: e,
            context: format!("Failed to read corpus file: {}", path.display()),
        })?;

        let corpus = Self::parse(&text)?;
        tracing::info!(
            path = %path.display(),
            chunks = corpus.len(),
            embedded = corpus.has_embeddings(),
            "Corpus loaded"
        );
        Ok(corpus)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim_start();
        let records = if trimmed.starts_with('[') {
            serde_json::from_str::<Vec<CorpusRecord>>(trimmed).map_err(|e| DocfuseError::Json {
                source: e,
                context: "Failed to parse corpus array".to_string(),
            })?
        } else {
            let mut records = Vec::new();
            for (line_no, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let record = serde_json::from_str::<CorpusRecord>(line).map_err(|e| {
                    DocfuseError::Json {
                        source: e,
                        context: format!("Failed to parse corpus line {}", line_no + 1),
                    }
                })?;
                records.push(record);
            }
            records
        };

        Self::from_records(records)
    }

    /// Validate and wrap records.
    ///
    /// Chunk ids must be unique per dataset, `chunkIndex` must strictly
    /// increase within each document in file order, and embeddings (when
    /// present) must share one dimension.
    pub fn from_records(records: Vec<CorpusRecord>) -> Result<Self> {
        let mut seen: HashSet<ChunkKey> = HashSet::with_capacity(records.len());
        let mut last_index: HashMap<(String, String), usize> = HashMap::new();
        let mut dimension: Option<usize> = None;

        for record in &records {
            let chunk = &record.chunk;
            for (field, value) in [
                ("id", &chunk.id),
                ("documentId", &chunk.document_id),
                ("datasetId", &chunk.dataset_id),
                ("organizationId", &chunk.organization_id),
            ] {
                if value.trim().is_empty() {
                    return Err(DocfuseError::Corpus(format!(
                        "Chunk '{}' has an empty {}",
                        chunk.id, field
                    )));
                }
            }
            if chunk.content.trim().is_empty() {
                return Err(DocfuseError::Corpus(format!(
                    "Chunk '{}' has no content",
                    chunk.id
                )));
            }

            if !seen.insert(chunk.key()) {
                return Err(DocfuseError::Corpus(format!(
                    "Duplicate chunk id '{}' in dataset '{}'",
                    chunk.id, chunk.dataset_id
                )));
            }

            let document = (chunk.dataset_id.clone(), chunk.document_id.clone());
            if let Some(previous) = last_index.insert(document, chunk.chunk_index) {
                if chunk.chunk_index <= previous {
                    return Err(DocfuseError::Corpus(format!(
                        "Chunk '{}' has chunkIndex {} after {} in document '{}'",
                        chunk.id, chunk.chunk_index, previous, chunk.document_id
                    )));
                }
            }

            if let Some(embedding) = &record.embedding {
                match dimension {
                    None => dimension = Some(embedding.len()),
                    Some(expected) if expected != embedding.len() => {
                        return Err(DocfuseError::Corpus(format!(
                            "Chunk '{}' has a {}-dimensional embedding, expected {}",
                            chunk.id,
                            embedding.len(),
                            expected
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.records.iter().map(|r| &r.chunk)
    }

    /// True when every record carries a precomputed embedding
    pub fn has_embeddings(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.embedding.is_some())
    }

    /// Dimension of the precomputed embeddings, if any
    pub fn dimension(&self) -> Option<usize> {
        self.records
            .iter()
            .find_map(|r| r.embedding.as_ref().map(Vec::len))
    }

    /// Sorted dataset ids belonging to an organization
    pub fn datasets_for_org(&self, organization_id: &str) -> Vec<String> {
        self.chunks()
            .filter(|c| c.organization_id == organization_id)
            .map(|c| c.dataset_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Build the BM25 backend over every chunk
    pub fn lexical_retriever(&self, config: &Config) -> Result<TantivyLexicalRetriever> {
        TantivyLexicalRetriever::build(
            self.chunks().cloned().collect(),
            config.indexing.lexical_writer_budget_bytes,
        )
    }

    /// Build the HNSW backend, embedding records that have no precomputed vector
    pub fn vector_retriever(
        &self,
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<HnswVectorRetriever> {
        let missing: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.embedding.is_none())
            .map(|r| r.chunk.content.clone())
            .collect();

        let computed = if missing.is_empty() {
            Vec::new()
        } else {
            tracing::info!(
                chunks = missing.len(),
                model = provider.model_name(),
                "Embedding corpus chunks"
            );
            provider
                .embed_batch(&missing)
                .map_err(|e| DocfuseError::Embedding(e.to_string()))?
        };
        let mut computed = computed.into_iter();

        let mut entries = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let embedding = match &record.embedding {
                Some(embedding) => embedding.clone(),
                None => computed.next().ok_or_else(|| {
                    DocfuseError::Embedding(format!(
                        "No embedding produced for chunk '{}'",
                        record.chunk.id
                    ))
                })?,
            };
            entries.push((record.chunk.clone(), embedding));
        }

        let params = HnswParams {
            m: config.indexing.hnsw_m,
            ef_construction: config.indexing.hnsw_ef_construction,
            ef_search: config.indexing.hnsw_ef_search,
        };
        HnswVectorRetriever::build(entries, provider, params)
    }
}
