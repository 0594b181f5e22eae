//! Retrieval backends and the guard that runs them
//!
//! A backend implements [`Retriever`]. The engine never calls a backend
//! directly: [`guarded_search`] applies the timeout, absorbs failures, enforces
//! the hard scope filter and deduplicates, so a misbehaving backend can only
//! ever produce an empty list.

mod lexical;
mod provider;
mod vector;

pub use lexical::TantivyLexicalRetriever;
pub use provider::{supported_models, EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector::{HnswParams, HnswVectorRetriever};

use crate::retrieval::deduplicate_chunks;
use crate::types::{RetrievalSource, ScoredChunk, Scope};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Backend failure. Absorbed by [`guarded_search`], never returned to callers.
#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// A ranked retrieval signal over the chunk corpus
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Short backend name for logs and diagnostics
    fn name(&self) -> &str;

    /// Return up to `k` chunks ordered best first.
    ///
    /// Implementations should apply `scope` themselves; results outside it are
    /// dropped by the guard regardless.
    async fn search(
        &self,
        query: &str,
        scope: &Scope,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieverError>;
}

/// Outcome of one backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Ok,
    Empty,
    Failed,
    TimedOut,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Ok => "ok",
            BackendStatus::Empty => "empty",
            BackendStatus::Failed => "failed",
            BackendStatus::TimedOut => "timed_out",
        }
    }

    /// Failed or timed out, as opposed to a legitimate empty answer
    pub fn is_degraded(&self) -> bool {
        matches!(self, BackendStatus::Failed | BackendStatus::TimedOut)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-backend diagnostics for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReport {
    pub backend: String,
    pub status: BackendStatus,
    pub count: usize,
    pub dropped_out_of_scope: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run one backend with a deadline and turn every failure into an empty list.
///
/// Surviving results are restricted to `scope`, deduplicated by chunk key,
/// re-ranked 1..=n and tagged with `role`.
pub async fn guarded_search(
    role: RetrievalSource,
    retriever: &dyn Retriever,
    query: &str,
    scope: &Scope,
    k: usize,
    deadline: Duration,
) -> (Vec<ScoredChunk>, BackendReport) {
    let start = Instant::now();
    let outcome = tokio::time::timeout(deadline, retriever.search(query, scope, k)).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let mut report = BackendReport {
        backend: retriever.name().to_string(),
        status: BackendStatus::Ok,
        count: 0,
        dropped_out_of_scope: 0,
        elapsed_ms,
        error: None,
    };

    let raw = match outcome {
        Ok(Ok(hits)) => hits,
        Ok(Err(e)) => {
            tracing::warn!(
                backend = retriever.name(),
                role = %role,
                elapsed_ms,
                "Retriever failed, continuing without it: {}",
                e
            );
            report.status = BackendStatus::Failed;
            report.error = Some(e.to_string());
            return (Vec::new(), report);
        }
        Err(_) => {
            tracing::warn!(
                backend = retriever.name(),
                role = %role,
                timeout_ms = deadline.as_millis() as u64,
                "Retriever timed out, continuing without it"
            );
            report.status = BackendStatus::TimedOut;
            return (Vec::new(), report);
        }
    };

    let before = raw.len();
    let in_scope: Vec<ScoredChunk> = raw.into_iter().filter(|h| scope.allows(&h.chunk)).collect();
    report.dropped_out_of_scope = before - in_scope.len();
    if report.dropped_out_of_scope > 0 {
        tracing::warn!(
            backend = retriever.name(),
            dropped = report.dropped_out_of_scope,
            "Retriever returned chunks outside the request scope"
        );
    }

    let mut hits = deduplicate_chunks(in_scope);
    hits.truncate(k);
    for hit in &mut hits {
        hit.source = role;
    }

    report.count = hits.len();
    if hits.is_empty() {
        report.status = BackendStatus::Empty;
        tracing::warn!(backend = retriever.name(), role = %role, "Retriever returned no results");
    } else {
        tracing::debug!(backend = retriever.name(), count = hits.len(), elapsed_ms, "Retriever finished");
    }

    (hits, report)
}

/// Backend that always answers with nothing; stands in for a switched-off signal
#[derive(Debug, Clone)]
pub struct DisabledRetriever {
    name: String,
}

impl DisabledRetriever {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Retriever for DisabledRetriever {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        _query: &str,
        _scope: &Scope,
        _k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        Ok(Vec::new())
    }
}
