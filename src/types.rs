//! Chunk, scoring and result structures shared by every pipeline stage

use crate::error::{DocfuseError, Result};
use crate::query::IntentKind;
use crate::retrieval::FallbackStrategy;
use crate::retriever::BackendReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Structural role of a chunk inside its source document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    #[default]
    Paragraph,
    Table,
    Code,
    Heading,
    Footer,
    List,
}

/// An indexed unit of document text.
///
/// `id` is unique within a dataset; `chunk_index` increases monotonically
/// within a document. Chunks are immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub document_id: String,
    pub dataset_id: String,
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    #[serde(default)]
    pub element_type: ElementType,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Chunk {
    /// Identity used for deduplication: ids are only unique per dataset
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            dataset_id: self.dataset_id.clone(),
            id: self.id.clone(),
        }
    }

    /// Non-empty, trimmed section path
    pub fn section(&self) -> Option<&str> {
        self.section_path
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Read a boolean metadata flag such as `hasJson` or `hasVerbatim`.
    /// Accepts JSON booleans and the strings "true"/"false".
    pub fn flag(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Read a string metadata value
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Deduplication key of a chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub dataset_id: String,
    pub id: String,
}

/// Which retrieval signal produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Vector,
    Lexical,
    Both,
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalSource::Vector => write!(f, "vector"),
            RetrievalSource::Lexical => write!(f, "lexical"),
            RetrievalSource::Both => write!(f, "both"),
        }
    }
}

/// A chunk annotated with one retriever's outcome.
///
/// `score` is only comparable with other chunks from the same `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
    pub source: RetrievalSource,
    /// 1-based position within the source list
    pub rank: usize,
}

impl ScoredChunk {
    pub fn new(chunk: Chunk, score: f32, source: RetrievalSource, rank: usize) -> Self {
        Self {
            chunk,
            score,
            source,
            rank,
        }
    }
}

/// Per-source provenance of a fused result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionMeta {
    pub vector_rank: Option<usize>,
    pub vector_score: Option<f32>,
    pub lexical_rank: Option<usize>,
    pub lexical_score: Option<f32>,
    /// Total boost added by the diversity/metadata pass
    #[serde(default)]
    pub boost: f64,
}

/// Output of rank fusion; `fused_score` is higher-is-better and unbounded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedResult {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub fused_score: f64,
    pub source: RetrievalSource,
    pub fusion_meta: FusionMeta,
}

impl FusedResult {
    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

/// Classification consumed by answer generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBranch {
    /// Answer directly and cite sources
    Confident,
    /// Answer with hedging and visible uncertainty
    Partial,
    /// Decline to answer from the corpus
    OutOfScope,
}

impl ConfidenceBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBranch::Confident => "confident",
            ConfidenceBranch::Partial => "partial",
            ConfidenceBranch::OutOfScope => "out_of_scope",
        }
    }
}

impl fmt::Display for ConfidenceBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence signal computed over the final ranking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalMeta {
    pub top1_score: f64,
    pub second_score: f64,
    pub score_gap: f64,
    pub unique_section_count: usize,
    pub confidence_branch: ConfidenceBranch,
}

/// Diagnostics attached to every result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalDebug {
    pub request_id: Uuid,
    pub intent: IntentKind,
    pub normalized_query: String,
    pub vector: BackendReport,
    pub lexical: BackendReport,
    pub fused_count: usize,
    pub filtered_count: usize,
    pub boosted_count: usize,
    /// Retries run after a non-confident first pass; 0 when none ran
    pub fallback_attempts: usize,
    /// Strategy of the retry whose result was kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_strategy: Option<FallbackStrategy>,
    /// Summed over every pass, retries included
    pub retrieval_ms: u64,
    pub fusion_ms: u64,
}

/// Final output of the core: ranked passages plus confidence
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    /// Sorted descending by `fused_score`
    pub contexts: Vec<FusedResult>,
    pub meta: RetrievalMeta,
    pub debug: RetrievalDebug,
}

/// Conversation carryover; read-only bias signals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadHints {
    #[serde(default)]
    pub prefer_doc_id: Option<String>,
    #[serde(default)]
    pub brand_lock: Option<String>,
    #[serde(default)]
    pub last_endpoint: Option<String>,
}

/// Scope as supplied by the caller, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestScope {
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub dataset_ids: Vec<String>,
}

/// Validated authorization scope: an organization plus its allowed datasets.
///
/// Constructed once at the boundary and passed by reference afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    organization_id: String,
    dataset_ids: Vec<String>,
}

impl Scope {
    pub fn new<I, S>(organization_id: impl Into<String>, dataset_ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let organization_id = organization_id.into().trim().to_string();
        if organization_id.is_empty() {
            return Err(DocfuseError::MissingScope);
        }

        let mut datasets: Vec<String> = Vec::new();
        for id in dataset_ids {
            let id = id.into().trim().to_string();
            if id.is_empty() {
                return Err(DocfuseError::InvalidScope(
                    "dataset id cannot be empty".to_string(),
                ));
            }
            if !datasets.contains(&id) {
                datasets.push(id);
            }
        }

        if datasets.is_empty() {
            return Err(DocfuseError::InvalidScope(
                "at least one dataset id is required".to_string(),
            ));
        }

        Ok(Self {
            organization_id,
            dataset_ids: datasets,
        })
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn dataset_ids(&self) -> &[String] {
        &self.dataset_ids
    }

    /// Hard eligibility filter
    pub fn allows(&self, chunk: &Chunk) -> bool {
        chunk.organization_id == self.organization_id
            && self.dataset_ids.iter().any(|d| *d == chunk.dataset_id)
    }
}

impl TryFrom<&RequestScope> for Scope {
    type Error = DocfuseError;

    fn try_from(raw: &RequestScope) -> Result<Self> {
        Scope::new(raw.organization_id.as_str(), raw.dataset_ids.iter().cloned())
    }
}

/// Input of `RetrievalEngine::retrieve_and_fuse`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalRequest {
    pub query: String,
    pub scope: RequestScope,
    #[serde(default)]
    pub intent_override: Option<IntentKind>,
    #[serde(default)]
    pub hints: ThreadHints,
    #[serde(default)]
    pub k: Option<usize>,
}

impl RetrievalRequest {
    pub fn new<I, S>(query: impl Into<String>, organization_id: impl Into<String>, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query: query.into(),
            scope: RequestScope {
                organization_id: organization_id.into(),
                dataset_ids: datasets.into_iter().map(Into::into).collect(),
            },
            intent_override: None,
            hints: ThreadHints::default(),
            k: None,
        }
    }

    pub fn with_intent(mut self, intent: IntentKind) -> Self {
        self.intent_override = Some(intent);
        self
    }

    pub fn with_hints(mut self, hints: ThreadHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}
