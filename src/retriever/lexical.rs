//! Tantivy BM25 retriever over an in-memory chunk index

use super::{Retriever, RetrieverError};
use crate::error::{DocfuseError, Result};
use crate::types::{Chunk, RetrievalSource, ScoredChunk, Scope};
use async_trait::async_trait;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};

struct Fields {
    slot: Field,
    organization: Field,
    dataset: Field,
    heading: Field,
    text: Field,
}

struct Inner {
    index: Index,
    reader: IndexReader,
    fields: Fields,
    chunks: Vec<Chunk>,
}

/// Keyword retriever: BM25 over chunk text plus title and section path.
///
/// Organization and dataset are indexed as raw terms so the scope is applied
/// inside the query rather than after ranking.
#[derive(Clone)]
pub struct TantivyLexicalRetriever {
    inner: Arc<Inner>,
}

impl TantivyLexicalRetriever {
    /// Index `chunks` into a fresh in-RAM index
    pub fn build(chunks: Vec<Chunk>, writer_budget_bytes: usize) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let fields = Fields {
            slot: schema_builder.add_u64_field("slot", STORED),
            organization: schema_builder.add_text_field("organization", STRING),
            dataset: schema_builder.add_text_field("dataset", STRING),
            heading: schema_builder.add_text_field("heading", TEXT),
            text: schema_builder.add_text_field("text", TEXT),
        };
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, writer_budget_bytes)
            .map_err(|e| DocfuseError::Index(format!("Failed to create writer: {}", e)))?;

        for (slot, chunk) in chunks.iter().enumerate() {
            let heading = [chunk.document_title.as_deref(), chunk.section()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");

            writer
                .add_document(doc!(
                    fields.slot => slot as u64,
                    fields.organization => chunk.organization_id.as_str(),
                    fields.dataset => chunk.dataset_id.as_str(),
                    fields.heading => heading,
                    fields.text => chunk.content.as_str(),
                ))
                .map_err(|e| {
                    DocfuseError::Index(format!("Failed to index chunk {}: {}", chunk.id, e))
                })?;
        }

        writer
            .commit()
            .map_err(|e| DocfuseError::Index(format!("Commit failed: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| DocfuseError::Index(format!("Failed to open reader: {}", e)))?;

        tracing::info!(chunks = chunks.len(), "Lexical index built");

        Ok(Self {
            inner: Arc::new(Inner {
                index,
                reader,
                fields,
                chunks,
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
    fn scope_filter(&self, scope: &Scope) -> Box<dyn Query> {
        let org = TermQuery::new(
            Term::from_field_text(self.fields.organization, scope.organization_id()),
            IndexRecordOption::Basic,
        );

        let datasets: Vec<(Occur, Box<dyn Query>)> = scope
            .dataset_ids()
            .iter()
            .map(|id| {
                let q: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.dataset, id),
                    IndexRecordOption::Basic,
                ));
                (Occur::Should, q)
            })
            .collect();

        Box::new(BooleanQuery::new(vec![
            (
                Occur::Must,
                Box::new(ConstScoreQuery::new(Box::new(org), 0.0)) as Box<dyn Query>,
            ),
            (
                Occur::Must,
                Box::new(ConstScoreQuery::new(Box::new(BooleanQuery::new(datasets)), 0.0))
                    as Box<dyn Query>,
            ),
        ]))
    }

    fn search(
        &self,
        query: &str,
        scope: &Scope,
        k: usize,
    ) -> std::result::Result<Vec<ScoredChunk>, RetrieverError> {
        let mut parser =
            QueryParser::for_index(&self.index, vec![self.fields.text, self.fields.heading]);
        parser.set_field_boost(self.fields.heading, 1.5);

        // Punctuation-heavy queries (paths, error codes) still yield a query
        let (text_query, parse_errors) = parser.parse_query_lenient(query);
        if !parse_errors.is_empty() {
            tracing::debug!(errors = parse_errors.len(), "Lenient query parse dropped terms");
        }

        let full = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (Occur::Must, self.scope_filter(scope)),
        ]);

        // The collector preallocates `limit` slots
        let limit = k.min(self.chunks.len()).max(1);
        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&full, &TopDocs::with_limit(limit))
            .map_err(|e| RetrieverError::Query(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let stored: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| RetrieverError::Query(e.to_string()))?;

            let slot = stored
                .get_first(self.fields.slot)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| RetrieverError::Query("Missing slot field".to_string()))?;

            let chunk = self
                .chunks
                .get(slot as usize)
                .ok_or_else(|| RetrieverError::Query(format!("Unknown slot {}", slot)))?;

            hits.push(ScoredChunk::new(
                chunk.clone(),
                score,
                RetrievalSource::Lexical,
                hits.len() + 1,
            ));
        }

        Ok(hits)
    }
}

#[async_trait]
impl Retriever for TantivyLexicalRetriever {
    fn name(&self) -> &str {
        "tantivy-bm25"
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

        tokio::task::spawn_blocking(move || inner.search(&query, &scope, k))
            .await
            .map_err(|e| RetrieverError::Unavailable(format!("Search task failed: {}", e)))?
    }
}
