//! Corpus loading plus the tantivy and HNSW backends, end to end

use docfuse::config::Config;
use docfuse::corpus::Corpus;
use docfuse::query::IntentKind;
use docfuse::retrieval::RetrievalEngine;
use docfuse::retriever::{
    BackendStatus, DisabledRetriever, EmbeddingError, EmbeddingProvider, Retriever,
};
use docfuse::telemetry::TelemetryEmitter;
use docfuse::types::{ConfidenceBranch, RetrievalRequest, RetrievalSource, Scope};
use std::sync::Arc;

const CORPUS: &str = r#"
{"id":"auth-1","content":"Send the API key as a bearer token in the Authorization header.","documentId":"auth-guide","datasetId":"api","organizationId":"acme","documentTitle":"Acme Auth","sectionPath":"Authentication","chunkIndex":0}
{"id":"auth-2","content":"Tokens expire after one hour; request a new token with your client secret.","documentId":"auth-guide","datasetId":"api","organizationId":"acme","sectionPath":"Authentication","chunkIndex":1}
{"id":"hooks-1","content":"Webhooks deliver case events to your endpoint with retries.","documentId":"webhooks","datasetId":"api","organizationId":"acme","sectionPath":"Webhooks","chunkIndex":0}
{"id":"limits-1","content":"Rate limits allow 100 requests per minute per API key.","documentId":"limits","datasetId":"guides","organizationId":"acme","sectionPath":"Rate limits","chunkIndex":0}
{"id":"globex-auth-1","content":"Globex bearer token setup for the partner portal.","documentId":"globex-auth","datasetId":"api","organizationId":"globex","chunkIndex":0}
"#;

/// Three-axis embedder keyed on topic words, so similarity is predictable
struct TopicEmbedder;

impl TopicEmbedder {
    fn vector(text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        let axis = |words: &[&str]| {
            if words.iter().any(|w| text.contains(w)) {
                1.0
            } else {
                0.05
            }
        };
        vec![
            axis(&["token", "bearer", "auth"]),
            axis(&["webhook", "event"]),
            axis(&["rate", "limit"]),
        ]
    }
}

impl EmbeddingProvider for TopicEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(Self::vector(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "topic-test"
    }
}

fn corpus() -> Corpus {
    Corpus::parse(CORPUS).unwrap()
}

#[test]
fn test_corpus_scopes() {
    let corpus = corpus();
    assert_eq!(corpus.len(), 5);
    assert_eq!(corpus.datasets_for_org("acme"), vec!["api", "guides"]);
    assert_eq!(corpus.datasets_for_org("globex"), vec!["api"]);
}

#[tokio::test]
async fn test_lexical_backend_respects_tenant() {
    let config = Config::default();
    let lexical = corpus().lexical_retriever(&config).unwrap();

    let scope = Scope::new("acme", ["api"]).unwrap();
    let hits = lexical.search("bearer token", &scope, 10).await.unwrap();

    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.chunk.organization_id == "acme"));
    assert!(hits.iter().all(|h| h.chunk.dataset_id == "api"));
    assert_eq!(hits[0].chunk.document_id, "auth-guide");
}

#[tokio::test]
async fn test_vector_backend_embeds_missing_records() {
    let config = Config::default();
    let vector = corpus()
        .vector_retriever(&config, Arc::new(TopicEmbedder))
        .unwrap();
    assert_eq!(vector.len(), 5);

    let scope = Scope::new("acme", ["api", "guides"]).unwrap();
    let hits = vector.search("webhook events", &scope, 2).await.unwrap();

    assert_eq!(hits[0].chunk.id, "hooks-1");
    assert!(hits.len() <= 2);
    assert!(hits.iter().all(|h| h.chunk.organization_id == "acme"));
}

#[tokio::test]
async fn test_hybrid_engine_over_local_corpus() {
    let config = Config::default();
    let corpus = corpus();
    let engine = RetrievalEngine::new(
        &config,
        Arc::new(corpus.vector_retriever(&config, Arc::new(TopicEmbedder)).unwrap()),
        Arc::new(corpus.lexical_retriever(&config).unwrap()),
        TelemetryEmitter::disabled(),
    )
    .unwrap();

    let request = RetrievalRequest::new(
        "How do I send a bearer token?",
        "acme",
        corpus.datasets_for_org("acme"),
    );
    let result = engine.retrieve_and_fuse(&request).await.unwrap();

    assert_eq!(result.debug.intent, IntentKind::Auth);
    assert_eq!(result.debug.vector.status, BackendStatus::Ok);
    assert_eq!(result.debug.lexical.status, BackendStatus::Ok);
    assert_eq!(result.contexts[0].chunk.document_id, "auth-guide");
    assert_eq!(result.contexts[0].source, RetrievalSource::Both);
    assert!(result
        .contexts
        .iter()
        .all(|c| c.chunk.organization_id == "acme"));
    assert_ne!(result.meta.confidence_branch, ConfidenceBranch::OutOfScope);
}

#[tokio::test]
async fn test_lexical_only_engine() {
    let config = Config::default();
    let corpus = corpus();
    let engine = RetrievalEngine::new(
        &config,
        Arc::new(DisabledRetriever::new("vector-disabled")),
        Arc::new(corpus.lexical_retriever(&config).unwrap()),
        TelemetryEmitter::disabled(),
    )
    .unwrap();

    let request = RetrievalRequest::new("rate limits per minute", "acme", ["guides"]);
    let result = engine.retrieve_and_fuse(&request).await.unwrap();

    assert_eq!(result.debug.vector.status, BackendStatus::Empty);
    assert_eq!(result.contexts.len(), 1);
    assert_eq!(result.contexts[0].id(), "limits-1");
    assert_eq!(result.contexts[0].source, RetrievalSource::Lexical);
}

#[tokio::test]
async fn test_huge_k_against_real_index() {
    let config = Config::default();
    let corpus = corpus();
    let engine = RetrievalEngine::new(
        &config,
        Arc::new(DisabledRetriever::new("vector-disabled")),
        Arc::new(corpus.lexical_retriever(&config).unwrap()),
        TelemetryEmitter::disabled(),
    )
    .unwrap();

    let request = RetrievalRequest::new("bearer token", "acme", ["api"]).with_k(2_000_000_000);
    let result = engine.retrieve_and_fuse(&request).await.unwrap();

    assert_eq!(result.debug.lexical.status, BackendStatus::Ok);
    assert!(result
        .contexts
        .iter()
        .all(|c| c.chunk.organization_id == "acme"));
}
