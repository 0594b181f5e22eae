//! End-to-end tests of the retrieval core with in-process stub backends

use async_trait::async_trait;
use docfuse::config::Config;
use docfuse::query::IntentKind;
use docfuse::retrieval::{FallbackStrategy, RetrievalEngine};
use docfuse::retriever::{BackendStatus, DisabledRetriever, Retriever, RetrieverError};
use docfuse::telemetry::{MemorySink, TelemetryEmitter};
use docfuse::types::{
    Chunk, ConfidenceBranch, ElementType, RetrievalRequest, RetrievalSource, ScoredChunk, Scope,
    ThreadHints,
};
use docfuse::DocfuseError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn chunk(id: &str, section: Option<&str>) -> Chunk {
    Chunk {
        id: id.to_string(),
        content: format!("Passage {} about onboarding", id),
        document_id: format!("doc-{}", id.to_lowercase()),
        dataset_id: "api".to_string(),
        organization_id: "acme".to_string(),
        document_title: Some("Acme API Guide".to_string()),
        section_path: section.map(str::to_string),
        element_type: ElementType::Paragraph,
        chunk_index: 0,
        metadata: HashMap::new(),
    }
}

/// Returns its chunks in order, recording what it was asked
struct Listed {
    chunks: Vec<Chunk>,
    seen: Mutex<Vec<(String, usize)>>,
}

impl Listed {
    fn new(chunks: Vec<Chunk>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn ids(ids: &[&str]) -> Arc<Self> {
        Self::new(ids.iter().map(|id| chunk(id, None)).collect())
    }
}

#[async_trait]
impl Retriever for Listed {
    fn name(&self) -> &str {
        "listed"
    }

    async fn search(
        &self,
        query: &str,
        _scope: &Scope,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        self.seen.lock().unwrap().push((query.to_string(), k));
        Ok(self
            .chunks
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, c)| ScoredChunk::new(c.clone(), 1.0 / (i + 1) as f32, RetrievalSource::Vector, i + 1))
            .collect())
    }
}

struct Failing;

#[async_trait]
impl Retriever for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn search(
        &self,
        _query: &str,
        _scope: &Scope,
        _k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        Err(RetrieverError::Unavailable("connection refused".to_string()))
    }
}

struct Stalled;

#[async_trait]
impl Retriever for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn search(
        &self,
        _query: &str,
        _scope: &Scope,
        _k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![ScoredChunk::new(chunk("LATE", None), 1.0, RetrievalSource::Vector, 1)])
    }
}

/// Answers after a fixed delay
struct Sleepy {
    delay: Duration,
    id: &'static str,
}

#[async_trait]
impl Retriever for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    async fn search(
        &self,
        _query: &str,
        _scope: &Scope,
        _k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![ScoredChunk::new(chunk(self.id, None), 1.0, RetrievalSource::Vector, 1)])
    }
}

/// Matches only queries containing `term`
struct Vocabulary {
    term: &'static str,
    hit: Chunk,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Retriever for Vocabulary {
    fn name(&self) -> &str {
        "vocabulary"
    }

    async fn search(
        &self,
        query: &str,
        _scope: &Scope,
        _k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        self.seen.lock().unwrap().push(query.to_string());
        if query.contains(self.term) {
            Ok(vec![ScoredChunk::new(self.hit.clone(), 3.0, RetrievalSource::Lexical, 1)])
        } else {
            Ok(Vec::new())
        }
    }
}

/// One hit for shallow fetches, the full list once `k` reaches `deep_k`
struct Shallow {
    deep_k: usize,
    chunks: Vec<Chunk>,
    seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl Retriever for Shallow {
    fn name(&self) -> &str {
        "shallow"
    }

    async fn search(
        &self,
        _query: &str,
        _scope: &Scope,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieverError> {
        self.seen.lock().unwrap().push(k);
        let depth = if k >= self.deep_k { k } else { 1 };
        Ok(self
            .chunks
            .iter()
            .take(depth)
            .enumerate()
            .map(|(i, c)| ScoredChunk::new(c.clone(), 1.0, RetrievalSource::Lexical, i + 1))
            .collect())
    }
}

fn fallback_config() -> Config {
    let mut config = Config::default();
    config.fallback.enabled = true;
    config
}

fn engine(vector: Arc<dyn Retriever>, lexical: Arc<dyn Retriever>) -> RetrievalEngine {
    RetrievalEngine::new(&Config::default(), vector, lexical, TelemetryEmitter::disabled()).unwrap()
}

fn request(query: &str) -> RetrievalRequest {
    RetrievalRequest::new(query, "acme", ["api"])
}

fn ids(result: &docfuse::RetrievalResult) -> Vec<&str> {
    result.contexts.iter().map(|c| c.id()).collect()
}

#[tokio::test]
async fn test_agreement_ranks_first() {
    let engine = engine(Listed::ids(&["A", "B"]), Listed::ids(&["B", "C"]));
    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    assert_eq!(ids(&result), vec!["B", "A", "C"]);

    let b = &result.contexts[0];
    assert_eq!(b.source, RetrievalSource::Both);
    assert_eq!(b.fusion_meta.vector_rank, Some(2));
    assert_eq!(b.fusion_meta.lexical_rank, Some(1));
    assert!((b.fused_score - (0.7 / 62.0 + 0.3 / 61.0)).abs() < 1e-12);
    assert!((result.contexts[1].fused_score - 0.7 / 61.0).abs() < 1e-12);
    assert!((result.contexts[2].fused_score - 0.3 / 62.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_both_empty_is_out_of_scope() {
    let engine = engine(Listed::ids(&[]), Listed::ids(&[]));
    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    assert!(result.contexts.is_empty());
    assert_eq!(result.meta.confidence_branch, ConfidenceBranch::OutOfScope);
    assert_eq!(result.meta.top1_score, 0.0);
    assert_eq!(result.debug.vector.status, BackendStatus::Empty);
    assert_eq!(result.debug.lexical.status, BackendStatus::Empty);
}

#[tokio::test]
async fn test_empty_query_never_reaches_backends() {
    let vector = Listed::ids(&["A"]);
    let lexical = Listed::ids(&["A"]);
    let engine = engine(vector.clone(), lexical.clone());

    let err = engine.retrieve_and_fuse(&request("   \n ")).await.unwrap_err();
    assert!(matches!(err, DocfuseError::EmptyQuery));
    assert!(err.is_caller_error());
    assert!(vector.seen.lock().unwrap().is_empty());
    assert!(lexical.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_scope_errors() {
    let engine = engine(Listed::ids(&["A"]), Listed::ids(&["A"]));

    let missing = RetrievalRequest::new("onboarding", "  ", ["api"]);
    assert!(matches!(
        engine.retrieve_and_fuse(&missing).await.unwrap_err(),
        DocfuseError::MissingScope
    ));

    let no_datasets = RetrievalRequest::new("onboarding", "acme", Vec::<String>::new());
    assert!(matches!(
        engine.retrieve_and_fuse(&no_datasets).await.unwrap_err(),
        DocfuseError::InvalidScope(_)
    ));
}

#[tokio::test]
async fn test_section_cap_keeps_relative_order() {
    let chunks = vec![
        chunk("A1", Some("Authentication")),
        chunk("A2", Some("Authentication")),
        chunk("X", Some("Webhooks")),
        chunk("A3", Some("Authentication")),
        chunk("A4", Some("Authentication")),
    ];
    let engine = engine(Listed::new(chunks), Listed::ids(&[]));

    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    assert_eq!(ids(&result), vec!["A1", "A2", "X", "A3"]);
    assert_eq!(result.debug.filtered_count, 1);
    assert_eq!(result.meta.unique_section_count, 2);
}

#[tokio::test]
async fn test_confident_versus_partial() {
    // Lone vector hit: top1 = 0.7/61, just above the confident floor, large gap
    let lone = engine(Listed::ids(&["A"]), Listed::ids(&[]));
    let result = lone.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();
    assert!(result.meta.top1_score > 0.011);
    assert_eq!(result.meta.confidence_branch, ConfidenceBranch::Confident);

    // Same top1, runner-up nearly tied
    let tied = engine(Listed::ids(&["A", "B"]), Listed::ids(&[]));
    let result = tied.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();
    assert!(result.meta.score_gap < 0.001);
    assert_eq!(result.meta.confidence_branch, ConfidenceBranch::Partial);
}

#[tokio::test]
async fn test_one_backend_failing_degrades() {
    let engine = engine(Arc::new(Failing), Listed::ids(&["B", "C"]));
    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    assert_eq!(ids(&result), vec!["B", "C"]);
    assert!(result
        .contexts
        .iter()
        .all(|c| c.source == RetrievalSource::Lexical));
    assert_eq!(result.debug.vector.status, BackendStatus::Failed);
    assert!(result.debug.vector.error.is_some());
    assert_eq!(result.meta.confidence_branch, ConfidenceBranch::Partial);
}

#[tokio::test]
async fn test_both_backends_failing_is_not_an_error() {
    let engine = engine(Arc::new(Failing), Arc::new(Failing));
    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    assert!(result.contexts.is_empty());
    assert_eq!(result.meta.confidence_branch, ConfidenceBranch::OutOfScope);
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_times_out() {
    let engine = engine(Arc::new(Stalled), Listed::ids(&["B"]));
    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    assert_eq!(ids(&result), vec!["B"]);
    assert_eq!(result.debug.vector.status, BackendStatus::TimedOut);
    assert_eq!(result.debug.lexical.status, BackendStatus::Ok);
}

#[tokio::test]
async fn test_out_of_scope_chunks_are_dropped() {
    let mut foreign = chunk("F", None);
    foreign.organization_id = "globex".to_string();
    let mut other_dataset = chunk("D", None);
    other_dataset.dataset_id = "internal".to_string();

    let engine = engine(
        Listed::new(vec![foreign, chunk("A", None), other_dataset]),
        Listed::ids(&[]),
    );
    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    assert_eq!(ids(&result), vec!["A"]);
    assert_eq!(result.debug.vector.dropped_out_of_scope, 2);
    assert_eq!(result.contexts[0].fusion_meta.vector_rank, Some(1));
}

#[tokio::test]
async fn test_backends_get_normalized_query_and_fetch_k() {
    let vector = Listed::ids(&["A"]);
    let lexical = Listed::ids(&["A"]);
    let engine = engine(vector.clone(), lexical.clone());

    engine
        .retrieve_and_fuse(&request("  How   do I\tset up  Onboarding? ").with_k(5))
        .await
        .unwrap();

    let seen = vector.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![("How do I set up Onboarding?".to_string(), 10)]);
    assert_eq!(lexical.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_intent_boost_lifts_code() {
    let mut code = chunk("CODE", None);
    code.element_type = ElementType::Code;
    let engine = engine(Listed::new(vec![chunk("PROSE", None), code]), Listed::ids(&[]));

    let result = engine
        .retrieve_and_fuse(&request("show me a curl example"))
        .await
        .unwrap();

    assert_eq!(result.debug.intent, IntentKind::CodeExample);
    assert_eq!(ids(&result), vec!["CODE", "PROSE"]);
    assert_eq!(result.debug.boosted_count, 1);
    assert!(result.contexts[0].fusion_meta.boost > 0.0);
}

#[tokio::test]
async fn test_prefer_doc_hint() {
    let engine = engine(Listed::ids(&["A", "B"]), Listed::ids(&[]));
    let hints = ThreadHints {
        prefer_doc_id: Some("doc-b".to_string()),
        ..ThreadHints::default()
    };

    let result = engine
        .retrieve_and_fuse(&request("onboarding overview").with_hints(hints))
        .await
        .unwrap();

    assert_eq!(ids(&result), vec!["B", "A"]);
}

#[tokio::test]
async fn test_repeated_queries_are_deterministic() {
    let engine = engine(
        Listed::ids(&["A", "B", "C", "D"]),
        Listed::ids(&["D", "C", "E"]),
    );

    let first = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();
    let second = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    let scores = |r: &docfuse::RetrievalResult| -> Vec<(String, f64)> {
        r.contexts
            .iter()
            .map(|c| (c.id().to_string(), c.fused_score))
            .collect()
    };
    assert_eq!(scores(&first), scores(&second));
    assert_ne!(first.debug.request_id, second.debug.request_id);
}

#[tokio::test]
async fn test_every_candidate_appears_once() {
    let engine = engine(
        Listed::ids(&["A", "B", "C"]),
        Listed::ids(&["C", "D", "A", "E"]),
    );
    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();

    let mut seen = ids(&result);
    seen.sort();
    assert_eq!(seen, vec!["A", "B", "C", "D", "E"]);
    assert!(result.contexts.windows(2).all(|w| w[0].fused_score >= w[1].fused_score));
}

#[tokio::test]
async fn test_max_contexts_truncates() {
    let many: Vec<String> = (0..30).map(|i| format!("C{:02}", i)).collect();
    let refs: Vec<&str> = many.iter().map(String::as_str).collect();
    let engine = engine(Listed::ids(&refs), Listed::ids(&[]));

    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();
    assert_eq!(result.contexts.len(), Config::default().retrieval.max_contexts);
    assert_eq!(result.contexts[0].id(), "C00");
}

#[tokio::test]
async fn test_telemetry_recorded_per_query() {
    let mut config = Config::default();
    config.telemetry.query_max_chars = 10;

    let sink = Arc::new(MemorySink::new(config.telemetry.memory_capacity));
    let emitter = TelemetryEmitter::spawn(sink.clone(), config.telemetry.channel_capacity);
    let engine = RetrievalEngine::new(
        &config,
        Listed::ids(&["A", "B"]),
        Arc::new(Failing),
        emitter,
    )
    .unwrap();

    let result = engine
        .retrieve_and_fuse(&request("onboarding overview for new admins"))
        .await
        .unwrap();
    engine.shutdown().await;

    let events = sink.snapshot();
    assert_eq!(events.len(), 1);

    let event = &events[0];
    assert_eq!(event.request_id, result.debug.request_id);
    assert_eq!(event.query, "onboarding");
    assert_eq!(event.organization_id, "acme");
    assert_eq!(event.dataset_ids, vec!["api"]);
    assert_eq!(event.vector_count, 2);
    assert_eq!(event.lexical_count, 0);
    assert_eq!(event.lexical_status, BackendStatus::Failed);
    assert_eq!(event.confidence_branch, result.meta.confidence_branch);
    assert_eq!(event.top1_score, result.meta.top1_score);

    let agg = sink.aggregate();
    assert_eq!(agg.total_queries, 1);
    assert_eq!(agg.degraded_rate, 1.0);
}

#[tokio::test]
async fn test_telemetry_disabled_in_config() {
    let mut config = Config::default();
    config.telemetry.enabled = false;

    let sink = Arc::new(MemorySink::new(10));
    let engine = RetrievalEngine::new(
        &config,
        Listed::ids(&["A"]),
        Arc::new(DisabledRetriever::new("lexical")),
        TelemetryEmitter::spawn(sink.clone(), 8),
    )
    .unwrap();

    engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();
    engine.shutdown().await;

    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_huge_k_is_clamped() {
    let vector = Listed::ids(&["A", "B"]);
    let engine = engine(vector.clone(), Listed::ids(&[]));

    let result = engine
        .retrieve_and_fuse(&request("onboarding overview").with_k(usize::MAX))
        .await
        .unwrap();

    let max_k = Config::default().retrieval.max_k;
    assert_eq!(vector.seen.lock().unwrap()[0].1, max_k * 2);
    assert_eq!(ids(&result), vec!["A", "B"]);
}

#[tokio::test(start_paused = true)]
async fn test_retrievers_run_concurrently() {
    let mut config = Config::default();
    config.retrieval.vector_timeout_ms = 800;
    config.retrieval.lexical_timeout_ms = 800;

    let delay = Duration::from_millis(400);
    let engine = RetrievalEngine::new(
        &config,
        Arc::new(Sleepy { delay, id: "V" }),
        Arc::new(Sleepy { delay, id: "L" }),
        TelemetryEmitter::disabled(),
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    let result = engine.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.debug.vector.status, BackendStatus::Ok);
    assert_eq!(result.debug.lexical.status, BackendStatus::Ok);
    assert!(elapsed >= delay);
    assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_fallback_expands_query() {
    let lexical = Arc::new(Vocabulary {
        term: "authentication",
        hit: chunk("AUTH", Some("Authentication")),
        seen: Mutex::new(Vec::new()),
    });
    let sink = Arc::new(MemorySink::new(10));
    let engine = RetrievalEngine::new(
        &fallback_config(),
        Listed::ids(&[]),
        lexical.clone(),
        TelemetryEmitter::spawn(sink.clone(), 8),
    )
    .unwrap();

    let result = engine.retrieve_and_fuse(&request("auth flow")).await.unwrap();

    assert_eq!(ids(&result), vec!["AUTH"]);
    assert_eq!(result.meta.confidence_branch, ConfidenceBranch::Partial);
    assert!((result.contexts[0].fused_score - 0.4 / 61.0).abs() < 1e-12);
    assert_eq!(result.debug.fallback_strategy, Some(FallbackStrategy::ExpandQuery));
    // Expansion helped; the follow-up widen found nothing new
    assert_eq!(result.debug.fallback_attempts, 2);
    assert_eq!(result.debug.normalized_query, "auth flow");

    let queries = lexical.seen.lock().unwrap().clone();
    assert_eq!(queries.len(), 3);
    assert_eq!(queries[0], "auth flow");
    assert!(queries[1].starts_with("auth flow ") && queries[1].contains("authentication"));
    assert_eq!(queries[2], "auth flow");

    engine.shutdown().await;
    let events = sink.snapshot();
    assert!(events[0].fallback_triggered);
    assert_eq!(events[0].fallback_attempts, 2);
    assert_eq!(events[0].confidence_branch, ConfidenceBranch::Partial);
}

#[tokio::test]
async fn test_fallback_widens_thin_results() {
    let lexical = Arc::new(Shallow {
        deep_k: 30,
        chunks: ["A", "B", "C", "D"].iter().map(|id| chunk(id, None)).collect(),
        seen: Mutex::new(Vec::new()),
    });
    let engine = RetrievalEngine::new(
        &fallback_config(),
        Listed::ids(&[]),
        lexical.clone(),
        TelemetryEmitter::disabled(),
    )
    .unwrap();

    let result = engine
        .retrieve_and_fuse(&request("onboarding overview").with_k(5))
        .await
        .unwrap();

    assert_eq!(ids(&result), vec!["A", "B", "C", "D"]);
    assert_eq!(result.debug.fallback_strategy, Some(FallbackStrategy::WidenSearch));
    assert_eq!(result.debug.fallback_attempts, 2);
    // fetch_k = 5 * 2, widened by 3
    assert_eq!(*lexical.seen.lock().unwrap(), vec![10, 30, 30]);
}

#[tokio::test]
async fn test_fallback_respects_retry_budget() {
    let mut config = fallback_config();
    config.fallback.max_retries = 1;

    let lexical = Arc::new(Vocabulary {
        term: "authentication",
        hit: chunk("AUTH", None),
        seen: Mutex::new(Vec::new()),
    });
    let engine = RetrievalEngine::new(
        &config,
        Listed::ids(&[]),
        lexical.clone(),
        TelemetryEmitter::disabled(),
    )
    .unwrap();

    let result = engine.retrieve_and_fuse(&request("auth flow")).await.unwrap();
    assert_eq!(result.debug.fallback_attempts, 1);
    assert_eq!(lexical.seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_fallback_skipped_when_confident_or_unavailable() {
    let confident = RetrievalEngine::new(
        &fallback_config(),
        Listed::ids(&["A"]),
        Listed::ids(&[]),
        TelemetryEmitter::disabled(),
    )
    .unwrap();
    let result = confident.retrieve_and_fuse(&request("onboarding overview")).await.unwrap();
    assert_eq!(result.meta.confidence_branch, ConfidenceBranch::Confident);
    assert_eq!(result.debug.fallback_attempts, 0);

    let down = RetrievalEngine::new(
        &fallback_config(),
        Arc::new(Failing),
        Arc::new(Failing),
        TelemetryEmitter::disabled(),
    )
    .unwrap();
    let result = down.retrieve_and_fuse(&request("auth flow")).await.unwrap();
    assert_eq!(result.meta.confidence_branch, ConfidenceBranch::OutOfScope);
    assert_eq!(result.debug.fallback_attempts, 0);
}
