//! Retrieval orchestration: normalize, fan out, fuse, filter, score

use super::confidence::ConfidenceScorer;
use super::diversity::DiversityFilter;
use super::fallback::{improves, FallbackStrategy};
use super::fusion::{weighted_reciprocal_rank_fusion, FusionWeights};
use crate::config::{Config, ConfigValidator, FallbackConfig, RetrievalConfig, TelemetryConfig};
use crate::error::{DocfuseError, Result};
use crate::query::{expand_query, IntentClassifier, IntentKind, QueryNormalizer};
use crate::retriever::{guarded_search, BackendReport, Retriever};
use crate::telemetry::{self, TelemetryEmitter, TelemetryEvent};
use crate::types::{
    ConfidenceBranch, FusedResult, RetrievalDebug, RetrievalMeta, RetrievalRequest,
    RetrievalResult, RetrievalSource, Scope, ThreadHints,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// The retrieval-and-fusion core.
///
/// Holds no per-request state; one engine serves concurrent requests.
pub struct RetrievalEngine {
    normalizer: QueryNormalizer,
    weights: FusionWeights,
    diversity: DiversityFilter,
    scorer: ConfidenceScorer,
    retrieval: RetrievalConfig,
    fallback: FallbackConfig,
    expanded_weights: FusionWeights,
    multi_doc_diversity: DiversityFilter,
    telemetry_config: TelemetryConfig,
    vector: Arc<dyn Retriever>,
    lexical: Arc<dyn Retriever>,
    telemetry: TelemetryEmitter,
}

/// What one pass searches with
struct PassPlan<'a> {
    query: &'a str,
    fetch_k: usize,
    weights: &'a FusionWeights,
    diversity: &'a DiversityFilter,
}

/// Outcome of one fan-out, fuse, filter and score cycle
struct Pass {
    contexts: Vec<FusedResult>,
    meta: RetrievalMeta,
    vector: BackendReport,
    lexical: BackendReport,
    fused_count: usize,
    filtered_count: usize,
    boosted_count: usize,
    retrieval_ms: u64,
    fusion_ms: u64,
}

impl Pass {
    fn all_degraded(&self) -> bool {
        self.vector.status.is_degraded() && self.lexical.status.is_degraded()
    }
}

impl RetrievalEngine {
    pub fn new(
        config: &Config,
        vector: Arc<dyn Retriever>,
        lexical: Arc<dyn Retriever>,
        telemetry: TelemetryEmitter,
    ) -> Result<Self> {
        ConfigValidator::validate(config)?;

        let classifier = IntentClassifier::from_rules(&config.intent.rules)?;

        let mut multi_doc = config.diversity.clone();
        multi_doc.max_per_document = config.fallback.multi_doc_per_document;

        Ok(Self {
            normalizer: QueryNormalizer::new(classifier),
            weights: config.fusion.weights()?,
            diversity: DiversityFilter::new(&config.diversity, config.retrieval.max_contexts)?,
            scorer: ConfidenceScorer::new(&config.confidence),
            retrieval: config.retrieval.clone(),
            fallback: config.fallback.clone(),
            expanded_weights: config.fallback.expanded_weights(config.fusion.rrf_k)?,
            multi_doc_diversity: DiversityFilter::new(&multi_doc, config.retrieval.max_contexts)?,
            telemetry_config: config.telemetry.clone(),
            vector,
            lexical,
            telemetry,
        })
    }

    pub fn normalizer(&self) -> &QueryNormalizer {
        &self.normalizer
    }

    pub fn telemetry(&self) -> &TelemetryEmitter {
        &self.telemetry
    }

    /// Run one query through the full pipeline.
    ///
    /// Fails only on caller errors (empty query, missing or invalid scope).
    /// Backend failures degrade the result instead. Dropping the returned
    /// future abandons any in-flight retriever calls.
    pub async fn retrieve_and_fuse(&self, request: &RetrievalRequest) -> Result<RetrievalResult> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();

        let normalized = self.normalizer.normalize(&request.query);
        if normalized.is_empty() {
            return Err(DocfuseError::EmptyQuery);
        }
        let scope = Scope::try_from(&request.scope)?;

        let intent = request.intent_override.unwrap_or(normalized.intent);
        let requested = request
            .k
            .filter(|k| *k > 0)
            .unwrap_or(self.retrieval.default_k);
        let k = requested.min(self.retrieval.max_k);
        if k < requested {
            tracing::debug!(requested, max_k = self.retrieval.max_k, "Clamped requested k");
        }
        let fetch_k = k.saturating_mul(self.retrieval.candidate_multiplier);

        tracing::debug!(
            request_id = %request_id,
            intent = %intent,
            k,
            fetch_k,
            datasets = scope.dataset_ids().len(),
            "Starting retrieval"
        );

        let first = PassPlan {
            query: &normalized.text,
            fetch_k,
            weights: &self.weights,
            diversity: &self.diversity,
        };
        let mut pass = self
            .run_pass(request_id, &first, &scope, intent, &request.hints, k)
            .await;
        let mut retrieval_ms = pass.retrieval_ms;
        let mut fusion_ms = pass.fusion_ms;

        let mut fallback_attempts = 0;
        let mut fallback_strategy = None;
        if self.fallback.enabled {
            let expanded = expand_query(&normalized.text);
            let widened_k = fetch_k.saturating_mul(self.fallback.widen_factor);

            while fallback_attempts < self.fallback.max_retries
                && pass.meta.confidence_branch != ConfidenceBranch::Confident
                && !pass.all_degraded()
            {
                let strategy = FallbackStrategy::choose(&pass.contexts, expanded.is_some());
                let plan = match strategy {
                    FallbackStrategy::ExpandQuery => PassPlan {
                        query: expanded.as_deref().unwrap_or(&normalized.text),
                        fetch_k,
                        weights: &self.expanded_weights,
                        diversity: &self.diversity,
                    },
                    FallbackStrategy::WidenSearch => PassPlan {
                        query: &normalized.text,
                        fetch_k: widened_k,
                        weights: &self.weights,
                        diversity: &self.diversity,
                    },
                    FallbackStrategy::MultiDoc => PassPlan {
                        query: &normalized.text,
                        fetch_k: widened_k,
                        weights: &self.weights,
                        diversity: &self.multi_doc_diversity,
                    },
                };

                fallback_attempts += 1;
                tracing::debug!(
                    request_id = %request_id,
                    attempt = fallback_attempts,
                    strategy = %strategy,
                    branch = %pass.meta.confidence_branch,
                    "Low confidence, retrying"
                );

                let candidate = self
                    .run_pass(request_id, &plan, &scope, intent, &request.hints, k)
                    .await;
                retrieval_ms += candidate.retrieval_ms;
                fusion_ms += candidate.fusion_ms;

                if improves(
                    (&pass.meta, pass.contexts.len()),
                    (&candidate.meta, candidate.contexts.len()),
                ) {
                    pass = candidate;
                    fallback_strategy = Some(strategy);
                } else {
                    tracing::debug!(
                        request_id = %request_id,
                        strategy = %strategy,
                        "Retry did not improve the result, stopping"
                    );
                    break;
                }
            }
        }

        let meta = pass.meta;
        let contexts = pass.contexts;

        if self.telemetry_config.enabled {
            self.telemetry.emit(TelemetryEvent {
                request_id,
                timestamp: Utc::now(),
                organization_id: scope.organization_id().to_string(),
                dataset_ids: scope.dataset_ids().to_vec(),
                query: telemetry::truncate_query(&normalized.text, self.telemetry_config.query_max_chars),
                intent,
                top1_score: meta.top1_score,
                score_gap: meta.score_gap,
                unique_section_count: meta.unique_section_count,
                vector_count: pass.vector.count,
                lexical_count: pass.lexical.count,
                fused_count: pass.fused_count,
                context_count: contexts.len(),
                vector_status: pass.vector.status,
                lexical_status: pass.lexical.status,
                confidence_branch: meta.confidence_branch,
                retrieval_ms,
                fusion_ms,
                total_ms: started.elapsed().as_millis() as u64,
                endpoint_found: telemetry::endpoint_found(&contexts),
                verbatim_found: telemetry::verbatim_found(&contexts),
                fallback_triggered: fallback_attempts > 0,
                fallback_attempts,
            });
        }

        tracing::info!(
            request_id = %request_id,
            intent = %intent,
            vector_count = pass.vector.count,
            lexical_count = pass.lexical.count,
            contexts = contexts.len(),
            branch = %meta.confidence_branch,
            top1_score = meta.top1_score,
            fallback_attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Retrieval complete"
        );

        Ok(RetrievalResult {
            contexts,
            meta,
            debug: RetrievalDebug {
                request_id,
                intent,
                normalized_query: normalized.text,
                vector: pass.vector,
                lexical: pass.lexical,
                fused_count: pass.fused_count,
                filtered_count: pass.filtered_count,
                boosted_count: pass.boosted_count,
                fallback_attempts,
                fallback_strategy,
                retrieval_ms,
                fusion_ms,
            },
        })
    }

    /// Query both retrievers concurrently, then fuse, filter, truncate and score
    async fn run_pass(
        &self,
        request_id: Uuid,
        plan: &PassPlan<'_>,
        scope: &Scope,
        intent: IntentKind,
        hints: &ThreadHints,
        k: usize,
    ) -> Pass {
        let retrieval_started = Instant::now();
        let ((vector_hits, vector), (lexical_hits, lexical)) = tokio::join!(
            guarded_search(
                RetrievalSource::Vector,
                self.vector.as_ref(),
                plan.query,
                scope,
                plan.fetch_k,
                self.retrieval.vector_timeout(),
            ),
            guarded_search(
                RetrievalSource::Lexical,
                self.lexical.as_ref(),
                plan.query,
                scope,
                plan.fetch_k,
                self.retrieval.lexical_timeout(),
            ),
        );
        let retrieval_ms = retrieval_started.elapsed().as_millis() as u64;

        if vector.status.is_degraded() && lexical.status.is_degraded() {
            tracing::warn!(
                request_id = %request_id,
                vector = %vector.status,
                lexical = %lexical.status,
                "Both retrievers unavailable, answering out of scope"
            );
        }

        let fusion_started = Instant::now();
        let fused = weighted_reciprocal_rank_fusion(&vector_hits, &lexical_hits, plan.weights);
        let fused_count = fused.len();

        let outcome = plan.diversity.filter(fused, intent, hints);
        let mut contexts = outcome.results;
        contexts.truncate(k);

        let meta = self.scorer.score(&contexts);
        let fusion_ms = fusion_started.elapsed().as_millis() as u64;

        Pass {
            contexts,
            meta,
            vector,
            lexical,
            fused_count,
            filtered_count: outcome.capped,
            boosted_count: outcome.boosted,
            retrieval_ms,
            fusion_ms,
        }
    }

    /// Flush queued telemetry and stop the telemetry worker
    pub async fn shutdown(self) {
        self.telemetry.shutdown().await;
    }
}
