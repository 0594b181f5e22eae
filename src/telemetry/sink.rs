//! Telemetry sinks and in-memory aggregation

use super::TelemetryEvent;
use crate::error::Result;
use crate::query::IntentKind;
use crate::types::ConfidenceBranch;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Destination for telemetry events. Best effort: errors are logged by the
/// emitter's worker and never reach the query path.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: &TelemetryEvent) -> Result<()>;
}

/// Writes each event as a structured `info!` record
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn record(&self, event: &TelemetryEvent) -> Result<()> {
        tracing::info!(
            target: "docfuse::telemetry",
            request_id = %event.request_id,
            organization_id = %event.organization_id,
            datasets = event.dataset_ids.len(),
            intent = %event.intent,
            branch = %event.confidence_branch,
            top1_score = event.top1_score,
            score_gap = event.score_gap,
            vector_count = event.vector_count,
            lexical_count = event.lexical_count,
            contexts = event.context_count,
            vector_status = %event.vector_status,
            lexical_status = %event.lexical_status,
            retrieval_ms = event.retrieval_ms,
            fusion_ms = event.fusion_ms,
            fallback_attempts = event.fallback_attempts,
            query = %event.query,
            "retrieval"
        );
        Ok(())
    }
}

/// Bounded in-memory store of the most recent events.
///
/// Owned by whoever builds the engine and injected as a sink, so each test
/// or service instance gets its own registry.
#[derive(Debug)]
pub struct MemorySink {
    events: Mutex<VecDeque<TelemetryEvent>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TelemetryEvent>> {
        // A panicked writer leaves a valid deque behind
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, event: TelemetryEvent) {
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the stored events, oldest first
    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn aggregate(&self) -> MetricsAggregation {
        MetricsAggregation::from_events(self.lock().iter())
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn record(&self, event: &TelemetryEvent) -> Result<()> {
        self.push(event.clone());
        Ok(())
    }
}

/// Per-intent slice of the aggregation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntentMetrics {
    pub count: usize,
    pub avg_top1_score: f64,
    pub out_of_scope_rate: f64,
}

/// Rates and averages over a window of events
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsAggregation {
    pub total_queries: usize,
    pub confident_rate: f64,
    pub partial_rate: f64,
    pub out_of_scope_rate: f64,
    /// Share of queries that produced no contexts
    pub empty_result_rate: f64,
    /// Share of queries where at least one backend failed or timed out
    pub degraded_rate: f64,
    /// Share of queries that ran fallback retries
    pub fallback_rate: f64,
    /// Among LIST_ENDPOINTS queries; `None` when there were none
    pub endpoint_found_rate: Option<f64>,
    /// Among CODE_EXAMPLE queries; `None` when there were none
    pub verbatim_hit_rate: Option<f64>,
    pub avg_total_ms: f64,
    pub avg_top1_score: f64,
    pub avg_unique_sections: f64,
    pub by_intent: BTreeMap<IntentKind, IntentMetrics>,
}

fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

impl MetricsAggregation {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a TelemetryEvent>) -> Self {
        let events: Vec<&TelemetryEvent> = events.into_iter().collect();
        let total = events.len();
        if total == 0 {
            return Self::default();
        }

        let count = |pred: &dyn Fn(&TelemetryEvent) -> bool| {
            events.iter().filter(|&&e| pred(e)).count()
        };
        let mean = |f: &dyn Fn(&TelemetryEvent) -> f64| {
            events.iter().map(|&e| f(e)).sum::<f64>() / total as f64
        };
        let branch_rate =
            |b: ConfidenceBranch| rate(count(&|e: &TelemetryEvent| e.confidence_branch == b), total);

        let endpoint_queries: Vec<_> = events
            .iter()
            .filter(|e| e.intent == IntentKind::ListEndpoints)
            .collect();
        let code_queries: Vec<_> = events
            .iter()
            .filter(|e| e.intent == IntentKind::CodeExample)
            .collect();

        let mut by_intent: BTreeMap<IntentKind, IntentMetrics> = BTreeMap::new();
        for event in &events {
            let slot = by_intent.entry(event.intent).or_default();
            slot.count += 1;
            slot.avg_top1_score += event.top1_score;
            if event.confidence_branch == ConfidenceBranch::OutOfScope {
                slot.out_of_scope_rate += 1.0;
            }
        }
        for slot in by_intent.values_mut() {
            slot.avg_top1_score /= slot.count as f64;
            slot.out_of_scope_rate /= slot.count as f64;
        }

        Self {
            total_queries: total,
            confident_rate: branch_rate(ConfidenceBranch::Confident),
            partial_rate: branch_rate(ConfidenceBranch::Partial),
            out_of_scope_rate: branch_rate(ConfidenceBranch::OutOfScope),
            empty_result_rate: rate(count(&|e: &TelemetryEvent| e.context_count == 0), total),
            degraded_rate: rate(
                count(&|e: &TelemetryEvent| {
                    e.vector_status.is_degraded() || e.lexical_status.is_degraded()
                }),
                total,
            ),
            fallback_rate: rate(count(&|e: &TelemetryEvent| e.fallback_triggered), total),
            endpoint_found_rate: (!endpoint_queries.is_empty()).then(|| {
                rate(
                    endpoint_queries.iter().filter(|e| e.endpoint_found).count(),
                    endpoint_queries.len(),
                )
            }),
            verbatim_hit_rate: (!code_queries.is_empty()).then(|| {
                rate(
                    code_queries.iter().filter(|e| e.verbatim_found).count(),
                    code_queries.len(),
                )
            }),
            avg_total_ms: mean(&|e: &TelemetryEvent| e.total_ms as f64),
            avg_top1_score: mean(&|e: &TelemetryEvent| e.top1_score),
            avg_unique_sections: mean(&|e: &TelemetryEvent| e.unique_section_count as f64),
            by_intent,
        }
    }
}
