//! Per-query retrieval telemetry
//!
//! Events are handed to a bounded channel with `try_send` and written to the
//! sink by a background task. The query path never awaits the sink; when the
//! channel is full the event is dropped and counted.

mod sink;

pub use sink::{IntentMetrics, MemorySink, MetricsAggregation, TelemetrySink, TracingSink};

use crate::query::IntentKind;
use crate::retriever::BackendStatus;
use crate::types::{ConfidenceBranch, ElementType, FusedResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One retrieval, as recorded for offline quality monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub organization_id: String,
    pub dataset_ids: Vec<String>,
    /// Truncated to the configured character cap
    pub query: String,
    pub intent: IntentKind,
    pub top1_score: f64,
    pub score_gap: f64,
    pub unique_section_count: usize,
    pub vector_count: usize,
    pub lexical_count: usize,
    pub fused_count: usize,
    pub context_count: usize,
    pub vector_status: BackendStatus,
    pub lexical_status: BackendStatus,
    pub confidence_branch: ConfidenceBranch,
    pub retrieval_ms: u64,
    pub fusion_ms: u64,
    pub total_ms: u64,
    /// An endpoint line (`METHOD /path`) or endpoint metadata made it into the contexts
    pub endpoint_found: bool,
    /// A verbatim code or JSON chunk made it into the contexts
    pub verbatim_found: bool,
    /// The first pass was below `confident` and retries ran
    #[serde(default)]
    pub fallback_triggered: bool,
    #[serde(default)]
    pub fallback_attempts: usize,
}

/// Cap `query` at `max_chars` characters, never splitting a code point
pub fn truncate_query(query: &str, max_chars: usize) -> String {
    match query.char_indices().nth(max_chars) {
        Some((byte_pos, _)) => query[..byte_pos].to_string(),
        None => query.to_string(),
    }
}

const HTTP_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Whether any context documents an endpoint
pub fn endpoint_found(contexts: &[FusedResult]) -> bool {
    contexts.iter().any(|r| {
        r.chunk.meta_str("endpoint").is_some()
            || r.chunk.flag("hasEndpoint")
            || r.chunk.content.lines().any(|line| {
                let mut words = line.split_whitespace();
                while let Some(word) = words.next() {
                    if HTTP_METHODS.contains(&word) {
                        if let Some(path) = words.clone().next() {
                            if path.starts_with('/') {
                                return true;
                            }
                        }
                    }
                }
                false
            })
    })
}

/// Whether any context carries verbatim code or JSON
pub fn verbatim_found(contexts: &[FusedResult]) -> bool {
    contexts.iter().any(|r| {
        r.chunk.element_type == ElementType::Code
            || r.chunk.flag("hasVerbatim")
            || r.chunk.flag("hasJson")
    })
}

/// Fire-and-forget dispatcher in front of a [`TelemetrySink`]
pub struct TelemetryEmitter {
    tx: Option<mpsc::Sender<TelemetryEvent>>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryEmitter {
    /// Spawn the writer task on the current tokio runtime.
    ///
    /// Outside a runtime the emitter comes back disabled.
    pub fn spawn(sink: Arc<dyn TelemetrySink>, capacity: usize) -> Self {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No tokio runtime available, telemetry disabled");
                return Self::disabled();
            }
        };

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = handle.spawn(telemetry_worker(rx, sink));

        Self {
            tx: Some(tx),
            worker: Some(worker),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emitter that discards every event
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event without waiting. Never fails.
    pub fn emit(&self, event: TelemetryEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        if let Err(e) = tx.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::debug!(dropped_total = total, "Telemetry channel full, event dropped")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!(dropped_total = total, "Telemetry worker gone, event dropped")
                }
            }
        }
    }

    /// Events lost to a full or closed channel
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the channel and wait for queued events to reach the sink
    pub async fn shutdown(mut self) {
        drop(self.tx.take());

        if let Some(worker) = self.worker.take() {
            tracing::debug!("Draining telemetry queue");
            if let Err(e) = worker.await {
                tracing::warn!("Telemetry worker ended abnormally: {}", e);
            }
        }
    }
}

async fn telemetry_worker(mut rx: mpsc::Receiver<TelemetryEvent>, sink: Arc<dyn TelemetrySink>) {
    let mut written: u64 = 0;
    let mut failed: u64 = 0;

    while let Some(event) = rx.recv().await {
        match sink.record(&event).await {
            Ok(()) => written += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(request_id = %event.request_id, "Telemetry sink rejected event: {}", e);
            }
        }
    }

    tracing::debug!(written, failed, "Telemetry worker finished");
}
