//! Intent-aware boosting, thread-hint bias and section/document caps
//!
//! Nothing here excludes a chunk for failing a preference. Preferences only
//! add to `fused_score`; the caps are the only thing that removes results.

use crate::config::DiversityConfig;
use crate::error::{DocfuseError, Result};
use crate::query::IntentKind;
use crate::types::{Chunk, ElementType, FusedResult, ThreadHints};
use ahash::{HashMap, HashMapExt};
use regex::Regex;

/// Content predicates behind the intent preference table
#[derive(Debug, Clone)]
struct Predicates {
    auth: Regex,
    endpoint_line: Regex,
    error_constant: Regex,
    status_code: Regex,
    error_word: Regex,
    pipe_table: Regex,
}

impl Predicates {
    fn compile() -> Result<Self> {
        let re = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                DocfuseError::Config(format!("Invalid preference pattern '{}': {}", pattern, e))
            })
        };

        Ok(Self {
            auth: re(r"(?i)\b(authorization|bearer|api[\s_-]?key|access[\s_-]?token|oauth2?|client[\s_-]?secret)\b")?,
            endpoint_line: re(r"\b(GET|POST|PUT|PATCH|DELETE)\s+/[\w{}:./-]*")?,
            error_constant: re(r"\b[A-Z][A-Z0-9]*(_[A-Z0-9]+)+\b")?,
            status_code: re(r"\b[45]\d{2}\b")?,
            error_word: re(r"(?i)\b(error|errors|status|failed|invalid)\b")?,
            pipe_table: re(r"(?m)^\s*\|.*\|\s*$")?,
        })
    }

    /// Whether `chunk` carries what `intent` is looking for.
    /// `None` when the intent has no preference.
    fn prefers(&self, intent: IntentKind, chunk: &Chunk) -> Option<bool> {
        let matched = match intent {
            IntentKind::Auth => chunk.flag("hasAuth") || self.auth.is_match(&chunk.content),
            IntentKind::ListEndpoints => {
                chunk.meta_str("endpoint").is_some()
                    || chunk.flag("hasEndpoint")
                    || self.endpoint_line.is_match(&chunk.content)
            }
            IntentKind::CodeExample => {
                chunk.element_type == ElementType::Code
                    || chunk.flag("hasJson")
                    || chunk.flag("hasVerbatim")
                    || chunk.content.contains("```")
            }
            IntentKind::ErrorCode => {
                self.error_constant.is_match(&chunk.content)
                    || (self.status_code.is_match(&chunk.content)
                        && self.error_word.is_match(&chunk.content))
            }
            IntentKind::Table => {
                chunk.element_type == ElementType::Table || self.pipe_table.is_match(&chunk.content)
            }
            IntentKind::DocsList | IntentKind::General => return None,
        };
        Some(matched)
    }
}

/// Result of the diversity pass
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub results: Vec<FusedResult>,
    /// Results whose score was raised by at least one boost
    pub boosted: usize,
    /// Results removed by the section or document cap
    pub capped: usize,
}

/// Re-ranks fused results by intent and hints, then enforces the caps
#[derive(Debug, Clone)]
pub struct DiversityFilter {
    config: DiversityConfig,
    max_results: usize,
    predicates: Predicates,
}

impl DiversityFilter {
    /// `max_results` truncates the output; 0 keeps everything that survives the caps
    pub fn new(config: &DiversityConfig, max_results: usize) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            max_results,
            predicates: Predicates::compile()?,
        })
    }

    pub fn filter(
        &self,
        mut results: Vec<FusedResult>,
        intent: IntentKind,
        hints: &ThreadHints,
    ) -> FilterOutcome {
        let boosted = self.apply_boosts(&mut results, intent, hints);
        if boosted > 0 {
            results.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
        }

        let (results, capped) = self.apply_caps(results);

        tracing::debug!(
            intent = %intent,
            boosted,
            capped,
            kept = results.len(),
            "Diversity filter applied"
        );

        FilterOutcome {
            results,
            boosted,
            capped,
        }
    }

    fn apply_boosts(
        &self,
        results: &mut [FusedResult],
        intent: IntentKind,
        hints: &ThreadHints,
    ) -> usize {
        let brand = hints
            .brand_lock
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_lowercase);
        let endpoint = hints
            .last_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase);

        let mut boosted = 0;
        for result in results.iter_mut() {
            let mut boost = 0.0;

            if self.predicates.prefers(intent, &result.chunk) == Some(true) {
                boost += self.config.intent_boost;
            }
            if hints.prefer_doc_id.as_deref() == Some(result.chunk.document_id.as_str()) {
                boost += self.config.prefer_doc_boost;
            }
            if let Some(brand) = &brand {
                if mentions_brand(&result.chunk, brand) {
                    boost += self.config.brand_boost;
                }
            }
            if let Some(endpoint) = &endpoint {
                if result.chunk.content.to_lowercase().contains(endpoint.as_str()) {
                    boost += self.config.endpoint_hint_boost;
                }
            }

            if boost > 0.0 {
                result.fused_score += boost;
                result.fusion_meta.boost += boost;
                boosted += 1;
            }
        }

        boosted
    }

    /// Keep rank order; skip chunks whose section or document is already full.
    /// Returns the kept results and how many were skipped by a cap.
    fn apply_caps(&self, results: Vec<FusedResult>) -> (Vec<FusedResult>, usize) {
        let mut per_section: HashMap<String, usize> = HashMap::new();
        let mut per_document: HashMap<(String, String), usize> = HashMap::new();
        let mut kept = Vec::with_capacity(results.len());
        let mut capped = 0;

        for result in results {
            if self.max_results > 0 && kept.len() >= self.max_results {
                break;
            }

            if let Some(section) = result.chunk.section() {
                let count = per_section.get(section).copied().unwrap_or(0);
                if count >= self.config.max_per_section {
                    capped += 1;
                    continue;
                }
            }

            let doc_key = (
                result.chunk.dataset_id.clone(),
                result.chunk.document_id.clone(),
            );
            if self.config.max_per_document > 0 {
                let count = per_document.get(&doc_key).copied().unwrap_or(0);
                if count >= self.config.max_per_document {
                    capped += 1;
                    continue;
                }
            }

            if let Some(section) = result.chunk.section() {
                *per_section.entry(section.to_string()).or_insert(0) += 1;
            }
            *per_document.entry(doc_key).or_insert(0) += 1;
            kept.push(result);
        }

        (kept, capped)
    }
}

fn mentions_brand(chunk: &Chunk, brand: &str) -> bool {
    let in_title = chunk
        .document_title
        .as_deref()
        .map(|t| t.to_lowercase().contains(brand))
        .unwrap_or(false);
    let in_meta = chunk
        .meta_str("brand")
        .map(|b| b.to_lowercase() == brand)
        .unwrap_or(false);
    in_title || in_meta
}
