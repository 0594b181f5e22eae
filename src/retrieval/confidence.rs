//! Confidence signal over the final ranking
//!
//! Thresholds live on the fused-score scale. With the default weights the
//! best possible score is 1/61 (rank 1 in both lists) and a vector-only rank 1
//! scores 0.7/61, so the defaults sit well below 0.02.

use crate::config::ConfidenceConfig;
use crate::types::{ConfidenceBranch, FusedResult, RetrievalMeta};
use ahash::HashSet;

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ConfidenceConfig,
}

impl ConfidenceScorer {
    pub fn new(config: &ConfidenceConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Compute the confidence meta for results sorted by `fused_score` descending
    pub fn score(&self, results: &[FusedResult]) -> RetrievalMeta {
        let top1_score = results.first().map(|r| r.fused_score).unwrap_or(0.0);
        let second_score = results.get(1).map(|r| r.fused_score).unwrap_or(0.0);
        let score_gap = top1_score - second_score;

        let unique_section_count = results
            .iter()
            .take(self.config.section_window)
            .filter_map(|r| r.chunk.section())
            .collect::<HashSet<&str>>()
            .len();

        let confidence_branch =
            self.classify(results.is_empty(), top1_score, score_gap, unique_section_count);

        tracing::debug!(
            top1_score,
            score_gap,
            unique_section_count,
            branch = %confidence_branch,
            "Confidence scored"
        );

        RetrievalMeta {
            top1_score,
            second_score,
            score_gap,
            unique_section_count,
            confidence_branch,
        }
    }

    /// Branch decision. Monotonic in `top1`: raising it can only move the
    /// branch from out_of_scope towards confident.
    pub fn classify(
        &self,
        empty: bool,
        top1: f64,
        gap: f64,
        unique_sections: usize,
    ) -> ConfidenceBranch {
        if empty || top1 < self.config.min_relevance {
            return ConfidenceBranch::OutOfScope;
        }

        if top1 > self.config.high_confidence
            && gap > self.config.min_score_gap
            && unique_sections >= self.config.min_confident_sections
        {
            return ConfidenceBranch::Confident;
        }

        ConfidenceBranch::Partial
    }
}
