//! Golden query-set evaluation
//!
//! Runs labeled queries through the engine and checks the confidence branch,
//! the top score and the documents that came back. Used to calibrate the
//! confidence thresholds per deployment.

use crate::error::{DocfuseError, Result};
use crate::query::IntentKind;
use crate::retrieval::RetrievalEngine;
use crate::types::{ConfidenceBranch, RetrievalRequest, ThreadHints};
use ahash::{HashSet, HashSetExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// One labeled query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenCase {
    pub name: String,
    pub query: String,
    pub organization_id: String,
    /// Empty means "every dataset of the organization", resolved by the caller
    #[serde(default)]
    pub dataset_ids: Vec<String>,
    pub expected_branch: ConfidenceBranch,
    #[serde(default)]
    pub min_top_score: Option<f64>,
    /// Each listed document must contribute at least one context
    #[serde(default)]
    pub expected_doc_ids: Vec<String>,
    /// Expected classification of the query
    #[serde(default)]
    pub intent: Option<IntentKind>,
    #[serde(default)]
    pub hints: ThreadHints,
}

/// A file of golden cases: TOML `[[case]]` tables or a JSON `{"case": [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoldenSet {
    #[serde(rename = "case", default)]
    pub cases: Vec<GoldenCase>,
}

impl GoldenSet {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DocfuseError::Io {
            source: e,
            context: format!("Failed to read golden set: {}", path.display()),
        })?;

        let set: GoldenSet = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text).map_err(|e| DocfuseError::Json {
                source: e,
                context: format!("Failed to parse golden set: {}", path.display()),
            })?,
            _ => toml::from_str(&text)?,
        };

        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<()> {
        if self.cases.is_empty() {
            return Err(DocfuseError::Config("Golden set has no cases".to_string()));
        }

        let mut names = HashSet::with_capacity(self.cases.len());
        for case in &self.cases {
            if !names.insert(case.name.as_str()) {
                return Err(DocfuseError::Config(format!(
                    "Duplicate golden case name: {}",
                    case.name
                )));
            }
        }
        Ok(())
    }

    /// Fill empty dataset lists from a lookup, typically the corpus
    pub fn resolve_datasets<F>(&mut self, datasets_for_org: F)
    where
        F: Fn(&str) -> Vec<String>,
    {
        for case in self.cases.iter_mut().filter(|c| c.dataset_ids.is_empty()) {
            case.dataset_ids = datasets_for_org(&case.organization_id);
        }
    }
}

/// Result of one case
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub name: String,
    pub passed: bool,
    pub expected_branch: ConfidenceBranch,
    /// `None` when the engine rejected the request
    pub actual_branch: Option<ConfidenceBranch>,
    pub top1_score: f64,
    pub score_gap: f64,
    pub intent: Option<IntentKind>,
    pub failures: Vec<String>,
}

/// Count of (expected, actual) branch pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionCell {
    pub expected: ConfidenceBranch,
    pub actual: Option<ConfidenceBranch>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub outcomes: Vec<CaseOutcome>,
    pub passed: usize,
    pub failed: usize,
    pub confusion: Vec<ConfusionCell>,
}

impl EvalReport {
    fn from_outcomes(outcomes: Vec<CaseOutcome>) -> Self {
        let passed = outcomes.iter().filter(|o| o.passed).count();
        let failed = outcomes.len() - passed;

        let mut cells: BTreeMap<(ConfidenceBranch, Option<ConfidenceBranch>), usize> =
            BTreeMap::new();
        for outcome in &outcomes {
            *cells
                .entry((outcome.expected_branch, outcome.actual_branch))
                .or_default() += 1;
        }

        Self {
            outcomes,
            passed,
            failed,
            confusion: cells
                .into_iter()
                .map(|((expected, actual), count)| ConfusionCell {
                    expected,
                    actual,
                    count,
                })
                .collect(),
        }
    }

    pub fn pass_rate(&self) -> f64 {
        let total = self.passed + self.failed;
        if total == 0 {
            0.0
        } else {
            self.passed as f64 / total as f64
        }
    }
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            let actual = outcome.actual_branch.map_or("error", |b| b.as_str());
            writeln!(
                f,
                "{} {:<32} expected={:<12} actual={:<12} top1={:.5} gap={:.5}",
                if outcome.passed { "PASS" } else { "FAIL" },
                outcome.name,
                outcome.expected_branch.as_str(),
                actual,
                outcome.top1_score,
                outcome.score_gap,
            )?;
            for failure in &outcome.failures {
                writeln!(f, "       - {}", failure)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Branch confusion (expected -> actual):")?;
        for cell in &self.confusion {
            writeln!(
                f,
                "  {:<12} -> {:<12} {}",
                cell.expected.as_str(),
                cell.actual.map_or("error", |b| b.as_str()),
                cell.count
            )?;
        }

        write!(
            f,
            "\n{} passed, {} failed ({:.1}%)",
            self.passed,
            self.failed,
            self.pass_rate() * 100.0
        )
    }
}

/// Run every case sequentially through the engine
pub async fn evaluate(engine: &RetrievalEngine, set: &GoldenSet) -> EvalReport {
    let mut outcomes = Vec::with_capacity(set.cases.len());

    for case in &set.cases {
        let request = RetrievalRequest::new(
            case.query.clone(),
            case.organization_id.clone(),
            case.dataset_ids.iter().cloned(),
        )
        .with_hints(case.hints.clone());

        let outcome = match engine.retrieve_and_fuse(&request).await {
            Ok(result) => {
                let mut failures = Vec::new();
                let meta = result.meta;

                if meta.confidence_branch != case.expected_branch {
                    failures.push(format!(
                        "branch {} != expected {}",
                        meta.confidence_branch, case.expected_branch
                    ));
                }
                if let Some(min) = case.min_top_score {
                    if meta.top1_score < min {
                        failures.push(format!(
                            "top1 score {:.5} below {:.5}",
                            meta.top1_score, min
                        ));
                    }
                }
                for doc in &case.expected_doc_ids {
                    if !result.contexts.iter().any(|c| c.chunk.document_id == *doc) {
                        failures.push(format!("document {} not retrieved", doc));
                    }
                }
                if let Some(expected) = case.intent {
                    if result.debug.intent != expected {
                        failures.push(format!(
                            "intent {} != expected {}",
                            result.debug.intent, expected
                        ));
                    }
                }

                CaseOutcome {
                    name: case.name.clone(),
                    passed: failures.is_empty(),
                    expected_branch: case.expected_branch,
                    actual_branch: Some(meta.confidence_branch),
                    top1_score: meta.top1_score,
                    score_gap: meta.score_gap,
                    intent: Some(result.debug.intent),
                    failures,
                }
            }
            Err(e) => CaseOutcome {
                name: case.name.clone(),
                passed: false,
                expected_branch: case.expected_branch,
                actual_branch: None,
                top1_score: 0.0,
                score_gap: 0.0,
                intent: None,
                failures: vec![e.to_string()],
            },
        };

        tracing::debug!(
            case = %outcome.name,
            passed = outcome.passed,
            top1_score = outcome.top1_score,
            "Golden case evaluated"
        );
        outcomes.push(outcome);
    }

    let report = EvalReport::from_outcomes(outcomes);
    tracing::info!(
        passed = report.passed,
        failed = report.failed,
        "Golden evaluation complete"
    );
    report
}
