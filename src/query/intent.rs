//! Rule-based intent classification over a closed set of intents

use crate::error::{DocfuseError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the user is looking for. `General` is the explicit fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Auth,
    ListEndpoints,
    CodeExample,
    ErrorCode,
    Table,
    DocsList,
    General,
}

impl IntentKind {
    pub const ALL: [IntentKind; 7] = [
        IntentKind::Auth,
        IntentKind::ListEndpoints,
        IntentKind::CodeExample,
        IntentKind::ErrorCode,
        IntentKind::Table,
        IntentKind::DocsList,
        IntentKind::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Auth => "AUTH",
            IntentKind::ListEndpoints => "LIST_ENDPOINTS",
            IntentKind::CodeExample => "CODE_EXAMPLE",
            IntentKind::ErrorCode => "ERROR_CODE",
            IntentKind::Table => "TABLE",
            IntentKind::DocsList => "DOCS_LIST",
            IntentKind::General => "GENERAL",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentKind {
    type Err = DocfuseError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_").to_ascii_uppercase();
        IntentKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| DocfuseError::Config(format!("Unknown intent: {}", s)))
    }
}

/// One classification rule: any matching pattern selects `intent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: IntentKind,
    pub patterns: Vec<String>,
}

impl IntentRule {
    fn new(intent: IntentKind, patterns: &[&str]) -> Self {
        Self {
            intent,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Built-in rule table, evaluated in order against lowercased text
pub fn default_rules() -> Vec<IntentRule> {
    vec![
        IntentRule::new(
            IntentKind::Auth,
            &[
                r"\b(auth|authenticat\w*|authoriz\w*|oauth2?|bearer|jwt)\b",
                r"\b(api[\s-]?keys?|access[\s-]?tokens?|refresh[\s-]?tokens?|client[\s_-]?secret)\b",
                r"\b(credentials?|log\s?in|sign[\s-]?in)\b",
            ],
        ),
        IntentRule::new(
            IntentKind::ListEndpoints,
            &[
                r"\bendpoints?\b",
                r"(^|\s)(get|post|put|patch|delete)\s+/",
                r"\b(routes?|api\s+paths?)\b",
            ],
        ),
        IntentRule::new(
            IntentKind::CodeExample,
            &[
                r"\b(code|snippet|curl|sdk)\b",
                r"\b(sample|example)s?\b",
                r"\b(request|response)\s+(body|payload|json|format)\b",
                r"\b(json|payload)\b",
                r"\bin\s+(python|javascript|typescript|java|go|rust|ruby|php|c#)\b",
            ],
        ),
        IntentRule::new(
            IntentKind::ErrorCode,
            &[
                r"\berrors?\b",
                r"\b(exception|failure|failed|status\s+code)\b",
                r"\b[45]\d{2}\b",
                r"\b[a-z]+(_[a-z]+)+\b.*\bmean",
            ],
        ),
        IntentRule::new(
            IntentKind::Table,
            &[r"\b(table|columns?|matrix|comparison)\b"],
        ),
        IntentRule::new(
            IntentKind::DocsList,
            &[
                r"\b(what|which|list|show)\b.*\b(documents?|docs|files|guides|manuals)\b",
                r"\b(documents?|docs)\s+(do\s+you\s+have|are\s+available)\b",
            ],
        ),
    ]
}

/// Compiled rule table; first matching rule wins
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    rules: Vec<(IntentKind, Vec<Regex>)>,
}

impl IntentClassifier {
    /// Compile a rule table
    pub fn from_rules(rules: &[IntentRule]) -> Result<Self> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let patterns = rule
                    .patterns
                    .iter()
                    .map(|p| {
                        Regex::new(p).map_err(|e| {
                            DocfuseError::Config(format!(
                                "Invalid pattern for intent '{}': {}",
                                rule.intent, e
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((rule.intent, patterns))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules: compiled })
    }

    /// Classifier over the built-in rules
    pub fn with_default_rules() -> Result<Self> {
        Self::from_rules(&default_rules())
    }

    /// Classify lowercased, whitespace-collapsed text
    pub fn classify(&self, text: &str) -> IntentKind {
        if text.is_empty() {
            return IntentKind::General;
        }

        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(text)))
            .map(|(intent, _)| *intent)
            .unwrap_or(IntentKind::General)
    }
}
