//! Configuration management for docfuse
//!
//! Every tunable of the retrieval core lives here: fusion weights, retriever
//! timeouts, diversity caps and boosts, confidence thresholds, telemetry
//! limits and local index parameters. Files are TOML; any section or key may
//! be omitted and falls back to its default.

use crate::error::{DocfuseError, Result};
use crate::query::{default_rules, IntentRule};
use crate::retrieval::FusionWeights;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub fusion: FusionConfig,
    pub retrieval: RetrievalConfig,
    pub diversity: DiversityConfig,
    pub confidence: ConfidenceConfig,
    pub fallback: FallbackConfig,
    pub telemetry: TelemetryConfig,
    pub intent: IntentConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

/// Weighted RRF parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub vector_weight: f64,
    pub lexical_weight: f64,
    pub rrf_k: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        let weights = FusionWeights::default();
        Self {
            vector_weight: weights.vector,
            lexical_weight: weights.lexical,
            rrf_k: weights.k,
        }
    }
}

impl FusionConfig {
    pub fn weights(&self) -> Result<FusionWeights> {
        FusionWeights::new(self.vector_weight, self.lexical_weight, self.rrf_k)
            .map_err(|e| DocfuseError::Config(e.to_string()))
    }
}

/// Retriever fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Result count when the request does not name one
    pub default_k: usize,
    /// Upper bound on a caller-supplied `k`; larger requests are clamped
    pub max_k: usize,
    /// Each retriever is asked for `k * candidate_multiplier` results
    pub candidate_multiplier: usize,
    pub vector_timeout_ms: u64,
    pub lexical_timeout_ms: u64,
    /// Final truncation of the context list; 0 disables it
    pub max_contexts: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 25,
            max_k: 200,
            candidate_multiplier: 2,
            vector_timeout_ms: 1500,
            lexical_timeout_ms: 800,
            max_contexts: 12,
        }
    }
}

impl RetrievalConfig {
    pub fn vector_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_timeout_ms)
    }

    pub fn lexical_timeout(&self) -> Duration {
        Duration::from_millis(self.lexical_timeout_ms)
    }
}

/// Caps and boosts of the diversity pass. Boosts are on the fused-score scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    pub max_per_section: usize,
    /// 0 = unlimited
    pub max_per_document: usize,
    pub intent_boost: f64,
    pub prefer_doc_boost: f64,
    pub brand_boost: f64,
    pub endpoint_hint_boost: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            max_per_section: 3,
            max_per_document: 0,
            intent_boost: 0.002,
            prefer_doc_boost: 0.001,
            brand_boost: 0.001,
            endpoint_hint_boost: 0.001,
        }
    }
}

/// Branch thresholds, calibrated against the fused-score scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub min_relevance: f64,
    pub high_confidence: f64,
    pub min_score_gap: f64,
    /// Distinct sections required for `confident`; 0 disables the check
    pub min_confident_sections: usize,
    /// Top-N results inspected for section diversity
    pub section_window: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_relevance: 0.004,
            high_confidence: 0.011,
            min_score_gap: 0.002,
            min_confident_sections: 0,
            section_window: 8,
        }
    }
}

/// Retries when the first pass is not confident. Off unless enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub max_retries: usize,
    /// Fetch multiplier for the widen and multi-document strategies
    pub widen_factor: usize,
    /// Fusion split used with the expanded query
    pub expanded_vector_weight: f64,
    pub expanded_lexical_weight: f64,
    /// Per-document cap for the multi-document strategy
    pub multi_doc_per_document: usize,
}

impl FallbackConfig {
    pub fn expanded_weights(&self, rrf_k: u32) -> Result<FusionWeights> {
        FusionWeights::new(self.expanded_vector_weight, self.expanded_lexical_weight, rrf_k)
            .map_err(|e| DocfuseError::Config(e.to_string()))
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 2,
            widen_factor: 3,
            expanded_vector_weight: 0.6,
            expanded_lexical_weight: 0.4,
            multi_doc_per_document: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub query_max_chars: usize,
    pub channel_capacity: usize,
    /// Events kept by the in-memory sink
    pub memory_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            query_max_chars: 200,
            channel_capacity: 1024,
            memory_capacity: 1000,
        }
    }
}

/// Ordered intent rules; the first matching rule wins
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    pub rules: Vec<IntentRule>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
        }
    }
}

/// Local index parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub lexical_writer_budget_bytes: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            lexical_writer_budget_bytes: 50_000_000,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_relevance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_section: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DocfuseError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| DocfuseError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocfuseError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| DocfuseError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self.profiles.get(profile).cloned().ok_or_else(|| {
            DocfuseError::Config(format!("Unknown profile: {}", profile))
        })?;

        if let Some(weight) = overrides.vector_weight {
            self.fusion.vector_weight = weight;
        }
        if let Some(weight) = overrides.lexical_weight {
            self.fusion.lexical_weight = weight;
        }
        if let Some(threshold) = overrides.high_confidence {
            self.confidence.high_confidence = threshold;
        }
        if let Some(threshold) = overrides.min_relevance {
            self.confidence.min_relevance = threshold;
        }
        if let Some(cap) = overrides.max_per_section {
            self.diversity.max_per_section = cap;
        }

        tracing::debug!(profile, "Applied configuration profile");
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: DOCFUSE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("DOCFUSE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    /// Set one `SECTION__KEY` path to a string value
    pub fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "FUSION__VECTOR_WEIGHT" => self.fusion.vector_weight = parse_value(path, value)?,
            "FUSION__LEXICAL_WEIGHT" => self.fusion.lexical_weight = parse_value(path, value)?,
            "FUSION__RRF_K" => self.fusion.rrf_k = parse_value(path, value)?,
            "RETRIEVAL__DEFAULT_K" => self.retrieval.default_k = parse_value(path, value)?,
            "RETRIEVAL__MAX_K" => self.retrieval.max_k = parse_value(path, value)?,
            "RETRIEVAL__CANDIDATE_MULTIPLIER" => {
                self.retrieval.candidate_multiplier = parse_value(path, value)?
            }
            "RETRIEVAL__VECTOR_TIMEOUT_MS" => {
                self.retrieval.vector_timeout_ms = parse_value(path, value)?
            }
            "RETRIEVAL__LEXICAL_TIMEOUT_MS" => {
                self.retrieval.lexical_timeout_ms = parse_value(path, value)?
            }
            "RETRIEVAL__MAX_CONTEXTS" => self.retrieval.max_contexts = parse_value(path, value)?,
            "DIVERSITY__MAX_PER_SECTION" => {
                self.diversity.max_per_section = parse_value(path, value)?
            }
            "DIVERSITY__MAX_PER_DOCUMENT" => {
                self.diversity.max_per_document = parse_value(path, value)?
            }
            "CONFIDENCE__MIN_RELEVANCE" => {
                self.confidence.min_relevance = parse_value(path, value)?
            }
            "CONFIDENCE__HIGH_CONFIDENCE" => {
                self.confidence.high_confidence = parse_value(path, value)?
            }
            "CONFIDENCE__MIN_SCORE_GAP" => {
                self.confidence.min_score_gap = parse_value(path, value)?
            }
            "FALLBACK__ENABLED" => self.fallback.enabled = parse_value(path, value)?,
            "FALLBACK__MAX_RETRIES" => self.fallback.max_retries = parse_value(path, value)?,
            "TELEMETRY__ENABLED" => self.telemetry.enabled = parse_value(path, value)?,
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            DocfuseError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("docfuse").join("config.toml"))
    }
}

fn parse_value<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DocfuseError::InvalidConfigValue {
            path: path.to_string(),
            message: format!(
                "Cannot parse '{}' as {}",
                value,
                std::any::type_name::<T>()
            ),
        })
}
