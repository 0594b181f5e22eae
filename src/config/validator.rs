use crate::config::Config;
use crate::error::{DocfuseError, Result, ValidationError};
use crate::query::IntentClassifier;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_diversity(config, &mut errors);
        Self::validate_confidence(config, &mut errors);
        Self::validate_fallback(config, &mut errors);
        Self::validate_telemetry(config, &mut errors);
        Self::validate_intent(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DocfuseError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let fusion = &config.fusion;
        for (path, weight) in [
            ("fusion.vector_weight", fusion.vector_weight),
            ("fusion.lexical_weight", fusion.lexical_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be a finite, non-negative number, got {}", weight),
                ));
            }
        }

        if fusion.vector_weight + fusion.lexical_weight <= 0.0 {
            errors.push(ValidationError::new(
                "fusion",
                "At least one fusion weight must be positive",
            ));
        }

        if fusion.rrf_k == 0 {
            errors.push(ValidationError::new(
                "fusion.rrf_k",
                "Rank constant must be at least 1",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;
        if retrieval.default_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_k",
                "Default k must be greater than 0",
            ));
        }

        if retrieval.max_k < retrieval.default_k {
            errors.push(ValidationError::new(
                "retrieval.max_k",
                format!(
                    "Max k ({}) cannot be below the default k ({})",
                    retrieval.max_k, retrieval.default_k
                ),
            ));
        }

        if retrieval.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.candidate_multiplier",
                "Candidate multiplier must be greater than 0",
            ));
        }

        if retrieval.vector_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.vector_timeout_ms",
                "Timeout must be greater than 0",
            ));
        }

        if retrieval.lexical_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.lexical_timeout_ms",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_diversity(config: &Config, errors: &mut Vec<ValidationError>) {
        let diversity = &config.diversity;
        if diversity.max_per_section == 0 {
            errors.push(ValidationError::new(
                "diversity.max_per_section",
                "Section cap must be at least 1",
            ));
        }

        for (path, boost) in [
            ("diversity.intent_boost", diversity.intent_boost),
            ("diversity.prefer_doc_boost", diversity.prefer_doc_boost),
            ("diversity.brand_boost", diversity.brand_boost),
            ("diversity.endpoint_hint_boost", diversity.endpoint_hint_boost),
        ] {
            if !boost.is_finite() || boost < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Boost must be a finite, non-negative number, got {}", boost),
                ));
            }
        }
    }

    fn validate_confidence(config: &Config, errors: &mut Vec<ValidationError>) {
        let confidence = &config.confidence;
        for (path, value) in [
            ("confidence.min_relevance", confidence.min_relevance),
            ("confidence.high_confidence", confidence.high_confidence),
            ("confidence.min_score_gap", confidence.min_score_gap),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Threshold must be a finite, non-negative number, got {}", value),
                ));
            }
        }

        if confidence.min_relevance > confidence.high_confidence {
            errors.push(ValidationError::new(
                "confidence.min_relevance",
                format!(
                    "Minimum relevance ({}) cannot exceed the high-confidence floor ({})",
                    confidence.min_relevance, confidence.high_confidence
                ),
            ));
        }

        if confidence.section_window == 0 {
            errors.push(ValidationError::new(
                "confidence.section_window",
                "Section window must be greater than 0",
            ));
        }
    }

    fn validate_fallback(config: &Config, errors: &mut Vec<ValidationError>) {
        let fallback = &config.fallback;
        if fallback.widen_factor == 0 {
            errors.push(ValidationError::new(
                "fallback.widen_factor",
                "Widen factor must be greater than 0",
            ));
        }

        if fallback.multi_doc_per_document == 0 {
            errors.push(ValidationError::new(
                "fallback.multi_doc_per_document",
                "Per-document cap must be at least 1",
            ));
        }

        for (path, weight) in [
            ("fallback.expanded_vector_weight", fallback.expanded_vector_weight),
            ("fallback.expanded_lexical_weight", fallback.expanded_lexical_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be a finite, non-negative number, got {}", weight),
                ));
            }
        }

        if fallback.expanded_vector_weight + fallback.expanded_lexical_weight <= 0.0 {
            errors.push(ValidationError::new(
                "fallback",
                "At least one expanded fusion weight must be positive",
            ));
        }
    }

    fn validate_telemetry(config: &Config, errors: &mut Vec<ValidationError>) {
        let telemetry = &config.telemetry;
        if telemetry.query_max_chars == 0 {
            errors.push(ValidationError::new(
                "telemetry.query_max_chars",
                "Query cap must be greater than 0",
            ));
        }

        if telemetry.channel_capacity == 0 {
            errors.push(ValidationError::new(
                "telemetry.channel_capacity",
                "Channel capacity must be greater than 0",
            ));
        }

        if telemetry.memory_capacity == 0 {
            errors.push(ValidationError::new(
                "telemetry.memory_capacity",
                "Memory capacity must be greater than 0",
            ));
        }
    }

    fn validate_intent(config: &Config, errors: &mut Vec<ValidationError>) {
        if let Err(e) = IntentClassifier::from_rules(&config.intent.rules) {
            errors.push(ValidationError::new("intent.rules", e.to_string()));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        for (path, value) in [
            ("indexing.hnsw_m", indexing.hnsw_m),
            ("indexing.hnsw_ef_construction", indexing.hnsw_ef_construction),
            ("indexing.hnsw_ef_search", indexing.hnsw_ef_search),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(path, "Value must be greater than 0"));
            }
        }

        // tantivy refuses writer budgets below 15MB per thread
        if indexing.lexical_writer_budget_bytes < 15_000_000 {
            errors.push(ValidationError::new(
                "indexing.lexical_writer_budget_bytes",
                "Writer budget must be at least 15000000 bytes",
            ));
        }
    }
}
