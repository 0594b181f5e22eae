use std::path::PathBuf;
use thiserror::Error;

/// Main error type for docfuse
#[derive(Error, Debug)]
pub enum DocfuseError {
    /// Query was empty after normalization
    #[error("Query cannot be empty")]
    EmptyQuery,

    /// Request carried no organization scope
    #[error("Missing organization scope")]
    MissingScope,

    /// Scope was present but unusable
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Corpus file is malformed or violates chunk invariants
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// Local index build failures
    #[error("Index error: {0}")]
    Index(String),

    /// Embedding model failures outside the query path
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DocfuseError {
    /// Errors caused by the caller's request rather than the backends.
    /// These must not be retried automatically.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DocfuseError::EmptyQuery | DocfuseError::MissingScope | DocfuseError::InvalidScope(_)
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for docfuse operations
pub type Result<T> = std::result::Result<T, DocfuseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_error_classification() {
        assert!(DocfuseError::EmptyQuery.is_caller_error());
        assert!(DocfuseError::MissingScope.is_caller_error());
        assert!(DocfuseError::InvalidScope("no datasets".to_string()).is_caller_error());
        assert!(!DocfuseError::Config("bad".to_string()).is_caller_error());
        assert!(!DocfuseError::Index("broken".to_string()).is_caller_error());
    }
}
