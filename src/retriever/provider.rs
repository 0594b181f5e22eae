//! Embedding provider trait and FastEmbed implementation

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    Initialization(String),

    #[error("Embedding generation failed: {0}")]
    Generation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Turns text into dense vectors for the vector retriever.
///
/// Calls are blocking; async callers should run them on a blocking thread.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single query or passage
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed passages in order; output length equals input length
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Models accepted by name: (config name, fastembed model, dimension)
const SUPPORTED_MODELS: &[(&str, EmbeddingModel, usize)] = &[
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768),
];

/// Names accepted by [`FastEmbedProvider::new`]
pub fn supported_models() -> impl Iterator<Item = &'static str> {
    SUPPORTED_MODELS.iter().map(|(name, _, _)| *name)
}

/// Local ONNX embedding via FastEmbed.
///
/// Models are downloaded to the FastEmbed cache on first use.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
    batch_size: usize,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str, batch_size: usize) -> Result<Self, EmbeddingError> {
        let (name, model, dimension) = SUPPORTED_MODELS
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(model_name))
            .cloned()
            .ok_or_else(|| {
                EmbeddingError::Initialization(format!(
                    "Unsupported model: {}. Supported: {}",
                    model_name,
                    supported_models().collect::<Vec<_>>().join(", ")
                ))
            })?;

        tracing::info!(model = name, dimension, "Initializing embedding model");

        let init_options = InitOptions::new(model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::Initialization(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: name.to_string(),
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), EmbeddingError> {
        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let embedding = self
            .model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Generation("No embedding generated".to_string()))?;

        self.check_dimension(&embedding)?;
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Empty text at position {}",
                pos
            )));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::Generation(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        for embedding in &embeddings {
            self.check_dimension(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
