//! Production embedder backed by fastembed (ONNX Runtime)
//!
//! Wraps `fastembed::TextEmbedding` in a `Mutex` because its `embed` method
//! requires `&mut self`, while the `Embedder` trait uses `&self`.

use super::{EmbedError, EmbedResult, Embedder};
use crate::cancel::CancellationToken;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

/// Default embedding dimensions (nomic-embed-text-v1.5 produces 768-dim
/// vectors).
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;

/// Local ONNX embedder.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    dimensions: usize,
}

impl FastEmbedder {
    /// Create an embedder with a specific model and its dimensionality.
    pub fn new(model: EmbeddingModel, dimensions: usize) -> EmbedResult<Self> {
        let options = InitOptions::new(model).with_show_download_progress(false);
        let embedding = TextEmbedding::try_new(options)
            .map_err(|e| EmbedError::Unavailable(format!("model load failed: {}", e)))?;
        Ok(Self {
            model: Mutex::new(embedding),
            dimensions,
        })
    }

    /// Create an embedder with the default model (nomic-embed-text-v1.5).
    pub fn default_model() -> EmbedResult<Self> {
        Self::new(EmbeddingModel::NomicEmbedTextV15, DEFAULT_EMBEDDING_DIMENSIONS)
    }

    fn run(&self, texts: Vec<&str>) -> EmbedResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self.model.lock().unwrap();
        let vectors = model
            .embed(texts, None)
            .map_err(|e| EmbedError::Transient(format!("inference failed: {}", e)))?;
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str, cancel: &CancellationToken) -> EmbedResult<Vec<f32>> {
        if cancel.is_cancelled() {
            return Err(EmbedError::Cancelled);
        }
        let mut vectors = self.run(vec![text])?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Transient("model returned no vectors".to_string()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> EmbedResult<Vec<Vec<f32>>> {
        if cancel.is_cancelled() {
            return Err(EmbedError::Cancelled);
        }
        self.run(texts.iter().map(|t| t.as_str()).collect())
    }
}
