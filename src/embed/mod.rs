//! Embedding service contract
//!
//! Embeds text into fixed-dimension vectors. Production inference is
//! fastembed behind the `embeddings` feature; `ResilientEmbedder` layers
//! retry, circuit breaking, caching and timeouts over any backend.

pub mod resilience;

#[cfg(feature = "embeddings")]
pub mod fastembed;

pub use resilience::{EmbeddingPolicy, ResilientEmbedder};

#[cfg(feature = "embeddings")]
pub use fastembed::FastEmbedder;

use crate::cancel::CancellationToken;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from embedding operations.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The upstream cannot serve the request: connection refused, HTTP
    /// failure, or an open circuit breaker.
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    /// Retryable failure (timeout, transient transport error).
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// The model produced a vector of the wrong length. Fatal everywhere.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("operation cancelled")]
    Cancelled,
}

pub type EmbedResult<T> = Result<T, EmbedError>;

/// Trait for embedding backends.
///
/// `dimensions` is a process constant and must agree with the vector index
/// at startup.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed output dimensionality.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str, cancel: &CancellationToken) -> EmbedResult<Vec<f32>>;

    /// Embed a batch, returning one vector per input in order.
    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> EmbedResult<Vec<Vec<f32>>>;
}

/// Deterministic embedder for tests and degraded local runs.
///
/// Derives a stable vector from the text bytes; specific texts can be pinned
/// to chosen vectors so tests can script similarity.
pub struct StaticEmbedder {
    dimensions: usize,
    overrides: HashMap<String, Vec<f32>>,
}

impl StaticEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            overrides: HashMap::new(),
        }
    }

    /// Pin a specific text to a specific vector.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.into(), vector);
        self
    }

    fn derive(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.overrides.get(text) {
            return vector.clone();
        }
        // FNV-style fold seeds a small LCG; stable across runs.
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let mut state = seed;
        let mut vector = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            vector.push(((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0);
        }
        vector
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str, cancel: &CancellationToken) -> EmbedResult<Vec<f32>> {
        if cancel.is_cancelled() {
            return Err(EmbedError::Cancelled);
        }
        Ok(self.derive(text))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> EmbedResult<Vec<Vec<f32>>> {
        if cancel.is_cancelled() {
            return Err(EmbedError::Cancelled);
        }
        Ok(texts.iter().map(|t| self.derive(t)).collect())
    }
}
