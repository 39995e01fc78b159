//! Service-level error taxonomy
//!
//! Fatal errors are never converted into silent empty results; best-effort
//! enrichment failures are logged at warn level by the pipelines and
//! swallowed there, not here.

use crate::embed::EmbedError;
use crate::graph::GraphError;
use crate::llm::LlmError;
use crate::vector::VectorError;
use thiserror::Error;

/// Errors surfaced by the service entry points.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Caller-supplied bad argument (empty query, bad promotion level).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Document, chunk or concept missing during a direct lookup.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Embedder and vector index disagree on dimensionality at startup.
    #[error("dimension mismatch: embedder produces {embedder}, index expects {index}")]
    DimensionMismatch { embedder: usize, index: usize },

    #[error("operation cancelled")]
    Cancelled,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Collapse adapter-level cancellation into the service-level kind so
    /// callers match on one variant.
    pub fn normalize_cancellation(self) -> Self {
        match self {
            ServiceError::Graph(GraphError::Cancelled)
            | ServiceError::Vector(VectorError::Cancelled)
            | ServiceError::Embedding(EmbedError::Cancelled)
            | ServiceError::Llm(LlmError::Cancelled) => ServiceError::Cancelled,
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Cancelled)
    }
}
