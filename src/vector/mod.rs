//! Vector index contract
//!
//! One collection of `(chunk_id, vector, metadata)` records with k-NN search
//! and equality filters over metadata. The dimension is fixed at
//! configuration time; every write and search asserts it.

pub mod memory;
#[cfg(feature = "embeddings")]
pub mod sqlite_vec;

pub use memory::InMemoryVectorIndex;
#[cfg(feature = "embeddings")]
pub use sqlite_vec::SqliteVecIndex;

use crate::cancel::CancellationToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Well-known metadata keys written by ingestion and filtered on by queries.
pub mod metadata {
    pub const DOCUMENT_ID: &str = "document_id";
    pub const SECTION_ID: &str = "section_id";
    pub const CHUNK_ID: &str = "chunk_id";
    pub const FILE_PATH: &str = "file_path";
    pub const REPOSITORY: &str = "repository";
    pub const HEADER_PATH: &str = "header_path";
    pub const DOC_TYPE: &str = "doc_type";
}

/// Errors from vector index operations.
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store error: {0}")]
    Store(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type VectorResult<T> = Result<T, VectorError>;

/// One indexed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

/// One search result, sorted by score descending.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

/// Equality predicates over record metadata, logically ANDed.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    clauses: Vec<(String, String)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(String, String)] {
        &self.clauses
    }

    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        self.clauses
            .iter()
            .all(|(key, value)| metadata.get(key).map_or(false, |v| v == value))
    }
}

/// Trait for vector index backends.
///
/// Implementations must be thread-safe and must fail with
/// `DimensionMismatch` when a caller passes a vector of the wrong length.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The fixed dimensionality of this index.
    fn dimensions(&self) -> usize;

    /// Insert or replace one record.
    async fn index(&self, record: VectorRecord, cancel: &CancellationToken) -> VectorResult<()>;

    /// Insert or replace many records; equivalent to N `index` calls.
    async fn index_batch(
        &self,
        records: Vec<VectorRecord>,
        cancel: &CancellationToken,
    ) -> VectorResult<()>;

    /// Remove every record whose metadata `document_id` matches.
    async fn delete_document(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> VectorResult<()>;

    /// k-NN search. `top_k` is an upper bound; results are sorted by score
    /// descending with ties broken deterministically.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
        cancel: &CancellationToken,
    ) -> VectorResult<Vec<SearchHit>>;
}

/// Assert a vector has the configured dimensionality.
pub(crate) fn check_dimensions(expected: usize, actual: usize) -> VectorResult<()> {
    if expected != actual {
        return Err(VectorError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Cosine similarity between two vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
