//! Graph repository contract
//!
//! Upserts for the five node kinds, typed directed edges, and the traversals
//! the query pipeline needs. All writes are idempotent upserts; all
//! operations accept a cancellation token.

pub mod sqlite;

pub use sqlite::SqliteGraph;

use crate::cancel::CancellationToken;
use crate::model::{
    ChunkNode, CodeExampleNode, ConceptNode, DocumentNode, RelationshipType, SectionNode,
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors from graph repository operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Trait for property-graph backends.
///
/// Implementations must be thread-safe (Send + Sync). Long-running
/// traversals must honor the cancellation token.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    // === Upserts ===

    async fn upsert_document(
        &self,
        document: &DocumentNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()>;

    /// Upsert a section; also creates the `HAS_SECTION` edge from its
    /// document.
    async fn upsert_section(
        &self,
        section: &SectionNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()>;

    async fn upsert_chunk(&self, chunk: &ChunkNode, cancel: &CancellationToken)
        -> GraphResult<()>;

    async fn upsert_concept(
        &self,
        concept: &ConceptNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()>;

    /// Upsert a code example; also creates the `HAS_CODE_EXAMPLE` edge from
    /// its parent chunk.
    async fn upsert_code_example(
        &self,
        example: &CodeExampleNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()>;

    /// Create a directed edge if not present.
    async fn create_relationship(
        &self,
        relationship: RelationshipType,
        source_id: &str,
        target_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<()>;

    // === Traversals ===

    /// Returns only chunks that exist, in caller-supplied order.
    async fn get_chunks_by_ids(
        &self,
        chunk_ids: &[String],
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ChunkNode>>;

    /// Concepts mentioned by any of the chunks, deduplicated by concept id.
    async fn get_concepts_by_chunk_ids(
        &self,
        chunk_ids: &[String],
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>>;

    /// Outgoing `LINKS_TO` targets that exist as documents.
    async fn get_linked_documents(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<DocumentNode>>;

    /// Case-insensitive match against concept names and aliases, ordered by
    /// concept id.
    async fn find_concepts_by_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>>;

    /// Concepts sharing a mentioning chunk with the given concept. Depth
    /// beyond 1 is clamped to 1; depth 0 yields nothing.
    async fn get_related_concepts(
        &self,
        concept_id: &str,
        depth: usize,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>>;

    /// Chunks with a `MENTIONS` edge to the concept, in document order.
    async fn get_chunks_by_concept(
        &self,
        concept_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ChunkNode>>;

    /// Remove the document, its sections, its chunks, and all edges incident
    /// on any of them. Shared concepts and orphaned code examples remain.
    async fn delete_document_cascade(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<()>;
}
