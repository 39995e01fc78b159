//! Lattice: GraphRAG knowledge service over developer documentation
//!
//! Answers natural-language questions by embedding the query, searching a
//! vector index of document chunks, enriching hits with property-graph
//! context (concepts, linked documents, cross-repository resolution), and
//! synthesizing an answer grounded only in the retrieved context. The same
//! service ingests markdown into the dual store the query path reads from.
//!
//! # Core Concepts
//!
//! - **Chunk**: a header-delimited span of a document; the unit of
//!   embedding, retrieval and mention extraction
//! - **Concept**: a normalized entity extracted from chunks, shared across
//!   documents by id
//! - **Best-effort**: a step whose failure is logged but never fails the
//!   enclosing operation
//!
//! # Example
//!
//! ```no_run
//! use lattice::{
//!     CancellationToken, GraphRagService, InMemoryVectorIndex, MockLlm, SqliteGraph,
//!     StaticEmbedder,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), lattice::ServiceError> {
//! let service = GraphRagService::new(
//!     Arc::new(SqliteGraph::open_in_memory()?),
//!     Arc::new(InMemoryVectorIndex::new(256)),
//!     Arc::new(StaticEmbedder::new(256)),
//!     Arc::new(MockLlm::with_default("answer")),
//! )?;
//! let result = service
//!     .query("how do I configure retries?", None, &CancellationToken::new())
//!     .await?;
//! println!("{}", result.answer);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod embed;
pub mod error;
pub mod graph;
pub mod ids;
pub mod ingest;
pub mod llm;
pub mod markdown;
pub mod mcp;
pub mod model;
pub mod query;
pub mod resolve;
pub mod service;
pub mod vector;

pub use cancel::CancellationToken;
pub use embed::{Embedder, EmbeddingPolicy, ResilientEmbedder, StaticEmbedder};
pub use error::{ServiceError, ServiceResult};
pub use graph::{GraphRepository, SqliteGraph};
pub use ingest::IngestPipeline;
pub use llm::{
    ChatMessage, EntityExtractor, ExtractedEntity, LlmClient, MockLlm, ModelTier, SubprocessLlm,
};
pub use model::{
    ChunkNode, CodeExampleNode, ConceptNode, DocumentMetadata, DocumentNode, RelationshipType,
    SectionNode,
};
pub use query::{GraphRagOptions, GraphRagResult, QueryPipeline, Source, NO_RESULTS_ANSWER};
pub use resolve::{CrossRepoResolver, ResolvedEntity};
pub use service::GraphRagService;
pub use vector::{InMemoryVectorIndex, MetadataFilter, SearchHit, VectorIndex, VectorRecord};

#[cfg(feature = "embeddings")]
pub use embed::FastEmbedder;
#[cfg(feature = "embeddings")]
pub use vector::SqliteVecIndex;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
