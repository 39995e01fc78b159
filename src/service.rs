//! Service composition root
//!
//! Owns the adapters behind their capability traits, checks embedder/index
//! dimension agreement at construction, validates caller input, and exposes
//! the three entry points: ingest, delete, query.

use crate::cancel::CancellationToken;
use crate::embed::Embedder;
use crate::error::{ServiceError, ServiceResult};
use crate::graph::GraphRepository;
use crate::ingest::IngestPipeline;
use crate::llm::{EntityExtractor, LlmClient};
use crate::model::{DocumentMetadata, PROMOTION_LEVELS};
use crate::query::{GraphRagOptions, GraphRagResult, QueryPipeline};
use crate::resolve::CrossRepoResolver;
use crate::vector::VectorIndex;
use std::sync::Arc;

/// The GraphRAG knowledge service.
pub struct GraphRagService {
    ingest: IngestPipeline,
    query: QueryPipeline,
    query_defaults: GraphRagOptions,
}

impl std::fmt::Debug for GraphRagService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRagService").finish_non_exhaustive()
    }
}

impl GraphRagService {
    /// Wire the service. Fails when the embedder and the vector index
    /// disagree on dimensionality.
    pub fn new(
        graph: Arc<dyn GraphRepository>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> ServiceResult<Self> {
        if embedder.dimensions() != vectors.dimensions() {
            return Err(ServiceError::DimensionMismatch {
                embedder: embedder.dimensions(),
                index: vectors.dimensions(),
            });
        }

        let extractor = EntityExtractor::new(llm.clone());
        let resolver = CrossRepoResolver::new(graph.clone());
        let ingest = IngestPipeline::new(
            graph.clone(),
            vectors.clone(),
            embedder.clone(),
            extractor,
        );
        let query = QueryPipeline::new(embedder, vectors, graph, resolver, llm);

        Ok(Self {
            ingest,
            query,
            query_defaults: GraphRagOptions::default(),
        })
    }

    /// Override the configuration-level query defaults. Per-request options
    /// still win over these.
    pub fn with_query_defaults(mut self, defaults: GraphRagOptions) -> Self {
        self.query_defaults = defaults;
        self
    }

    /// Configuration-level query defaults.
    pub fn query_defaults(&self) -> &GraphRagOptions {
        &self.query_defaults
    }

    /// Ingest one markdown document into the graph and vector stores.
    pub async fn ingest(
        &self,
        content: &[u8],
        metadata: DocumentMetadata,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        let content = std::str::from_utf8(content)
            .map_err(|_| ServiceError::InvalidInput("document content is not valid UTF-8".into()))?;
        validate_metadata(&metadata)?;
        self.ingest.ingest(content, &metadata, cancel).await
    }

    /// Delete a document, its vectors, and its owned graph nodes.
    pub async fn delete(&self, document_id: &str, cancel: &CancellationToken) -> ServiceResult<()> {
        if document_id.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "document_id must not be empty".into(),
            ));
        }
        self.ingest.delete(document_id, cancel).await
    }

    /// Answer a natural-language question grounded in retrieved context.
    pub async fn query(
        &self,
        query: &str,
        options: Option<GraphRagOptions>,
        cancel: &CancellationToken,
    ) -> ServiceResult<GraphRagResult> {
        if query.trim().is_empty() {
            return Err(ServiceError::InvalidInput("query must not be empty".into()));
        }
        let options = options.unwrap_or_else(|| self.query_defaults.clone());
        self.query.query(query, options, cancel).await
    }
}

fn validate_metadata(metadata: &DocumentMetadata) -> ServiceResult<()> {
    if metadata.document_id.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "document_id must not be empty".into(),
        ));
    }
    if metadata.repository.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "repository must not be empty".into(),
        ));
    }
    if metadata.file_path.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "file_path must not be empty".into(),
        ));
    }
    if !PROMOTION_LEVELS.contains(&metadata.promotion_level.as_str()) {
        return Err(ServiceError::InvalidInput(format!(
            "unknown promotion level '{}', expected one of {:?}",
            metadata.promotion_level, PROMOTION_LEVELS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::StaticEmbedder;
    use crate::graph::SqliteGraph;
    use crate::llm::MockLlm;
    use crate::vector::InMemoryVectorIndex;

    fn service_with_dimensions(embedder_dims: usize, index_dims: usize) -> ServiceResult<GraphRagService> {
        GraphRagService::new(
            Arc::new(SqliteGraph::open_in_memory().unwrap()),
            Arc::new(InMemoryVectorIndex::new(index_dims)),
            Arc::new(StaticEmbedder::new(embedder_dims)),
            Arc::new(MockLlm::with_default("ok")),
        )
    }

    #[test]
    fn dimension_agreement_is_checked_at_startup() {
        assert!(service_with_dimensions(8, 8).is_ok());
        let err = service_with_dimensions(8, 16).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::DimensionMismatch { embedder: 8, index: 16 }
        ));
    }

    #[tokio::test]
    async fn empty_query_is_invalid_input() {
        let service = service_with_dimensions(4, 4).unwrap();
        let cancel = CancellationToken::new();
        let err = service.query("   ", None, &cancel).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn bad_metadata_is_rejected_before_io() {
        let service = service_with_dimensions(4, 4).unwrap();
        let cancel = CancellationToken::new();

        let metadata = DocumentMetadata::new("", "r", "a.md", "T");
        let err = service
            .ingest(b"body", metadata, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let metadata =
            DocumentMetadata::new("r:a.md", "r", "a.md", "T").with_promotion_level("golden");
        let err = service
            .ingest(b"body", metadata, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn non_utf8_content_is_invalid_input() {
        let service = service_with_dimensions(4, 4).unwrap();
        let cancel = CancellationToken::new();
        let metadata = DocumentMetadata::new("r:a.md", "r", "a.md", "T");
        let err = service
            .ingest(&[0xff, 0xfe, 0x00], metadata, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_delete_is_invalid_input() {
        let service = service_with_dimensions(4, 4).unwrap();
        let cancel = CancellationToken::new();
        let err = service.delete("", &cancel).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
