//! Query pipeline
//!
//! One query in: embed → filtered vector search → score threshold → chunk
//! hydration → best-effort graph enrichment (concepts, linked documents,
//! cross-repo resolution) → prompt assembly → synthesis → confidence.
//! Each query is a fresh execution; there is no persistent query state.

use crate::cancel::CancellationToken;
use crate::embed::Embedder;
use crate::error::{ServiceError, ServiceResult};
use crate::graph::{GraphError, GraphRepository};
use crate::llm::{ChatMessage, LlmClient, ModelTier};
use crate::model::ChunkNode;
use crate::resolve::CrossRepoResolver;
use crate::vector::{metadata as vector_metadata, MetadataFilter, SearchHit, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use uuid::Uuid;

/// The literal answer for a query with no hits above the score threshold.
pub const NO_RESULTS_ANSWER: &str = "No relevant documents found for your query.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You answer questions about developer documentation. Ground every statement \
in the provided context; when the context does not contain the information \
needed, say so instead of speculating. Prefer citing specific sources and \
code examples from the context. Be concise.";

/// Per-query options. Unknown JSON fields are ignored; values are clamped
/// before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphRagOptions {
    /// Clamped to `[1, 100]`.
    pub max_chunks: usize,
    /// Reserved; traversal depth beyond 1 is clamped by the graph layer.
    pub max_traversal_steps: usize,
    /// Clamped to `[0.0, 1.0]`.
    pub min_relevance_score: f32,
    pub use_cross_repo_links: bool,
    pub repository_filter: Option<String>,
    pub doc_type_filter: Option<String>,
}

impl Default for GraphRagOptions {
    fn default() -> Self {
        Self {
            max_chunks: 10,
            max_traversal_steps: 5,
            min_relevance_score: 0.7,
            use_cross_repo_links: true,
            repository_filter: None,
            doc_type_filter: None,
        }
    }
}

impl GraphRagOptions {
    /// Clamp option values into their documented ranges.
    pub fn clamped(mut self) -> Self {
        self.max_chunks = self.max_chunks.clamp(1, 100);
        self.min_relevance_score = self.min_relevance_score.clamp(0.0, 1.0);
        self
    }
}

/// One retrieved source backing the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub document_id: String,
    pub chunk_id: String,
    pub repository: String,
    pub file_path: String,
    pub relevance_score: f32,
}

/// The answer with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRagResult {
    pub answer: String,
    pub sources: Vec<Source>,
    pub related_concepts: Vec<String>,
    /// `avg(scores) × min(1, hits / max_chunks)`, in `[0, 1]`.
    pub confidence: f32,
}

/// Coverage-weighted confidence: zero iff there are no scores.
pub(crate) fn confidence(scores: &[f32], max_chunks: usize) -> f32 {
    if scores.is_empty() || max_chunks == 0 {
        return 0.0;
    }
    let avg = scores.iter().sum::<f32>() / scores.len() as f32;
    let coverage = (scores.len() as f32 / max_chunks as f32).min(1.0);
    avg * coverage
}

/// Orchestrates one query end to end.
pub struct QueryPipeline {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphRepository>,
    resolver: CrossRepoResolver,
    llm: Arc<dyn LlmClient>,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphRepository>,
        resolver: CrossRepoResolver,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            graph,
            resolver,
            llm,
        }
    }

    pub async fn query(
        &self,
        query: &str,
        options: GraphRagOptions,
        cancel: &CancellationToken,
    ) -> ServiceResult<GraphRagResult> {
        let options = options.clamped();
        let query_id = Uuid::new_v4();

        // Embedding and search failures are fatal: no partial answers.
        let vector = self
            .embedder
            .embed(query, cancel)
            .await
            .map_err(|e| ServiceError::from(e).normalize_cancellation())?;

        let mut filter = MetadataFilter::new();
        if let Some(repository) = &options.repository_filter {
            filter = filter.with(vector_metadata::REPOSITORY, repository.as_str());
        }
        if let Some(doc_type) = &options.doc_type_filter {
            filter = filter.with(vector_metadata::DOC_TYPE, doc_type.as_str());
        }
        let hits = self
            .vectors
            .search(&vector, options.max_chunks, &filter, cancel)
            .await
            .map_err(|e| ServiceError::from(e).normalize_cancellation())?;

        let filtered: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| hit.score >= options.min_relevance_score)
            .collect();

        if filtered.is_empty() {
            tracing::info!(%query_id, "no hits above relevance threshold");
            return Ok(GraphRagResult {
                answer: NO_RESULTS_ANSWER.to_string(),
                sources: Vec::new(),
                related_concepts: Vec::new(),
                confidence: 0.0,
            });
        }

        let chunk_ids: Vec<String> = filtered.iter().map(|hit| hit.chunk_id.clone()).collect();
        let chunks = self
            .graph
            .get_chunks_by_ids(&chunk_ids, cancel)
            .await
            .map_err(|e| ServiceError::from(e).normalize_cancellation())?;

        let mut related_concepts =
            match self.graph.get_concepts_by_chunk_ids(&chunk_ids, cancel).await {
                Ok(concepts) => concepts.into_iter().map(|c| c.name).collect::<Vec<_>>(),
                Err(GraphError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    tracing::warn!(%query_id, error = %e, "concept enrichment failed");
                    Vec::new()
                }
            };

        if options.use_cross_repo_links {
            self.expand_cross_repo(&query_id, &filtered, &mut related_concepts, cancel)
                .await?;
        }

        let user_message = build_user_message(query, &filtered, &chunks);
        let answer = self
            .llm
            .generate(
                SYNTHESIS_SYSTEM_PROMPT,
                &[ChatMessage::user(user_message)],
                ModelTier::Mid,
                cancel,
            )
            .await
            .map_err(|e| ServiceError::from(e).normalize_cancellation())?;

        let scores: Vec<f32> = filtered.iter().map(|hit| hit.score).collect();
        let confidence = confidence(&scores, options.max_chunks);

        let sources = filtered
            .iter()
            .map(|hit| Source {
                document_id: hit
                    .metadata
                    .get(vector_metadata::DOCUMENT_ID)
                    .cloned()
                    .unwrap_or_else(|| hit.chunk_id.clone()),
                chunk_id: hit.chunk_id.clone(),
                repository: hit
                    .metadata
                    .get(vector_metadata::REPOSITORY)
                    .cloned()
                    .unwrap_or_default(),
                file_path: hit
                    .metadata
                    .get(vector_metadata::FILE_PATH)
                    .cloned()
                    .unwrap_or_default(),
                relevance_score: hit.score,
            })
            .collect();

        tracing::info!(
            %query_id,
            sources = filtered.len(),
            related_concepts = related_concepts.len(),
            confidence,
            "query answered"
        );

        Ok(GraphRagResult {
            answer,
            sources,
            related_concepts,
            confidence,
        })
    }

    /// Linked-document pre-warming plus cross-repo concept expansion.
    /// Failures are warned per item and swallowed.
    async fn expand_cross_repo(
        &self,
        query_id: &Uuid,
        filtered: &[SearchHit],
        related_concepts: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        let mut document_ids = Vec::new();
        let mut seen_documents = HashSet::new();
        let mut result_repositories = HashSet::new();
        for hit in filtered {
            if let Some(document_id) = hit.metadata.get(vector_metadata::DOCUMENT_ID) {
                if seen_documents.insert(document_id.clone()) {
                    document_ids.push(document_id.clone());
                }
            }
            if let Some(repository) = hit.metadata.get(vector_metadata::REPOSITORY) {
                result_repositories.insert(repository.clone());
            }
        }

        // The traversal itself is the point here (cache warming and
        // observability); the linked documents are not surfaced.
        for document_id in &document_ids {
            match self.graph.get_linked_documents(document_id, cancel).await {
                Ok(linked) => {
                    tracing::debug!(%query_id, document_id = %document_id, linked = linked.len(), "linked documents traversed");
                }
                Err(GraphError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    tracing::warn!(%query_id, document_id = %document_id, error = %e, "linked document traversal failed");
                }
            }
        }

        // Iterate a snapshot: names appended below must not be re-resolved.
        let snapshot = related_concepts.clone();
        for name in &snapshot {
            match self.resolver.resolve(name, cancel).await {
                Ok(Some(entity)) => {
                    if !result_repositories.contains(&entity.repository) {
                        for related_name in entity.related_concept_names {
                            if !related_concepts.contains(&related_name) {
                                related_concepts.push(related_name);
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(GraphError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    tracing::warn!(%query_id, concept = %name, error = %e, "cross-repo resolution failed");
                }
            }
        }
        Ok(())
    }
}

/// The query followed by a `## Context` block: one `### Source:` heading per
/// hydrated chunk. Hits the graph no longer knows are omitted.
fn build_user_message(query: &str, filtered: &[SearchHit], chunks: &[ChunkNode]) -> String {
    let by_id: HashMap<&str, &ChunkNode> =
        chunks.iter().map(|chunk| (chunk.id.as_str(), chunk)).collect();

    let mut message = String::with_capacity(query.len() + 256);
    message.push_str(query);
    message.push_str("\n\n## Context\n\n");
    for hit in filtered {
        let Some(chunk) = by_id.get(hit.chunk_id.as_str()) else {
            continue;
        };
        let file_path = hit
            .metadata
            .get(vector_metadata::FILE_PATH)
            .map(String::as_str)
            .unwrap_or("unknown");
        let _ = writeln!(
            message,
            "### Source: {} (relevance: {:.2})\n{}\n",
            file_path, hit.score, chunk.content
        );
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_clamp_into_range() {
        let options = GraphRagOptions {
            max_chunks: 0,
            min_relevance_score: -0.5,
            ..GraphRagOptions::default()
        }
        .clamped();
        assert_eq!(options.max_chunks, 1);
        assert_eq!(options.min_relevance_score, 0.0);

        let options = GraphRagOptions {
            max_chunks: 500,
            min_relevance_score: 1.7,
            ..GraphRagOptions::default()
        }
        .clamped();
        assert_eq!(options.max_chunks, 100);
        assert_eq!(options.min_relevance_score, 1.0);
    }

    #[test]
    fn options_json_defaults_and_unknown_fields() {
        let options: GraphRagOptions =
            serde_json::from_str(r#"{"max_chunks": 5, "some_future_field": true}"#).unwrap();
        assert_eq!(options.max_chunks, 5);
        assert_eq!(options.min_relevance_score, 0.7);
        assert!(options.use_cross_repo_links);
    }

    #[test]
    fn confidence_bounds() {
        assert_eq!(confidence(&[], 10), 0.0);
        // Full coverage: confidence equals the average.
        let full: Vec<f32> = vec![0.8; 10];
        assert!((confidence(&full, 10) - 0.8).abs() < 1e-6);
        // Partial coverage scales the average down.
        let partial = vec![0.9, 0.7];
        let expected = 0.8 * (2.0 / 10.0);
        assert!((confidence(&partial, 10) - expected).abs() < 1e-6);
        // Never exceeds the average.
        assert!(confidence(&partial, 10) <= 0.8);
    }

    #[test]
    fn user_message_format() {
        let mut metadata = HashMap::new();
        metadata.insert("file_path".to_string(), "docs/a.md".to_string());
        let hit = SearchHit {
            chunk_id: "r:a.md:chunk-0".to_string(),
            score: 0.825,
            metadata,
        };
        let chunk = ChunkNode {
            id: "r:a.md:chunk-0".to_string(),
            section_id: "s".to_string(),
            document_id: "r:a.md".to_string(),
            content: "chunk body".to_string(),
            order: 0,
            token_count: 2,
        };

        let message = build_user_message("what is this?", &[hit], &[chunk]);
        assert!(message.starts_with("what is this?\n\n## Context\n\n"));
        assert!(message.contains("### Source: docs/a.md (relevance: 0.82)\nchunk body\n"));
    }

    #[test]
    fn user_message_omits_unhydrated_chunks() {
        let hit = SearchHit {
            chunk_id: "missing".to_string(),
            score: 0.9,
            metadata: HashMap::new(),
        };
        let message = build_user_message("q", &[hit], &[]);
        assert!(!message.contains("### Source"));
    }
}
