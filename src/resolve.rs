//! Cross-repository entity resolution
//!
//! Given a concept name, finds the matching concept and its neighborhood in
//! whatever repository mentions it. The two graph reads (related concepts,
//! mentioning chunks) run in parallel and join.

use crate::cancel::CancellationToken;
use crate::graph::{GraphRepository, GraphResult};
use serde::Serialize;
use std::sync::Arc;

/// A concept resolved to its home repository with its 1-hop neighborhood.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEntity {
    pub concept_id: String,
    pub name: String,
    /// Parsed from the first mentioning chunk's document id, up to the first
    /// `:`; empty when no chunk mentions the concept.
    pub repository: String,
    pub related_concept_ids: Vec<String>,
    pub related_concept_names: Vec<String>,
}

/// Resolves concept names across repositories.
pub struct CrossRepoResolver {
    graph: Arc<dyn GraphRepository>,
}

impl CrossRepoResolver {
    pub fn new(graph: Arc<dyn GraphRepository>) -> Self {
        Self { graph }
    }

    /// Resolve a concept name. Returns `None` when no concept matches.
    ///
    /// When several concepts share a case-insensitive name, the repository
    /// layer orders matches by concept id and the first is taken.
    pub async fn resolve(
        &self,
        concept_name: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Option<ResolvedEntity>> {
        let matches = self.graph.find_concepts_by_name(concept_name, cancel).await?;
        let Some(concept) = matches.into_iter().next() else {
            return Ok(None);
        };

        let (related, chunks) = tokio::join!(
            self.graph.get_related_concepts(&concept.id, 1, cancel),
            self.graph.get_chunks_by_concept(&concept.id, cancel),
        );
        let related = related?;
        let chunks = chunks?;

        let repository = chunks
            .first()
            .and_then(|chunk| {
                chunk
                    .document_id
                    .find(':')
                    .map(|i| chunk.document_id[..i].to_string())
            })
            .unwrap_or_default();

        Ok(Some(ResolvedEntity {
            concept_id: concept.id,
            name: concept.name,
            repository,
            related_concept_ids: related.iter().map(|c| c.id.clone()).collect(),
            related_concept_names: related.into_iter().map(|c| c.name).collect(),
        }))
    }
}
