//! Ingestion pipeline
//!
//! One document in: parse, chunk, persist graph nodes and edges, embed,
//! index, extract entities, record code examples, resolve internal links.
//! Document and section writes are fatal on failure; everything per-chunk is
//! best-effort and independent, so one failing sub-step never blocks the
//! others or subsequent chunks.

use crate::cancel::CancellationToken;
use crate::embed::{EmbedError, Embedder};
use crate::error::{ServiceError, ServiceResult};
use crate::graph::{GraphError, GraphRepository};
use crate::ids;
use crate::llm::{EntityExtractor, LlmError};
use crate::markdown::{
    chunk_by_headers, extract_code_blocks, extract_headers, extract_links, resolve_relative,
    split_frontmatter, Header,
};
use crate::model::{
    estimate_tokens, ChunkNode, CodeExampleNode, ConceptNode, DocumentNode, DocumentMetadata,
    RelationshipType, SectionNode,
};
use crate::vector::{metadata as vector_metadata, VectorError, VectorIndex, VectorRecord};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// The document's section list plus the H2 lines used to assign chunks.
struct SectionPlan {
    sections: Vec<SectionNode>,
    has_intro: bool,
    /// Body line of each H2, parallel to the non-intro sections.
    h2_lines: Vec<usize>,
}

impl SectionPlan {
    /// Index into `sections` for a chunk starting at `line`: the last H2 at
    /// or before it, else the intro (or first) section.
    fn section_index_for_line(&self, line: usize) -> usize {
        let offset = if self.has_intro { 1 } else { 0 };
        let mut index = None;
        for (i, h2_line) in self.h2_lines.iter().enumerate() {
            if *h2_line <= line {
                index = Some(offset + i);
            } else {
                break;
            }
        }
        index.unwrap_or(0)
    }
}

/// Build the section list: an "Introduction" section iff there is
/// non-whitespace content before the first header and no H2 starts at line
/// 0, then one section per H2 in document order. A document whose chunks
/// would otherwise have no section gets the intro anyway.
fn plan_sections(body: &str, headers: &[Header], document_id: &str) -> SectionPlan {
    let h2s: Vec<&Header> = headers.iter().filter(|h| h.level == 2).collect();

    let pre_header_content = match headers.first() {
        Some(first) => body
            .lines()
            .take(first.line)
            .any(|line| !line.trim().is_empty()),
        None => !body.trim().is_empty(),
    };
    let h2_at_line_zero = h2s.iter().any(|h| h.line == 0);
    let mut has_intro = pre_header_content && !h2_at_line_zero;
    if !has_intro && h2s.is_empty() {
        // Chunks must always land in a section.
        has_intro = true;
    }

    let mut sections = Vec::with_capacity(h2s.len() + 1);
    let mut order = 0;
    if has_intro {
        sections.push(SectionNode {
            id: ids::section_id(document_id, "Introduction"),
            document_id: document_id.to_string(),
            title: "Introduction".to_string(),
            order,
            heading_level: 2,
        });
        order += 1;
    }
    for h2 in &h2s {
        sections.push(SectionNode {
            id: ids::section_id(document_id, &h2.text),
            document_id: document_id.to_string(),
            title: h2.text.clone(),
            order,
            heading_level: 2,
        });
        order += 1;
    }

    SectionPlan {
        sections,
        has_intro,
        h2_lines: h2s.iter().map(|h| h.line).collect(),
    }
}

/// Orchestrates one document through parse → graph → embed → index →
/// extract → link resolution.
pub struct IngestPipeline {
    graph: Arc<dyn GraphRepository>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: EntityExtractor,
}

impl IngestPipeline {
    pub fn new(
        graph: Arc<dyn GraphRepository>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        extractor: EntityExtractor,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedder,
            extractor,
        }
    }

    /// Ingest one markdown document.
    pub async fn ingest(
        &self,
        content: &str,
        metadata: &DocumentMetadata,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        let ingest_id = Uuid::new_v4();
        let document_id = metadata.document_id.as_str();

        let (body, frontmatter) = split_frontmatter(content);
        let headers = extract_headers(body);
        let links = extract_links(body);
        let chunks = chunk_by_headers(body);

        if chunks.is_empty() {
            tracing::info!(%ingest_id, document_id, "document produced no chunks, nothing to write");
            return Ok(());
        }

        let plan = plan_sections(body, &headers, document_id);

        // Frontmatter can fill metadata gaps but never overrides it.
        let title = if metadata.title.is_empty() {
            frontmatter
                .as_ref()
                .and_then(|fm| fm.get("title"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        } else {
            metadata.title.clone()
        };
        let doc_type = metadata.doc_type.clone().or_else(|| {
            frontmatter
                .as_ref()
                .and_then(|fm| fm.get("doc_type"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

        let now = Utc::now();
        let document = DocumentNode {
            id: document_id.to_string(),
            file_path: metadata.file_path.clone(),
            title,
            doc_type: doc_type.clone(),
            promotion_level: metadata.promotion_level.clone(),
            commit_hash: metadata.commit_hash.clone(),
            created_at: now,
            updated_at: now,
        };

        // Document write failures are fatal; nothing else may proceed.
        self.graph
            .upsert_document(&document, cancel)
            .await
            .map_err(fatal)?;

        // Section write failures abort cleanly so no chunk dangles.
        for section in &plan.sections {
            self.graph
                .upsert_section(section, cancel)
                .await
                .map_err(fatal)?;
        }

        let mut indexed_total = 0usize;
        let mut entities_total = 0usize;
        let mut code_total = 0usize;

        for chunk in &chunks {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }

            let section = &plan.sections[plan.section_index_for_line(chunk.start_line)];
            let chunk_node = ChunkNode {
                id: format!("{}:chunk-{}", document_id, chunk.index),
                section_id: section.id.clone(),
                document_id: document_id.to_string(),
                content: chunk.content.clone(),
                order: chunk.index,
                token_count: estimate_tokens(&chunk.content),
            };

            match self.graph.upsert_chunk(&chunk_node, cancel).await {
                Ok(()) => {}
                Err(GraphError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    tracing::warn!(%ingest_id, chunk_id = %chunk_node.id, error = %e, "chunk write failed, skipping chunk");
                    continue;
                }
            }
            match self
                .graph
                .create_relationship(RelationshipType::HasChunk, &section.id, &chunk_node.id, cancel)
                .await
            {
                Ok(()) => {}
                Err(GraphError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    tracing::warn!(%ingest_id, chunk_id = %chunk_node.id, error = %e, "chunk edge write failed");
                }
            }

            let vector = match self.embedder.embed(&chunk.content, cancel).await {
                Ok(vector) => Some(vector),
                Err(EmbedError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    tracing::warn!(%ingest_id, chunk_id = %chunk_node.id, error = %e, "embedding failed, chunk will not be searchable");
                    None
                }
            };
            let embedded = vector.is_some();

            let mut indexed = false;
            if let Some(vector) = vector {
                let mut record_metadata = HashMap::new();
                record_metadata.insert(
                    vector_metadata::DOCUMENT_ID.to_string(),
                    document_id.to_string(),
                );
                record_metadata.insert(
                    vector_metadata::SECTION_ID.to_string(),
                    section.id.clone(),
                );
                record_metadata.insert(
                    vector_metadata::CHUNK_ID.to_string(),
                    chunk_node.id.clone(),
                );
                record_metadata.insert(
                    vector_metadata::FILE_PATH.to_string(),
                    metadata.file_path.clone(),
                );
                record_metadata.insert(
                    vector_metadata::REPOSITORY.to_string(),
                    metadata.repository.clone(),
                );
                record_metadata.insert(
                    vector_metadata::HEADER_PATH.to_string(),
                    chunk.header_path.clone(),
                );
                if let Some(dt) = &doc_type {
                    record_metadata.insert(vector_metadata::DOC_TYPE.to_string(), dt.clone());
                }

                let record = VectorRecord {
                    chunk_id: chunk_node.id.clone(),
                    vector,
                    metadata: record_metadata,
                };
                match self.vectors.index(record, cancel).await {
                    Ok(()) => {
                        indexed = true;
                        indexed_total += 1;
                    }
                    Err(VectorError::Cancelled) => return Err(ServiceError::Cancelled),
                    Err(e) => {
                        tracing::warn!(%ingest_id, chunk_id = %chunk_node.id, error = %e, "vector index write failed");
                    }
                }
            }

            let mut entity_count = 0usize;
            match self.extractor.extract(&chunk.content, cancel).await {
                Ok(entities) => {
                    for entity in entities {
                        let concept_id = ids::concept_id(&entity.name);
                        if concept_id == "concept:" {
                            continue;
                        }
                        let concept = ConceptNode {
                            id: concept_id.clone(),
                            name: entity.name,
                            description: entity.description,
                            category: entity.entity_type,
                            aliases: entity.aliases,
                        };
                        let written = match self.graph.upsert_concept(&concept, cancel).await {
                            Ok(()) => self
                                .graph
                                .create_relationship(
                                    RelationshipType::Mentions,
                                    &chunk_node.id,
                                    &concept_id,
                                    cancel,
                                )
                                .await,
                            Err(e) => Err(e),
                        };
                        match written {
                            Ok(()) => entity_count += 1,
                            Err(GraphError::Cancelled) => return Err(ServiceError::Cancelled),
                            Err(e) => {
                                tracing::warn!(%ingest_id, concept_id = %concept_id, error = %e, "concept write failed");
                            }
                        }
                    }
                }
                Err(LlmError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    tracing::warn!(%ingest_id, chunk_id = %chunk_node.id, error = %e, "entity extraction failed");
                }
            }
            entities_total += entity_count;

            let mut code_count = 0usize;
            for (i, block) in extract_code_blocks(&chunk.content).iter().enumerate() {
                let example = CodeExampleNode {
                    id: format!("{}:code-{}", chunk_node.id, i),
                    chunk_id: chunk_node.id.clone(),
                    language: block.language.clone(),
                    code: block.code.clone(),
                };
                match self.graph.upsert_code_example(&example, cancel).await {
                    Ok(()) => code_count += 1,
                    Err(GraphError::Cancelled) => return Err(ServiceError::Cancelled),
                    Err(e) => {
                        tracing::warn!(%ingest_id, example_id = %example.id, error = %e, "code example write failed");
                    }
                }
            }
            code_total += code_count;

            tracing::info!(
                %ingest_id,
                chunk_id = %chunk_node.id,
                embedded,
                indexed,
                entities = entity_count,
                code_examples = code_count,
                "chunk processed"
            );
        }

        // Internal links become forward-referencing LINKS_TO edges; the
        // target document may not exist yet.
        let mut link_count = 0usize;
        for link in &links {
            let Some(path) = resolve_relative(&metadata.file_path, &link.url) else {
                continue;
            };
            let target_id = format!("{}:{}", metadata.repository.to_lowercase(), path);
            match self
                .graph
                .create_relationship(RelationshipType::LinksTo, document_id, &target_id, cancel)
                .await
            {
                Ok(()) => link_count += 1,
                Err(GraphError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    tracing::warn!(%ingest_id, target_id = %target_id, error = %e, "link edge write failed");
                }
            }
        }

        tracing::info!(
            %ingest_id,
            document_id,
            sections = plan.sections.len(),
            chunks = chunks.len(),
            indexed = indexed_total,
            entities = entities_total,
            code_examples = code_total,
            links = link_count,
            "document ingested"
        );
        Ok(())
    }

    /// Delete a document: vectors first, then the graph cascade. The first
    /// failure surfaces; the other side may stay stale until a retry.
    pub async fn delete(&self, document_id: &str, cancel: &CancellationToken) -> ServiceResult<()> {
        self.vectors
            .delete_document(document_id, cancel)
            .await
            .map_err(|e| ServiceError::from(e).normalize_cancellation())?;
        self.graph
            .delete_document_cascade(document_id, cancel)
            .await
            .map_err(|e| ServiceError::from(e).normalize_cancellation())?;
        tracing::info!(document_id, "document deleted");
        Ok(())
    }
}

fn fatal(err: GraphError) -> ServiceError {
    ServiceError::from(err).normalize_cancellation()
}
