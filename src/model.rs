//! Core records persisted to the graph store and carried through the
//! pipelines.
//!
//! These are plain typed records; the persistence schema is owned by the
//! graph adapter, not by annotations on these types. All ids are strings
//! and all relationships are directed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Estimated token count for a chunk body: `len / 4`, integer division.
pub fn estimate_tokens(content: &str) -> usize {
    content.len() / 4
}

/// One node per ingested document. Owns its sections (deletion cascades).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNode {
    /// Globally unique, typically `<repo>:<file_path>` lowercased.
    pub id: String,
    pub file_path: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    pub promotion_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One node per H2 header, plus a synthetic "Introduction" section for
/// pre-header content. Owned by its document; section order is dense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionNode {
    /// `<document_id>:<slug-of-title>`.
    pub id: String,
    pub document_id: String,
    pub title: String,
    /// 0-based position within the document.
    pub order: usize,
    /// Always 2 for header-derived sections (and the synthetic intro).
    pub heading_level: u8,
}

/// One node per header-delimited body slice. The unit of embedding,
/// retrieval, and mention extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkNode {
    /// `<document_id>:chunk-<index>`.
    pub id: String,
    pub section_id: String,
    pub document_id: String,
    pub content: String,
    /// Chunk index within the document.
    pub order: usize,
    pub token_count: usize,
}

/// One node per distinct extracted entity, shared across documents.
/// Never owned; cascade deletes may orphan concepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptNode {
    /// `concept:<normalized-name>`.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The extracted entity type.
    pub category: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// One node per fenced code block inside a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExampleNode {
    /// `<chunk_id>:code-<index-in-chunk>`.
    pub id: String,
    pub chunk_id: String,
    pub language: String,
    pub code: String,
}

/// Directed edge types in the property graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    /// document → section
    HasSection,
    /// section → chunk
    HasChunk,
    /// chunk → concept
    Mentions,
    /// chunk → code example
    HasCodeExample,
    /// document → document (forward references are legal)
    LinksTo,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::HasSection => "HAS_SECTION",
            RelationshipType::HasChunk => "HAS_CHUNK",
            RelationshipType::Mentions => "MENTIONS",
            RelationshipType::HasCodeExample => "HAS_CODE_EXAMPLE",
            RelationshipType::LinksTo => "LINKS_TO",
        }
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HAS_SECTION" => Ok(RelationshipType::HasSection),
            "HAS_CHUNK" => Ok(RelationshipType::HasChunk),
            "MENTIONS" => Ok(RelationshipType::Mentions),
            "HAS_CODE_EXAMPLE" => Ok(RelationshipType::HasCodeExample),
            "LINKS_TO" => Ok(RelationshipType::LinksTo),
            _ => Err(format!("unknown relationship type: {}", s)),
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Accepted promotion levels for ingested documents.
pub const PROMOTION_LEVELS: &[&str] = &["draft", "review", "approved", "deprecated"];

/// Metadata accompanying one document ingest. All string fields UTF-8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub repository: String,
    pub file_path: String,
    pub title: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default = "default_promotion_level")]
    pub promotion_level: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
}

fn default_promotion_level() -> String {
    "draft".to_string()
}

impl DocumentMetadata {
    pub fn new(
        document_id: impl Into<String>,
        repository: impl Into<String>,
        file_path: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            repository: repository.into(),
            file_path: file_path.into(),
            title: title.into(),
            doc_type: None,
            promotion_level: default_promotion_level(),
            commit_hash: None,
        }
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_promotion_level(mut self, level: impl Into<String>) -> Self {
        self.promotion_level = level.into();
        self
    }

    pub fn with_commit_hash(mut self, hash: impl Into<String>) -> Self {
        self.commit_hash = Some(hash.into());
        self
    }
}
