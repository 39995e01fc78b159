//! MCP tool parameter structs with schemars-derived JSON schemas.

use schemars::JsonSchema;
use serde::Deserialize;

// ── Ingest params ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IngestDocumentParams {
    #[schemars(description = "Markdown document content")]
    pub content: String,
    #[schemars(description = "Globally unique document id, typically <repo>:<file_path> lowercased")]
    pub document_id: String,
    #[schemars(description = "Repository the document belongs to")]
    pub repository: String,
    #[schemars(description = "Path of the source file within the repository")]
    pub file_path: String,
    #[schemars(description = "Document title")]
    pub title: String,
    #[schemars(description = "Document type (e.g. guide, adr, reference)")]
    pub doc_type: Option<String>,
    #[schemars(description = "Promotion level (draft, review, approved, deprecated); defaults to draft")]
    pub promotion_level: Option<String>,
    #[schemars(description = "Commit hash the content was captured at")]
    pub commit_hash: Option<String>,
}

// ── Delete params ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteDocumentParams {
    #[schemars(description = "Id of the document to delete")]
    pub document_id: String,
}

// ── Query params ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryParams {
    #[schemars(description = "Natural-language question")]
    pub query: String,
    #[schemars(description = "Maximum chunks to retrieve (1-100, default 10)")]
    pub max_chunks: Option<usize>,
    #[schemars(description = "Minimum relevance score (0.0-1.0, default 0.7)")]
    pub min_relevance_score: Option<f32>,
    #[schemars(description = "Expand related concepts across repositories (default true)")]
    pub use_cross_repo_links: Option<bool>,
    #[schemars(description = "Only search documents from this repository")]
    pub repository_filter: Option<String>,
    #[schemars(description = "Only search documents of this type")]
    pub doc_type_filter: Option<String>,
}
