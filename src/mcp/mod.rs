//! MCP server for lattice — exposes the ingest, delete and query entry
//! points as Model Context Protocol tools over stdio.

pub mod params;

use crate::cancel::CancellationToken;
use crate::embed::{EmbeddingPolicy, ResilientEmbedder};
use crate::graph::SqliteGraph;
use crate::llm::SubprocessLlm;
use crate::model::DocumentMetadata;
use crate::query::GraphRagOptions;
use crate::service::GraphRagService;
use params::*;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ok_text(text: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn err_text(msg: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg)]))
}

// ---------------------------------------------------------------------------
// LatticeMcpServer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LatticeMcpServer {
    service: Arc<GraphRagService>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl LatticeMcpServer {
    pub fn new(service: Arc<GraphRagService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Ingest a markdown document into the knowledge graph and vector index")]
    async fn ingest_document(
        &self,
        Parameters(p): Parameters<IngestDocumentParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut metadata =
            DocumentMetadata::new(p.document_id.clone(), p.repository, p.file_path, p.title);
        if let Some(doc_type) = p.doc_type {
            metadata = metadata.with_doc_type(doc_type);
        }
        if let Some(level) = p.promotion_level {
            metadata = metadata.with_promotion_level(level);
        }
        if let Some(hash) = p.commit_hash {
            metadata = metadata.with_commit_hash(hash);
        }

        let cancel = CancellationToken::new();
        match self
            .service
            .ingest(p.content.as_bytes(), metadata, &cancel)
            .await
        {
            Ok(()) => ok_text(
                serde_json::to_string_pretty(&serde_json::json!({ "ingested": p.document_id }))
                    .unwrap(),
            ),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Delete a document, its vectors, and its owned graph nodes")]
    async fn delete_document(
        &self,
        Parameters(p): Parameters<DeleteDocumentParams>,
    ) -> Result<CallToolResult, McpError> {
        let cancel = CancellationToken::new();
        match self.service.delete(&p.document_id, &cancel).await {
            Ok(()) => ok_text(
                serde_json::to_string_pretty(&serde_json::json!({ "deleted": p.document_id }))
                    .unwrap(),
            ),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Answer a question grounded in the ingested documentation")]
    async fn query(
        &self,
        Parameters(p): Parameters<QueryParams>,
    ) -> Result<CallToolResult, McpError> {
        // Explicit per-request values win over configuration defaults.
        let defaults = self.service.query_defaults().clone();
        let options = GraphRagOptions {
            max_chunks: p.max_chunks.unwrap_or(defaults.max_chunks),
            max_traversal_steps: defaults.max_traversal_steps,
            min_relevance_score: p
                .min_relevance_score
                .unwrap_or(defaults.min_relevance_score),
            use_cross_repo_links: p
                .use_cross_repo_links
                .unwrap_or(defaults.use_cross_repo_links),
            repository_filter: p.repository_filter.or(defaults.repository_filter),
            doc_type_filter: p.doc_type_filter.or(defaults.doc_type_filter),
        };

        let cancel = CancellationToken::new();
        match self.service.query(&p.query, Some(options), &cancel).await {
            Ok(result) => ok_text(serde_json::to_string_pretty(&result).unwrap()),
            Err(e) => err_text(e.to_string()),
        }
    }
}

#[tool_handler]
impl ServerHandler for LatticeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Lattice MCP server — GraphRAG over developer documentation \
                 (ingest_document, delete_document, query)"
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lattice")
        .join("lattice.db")
}

#[cfg(feature = "embeddings")]
fn build_service(db_path: &PathBuf) -> Result<GraphRagService, String> {
    use crate::embed::FastEmbedder;
    use crate::vector::SqliteVecIndex;

    let graph = SqliteGraph::open(db_path).map_err(|e| e.to_string())?;
    let embedder = FastEmbedder::default_model().map_err(|e| e.to_string())?;
    let dimensions = crate::embed::Embedder::dimensions(&embedder);
    let vec_path = db_path.with_extension("vec.db");
    let vectors = SqliteVecIndex::open(&vec_path, dimensions).map_err(|e| e.to_string())?;
    let resilient = ResilientEmbedder::new(Arc::new(embedder), EmbeddingPolicy::default());

    GraphRagService::new(
        Arc::new(graph),
        Arc::new(vectors),
        Arc::new(resilient),
        Arc::new(SubprocessLlm::new()),
    )
    .map_err(|e| e.to_string())
}

#[cfg(not(feature = "embeddings"))]
fn build_service(db_path: &PathBuf) -> Result<GraphRagService, String> {
    use crate::embed::StaticEmbedder;
    use crate::vector::InMemoryVectorIndex;

    // Development fallback: deterministic embeddings, non-persistent index.
    eprintln!(
        "warning: built without the `embeddings` feature; using a deterministic \
         embedder and an in-memory vector index"
    );
    let graph = SqliteGraph::open(db_path).map_err(|e| e.to_string())?;
    let embedder = StaticEmbedder::new(256);
    let vectors = InMemoryVectorIndex::new(256);
    let resilient = ResilientEmbedder::new(Arc::new(embedder), EmbeddingPolicy::default());

    GraphRagService::new(
        Arc::new(graph),
        Arc::new(vectors),
        Arc::new(resilient),
        Arc::new(SubprocessLlm::new()),
    )
    .map_err(|e| e.to_string())
}

pub fn run_mcp_server(db_path: Option<PathBuf>) -> i32 {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let db_path = db_path.unwrap_or_else(default_db_path);
        if let Some(parent) = db_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("failed to create data directory {}: {}", parent.display(), e);
                return 1;
            }
        }

        let service = match build_service(&db_path) {
            Ok(service) => Arc::new(service),
            Err(e) => {
                eprintln!("failed to build service at {}: {}", db_path.display(), e);
                return 1;
            }
        };

        let server = LatticeMcpServer::new(service);

        eprintln!("lattice mcp server starting on stdio...");

        let running = match server.serve(rmcp::transport::stdio()).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("failed to start MCP server: {}", e);
                return 1;
            }
        };

        if let Err(e) = running.waiting().await {
            eprintln!("MCP server error: {}", e);
            return 1;
        }

        0
    })
}
