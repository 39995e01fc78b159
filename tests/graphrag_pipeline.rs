//! End-to-end pipeline scenarios against in-memory stores: SQLite graph,
//! in-memory vector index, deterministic embedder, mock LLM.

use async_trait::async_trait;
use lattice::embed::{EmbedError, EmbedResult};
use lattice::graph::{GraphRepository, GraphResult};
use lattice::model::{
    ChunkNode, CodeExampleNode, ConceptNode, DocumentNode, RelationshipType, SectionNode,
};
use lattice::{
    CancellationToken, DocumentMetadata, Embedder, GraphRagOptions, GraphRagService,
    InMemoryVectorIndex, MockLlm, ModelTier, ServiceError, SqliteGraph, StaticEmbedder,
    VectorIndex, NO_RESULTS_ANSWER,
};
use std::sync::Arc;

const DIMS: usize = 3;

fn react_entity_json() -> &'static str {
    r#"[{"name":"React","type":"framework","description":null,"aliases":["ReactJS"]}]"#
}

/// Embedder pinning the texts each test cares about; unpinned texts get the
/// deterministic derived vector.
fn pinned_embedder() -> StaticEmbedder {
    StaticEmbedder::new(DIMS)
        .with_vector("hello world", vec![1.0, 0.0, 0.0])
        .with_vector("greetings", vec![1.0, 0.0, 0.0])
        // cos(query, low-a) = 0.2, cos(query, low-b) = 0.3
        .with_vector("low relevance a", vec![0.2, 0.9798, 0.0])
        .with_vector("low relevance b", vec![0.3, 0.954, 0.0])
}

fn extracting_nothing_llm() -> MockLlm {
    MockLlm::with_default("synthesized answer").with_tier_response(ModelTier::Small, "[]")
}

struct Fixture {
    graph: Arc<SqliteGraph>,
    vectors: Arc<InMemoryVectorIndex>,
    service: GraphRagService,
    cancel: CancellationToken,
}

fn fixture_with(llm: MockLlm, embedder: StaticEmbedder) -> Fixture {
    let graph = Arc::new(SqliteGraph::open_in_memory().unwrap());
    let vectors = Arc::new(InMemoryVectorIndex::new(DIMS));
    let service = GraphRagService::new(
        graph.clone(),
        vectors.clone(),
        Arc::new(embedder),
        Arc::new(llm),
    )
    .unwrap();
    Fixture {
        graph,
        vectors,
        service,
        cancel: CancellationToken::new(),
    }
}

fn fixture() -> Fixture {
    fixture_with(extracting_nothing_llm(), pinned_embedder())
}

// ── Scenario: single-chunk document ────────────────────────────────────

#[tokio::test]
async fn single_chunk_document() {
    let f = fixture();
    let metadata = DocumentMetadata::new("r:a.md", "r", "a.md", "T");
    f.service
        .ingest(b"hello world", metadata, &f.cancel)
        .await
        .unwrap();

    let chunks = f
        .graph
        .get_chunks_by_ids(&["r:a.md:chunk-0".to_string()], &f.cancel)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    let chunk = &chunks[0];
    assert_eq!(chunk.content, "hello world");
    assert_eq!(chunk.token_count, 2); // 11 / 4
    assert_eq!(chunk.order, 0);
    assert_eq!(chunk.section_id, "r:a.md:introduction");

    let sections = f.graph.sections_for_document("r:a.md").unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].title, "Introduction");
    assert_eq!(sections[0].order, 0);
    assert_eq!(sections[0].heading_level, 2);

    // One vector record; no concepts, no code examples.
    assert_eq!(f.vectors.len(), 1);
    let concepts = f
        .graph
        .get_concepts_by_chunk_ids(&["r:a.md:chunk-0".to_string()], &f.cancel)
        .await
        .unwrap();
    assert!(concepts.is_empty());
}

// ── Scenario: header chunking ──────────────────────────────────────────

#[tokio::test]
async fn header_chunking_assigns_sections() {
    let f = fixture();
    let metadata = DocumentMetadata::new("r:doc.md", "r", "doc.md", "Doc");
    f.service
        .ingest(b"intro\n## A\nalpha\n## B\nbeta", metadata, &f.cancel)
        .await
        .unwrap();

    let sections = f.graph.sections_for_document("r:doc.md").unwrap();
    let summary: Vec<(String, usize)> = sections
        .iter()
        .map(|s| (s.title.clone(), s.order))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Introduction".to_string(), 0),
            ("A".to_string(), 1),
            ("B".to_string(), 2)
        ]
    );

    let ids: Vec<String> = (0..3).map(|i| format!("r:doc.md:chunk-{}", i)).collect();
    let chunks = f.graph.get_chunks_by_ids(&ids, &f.cancel).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].section_id, "r:doc.md:introduction");
    assert_eq!(chunks[1].section_id, "r:doc.md:a");
    assert_eq!(chunks[2].section_id, "r:doc.md:b");
}

// ── Scenario: internal links become LINKS_TO edges ─────────────────────

#[tokio::test]
async fn internal_links_create_forward_edges() {
    let f = fixture();

    // The link target does not exist yet; the edge is a forward reference.
    let metadata = DocumentMetadata::new("r:docs/sub/a.md", "R", "docs/sub/a.md", "A");
    f.service
        .ingest(
            b"see [b](../b.md#frag) and [ext](https://example.com)",
            metadata,
            &f.cancel,
        )
        .await
        .unwrap();

    let linked = f
        .graph
        .get_linked_documents("r:docs/sub/a.md", &f.cancel)
        .await
        .unwrap();
    assert!(linked.is_empty(), "target not ingested yet");

    // Once the target exists, the traversal finds it.
    let metadata = DocumentMetadata::new("r:docs/b.md", "R", "docs/b.md", "B");
    f.service.ingest(b"content", metadata, &f.cancel).await.unwrap();

    let linked = f
        .graph
        .get_linked_documents("r:docs/sub/a.md", &f.cancel)
        .await
        .unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, "r:docs/b.md");
}

// ── Scenario: code examples ────────────────────────────────────────────

#[tokio::test]
async fn fenced_code_blocks_become_code_examples() {
    let f = fixture();
    let body = b"## Usage\n```rust\nfn main() {}\n```\n";
    let metadata = DocumentMetadata::new("r:code.md", "r", "code.md", "Code");
    f.service.ingest(body, metadata, &f.cancel).await.unwrap();

    let examples = f.graph.code_examples_for_chunk("r:code.md:chunk-0").unwrap();
    assert_eq!(examples.len(), 1);
    assert_eq!(examples[0].id, "r:code.md:chunk-0:code-0");
    assert_eq!(examples[0].language, "rust");
    assert_eq!(examples[0].code, "fn main() {}");
}

// ── Scenario: query early-return ───────────────────────────────────────

#[tokio::test]
async fn query_below_threshold_returns_empty_payload() {
    let f = fixture();
    for (id, body) in [("r:low-a.md", "low relevance a"), ("r:low-b.md", "low relevance b")] {
        let metadata = DocumentMetadata::new(id, "r", format!("{}.md", id), "Low");
        f.service
            .ingest(body.as_bytes(), metadata, &f.cancel)
            .await
            .unwrap();
    }

    let result = f
        .service
        .query("greetings", None, &f.cancel)
        .await
        .unwrap();
    assert_eq!(result.answer, NO_RESULTS_ANSWER);
    assert!(result.sources.is_empty());
    assert!(result.related_concepts.is_empty());
    assert_eq!(result.confidence, 0.0);
}

// ── Scenario: grounded answer with confidence ──────────────────────────

#[tokio::test]
async fn query_answers_from_retrieved_context() {
    let f = fixture();
    let metadata = DocumentMetadata::new("r:a.md", "r", "a.md", "T");
    f.service
        .ingest(b"hello world", metadata, &f.cancel)
        .await
        .unwrap();

    let result = f
        .service
        .query("greetings", None, &f.cancel)
        .await
        .unwrap();
    assert_eq!(result.answer, "synthesized answer");
    assert_eq!(result.sources.len(), 1);
    let source = &result.sources[0];
    assert_eq!(source.chunk_id, "r:a.md:chunk-0");
    assert_eq!(source.document_id, "r:a.md");
    assert_eq!(source.repository, "r");
    assert_eq!(source.file_path, "a.md");
    assert!((source.relevance_score - 1.0).abs() < 1e-5);

    // One perfect hit of max_chunks=10: avg 1.0 × coverage 0.1.
    assert!((result.confidence - 0.1).abs() < 1e-5);
}

// ── Scenario: best-effort enrichment ───────────────────────────────────

/// Graph wrapper whose concept lookup always fails.
struct FailingConceptsGraph(Arc<SqliteGraph>);

#[async_trait]
impl GraphRepository for FailingConceptsGraph {
    async fn upsert_document(
        &self,
        document: &DocumentNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        self.0.upsert_document(document, cancel).await
    }
    async fn upsert_section(
        &self,
        section: &SectionNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        self.0.upsert_section(section, cancel).await
    }
    async fn upsert_chunk(&self, chunk: &ChunkNode, cancel: &CancellationToken) -> GraphResult<()> {
        self.0.upsert_chunk(chunk, cancel).await
    }
    async fn upsert_concept(
        &self,
        concept: &ConceptNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        self.0.upsert_concept(concept, cancel).await
    }
    async fn upsert_code_example(
        &self,
        example: &CodeExampleNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        self.0.upsert_code_example(example, cancel).await
    }
    async fn create_relationship(
        &self,
        relationship: RelationshipType,
        source_id: &str,
        target_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        self.0
            .create_relationship(relationship, source_id, target_id, cancel)
            .await
    }
    async fn get_chunks_by_ids(
        &self,
        chunk_ids: &[String],
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ChunkNode>> {
        self.0.get_chunks_by_ids(chunk_ids, cancel).await
    }
    async fn get_concepts_by_chunk_ids(
        &self,
        _chunk_ids: &[String],
        _cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>> {
        Err(serde_json::from_str::<serde_json::Value>("not json")
            .unwrap_err()
            .into())
    }
    async fn get_linked_documents(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<DocumentNode>> {
        self.0.get_linked_documents(document_id, cancel).await
    }
    async fn find_concepts_by_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>> {
        self.0.find_concepts_by_name(name, cancel).await
    }
    async fn get_related_concepts(
        &self,
        concept_id: &str,
        depth: usize,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>> {
        self.0.get_related_concepts(concept_id, depth, cancel).await
    }
    async fn get_chunks_by_concept(
        &self,
        concept_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ChunkNode>> {
        self.0.get_chunks_by_concept(concept_id, cancel).await
    }
    async fn delete_document_cascade(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        self.0.delete_document_cascade(document_id, cancel).await
    }
}

#[tokio::test]
async fn concept_enrichment_failure_degrades_gracefully() {
    let inner = Arc::new(SqliteGraph::open_in_memory().unwrap());
    let graph = Arc::new(FailingConceptsGraph(inner));
    let vectors = Arc::new(InMemoryVectorIndex::new(DIMS));
    let service = GraphRagService::new(
        graph,
        vectors,
        Arc::new(pinned_embedder()),
        Arc::new(extracting_nothing_llm()),
    )
    .unwrap();
    let cancel = CancellationToken::new();

    let metadata = DocumentMetadata::new("r:a.md", "r", "a.md", "T");
    service
        .ingest(b"hello world", metadata, &cancel)
        .await
        .unwrap();

    let result = service.query("greetings", None, &cancel).await.unwrap();
    assert_eq!(result.answer, "synthesized answer");
    assert!(result.related_concepts.is_empty());
    assert!(result.confidence > 0.0);
}

// ── Scenario: cross-repo resolution ────────────────────────────────────

#[tokio::test]
async fn cross_repo_concepts_expand_related_names() {
    // The ingested repoY document mentions React via extraction; repoX
    // state is seeded directly so React's first mentioning chunk (and thus
    // its resolved repository) is repoX's.
    let llm = MockLlm::with_default("synthesized answer")
        .with_tier_response(ModelTier::Small, react_entity_json());
    let f = fixture_with(llm, pinned_embedder().with_vector("hello world", vec![1.0, 0.0, 0.0]));

    // Seed repoX: a chunk mentioning React and Redux.
    f.graph
        .upsert_chunk(
            &ChunkNode {
                id: "repox:foo.md:chunk-0".to_string(),
                section_id: "repox:foo.md:introduction".to_string(),
                document_id: "repox:foo.md".to_string(),
                content: "react with redux".to_string(),
                order: 0,
                token_count: 4,
            },
            &f.cancel,
        )
        .await
        .unwrap();
    f.graph
        .upsert_concept(
            &ConceptNode {
                id: "concept:redux".to_string(),
                name: "Redux".to_string(),
                description: None,
                category: "library".to_string(),
                aliases: vec![],
            },
            &f.cancel,
        )
        .await
        .unwrap();

    // Ingest the repoY document; extraction creates concept:react and the
    // MENTIONS edge from repoY's chunk.
    let metadata = DocumentMetadata::new("repoy:bar.md", "repoY", "bar.md", "Bar");
    f.service
        .ingest(b"hello world", metadata, &f.cancel)
        .await
        .unwrap();

    // Wire repoX's chunk to the shared concepts.
    for concept_id in ["concept:react", "concept:redux"] {
        f.graph
            .create_relationship(
                RelationshipType::Mentions,
                "repox:foo.md:chunk-0",
                concept_id,
                &f.cancel,
            )
            .await
            .unwrap();
    }

    // The query hits only repoY; React resolves to repoX (its first
    // mentioning chunk), which is not among the result repositories, so
    // React's related concept names are appended.
    let result = f
        .service
        .query("greetings", None, &f.cancel)
        .await
        .unwrap();
    assert_eq!(
        result.related_concepts,
        vec!["React".to_string(), "Redux".to_string()]
    );

    // With cross-repo links disabled the expansion does not happen.
    let options = GraphRagOptions {
        use_cross_repo_links: false,
        ..GraphRagOptions::default()
    };
    let result = f
        .service
        .query("greetings", Some(options), &f.cancel)
        .await
        .unwrap();
    assert_eq!(result.related_concepts, vec!["React".to_string()]);
}

// ── Scenario: repository filter soundness ──────────────────────────────

#[tokio::test]
async fn repository_filter_restricts_sources() {
    let f = fixture();
    for (id, repo) in [("ra:a.md", "ra"), ("rb:b.md", "rb")] {
        let metadata = DocumentMetadata::new(id, repo, "x.md", "X");
        f.service
            .ingest(b"hello world", metadata, &f.cancel)
            .await
            .unwrap();
    }

    let options = GraphRagOptions {
        repository_filter: Some("ra".to_string()),
        ..GraphRagOptions::default()
    };
    let result = f
        .service
        .query("greetings", Some(options), &f.cancel)
        .await
        .unwrap();
    assert!(!result.sources.is_empty());
    for source in &result.sources {
        assert_eq!(source.repository, "ra");
    }
}

// ── Scenario: partial failure keeps the graph side ─────────────────────

/// Embedder failing for one specific text.
struct PoisonEmbedder {
    inner: StaticEmbedder,
    poison: &'static str,
}

#[async_trait]
impl Embedder for PoisonEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
    async fn embed(&self, text: &str, cancel: &CancellationToken) -> EmbedResult<Vec<f32>> {
        if text.contains(self.poison) {
            return Err(EmbedError::Unavailable("poisoned".to_string()));
        }
        self.inner.embed(text, cancel).await
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> EmbedResult<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts, cancel).await
    }
}

#[tokio::test]
async fn embedding_failure_keeps_chunk_without_vector() {
    let graph = Arc::new(SqliteGraph::open_in_memory().unwrap());
    let vectors = Arc::new(InMemoryVectorIndex::new(DIMS));
    let embedder = PoisonEmbedder {
        inner: StaticEmbedder::new(DIMS),
        poison: "unembeddable",
    };
    let service = GraphRagService::new(
        graph.clone(),
        vectors.clone(),
        Arc::new(embedder),
        Arc::new(extracting_nothing_llm()),
    )
    .unwrap();
    let cancel = CancellationToken::new();

    let body = b"## Good\nfine text\n## Bad\nunembeddable text";
    let metadata = DocumentMetadata::new("r:p.md", "r", "p.md", "P");
    service.ingest(body, metadata, &cancel).await.unwrap();

    // Both chunks exist in the graph; only the good one has a vector.
    let ids = vec!["r:p.md:chunk-0".to_string(), "r:p.md:chunk-1".to_string()];
    let chunks = graph.get_chunks_by_ids(&ids, &cancel).await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(vectors.len(), 1);
}

// ── Scenario: cascade delete ───────────────────────────────────────────

#[tokio::test]
async fn delete_cascades_across_both_stores() {
    let f = fixture();
    let metadata = DocumentMetadata::new("r:gone.md", "r", "gone.md", "Gone");
    f.service
        .ingest(b"intro\n## A\nalpha", metadata, &f.cancel)
        .await
        .unwrap();
    assert_eq!(f.vectors.len(), 2);

    f.service.delete("r:gone.md", &f.cancel).await.unwrap();

    assert_eq!(f.vectors.len(), 0);
    assert!(f.graph.sections_for_document("r:gone.md").unwrap().is_empty());
    let chunks = f
        .graph
        .get_chunks_by_ids(
            &["r:gone.md:chunk-0".to_string(), "r:gone.md:chunk-1".to_string()],
            &f.cancel,
        )
        .await
        .unwrap();
    assert!(chunks.is_empty());
}

// ── Scenario: idempotent re-ingest ─────────────────────────────────────

#[tokio::test]
async fn reingesting_the_same_document_is_idempotent() {
    let f = fixture();
    let body = b"intro\n## A\nalpha";

    for _ in 0..2 {
        let metadata = DocumentMetadata::new("r:same.md", "r", "same.md", "Same");
        f.service.ingest(body, metadata, &f.cancel).await.unwrap();
    }

    let sections = f.graph.sections_for_document("r:same.md").unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(f.vectors.len(), 2);

    let chunks = f
        .graph
        .get_chunks_by_ids(
            &["r:same.md:chunk-0".to_string(), "r:same.md:chunk-1".to_string()],
            &f.cancel,
        )
        .await
        .unwrap();
    assert_eq!(chunks.len(), 2);
}

// ── Scenario: fatal failures surface as errors ─────────────────────────

#[tokio::test]
async fn llm_failure_is_fatal_for_queries() {
    let llm = MockLlm::unavailable();
    let f = fixture_with(llm, pinned_embedder());

    // Seeding must bypass extraction (the LLM is down), so write directly.
    f.graph
        .upsert_chunk(
            &ChunkNode {
                id: "r:a.md:chunk-0".to_string(),
                section_id: "r:a.md:introduction".to_string(),
                document_id: "r:a.md".to_string(),
                content: "hello world".to_string(),
                order: 0,
                token_count: 2,
            },
            &f.cancel,
        )
        .await
        .unwrap();
    let mut record_metadata = std::collections::HashMap::new();
    record_metadata.insert("document_id".to_string(), "r:a.md".to_string());
    record_metadata.insert("chunk_id".to_string(), "r:a.md:chunk-0".to_string());
    record_metadata.insert("repository".to_string(), "r".to_string());
    record_metadata.insert("file_path".to_string(), "a.md".to_string());
    f.vectors
        .index(
            lattice::VectorRecord {
                chunk_id: "r:a.md:chunk-0".to_string(),
                vector: vec![1.0, 0.0, 0.0],
                metadata: record_metadata,
            },
            &f.cancel,
        )
        .await
        .unwrap();

    let err = f
        .service
        .query("greetings", None, &f.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Llm(_)));
}

#[tokio::test]
async fn cancelled_query_returns_promptly() {
    let f = fixture();
    f.cancel.cancel();
    let err = f
        .service
        .query("greetings", None, &f.cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
