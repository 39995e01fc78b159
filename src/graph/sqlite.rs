//! SQLite graph repository
//!
//! Typed node tables plus a single `(edge_type, source_id, target_id)` edge
//! table: an arena of records keyed by id with edge lists keyed by type and
//! source. Thread-safe via internal mutex on the connection; WAL mode for
//! concurrent reads during writes.

use super::{GraphError, GraphRepository, GraphResult};
use crate::cancel::CancellationToken;
use crate::model::{
    ChunkNode, CodeExampleNode, ConceptNode, DocumentNode, RelationshipType, SectionNode,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed graph repository.
pub struct SqliteGraph {
    conn: Mutex<Connection>,
}

impl SqliteGraph {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> GraphResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> GraphResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> GraphResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                title TEXT NOT NULL,
                doc_type TEXT,
                promotion_level TEXT NOT NULL,
                commit_hash TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sections (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                title TEXT NOT NULL,
                ord INTEGER NOT NULL,
                heading_level INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sections_document
                ON sections(document_id);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                section_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                content TEXT NOT NULL,
                ord INTEGER NOT NULL,
                token_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_document
                ON chunks(document_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_section
                ON chunks(section_id);

            CREATE TABLE IF NOT EXISTS concepts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                aliases_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_concepts_name
                ON concepts(name COLLATE NOCASE);

            CREATE TABLE IF NOT EXISTS code_examples (
                id TEXT PRIMARY KEY,
                chunk_id TEXT NOT NULL,
                language TEXT NOT NULL,
                code TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_code_examples_chunk
                ON code_examples(chunk_id);

            CREATE TABLE IF NOT EXISTS edges (
                edge_type TEXT NOT NULL,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                PRIMARY KEY (edge_type, source_id, target_id)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON edges(edge_type, target_id);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn insert_edge(
        conn: &Connection,
        relationship: RelationshipType,
        source_id: &str,
        target_id: &str,
    ) -> GraphResult<()> {
        conn.execute(
            "INSERT OR IGNORE INTO edges(edge_type, source_id, target_id) VALUES (?1, ?2, ?3)",
            params![relationship.as_str(), source_id, target_id],
        )?;
        Ok(())
    }

    fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentNode> {
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;
        Ok(DocumentNode {
            id: row.get(0)?,
            file_path: row.get(1)?,
            title: row.get(2)?,
            doc_type: row.get(3)?,
            promotion_level: row.get(4)?,
            commit_hash: row.get(5)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<ChunkNode> {
        Ok(ChunkNode {
            id: row.get(0)?,
            section_id: row.get(1)?,
            document_id: row.get(2)?,
            content: row.get(3)?,
            order: row.get::<_, i64>(4)? as usize,
            token_count: row.get::<_, i64>(5)? as usize,
        })
    }

    fn row_to_concept(row: &Row<'_>) -> rusqlite::Result<(ConceptNode, String)> {
        let aliases_json: String = row.get(4)?;
        Ok((
            ConceptNode {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                category: row.get(3)?,
                aliases: Vec::new(),
            },
            aliases_json,
        ))
    }

    /// Attach the JSON-decoded alias list to concepts read via
    /// `row_to_concept`.
    fn decode_aliases(rows: Vec<(ConceptNode, String)>) -> GraphResult<Vec<ConceptNode>> {
        let mut concepts = Vec::with_capacity(rows.len());
        for (mut concept, aliases_json) in rows {
            concept.aliases = serde_json::from_str(&aliases_json)?;
            concepts.push(concept);
        }
        Ok(concepts)
    }

    /// Sections of a document in order. Read-side helper for diagnostics.
    pub fn sections_for_document(&self, document_id: &str) -> GraphResult<Vec<SectionNode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, document_id, title, ord, heading_level \
             FROM sections WHERE document_id = ?1 ORDER BY ord",
        )?;
        let sections = stmt
            .query_map(params![document_id], |row| {
                Ok(SectionNode {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    title: row.get(2)?,
                    order: row.get::<_, i64>(3)? as usize,
                    heading_level: row.get::<_, i64>(4)? as u8,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sections)
    }

    /// Code examples recorded for a chunk, in extraction order.
    pub fn code_examples_for_chunk(&self, chunk_id: &str) -> GraphResult<Vec<CodeExampleNode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chunk_id, language, code \
             FROM code_examples WHERE chunk_id = ?1 ORDER BY id",
        )?;
        let examples = stmt
            .query_map(params![chunk_id], |row| {
                Ok(CodeExampleNode {
                    id: row.get(0)?,
                    chunk_id: row.get(1)?,
                    language: row.get(2)?,
                    code: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(examples)
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn ensure_live(cancel: &CancellationToken) -> GraphResult<()> {
    if cancel.is_cancelled() {
        return Err(GraphError::Cancelled);
    }
    Ok(())
}

const CHUNK_COLUMNS: &str = "id, section_id, document_id, content, ord, token_count";
const CONCEPT_COLUMNS: &str = "id, name, description, category, aliases_json";

#[async_trait]
impl GraphRepository for SqliteGraph {
    async fn upsert_document(
        &self,
        document: &DocumentNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents (id, file_path, title, doc_type, promotion_level, commit_hash, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(id) DO UPDATE SET \
                 file_path = excluded.file_path, \
                 title = excluded.title, \
                 doc_type = excluded.doc_type, \
                 promotion_level = excluded.promotion_level, \
                 commit_hash = excluded.commit_hash, \
                 updated_at = excluded.updated_at",
            params![
                document.id,
                document.file_path,
                document.title,
                document.doc_type,
                document.promotion_level,
                document.commit_hash,
                document.created_at.to_rfc3339(),
                document.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn upsert_section(
        &self,
        section: &SectionNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sections (id, document_id, title, ord, heading_level) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET \
                 document_id = excluded.document_id, \
                 title = excluded.title, \
                 ord = excluded.ord, \
                 heading_level = excluded.heading_level",
            params![
                section.id,
                section.document_id,
                section.title,
                section.order as i64,
                section.heading_level as i64,
            ],
        )?;
        Self::insert_edge(
            &conn,
            RelationshipType::HasSection,
            &section.document_id,
            &section.id,
        )
    }

    async fn upsert_chunk(
        &self,
        chunk: &ChunkNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chunks (id, section_id, document_id, content, ord, token_count) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET \
                 section_id = excluded.section_id, \
                 document_id = excluded.document_id, \
                 content = excluded.content, \
                 ord = excluded.ord, \
                 token_count = excluded.token_count",
            params![
                chunk.id,
                chunk.section_id,
                chunk.document_id,
                chunk.content,
                chunk.order as i64,
                chunk.token_count as i64,
            ],
        )?;
        Ok(())
    }

    async fn upsert_concept(
        &self,
        concept: &ConceptNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        ensure_live(cancel)?;
        let aliases_json = serde_json::to_string(&concept.aliases)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO concepts (id, name, description, category, aliases_json) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET \
                 name = excluded.name, \
                 description = excluded.description, \
                 category = excluded.category, \
                 aliases_json = excluded.aliases_json",
            params![
                concept.id,
                concept.name,
                concept.description,
                concept.category,
                aliases_json,
            ],
        )?;
        Ok(())
    }

    async fn upsert_code_example(
        &self,
        example: &CodeExampleNode,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO code_examples (id, chunk_id, language, code) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET \
                 chunk_id = excluded.chunk_id, \
                 language = excluded.language, \
                 code = excluded.code",
            params![example.id, example.chunk_id, example.language, example.code],
        )?;
        Self::insert_edge(
            &conn,
            RelationshipType::HasCodeExample,
            &example.chunk_id,
            &example.id,
        )
    }

    async fn create_relationship(
        &self,
        relationship: RelationshipType,
        source_id: &str,
        target_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        Self::insert_edge(&conn, relationship, source_id, target_id)
    }

    async fn get_chunks_by_ids(
        &self,
        chunk_ids: &[String],
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ChunkNode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE id = ?1",
            CHUNK_COLUMNS
        ))?;

        let mut chunks = Vec::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            ensure_live(cancel)?;
            let mut rows = stmt.query_map(params![id], Self::row_to_chunk)?;
            if let Some(chunk) = rows.next() {
                chunks.push(chunk?);
            }
        }
        Ok(chunks)
    }

    async fn get_concepts_by_chunk_ids(
        &self,
        chunk_ids: &[String],
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.description, c.category, c.aliases_json \
             FROM edges e JOIN concepts c ON c.id = e.target_id \
             WHERE e.edge_type = 'MENTIONS' AND e.source_id = ?1 \
             ORDER BY c.id",
        )?;

        let mut seen = HashSet::new();
        let mut concepts = Vec::new();
        for chunk_id in chunk_ids {
            ensure_live(cancel)?;
            let rows = stmt
                .query_map(params![chunk_id], Self::row_to_concept)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for concept in Self::decode_aliases(rows)? {
                if seen.insert(concept.id.clone()) {
                    concepts.push(concept);
                }
            }
        }
        Ok(concepts)
    }

    async fn get_linked_documents(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<DocumentNode>> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT d.id, d.file_path, d.title, d.doc_type, d.promotion_level, \
                    d.commit_hash, d.created_at, d.updated_at \
             FROM edges e JOIN documents d ON d.id = e.target_id \
             WHERE e.edge_type = 'LINKS_TO' AND e.source_id = ?1 \
             ORDER BY d.id",
        )?;
        let documents = stmt
            .query_map(params![document_id], Self::row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    async fn find_concepts_by_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        // Broad SQL match first; alias containment is verified in Rust
        // because aliases are stored as a JSON array.
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM concepts \
             WHERE name = ?1 COLLATE NOCASE \
                OR lower(aliases_json) LIKE '%\"' || lower(?1) || '\"%' \
             ORDER BY id",
            CONCEPT_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![name], Self::row_to_concept)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let concepts = Self::decode_aliases(rows)?
            .into_iter()
            .filter(|concept| {
                concept.name.eq_ignore_ascii_case(name)
                    || concept
                        .aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(name))
            })
            .collect();
        Ok(concepts)
    }

    async fn get_related_concepts(
        &self,
        concept_id: &str,
        depth: usize,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ConceptNode>> {
        ensure_live(cancel)?;
        if depth == 0 {
            return Ok(Vec::new());
        }
        // Depth beyond one shared-chunk hop is clamped.
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT c.id, c.name, c.description, c.category, c.aliases_json \
             FROM edges m1 \
             JOIN edges m2 ON m2.source_id = m1.source_id AND m2.edge_type = 'MENTIONS' \
             JOIN concepts c ON c.id = m2.target_id \
             WHERE m1.edge_type = 'MENTIONS' AND m1.target_id = ?1 AND m2.target_id <> ?1 \
             ORDER BY c.id",
        )?;
        let rows = stmt
            .query_map(params![concept_id], Self::row_to_concept)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Self::decode_aliases(rows)
    }

    async fn get_chunks_by_concept(
        &self,
        concept_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<ChunkNode>> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ch.id, ch.section_id, ch.document_id, ch.content, ch.ord, ch.token_count \
             FROM edges e JOIN chunks ch ON ch.id = e.source_id \
             WHERE e.edge_type = 'MENTIONS' AND e.target_id = ?1 \
             ORDER BY ch.document_id, ch.ord",
        )?;
        let chunks = stmt
            .query_map(params![concept_id], Self::row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    async fn delete_document_cascade(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> GraphResult<()> {
        ensure_live(cancel)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM edges WHERE \
                 source_id = ?1 OR target_id = ?1 \
                 OR source_id IN (SELECT id FROM sections WHERE document_id = ?1) \
                 OR target_id IN (SELECT id FROM sections WHERE document_id = ?1) \
                 OR source_id IN (SELECT id FROM chunks WHERE document_id = ?1) \
                 OR target_id IN (SELECT id FROM chunks WHERE document_id = ?1)",
            params![document_id],
        )?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?;
        tx.execute(
            "DELETE FROM sections WHERE document_id = ?1",
            params![document_id],
        )?;
        tx.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;
        tx.commit()?;
        Ok(())
    }
}
