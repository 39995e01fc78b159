//! Persistent vector index via sqlite-vec
//!
//! A vec0 virtual table holds the embeddings; a companion table holds the
//! metadata map for post-filtering and document-scoped deletes. Vectors are
//! L2-normalized on insert so L2 distance from vec0 converts to cosine
//! similarity: `sim = 1 - dist² / 2`.
//!
//! Uses its own database connection (WAL mode) to avoid contention with the
//! graph store connection.

use super::{
    check_dimensions, metadata, MetadataFilter, SearchHit, VectorError, VectorIndex, VectorRecord,
    VectorResult,
};
use crate::cancel::CancellationToken;
use async_trait::async_trait;
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// KNN over-fetch floor; post-filtering may discard many neighbors.
const MIN_KNN_FETCH: usize = 64;

/// Persistent vector index backed by sqlite-vec.
pub struct SqliteVecIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

/// Register the sqlite-vec extension globally (safe under parallel test
/// execution).
fn register_vec_extension() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
    });
}

impl SqliteVecIndex {
    /// Open a persistent index at the given path, creating tables if needed.
    pub fn open(path: &Path, dimensions: usize) -> VectorResult<Self> {
        register_vec_extension();
        let conn = Connection::open(path).map_err(|e| VectorError::Store(e.to_string()))?;
        Self::init_connection(conn, dimensions)
    }

    /// Open an in-memory index (for tests).
    pub fn open_in_memory(dimensions: usize) -> VectorResult<Self> {
        register_vec_extension();
        let conn = Connection::open_in_memory().map_err(|e| VectorError::Store(e.to_string()))?;
        Self::init_connection(conn, dimensions)
    }

    fn init_connection(conn: Connection, dimensions: usize) -> VectorResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| VectorError::Store(e.to_string()))?;

        let create_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(\
                 chunk_id TEXT,\
                 embedding float[{}]\
             );\
             CREATE TABLE IF NOT EXISTS chunk_metadata (\
                 chunk_id TEXT PRIMARY KEY,\
                 document_id TEXT NOT NULL,\
                 metadata_json TEXT NOT NULL\
             );\
             CREATE INDEX IF NOT EXISTS idx_chunk_metadata_document\
                 ON chunk_metadata(document_id);",
            dimensions
        );
        conn.execute_batch(&create_sql)
            .map_err(|e| VectorError::Store(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    fn write_record(&self, conn: &Connection, record: &VectorRecord) -> VectorResult<()> {
        let mut normalized = record.vector.clone();
        l2_normalize(&mut normalized);
        let bytes = f32_slice_as_bytes(&normalized);
        let document_id = record
            .metadata
            .get(metadata::DOCUMENT_ID)
            .cloned()
            .unwrap_or_default();
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| VectorError::Store(e.to_string()))?;

        conn.execute(
            "DELETE FROM vec_chunks WHERE chunk_id = ?1",
            rusqlite::params![record.chunk_id],
        )
        .map_err(|e| VectorError::Store(e.to_string()))?;
        conn.execute(
            "INSERT INTO vec_chunks(chunk_id, embedding) VALUES (?1, ?2)",
            rusqlite::params![record.chunk_id, bytes],
        )
        .map_err(|e| VectorError::Store(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO chunk_metadata(chunk_id, document_id, metadata_json) \
             VALUES (?1, ?2, ?3)",
            rusqlite::params![record.chunk_id, document_id, metadata_json],
        )
        .map_err(|e| VectorError::Store(e.to_string()))?;
        Ok(())
    }
}

fn ensure_live(cancel: &CancellationToken) -> VectorResult<()> {
    if cancel.is_cancelled() {
        return Err(VectorError::Cancelled);
    }
    Ok(())
}

/// Reinterpret a `&[f32]` slice as raw bytes for sqlite-vec blob parameters.
///
/// # Safety
/// f32 has no padding and a fixed layout; this is a trivial reinterpretation.
fn f32_slice_as_bytes(slice: &[f32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, slice.len() * 4) }
}

/// L2-normalize a vector in place.
fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteVecIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn index(&self, record: VectorRecord, cancel: &CancellationToken) -> VectorResult<()> {
        ensure_live(cancel)?;
        check_dimensions(self.dimensions, record.vector.len())?;
        let conn = self.conn.lock().unwrap();
        self.write_record(&conn, &record)
    }

    async fn index_batch(
        &self,
        records: Vec<VectorRecord>,
        cancel: &CancellationToken,
    ) -> VectorResult<()> {
        for record in &records {
            check_dimensions(self.dimensions, record.vector.len())?;
        }
        let conn = self.conn.lock().unwrap();
        for record in &records {
            ensure_live(cancel)?;
            self.write_record(&conn, record)?;
        }
        Ok(())
    }

    async fn delete_document(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> VectorResult<()> {
        ensure_live(cancel)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM vec_chunks WHERE chunk_id IN \
             (SELECT chunk_id FROM chunk_metadata WHERE document_id = ?1)",
            rusqlite::params![document_id],
        )
        .map_err(|e| VectorError::Store(e.to_string()))?;
        conn.execute(
            "DELETE FROM chunk_metadata WHERE document_id = ?1",
            rusqlite::params![document_id],
        )
        .map_err(|e| VectorError::Store(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
        cancel: &CancellationToken,
    ) -> VectorResult<Vec<SearchHit>> {
        ensure_live(cancel)?;
        check_dimensions(self.dimensions, vector.len())?;

        let mut normalized = vector.to_vec();
        l2_normalize(&mut normalized);
        let bytes = f32_slice_as_bytes(&normalized);

        // Over-fetch so post-filtering can still satisfy top_k.
        let fetch_k = (top_k * 4).max(MIN_KNN_FETCH);

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT v.chunk_id, v.distance, m.metadata_json \
                 FROM vec_chunks v \
                 JOIN chunk_metadata m ON m.chunk_id = v.chunk_id \
                 WHERE v.embedding MATCH ?1 AND k = ?2",
            )
            .map_err(|e| VectorError::Store(e.to_string()))?;

        let rows = stmt
            .query_map(rusqlite::params![bytes, fetch_k as i64], |row| {
                let chunk_id: String = row.get(0)?;
                let distance: f32 = row.get(1)?;
                let metadata_json: String = row.get(2)?;
                Ok((chunk_id, distance, metadata_json))
            })
            .map_err(|e| VectorError::Store(e.to_string()))?;

        let mut hits = Vec::new();
        for row in rows {
            let (chunk_id, distance, metadata_json) =
                row.map_err(|e| VectorError::Store(e.to_string()))?;
            let record_metadata: HashMap<String, String> = serde_json::from_str(&metadata_json)
                .map_err(|e| VectorError::Store(e.to_string()))?;
            if !filter.matches(&record_metadata) {
                continue;
            }
            // L2 distance on unit vectors: dist² = 2(1 - cos_sim).
            let score = 1.0 - (distance * distance) / 2.0;
            hits.push(SearchHit {
                chunk_id,
                score,
                metadata: record_metadata,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chunk_id: &str, vector: Vec<f32>, document_id: &str) -> VectorRecord {
        let mut metadata_map = HashMap::new();
        metadata_map.insert(metadata::DOCUMENT_ID.to_string(), document_id.to_string());
        metadata_map.insert(metadata::CHUNK_ID.to_string(), chunk_id.to_string());
        VectorRecord {
            chunk_id: chunk_id.to_string(),
            vector,
            metadata: metadata_map,
        }
    }

    #[tokio::test]
    async fn round_trip_search() {
        let index = SqliteVecIndex::open_in_memory(3).unwrap();
        let cancel = CancellationToken::new();

        index
            .index(record("c1", vec![0.9, 0.3, 0.1], "d1"), &cancel)
            .await
            .unwrap();
        index
            .index(record("c2", vec![0.1, 0.2, 0.95], "d1"), &cancel)
            .await
            .unwrap();

        let hits = index
            .search(&[0.9, 0.3, 0.1], 1, &MetadataFilter::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn delete_by_document() {
        let index = SqliteVecIndex::open_in_memory(3).unwrap();
        let cancel = CancellationToken::new();

        index
            .index(record("c1", vec![1.0, 0.0, 0.0], "d1"), &cancel)
            .await
            .unwrap();
        index
            .index(record("c2", vec![1.0, 0.0, 0.0], "d2"), &cancel)
            .await
            .unwrap();

        index.delete_document("d1", &cancel).await.unwrap();
        let hits = index
            .search(&[1.0, 0.0, 0.0], 10, &MetadataFilter::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c2");
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let index = SqliteVecIndex::open_in_memory(3).unwrap();
        let cancel = CancellationToken::new();
        let err = index
            .index(record("c1", vec![1.0], "d1"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { .. }));
    }
}
