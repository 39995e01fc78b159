//! In-memory vector index
//!
//! Thread-safe via DashMap. Exact cosine scoring over all records, so it is
//! the test and fallback path; production persistence is sqlite-vec behind
//! the `embeddings` feature.

use super::{
    check_dimensions, cosine_similarity, metadata, MetadataFilter, SearchHit, VectorIndex,
    VectorRecord, VectorResult,
};
use crate::cancel::CancellationToken;
use crate::vector::VectorError;
use async_trait::async_trait;
use dashmap::DashMap;

/// In-memory vector index keyed by chunk id.
pub struct InMemoryVectorIndex {
    records: DashMap<String, VectorRecord>,
    dimensions: usize,
}

impl InMemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            records: DashMap::new(),
            dimensions,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn ensure_live(cancel: &CancellationToken) -> VectorResult<()> {
    if cancel.is_cancelled() {
        return Err(VectorError::Cancelled);
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn index(&self, record: VectorRecord, cancel: &CancellationToken) -> VectorResult<()> {
        ensure_live(cancel)?;
        check_dimensions(self.dimensions, record.vector.len())?;
        self.records.insert(record.chunk_id.clone(), record);
        Ok(())
    }

    async fn index_batch(
        &self,
        records: Vec<VectorRecord>,
        cancel: &CancellationToken,
    ) -> VectorResult<()> {
        for record in records {
            self.index(record, cancel).await?;
        }
        Ok(())
    }

    async fn delete_document(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> VectorResult<()> {
        ensure_live(cancel)?;
        self.records.retain(|_, record| {
            record
                .metadata
                .get(metadata::DOCUMENT_ID)
                .map_or(true, |id| id != document_id)
        });
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

        let mut hits: Vec<SearchHit> = self
            .records
            .iter()
            .filter(|entry| filter.matches(&entry.metadata))
            .map(|entry| SearchHit {
                chunk_id: entry.chunk_id.clone(),
                score: cosine_similarity(vector, &entry.vector),
                metadata: entry.metadata.clone(),
            })
            .collect();

        // Score descending; ties broken by chunk id so results are
        // deterministic for the same input.
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
