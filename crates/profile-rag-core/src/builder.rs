//! Index construction.
//!
//! An [`IndexBuilder`] accepts chunks together with their embeddings, in
//! chunk order, and produces a paired ([`VectorIndex`], [`ChunkStore`]).
//! [`build_index`] drives an [`Embedder`] sequentially in batches; the app
//! crate has a concurrent driver that feeds the same builder.
//!
//! Builds are all-or-nothing: the first failed batch aborts the build and
//! no partial index is returned.

use crate::embedding::{check_batch, Embedder, Metric};
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::Chunk;
use crate::store::{verify_pairing, ChunkStore};

pub struct IndexBuilder {
    index: VectorIndex,
    store: ChunkStore,
}

impl IndexBuilder {
    pub fn new(dims: usize, metric: Metric) -> Self {
        Self {
            index: VectorIndex::new(dims, metric),
            store: ChunkStore::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Add chunks and their vectors (same order, same length).
    pub fn add_batch(&mut self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        check_batch(self.index.dims(), chunks.len(), vectors)?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            self.index.add(chunk.id, vector)?;
            self.store.insert(chunk.clone())?;
        }
        Ok(())
    }

    /// Finish the build, checking that index and store are paired.
    pub fn finish(self) -> Result<(VectorIndex, ChunkStore)> {
        verify_pairing(&self.index, &self.store)?;
        Ok((self.index, self.store))
    }
}

/// Embed `chunks` in batches of `batch_size` and build the index pair.
///
/// Zero chunks produce an empty (but valid) pair.
pub async fn build_index(
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    metric: Metric,
    batch_size: usize,
) -> Result<(VectorIndex, ChunkStore)> {
    let mut builder = IndexBuilder::new(embedder.dims(), metric);
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        builder.add_batch(batch, &vectors)?;
    }
    builder.finish()
}
