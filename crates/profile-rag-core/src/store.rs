//! Id-keyed chunk store paired with a [`VectorIndex`].
//!
//! The index owns vectors only; chunk text and origin metadata live here.
//! The two are always built, persisted, and loaded together, and
//! [`verify_pairing`] checks that they share one id space.

use std::collections::BTreeMap;

use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::Chunk;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStore {
    chunks: BTreeMap<u64, Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk under its own id. Duplicate ids are rejected.
    pub fn insert(&mut self, chunk: Chunk) -> Result<()> {
        if self.chunks.contains_key(&chunk.id) {
            return Err(RagError::IndexConsistency(format!(
                "duplicate chunk id {}",
                chunk.id
            )));
        }
        self.chunks.insert(chunk.id, chunk);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }
}

impl FromIterator<Chunk> for ChunkStore {
    /// Later chunks overwrite earlier ones with the same id; use
    /// [`ChunkStore::insert`] when duplicates must be rejected.
    fn from_iter<I: IntoIterator<Item = Chunk>>(iter: I) -> Self {
        Self {
            chunks: iter.into_iter().map(|c| (c.id, c)).collect(),
        }
    }
}

/// Check that index and store hold the same number of entries and that
/// every index id resolves in the store.
///
/// Index ids are unique by construction, so equal cardinality plus
/// containment means the two id spaces are identical.
pub fn verify_pairing(index: &VectorIndex, store: &ChunkStore) -> Result<()> {
    if index.len() != store.len() {
        return Err(RagError::IndexConsistency(format!(
            "index holds {} vectors but chunk store holds {} chunks",
            index.len(),
            store.len()
        )));
    }
    if let Some(missing) = index.ids().iter().find(|id| store.get(**id).is_none()) {
        return Err(RagError::IndexConsistency(format!(
            "vector id {} has no chunk in the store",
            missing
        )));
    }
    Ok(())
}
