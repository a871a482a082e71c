//! Nearest-neighbour retrieval over a paired index and chunk store.
//!
//! The search itself is pure: the caller embeds the question, passes the
//! query vector, and decides what to do on error. The app crate's
//! retrieval service layers the timeout and fallback policy on top.

use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::{RetrievalResult, ScoredChunk};
use crate::store::ChunkStore;

/// Default number of chunks returned per question.
pub const DEFAULT_TOP_K: usize = 5;

/// Find the `k` chunks nearest to `query_vec`.
///
/// Hits are ordered by ascending distance, ties by ascending chunk id. If
/// fewer than `k` chunks exist, all of them are returned. An id present in
/// the index but missing from the store is an [`RagError::IndexConsistency`].
pub fn search(
    index: &VectorIndex,
    store: &ChunkStore,
    query_vec: &[f32],
    k: usize,
) -> Result<RetrievalResult> {
    let nearest = index.search(query_vec, k)?;
    let mut hits = Vec::with_capacity(nearest.len());
    for (id, distance) in nearest {
        let chunk = store.get(id).ok_or_else(|| {
            RagError::IndexConsistency(format!("vector id {} has no chunk in the store", id))
        })?;
        hits.push(ScoredChunk {
            chunk: chunk.clone(),
            distance,
        });
    }
    Ok(RetrievalResult { hits })
}

/// Concatenate hit texts in ranked order, separated by blank lines.
///
/// With `annotate_origins`, each passage is prefixed by a
/// `[source: <origin>]` line.
pub fn format_context(result: &RetrievalResult, annotate_origins: bool) -> String {
    result
        .iter()
        .map(|hit| {
            if annotate_origins {
                format!("[source: {}]\n{}", hit.chunk.origin, hit.chunk.text)
            } else {
                hit.chunk.text.clone()
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::embedding::Metric;
    use crate::models::{Chunk, OriginRef};

    fn chunk(id: u64, text: &str) -> Chunk {
        Chunk {
            id,
            text: text.to_string(),
            origin: OriginRef::file(format!("doc{}.txt", id)),
            start_offset: 0,
            length: text.chars().count(),
        }
    }

    /// Chunks A, B, C on the x axis at 0, 5, 10.
    fn abc() -> (VectorIndex, ChunkStore) {
        let chunks = vec![chunk(0, "A"), chunk(1, "B"), chunk(2, "C")];
        let vectors = vec![vec![0.0, 0.0], vec![5.0, 0.0], vec![10.0, 0.0]];
        let mut builder = IndexBuilder::new(2, Metric::L2);
        builder.add_batch(&chunks, &vectors).unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn test_closest_chunk_first() {
        let (index, store) = abc();
        let result = search(&index, &store, &[5.5, 0.0], 1).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.hits[0].chunk.text, "B");
    }

    #[test]
    fn test_k_above_corpus_returns_all_in_distance_order() {
        let (index, store) = abc();
        let result = search(&index, &store, &[9.0, 0.0], 10).unwrap();
        assert_eq!(result.ids(), vec![2, 1, 0]);
        let d: Vec<f32> = result.iter().map(|h| h.distance).collect();
        assert!(d.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_equidistant_hits_break_ties_by_id() {
        let (index, store) = abc();
        let result = search(&index, &store, &[2.5, 0.0], 3).unwrap();
        assert_eq!(result.ids(), vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_store_entry_is_consistency_error() {
        let (index, _) = abc();
        let partial: ChunkStore = vec![chunk(0, "A")].into_iter().collect();
        let err = search(&index, &partial, &[5.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, RagError::IndexConsistency(_)));
    }

    #[test]
    fn test_format_context() {
        let (index, store) = abc();
        let result = search(&index, &store, &[0.0, 0.0], 2).unwrap();
        assert_eq!(format_context(&result, false), "A\n\nB");
        assert_eq!(
            format_context(&result, true),
            "[source: file:doc0.txt]\nA\n\n[source: file:doc1.txt]\nB"
        );
        assert_eq!(format_context(&RetrievalResult::default(), false), "");
    }
}
