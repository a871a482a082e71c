//! Flat (brute-force) vector index.
//!
//! Vectors are stored contiguously in insertion order alongside their chunk
//! ids. Search computes the distance to every vector, which is exact and
//! fast enough for a profile-sized corpus (hundreds to low thousands of
//! chunks).

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::embedding::Metric;
use crate::error::{RagError, Result};

/// Exact nearest-neighbour index over fixed-dimension vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    metric: Metric,
    ids: Vec<u64>,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dims: usize, metric: Metric) -> Self {
        Self {
            dims,
            metric,
            ids: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Rebuild an index from its raw parts (used when loading from disk).
    pub fn from_parts(dims: usize, metric: Metric, ids: Vec<u64>, data: Vec<f32>) -> Result<Self> {
        if data.len() != ids.len() * dims {
            return Err(RagError::IndexConsistency(format!(
                "vector data holds {} floats, expected {} ids × {} dims",
                data.len(),
                ids.len(),
                dims
            )));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(RagError::IndexConsistency(format!("duplicate vector id {}", dup)));
        }
        Ok(Self {
            dims,
            metric,
            ids,
            data,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Iterate `(id, vector)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[f32])> {
        self.ids
            .iter()
            .copied()
            .zip(self.data.chunks_exact(self.dims.max(1)))
    }

    /// Append a vector. Rejects wrong dimensions and duplicate ids.
    pub fn add(&mut self, id: u64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        if self.contains(id) {
            return Err(RagError::IndexConsistency(format!("duplicate vector id {}", id)));
        }
        self.ids.push(id);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// The `k` nearest ids to `query`, ascending by distance then by id.
    ///
    /// Returns every vector when `k` exceeds the index size.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        let mut scored: Vec<(u64, f32)> = self
            .iter()
            .map(|(id, v)| (id, self.metric.distance(query, v)))
            .collect();
        scored.sort_by(|a, b| compare_hits(*a, *b));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Total order on `(id, distance)` hits: distance first, then id.
fn compare_hits(a: (u64, f32), b: (u64, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(vectors: &[(u64, [f32; 2])]) -> VectorIndex {
        let mut idx = VectorIndex::new(2, Metric::L2);
        for (id, v) in vectors {
            idx.add(*id, v).unwrap();
        }
        idx
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let mut idx = VectorIndex::new(3, Metric::L2);
        let err = idx.add(0, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut idx = index_of(&[(4, [0.0, 0.0])]);
        assert!(matches!(
            idx.add(4, &[1.0, 1.0]),
            Err(RagError::IndexConsistency(_))
        ));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_search_orders_by_distance() {
        let idx = index_of(&[(0, [10.0, 0.0]), (1, [1.0, 0.0]), (2, [5.0, 0.0])]);
        let hits = idx.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![1, 2]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_k_larger_than_index_returns_all() {
        let idx = index_of(&[(0, [3.0, 0.0]), (1, [1.0, 0.0]), (2, [2.0, 0.0])]);
        let hits = idx.search(&[0.0, 0.0], 50).unwrap();
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![1, 2, 0]);
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let idx = index_of(&[(9, [1.0, 0.0]), (3, [0.0, 1.0]), (5, [-1.0, 0.0])]);
        let hits = idx.search(&[0.0, 0.0], 3).unwrap();
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![3, 5, 9]);
    }

    #[test]
    fn test_inner_product_ranks_largest_dot_first() {
        let mut idx = VectorIndex::new(2, Metric::InnerProduct);
        idx.add(0, &[1.0, 0.0]).unwrap();
        idx.add(1, &[0.0, 3.0]).unwrap();
        let hits = idx.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 + 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_rejects_wrong_query_dimension() {
        let idx = index_of(&[(0, [0.0, 0.0])]);
        assert!(idx.search(&[0.0], 1).is_err());
    }

    #[test]
    fn test_from_parts_validates() {
        assert!(VectorIndex::from_parts(2, Metric::L2, vec![0, 1], vec![0.0; 4]).is_ok());
        assert!(VectorIndex::from_parts(2, Metric::L2, vec![0, 1], vec![0.0; 3]).is_err());
        assert!(VectorIndex::from_parts(2, Metric::L2, vec![1, 1], vec![0.0; 4]).is_err());
    }
}
