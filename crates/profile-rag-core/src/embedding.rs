//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] capability that the index builder and the
//! retrieval service consume, plus pure helpers for distance computation,
//! batch validation, and vector serialization.
//!
//! Network-backed embedders (OpenAI, Ollama, fastembed) live in the
//! `profile-rag` app crate. [`HashingEmbedder`] lives here because it is
//! pure and deterministic, which makes it the embedder of choice for tests
//! and offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

/// A fallible, possibly slow text-to-vector capability.
///
/// Implementations must preserve order and return exactly one vector of
/// [`dims`](Embedder::dims) floats per input text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a question at query time).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        check_batch(self.dims(), 1, &vectors)?;
        Ok(vectors.swap_remove(0))
    }
}

/// Validate an embedder's output: one vector per input, all of `dims` length.
pub fn check_batch(dims: usize, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        return Err(RagError::Embedding(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RagError::Embedding(format!(
            "expected {}-dimensional vectors, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

/// Distance function used by the index. Smaller is always closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// Negated inner product, so ascending order ranks larger dot products first.
    InnerProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::InnerProduct => "inner_product",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "l2" => Some(Metric::L2),
            "inner_product" => Some(Metric::InnerProduct),
            _ => None,
        }
    }

    /// Stable one-byte tag for the persisted vector artifact.
    pub fn tag(&self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::InnerProduct => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Metric::L2),
            1 => Some(Metric::InnerProduct),
            _ => None,
        }
    }

    /// Distance between equal-length vectors.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => squared_l2(a, b),
            Metric::InnerProduct => -dot(a, b),
        }
    }
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use profile_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Deterministic bag-of-words embedder using feature hashing.
///
/// Lower-cased alphanumeric tokens are hashed with SHA-256 into `dims`
/// buckets; the sign bit of the hash picks +1 or -1 so collisions tend to
/// cancel. The result is L2-normalised, so squared L2 distance between two
/// embeddings is `2 - 2 * cosine`. Texts with no tokens map to the zero
/// vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lower = text.to_lowercase();
        for token in lower.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) % self.dims as u64;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket as usize] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
