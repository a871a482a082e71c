//! Error taxonomy for the retrieval pipeline.
//!
//! Ingestion-time errors are fatal to the run that raised them. Query-time
//! errors are recovered by the retrieval service, which substitutes the
//! fallback context; they never reach the caller of `retrieve`.

use std::time::Duration;

use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// A source adapter or the chunker failed irrecoverably.
    #[error("ingestion failed: {0}")]
    Ingestion(String),

    /// The embedding backend was unreachable, rate-limited, or returned
    /// malformed output (wrong count, wrong dimension, empty result).
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Index and chunk store disagree on id space or cardinality, or only
    /// one of the two persisted artifacts could be found.
    #[error("index consistency error: {0}")]
    IndexConsistency(String),

    /// Embedding or search exceeded the configured bound.
    #[error("retrieval timed out after {0:?}")]
    RetrievalTimeout(Duration),

    #[error("invalid chunk policy: {0}")]
    InvalidChunkPolicy(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl RagError {
    /// True for errors that the query path treats as "embedding unavailable".
    pub fn is_embedding_failure(&self) -> bool {
        matches!(
            self,
            RagError::Embedding(_) | RagError::RetrievalTimeout(_) | RagError::DimensionMismatch { .. }
        )
    }
}
