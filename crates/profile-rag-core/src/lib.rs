//! # profile-rag core
//!
//! Shared, runtime-free logic for the profile retrieval pipeline: data
//! models, chunking, the embedder trait, the flat vector index and its
//! paired chunk store, index building, and nearest-neighbour retrieval.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! The `profile-rag` application crate supplies concrete embedders,
//! persistence, timeouts, and the fallback policy.
//!
//! ```text
//! Document ──▶ Chunker ──▶ Embedder ──▶ IndexBuilder ──▶ (VectorIndex, ChunkStore)
//!                                                              │
//!                                question ──▶ Embedder ──▶ search ──▶ RetrievalResult
//! ```

pub mod builder;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod search;
pub mod store;

pub use error::{RagError, Result};
