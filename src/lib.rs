//! # profile-rag
//!
//! Retrieval-augmented question answering over a person's professional
//! profile: résumé files, a portfolio site, GitHub, and profile exports.
//!
//! The pure pipeline (chunking, vector index, chunk store, search) lives in
//! `profile-rag-core`. This crate adds everything that touches the outside
//! world: sources, embedding backends, persistence, the retrieval service
//! with its fallback policy, answer assembly, and the HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────────┐
//! │   Sources    │──▶│ Chunk+Embed  │──▶│ index.vec         │
//! │ dir/web/gh/… │   │ (bounded)    │   │ chunks.sqlite     │
//! └──────────────┘   └──────────────┘   └─────────┬─────────┘
//!                                                 │ load
//!                                                 ▼
//!                    ┌──────────────┐   ┌───────────────────┐
//!   POST /api/chat ─▶│  Assembler   │◀──│ RetrievalService  │
//!                    │ openai/echo  │   │ timeout+fallback  │
//!                    └──────────────┘   └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`sources`] | Source adapters (directory, web, GitHub, profile export) |
//! | [`extract`] | PDF/DOCX text extraction |
//! | [`embedding`] | Embedding backends |
//! | [`ingest`] | Build orchestration and the single-writer lock |
//! | [`persist`] | Vector artifact and chunk store on disk |
//! | [`retriever`] | Query-time retrieval with fallback |
//! | [`answer`] | Answer assembly |
//! | [`server`] | HTTP chat API |
//! | [`query`] | `query` command |
//! | [`status`] | `status` command |
//! | [`db`] | SQLite connections |
//! | [`migrate`] | Chunk store schema |

pub mod answer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod persist;
pub mod query;
pub mod retriever;
pub mod server;
pub mod sources;
pub mod status;

pub use profile_rag_core as core;
