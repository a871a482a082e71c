//! Source adapters: where profile documents come from.
//!
//! Each configured `[[sources]]` entry becomes one [`SourceAdapter`]. An
//! adapter fetches its raw material and returns plain-text [`Document`]s
//! tagged with an [`OriginRef`](profile_rag_core::models::OriginRef); the
//! ingest pipeline chunks, embeds, and indexes them.
//!
//! | Kind | Adapter | Origin |
//! |------|---------|--------|
//! | `directory` | [`DirectorySource`] | `file:<relative path>` |
//! | `web` | [`WebSource`] | `url:<page url>` |
//! | `github` | [`GithubSource`] | `repository:<owner/name>` or `profile:github` |
//! | `profile_export` | [`ProfileExportSource`] | `profile:<section>` |
//!
//! Adapters run concurrently; their documents are merged in configuration
//! order. A failing adapter aborts ingestion unless its entry is marked
//! `optional = true`, in which case the failure is logged and the adapter
//! contributes nothing.

mod directory;
mod github;
mod profile_export;
mod web;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use profile_rag_core::models::Document;

use crate::config::{Config, SourceConfig};

pub use directory::DirectorySource;
pub use github::GithubSource;
pub use profile_export::ProfileExportSource;
pub use web::{html_to_text, WebSource};

/// A producer of documents for ingestion.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Short label used in logs (e.g. `"directory:data"`).
    fn name(&self) -> String;

    /// Fetch every document this source currently provides.
    ///
    /// Called on the tokio runtime; may perform network or disk I/O.
    async fn fetch(&self) -> Result<Vec<Document>>;
}

/// One adapter plus whether its failure is tolerated.
pub struct ConfiguredSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub optional: bool,
}

/// Build adapters for every `[[sources]]` entry, in order.
pub fn from_config(config: &Config) -> Result<Vec<ConfiguredSource>> {
    config
        .sources
        .iter()
        .map(|source| {
            let adapter: Arc<dyn SourceAdapter> = match source {
                SourceConfig::Directory(c) => Arc::new(DirectorySource::new(c.clone())?),
                SourceConfig::Web(c) => Arc::new(WebSource::new(c.clone())?),
                SourceConfig::Github(c) => Arc::new(GithubSource::new(c.clone())?),
                SourceConfig::ProfileExport(c) => Arc::new(ProfileExportSource::new(c.clone())),
            };
            Ok(ConfiguredSource {
                adapter,
                optional: source.is_optional(),
            })
        })
        .collect()
}
