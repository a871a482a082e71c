//! A profile exported to a text file (e.g. a LinkedIn "About / Experience"
//! dump). The whole file is one document tagged with its section label.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use profile_rag_core::models::{Document, OriginRef};

use super::SourceAdapter;
use crate::config::ProfileExportSourceConfig;

pub struct ProfileExportSource {
    config: ProfileExportSourceConfig,
}

impl ProfileExportSource {
    pub fn new(config: ProfileExportSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceAdapter for ProfileExportSource {
    fn name(&self) -> String {
        format!("profile_export:{}", self.config.section)
    }

    async fn fetch(&self) -> Result<Vec<Document>> {
        let path = &self.config.path;
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read profile export {}", path.display()))?;
        if text.trim().is_empty() {
            bail!("Profile export is empty: {}", path.display());
        }
        let origin = OriginRef::profile(self.config.section.clone())
            .with_title(path.display().to_string());
        Ok(vec![Document::new(text, origin)])
    }
}
