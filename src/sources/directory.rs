//! Local files: résumés, cover letters, notes.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use profile_rag_core::models::{Document, OriginRef};

use super::SourceAdapter;
use crate::config::DirectorySourceConfig;
use crate::extract::{extract_file, FileFormat};

pub struct DirectorySource {
    config: DirectorySourceConfig,
    include: GlobSet,
    exclude: GlobSet,
}

impl DirectorySource {
    pub fn new(config: DirectorySourceConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            config,
            include,
            exclude,
        })
    }

    /// Matching files under the root, sorted by relative path.
    fn matching_files(&self) -> Result<Vec<(std::path::PathBuf, String)>> {
        let root = &self.config.root;
        if !root.is_dir() {
            bail!("Directory source root does not exist: {}", root.display());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }
            files.push((path.to_path_buf(), rel_str));
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }
}

#[async_trait]
impl SourceAdapter for DirectorySource {
    fn name(&self) -> String {
        format!("directory:{}", self.config.root.display())
    }

    async fn fetch(&self) -> Result<Vec<Document>> {
        let files = self.matching_files()?;
        let mut documents = Vec::with_capacity(files.len());

        for (path, relative) in files {
            if FileFormat::from_path(&path).is_none() {
                tracing::debug!(file = %relative, "skipping file with unsupported extension");
                continue;
            }
            // PDF parsing is CPU-bound, and a malformed file may panic the parser.
            let extracted = tokio::task::spawn_blocking({
                let path = path.clone();
                move || extract_file(&path)
            })
            .await;
            let text = match extracted {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    tracing::warn!(file = %relative, error = %format!("{:#}", e), "skipping unreadable file");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(file = %relative, error = %e, "skipping file that crashed extraction");
                    continue;
                }
            };

            if text.trim().is_empty() {
                tracing::warn!(file = %relative, "file produced no text, skipping");
                continue;
            }
            documents.push(Document::new(
                text,
                OriginRef::file(relative).with_title(file_title(&path)),
            ));
        }

        Ok(documents)
    }
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
