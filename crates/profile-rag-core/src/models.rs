//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow from source adapters through the index and back out to callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of place a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// A local file (resume PDF, notes, exported text).
    File,
    /// A fetched web page.
    Url,
    /// A profile section (LinkedIn export, GitHub profile).
    Profile,
    /// A source-code repository description or README.
    Repository,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::File => "file",
            OriginKind::Url => "url",
            OriginKind::Profile => "profile",
            OriginKind::Repository => "repository",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(OriginKind::File),
            "url" => Some(OriginKind::Url),
            "profile" => Some(OriginKind::Profile),
            "repository" => Some(OriginKind::Repository),
            _ => None,
        }
    }
}

/// Identifies where a document (and every chunk cut from it) came from.
///
/// Immutable once created; chunks carry a clone of their document's origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRef {
    pub kind: OriginKind,
    /// File path, URL, or `section:name` style identifier.
    pub locator: String,
    /// Human-readable label, when the source provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl OriginRef {
    pub fn new(kind: OriginKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
            title: None,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(OriginKind::File, path)
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::new(OriginKind::Url, url)
    }

    pub fn profile(section: impl Into<String>) -> Self {
        Self::new(OriginKind::Profile, section)
    }

    pub fn repository(url: impl Into<String>) -> Self {
        Self::new(OriginKind::Repository, url)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl fmt::Display for OriginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.title {
            Some(title) => write!(f, "{}:{} ({})", self.kind.as_str(), self.locator, title),
            None => write!(f, "{}:{}", self.kind.as_str(), self.locator),
        }
    }
}

/// A unit of raw input produced by a source adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub origin: OriginRef,
}

impl Document {
    pub fn new(text: impl Into<String>, origin: OriginRef) -> Self {
        Self {
            text: text.into(),
            origin,
        }
    }
}

/// A contiguous window of a document's text; the unit of retrieval.
///
/// `start_offset` and `length` are measured in chars, and
/// `length == text.chars().count()` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Dense, 0-based id assigned in creation order across one ingestion run.
    pub id: u64,
    pub text: String,
    pub origin: OriginRef,
    pub start_offset: usize,
    pub length: usize,
}

/// A retrieved chunk and its distance to the query (smaller is closer).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// Hits ordered by ascending distance, ties broken by ascending chunk id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.hits.iter()
    }

    /// Chunk ids in ranked order.
    pub fn ids(&self) -> Vec<u64> {
        self.hits.iter().map(|h| h.chunk.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_kind_parse_roundtrip() {
        for kind in [
            OriginKind::File,
            OriginKind::Url,
            OriginKind::Profile,
            OriginKind::Repository,
        ] {
            assert_eq!(OriginKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OriginKind::parse("ftp"), None);
    }

    #[test]
    fn origin_display_includes_title() {
        let origin = OriginRef::url("https://example.com/about").with_title("About");
        assert_eq!(origin.to_string(), "url:https://example.com/about (About)");
        assert_eq!(OriginRef::file("data/cv.pdf").to_string(), "file:data/cv.pdf");
    }

    #[test]
    fn origin_serializes_snake_case_kind() {
        let json = serde_json::to_string(&OriginRef::profile("linkedin")).unwrap();
        assert_eq!(json, r#"{"kind":"profile","locator":"linkedin"}"#);
    }
}
