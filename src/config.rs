//! TOML configuration.
//!
//! A single file describes where artifacts live, how text is chunked, which
//! embedder and answer backend to use, the HTTP server, and the list of
//! sources to ingest. See `config/profile-rag.example.toml`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use profile_rag_core::chunk::{ChunkPolicy, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use profile_rag_core::embedding::Metric;
use profile_rag_core::search::DEFAULT_TOP_K;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the vector artifact and the chunk store.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn policy(&self) -> Result<ChunkPolicy> {
        Ok(ChunkPolicy::new(self.size, self.overlap)?)
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub metric: Metric,
    /// Upper bound on embedding the question, in milliseconds.
    #[serde(default = "default_retrieval_timeout_ms")]
    pub timeout_ms: u64,
    /// Prefix each passage in the context string with its origin.
    #[serde(default)]
    pub annotate_origins: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_TOP_K,
            metric: Metric::default(),
            timeout_ms: default_retrieval_timeout_ms(),
            annotate_origins: false,
        }
    }
}

fn default_k() -> usize {
    DEFAULT_TOP_K
}
fn default_retrieval_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum embedding batches in flight during ingestion.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Who the corpus is about, and what to say when retrieval cannot run.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProfileConfig {
    #[serde(default)]
    pub subject: Option<String>,
    /// General facts used as context when retrieval is unavailable.
    #[serde(default)]
    pub fallback_context: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default = "default_answer_provider")]
    pub provider: String,
    #[serde(default = "default_answer_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// OpenAI-compatible API base, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_answer_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            provider: default_answer_provider(),
            model: default_answer_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: default_answer_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_answer_provider() -> String {
    "echo".to_string()
}
fn default_answer_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    500
}
fn default_answer_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Browser origins allowed by CORS, in addition to local development ones.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// One `[[sources]]` entry, tagged by `kind`.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Directory(DirectorySourceConfig),
    Web(WebSourceConfig),
    Github(GithubSourceConfig),
    ProfileExport(ProfileExportSourceConfig),
}

impl SourceConfig {
    /// Optional sources are skipped with a warning when they fail.
    pub fn is_optional(&self) -> bool {
        match self {
            SourceConfig::Directory(c) => c.optional,
            SourceConfig::Web(c) => c.optional,
            SourceConfig::Github(c) => c.optional,
            SourceConfig::ProfileExport(c) => c.optional,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectorySourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSourceConfig {
    pub url: String,
    /// Path fragments of same-site links to follow (e.g. `project-details/`).
    #[serde(default)]
    pub follow: Vec<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Pause between page requests, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Element ids split out as their own documents (e.g. `about`, `skills`).
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

fn default_max_pages() -> usize {
    50
}
fn default_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubSourceConfig {
    pub username: String,
    #[serde(default = "default_true")]
    pub include_readmes: bool,
    #[serde(default = "default_github_api")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub optional: bool,
}

fn default_true() -> bool {
    true
}
fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfileExportSourceConfig {
    pub path: PathBuf,
    /// Profile section label, e.g. `linkedin`.
    #[serde(default = "default_section")]
    pub section: String,
    #[serde(default)]
    pub optional: bool,
}

fn default_section() -> String {
    "profile".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    config
        .chunking
        .policy()
        .with_context(|| "Invalid [chunking] section")?;

    // Validate retrieval
    if config.retrieval.k < 1 {
        bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.timeout_ms == 0 {
        bail!("retrieval.timeout_ms must be > 0");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_concurrency == 0 {
        bail!("embedding.max_concurrency must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "hashing" => {
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is 'hashing'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hashing, or local.",
            other
        ),
    }

    match config.answer.provider.as_str() {
        "openai" | "echo" => {}
        other => bail!(
            "Unknown answer provider: '{}'. Must be openai or echo.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[storage]
root = "data/index"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.retrieval.metric, Metric::L2);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.answer.provider, "echo");
        assert!(config.sources.is_empty());
    }

    #[test]
    fn sources_are_tagged_by_kind() {
        let text = format!(
            "{}\n{}",
            MINIMAL,
            r#"
[[sources]]
kind = "directory"
root = "data"

[[sources]]
kind = "web"
url = "http://www.example.tech"
follow = ["project-details/", "work-details/"]
optional = true

[[sources]]
kind = "github"
username = "octocat"

[[sources]]
kind = "profile_export"
path = "data/linkedin_profile.txt"
section = "linkedin"
"#
        );
        let config = parse_config(&text).unwrap();
        assert_eq!(config.sources.len(), 4);
        match &config.sources[0] {
            SourceConfig::Directory(d) => assert_eq!(d.include_globs.len(), 3),
            other => panic!("unexpected source: {:?}", other),
        }
        match &config.sources[1] {
            SourceConfig::Web(w) => {
                assert_eq!(w.follow.len(), 2);
                assert!(w.optional);
            }
            other => panic!("unexpected source: {:?}", other),
        }
        assert!(!config.sources[2].is_optional());
        match &config.sources[3] {
            SourceConfig::ProfileExport(p) => assert_eq!(p.section, "linkedin"),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        let text = format!("{}\n[chunking]\nsize = 100\noverlap = 100\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn rejects_openai_without_dims() {
        let text = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            MINIMAL
        );
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let text = format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn parses_inner_product_metric() {
        let text = format!("{}\n[retrieval]\nmetric = \"inner_product\"\nk = 3\n", MINIMAL);
        let config = parse_config(&text).unwrap();
        assert_eq!(config.retrieval.metric, Metric::InnerProduct);
        assert_eq!(config.retrieval.k, 3);
    }
}
