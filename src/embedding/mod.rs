//! Concrete embedders.
//!
//! Implements the core [`Embedder`] trait for each configured backend:
//! - **[`DisabledEmbedder`]** fails every call; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]** calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaEmbedder`]** calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashingEmbedder`]** (from the core crate) is deterministic and offline.
//! - **`LocalEmbedder`** runs fastembed models in-process (feature `local-embeddings-fastembed`).
//!
//! Use [`create_embedder`] to build the one named in the configuration.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama embedders retry transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Once retries are exhausted the call fails with `RagError::Embedding`;
//! the ingestion run aborts and the query path falls back.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use profile_rag_core::embedding::{check_batch, Embedder, HashingEmbedder};
use profile_rag_core::RagError;

use crate::config::EmbeddingConfig;

/// Dimensionality used by the hashing embedder when `dims` is not set.
const DEFAULT_HASHING_DIMS: usize = 512;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hashing"` | [`HashingEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASHING_DIMS),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// An embedder that always fails.
///
/// Ingestion with this embedder aborts; retrieval always falls back.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("embedding provider is disabled".into()))
    }
}

// ============ Shared HTTP retry ============

/// Send the request built by `request`, retrying 429/5xx/network errors with backoff.
async fn post_json_with_retry(
    request: impl Fn() -> reqwest::RequestBuilder,
    max_retries: u32,
    label: &str,
) -> profile_rag_core::Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "{} embedding retry", label);
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        RagError::Embedding(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                return Err(RagError::Embedding(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(format!("{} request failed: {}", label, e));
                continue;
            }
        }
    }

    Err(RagError::Embedding(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

fn parse_float_array(value: &serde_json::Value, label: &str) -> profile_rag_core::Result<Vec<f32>> {
    let arr = value
        .as_array()
        .ok_or_else(|| RagError::Embedding(format!("Invalid {} response: embedding is not an array", label)))?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| RagError::Embedding(format!("Invalid {} response: non-numeric value", label)))
        })
        .collect()
}

// ============ OpenAI ============

/// Embedder using the OpenAI `POST /v1/embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            || {
                self.client
                    .post(OPENAI_EMBEDDINGS_URL)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
            "OpenAI",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_batch(self.dims, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> profile_rag_core::Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::Embedding("Invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| RagError::Embedding("Invalid OpenAI response: missing embedding".into()))?;
        indexed.push((index, parse_float_array(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder using a local Ollama instance's `POST /api/embed` endpoint.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = post_json_with_retry(
            || self.client.post(&endpoint).json(&body),
            self.max_retries,
            "Ollama",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_batch(self.dims, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> profile_rag_core::Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::Embedding("Invalid Ollama response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|e| parse_float_array(e, "Ollama"))
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use super::*;
    use std::sync::Mutex;

    /// In-process embedder backed by fastembed.
    ///
    /// The model is downloaded from Hugging Face on first use and cached;
    /// after that no network calls are made.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        model: Arc<Mutex<fastembed::TextEmbedding>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let (fastembed_model, default_dims) = resolve_model(&model_name)?;
            let dims = config.dims.unwrap_or(default_dims);
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

            Ok(Self {
                model_name,
                dims,
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
        match name {
            "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
            "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
            "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1.5",
                other
            ),
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_batch(&self, texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            let texts = texts.to_vec();
            let expected = texts.len();
            let vectors = tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| RagError::Embedding("local embedding model poisoned".into()))?;
                model
                    .embed(texts, None)
                    .map_err(|e| RagError::Embedding(format!("Local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| RagError::Embedding(format!("Local embedding task failed: {}", e)))??;
            check_batch(self.dims, expected, &vectors)?;
            Ok(vectors)
        }
    }
}
