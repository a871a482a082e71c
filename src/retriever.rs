//! Query-time retrieval with graceful degradation.
//!
//! A [`RetrievalService`] owns one read-only index and chunk store, plus
//! the embedder used for questions. It is built once (from disk or from
//! parts) and shared by reference or `Arc` between any number of callers.
//!
//! Retrieval never fails from the caller's point of view. When the index
//! is unbuilt, empty, or inconsistent, or when the question cannot be
//! embedded in time, [`RetrievalService::retrieve`] returns
//! [`Retrieval::Fallback`] carrying the configured fallback context and
//! the reason it was used.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use profile_rag_core::embedding::Embedder;
use profile_rag_core::index::VectorIndex;
use profile_rag_core::models::RetrievalResult;
use profile_rag_core::search::{format_context, search, DEFAULT_TOP_K};
use profile_rag_core::store::{verify_pairing, ChunkStore};
use profile_rag_core::RagError;

use crate::config::Config;
use crate::persist::{self, IndexMeta};

/// Used when no `profile.fallback_context` is configured.
pub const DEFAULT_FALLBACK_CONTEXT: &str = "No indexed profile material is available right now. \
The subject is a professional whose background includes engineering work, projects, and \
education described on their portfolio, resume, and public profiles. If a question needs \
specific details, say that the information is not available rather than guessing.";

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub k: usize,
    /// Upper bound on embedding the question.
    pub timeout: Duration,
    pub annotate_origins: bool,
    pub fallback_context: String,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_TOP_K,
            timeout: Duration::from_secs(10),
            annotate_origins: false,
            fallback_context: DEFAULT_FALLBACK_CONTEXT.to_string(),
        }
    }
}

impl RetrievalOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            timeout: Duration::from_millis(config.retrieval.timeout_ms),
            annotate_origins: config.retrieval.annotate_origins,
            fallback_context: config
                .profile
                .fallback_context
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FALLBACK_CONTEXT.to_string()),
        }
    }
}

/// Why the fallback context was used instead of retrieved chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No artifacts have been built or loaded.
    Unbuilt,
    /// The index holds zero chunks.
    EmptyIndex,
    /// The question could not be embedded.
    Embedding,
    /// Embedding the question exceeded the timeout.
    Timeout,
    /// Index and chunk store disagree.
    Inconsistent,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Unbuilt => "unbuilt",
            FallbackReason::EmptyIndex => "empty_index",
            FallbackReason::Embedding => "embedding",
            FallbackReason::Timeout => "timeout",
            FallbackReason::Inconsistent => "inconsistent",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`RetrievalService::retrieve`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Retrieval {
    Hits(RetrievalResult),
    Fallback {
        context: String,
        reason: FallbackReason,
    },
}

impl Retrieval {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Retrieval::Fallback { .. })
    }

    pub fn hits(&self) -> Option<&RetrievalResult> {
        match self {
            Retrieval::Hits(result) => Some(result),
            Retrieval::Fallback { .. } => None,
        }
    }

    /// Concatenated chunk texts, or the fallback context.
    pub fn context(&self, annotate_origins: bool) -> String {
        match self {
            Retrieval::Hits(result) => format_context(result, annotate_origins),
            Retrieval::Fallback { context, .. } => context.clone(),
        }
    }
}

/// Whether the service has an index to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Unbuilt,
    Ready,
}

enum IndexState {
    Unbuilt(FallbackReason),
    Ready {
        index: VectorIndex,
        store: ChunkStore,
        meta: Option<IndexMeta>,
    },
}

pub struct RetrievalService {
    state: IndexState,
    embedder: Arc<dyn Embedder>,
    options: RetrievalOptions,
}

impl RetrievalService {
    /// A service with no index; every call falls back.
    pub fn unbuilt(embedder: Arc<dyn Embedder>, options: RetrievalOptions) -> Self {
        Self {
            state: IndexState::Unbuilt(FallbackReason::Unbuilt),
            embedder,
            options,
        }
    }

    /// Load the artifacts under `root`.
    ///
    /// Missing artifacts give an unbuilt service. Inconsistent artifacts are
    /// logged as a data-integrity warning and also give an unbuilt service.
    /// Other I/O failures are returned.
    pub async fn load(
        root: &Path,
        embedder: Arc<dyn Embedder>,
        options: RetrievalOptions,
    ) -> Result<Self> {
        let state = match persist::load(root).await {
            Ok(Some(loaded)) => {
                if loaded.index.dims() != embedder.dims() {
                    tracing::warn!(
                        index_dims = loaded.index.dims(),
                        embedder_dims = embedder.dims(),
                        index_model = %loaded.meta.model,
                        embedder_model = embedder.model_name(),
                        "index was built with a different embedding dimension; queries will fall back"
                    );
                }
                tracing::info!(
                    build_id = %loaded.meta.build_id,
                    chunks = loaded.index.len(),
                    "index loaded"
                );
                IndexState::Ready {
                    index: loaded.index,
                    store: loaded.store,
                    meta: Some(loaded.meta),
                }
            }
            Ok(None) => {
                tracing::info!(root = %root.display(), "no index built yet");
                IndexState::Unbuilt(FallbackReason::Unbuilt)
            }
            Err(e) => match e.downcast_ref::<RagError>() {
                Some(RagError::IndexConsistency(reason)) => {
                    tracing::warn!(root = %root.display(), %reason, "index artifacts are inconsistent; serving fallback context");
                    IndexState::Unbuilt(FallbackReason::Inconsistent)
                }
                _ => return Err(e),
            },
        };
        Ok(Self {
            state,
            embedder,
            options,
        })
    }

    /// Wrap an in-memory index and chunk store.
    pub fn from_parts(
        index: VectorIndex,
        store: ChunkStore,
        embedder: Arc<dyn Embedder>,
        options: RetrievalOptions,
    ) -> Self {
        let state = match verify_pairing(&index, &store) {
            Ok(()) => IndexState::Ready {
                index,
                store,
                meta: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "index and chunk store are not paired; serving fallback context");
                IndexState::Unbuilt(FallbackReason::Inconsistent)
            }
        };
        Self {
            state,
            embedder,
            options,
        }
    }

    pub fn status(&self) -> IndexStatus {
        match self.state {
            IndexState::Unbuilt(_) => IndexStatus::Unbuilt,
            IndexState::Ready { .. } => IndexStatus::Ready,
        }
    }

    /// Build metadata, when loaded from disk.
    pub fn meta(&self) -> Option<&IndexMeta> {
        match &self.state {
            IndexState::Ready { meta, .. } => meta.as_ref(),
            IndexState::Unbuilt(_) => None,
        }
    }

    /// Number of indexed chunks (0 when unbuilt).
    pub fn len(&self) -> usize {
        match &self.state {
            IndexState::Ready { index, .. } => index.len(),
            IndexState::Unbuilt(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Retrieve the `k` chunks nearest to `question` (`k = 0` is treated as 1).
    pub async fn retrieve(&self, question: &str, k: usize) -> Retrieval {
        match self.try_retrieve(question, k.max(1)).await {
            Ok(result) => Retrieval::Hits(result),
            Err(reason) => {
                tracing::warn!(%reason, "retrieval unavailable, using fallback context");
                Retrieval::Fallback {
                    context: self.options.fallback_context.clone(),
                    reason,
                }
            }
        }
    }

    /// Retrieve and concatenate into a context string.
    pub async fn context(&self, question: &str, k: usize) -> String {
        self.retrieve(question, k)
            .await
            .context(self.options.annotate_origins)
    }

    async fn try_retrieve(
        &self,
        question: &str,
        k: usize,
    ) -> std::result::Result<RetrievalResult, FallbackReason> {
        let (index, store) = match &self.state {
            IndexState::Unbuilt(reason) => return Err(*reason),
            IndexState::Ready { index, store, .. } => (index, store),
        };
        if index.is_empty() {
            return Err(FallbackReason::EmptyIndex);
        }

        let query = match tokio::time::timeout(self.options.timeout, self.embedder.embed(question)).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "question embedding failed");
                return Err(FallbackReason::Embedding);
            }
            Err(_) => {
                let e = RagError::RetrievalTimeout(self.options.timeout);
                tracing::warn!(error = %e, "question embedding timed out");
                return Err(FallbackReason::Timeout);
            }
        };

        search(index, store, &query, k).map_err(|e| {
            tracing::warn!(error = %e, "search failed");
            match e {
                RagError::IndexConsistency(_) => FallbackReason::Inconsistent,
                _ => FallbackReason::Embedding,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use profile_rag_core::builder::IndexBuilder;
    use profile_rag_core::embedding::{HashingEmbedder, Metric};
    use profile_rag_core::models::{Chunk, OriginRef};

    /// Embeds every question to the same vector.
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed_batch(&self, texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, _texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
            Err(RagError::Embedding("429 rate limited".into()))
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
        }
    }

    fn abc() -> (VectorIndex, ChunkStore) {
        let chunks: Vec<Chunk> = ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                id: i as u64,
                text: t.to_string(),
                origin: OriginRef::file("abc.txt"),
                start_offset: 0,
                length: 1,
            })
            .collect();
        let mut builder = IndexBuilder::new(2, Metric::L2);
        builder
            .add_batch(&chunks, &[vec![0.0, 0.0], vec![5.0, 0.0], vec![10.0, 0.0]])
            .unwrap();
        builder.finish().unwrap()
    }

    fn options() -> RetrievalOptions {
        RetrievalOptions {
            timeout: Duration::from_millis(50),
            fallback_context: "general facts".to_string(),
            ..RetrievalOptions::default()
        }
    }

    fn service(embedder: impl Embedder + 'static) -> RetrievalService {
        let (index, store) = abc();
        RetrievalService::from_parts(index, store, Arc::new(embedder), options())
    }

    #[tokio::test]
    async fn nearest_chunk_comes_first() {
        let svc = service(FixedEmbedder(vec![6.0, 0.0]));
        assert_eq!(svc.status(), IndexStatus::Ready);
        let retrieval = svc.retrieve("which?", 2).await;
        assert_eq!(retrieval.hits().unwrap().ids(), vec![1, 2]);
        assert_eq!(svc.context("which?", 2).await, "B\n\nC");
    }

    #[tokio::test]
    async fn zero_k_is_clamped_to_one() {
        let svc = service(FixedEmbedder(vec![0.0, 0.0]));
        let retrieval = svc.retrieve("q", 0).await;
        assert_eq!(retrieval.hits().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_falls_back() {
        let svc = service(FailingEmbedder);
        let retrieval = svc.retrieve("q", 3).await;
        assert_eq!(
            retrieval,
            Retrieval::Fallback {
                context: "general facts".to_string(),
                reason: FallbackReason::Embedding,
            }
        );
        assert_eq!(svc.context("q", 3).await, "general facts");
    }

    #[tokio::test]
    async fn slow_embedding_times_out() {
        let svc = service(SlowEmbedder);
        let retrieval = svc.retrieve("q", 1).await;
        assert!(matches!(
            retrieval,
            Retrieval::Fallback { reason: FallbackReason::Timeout, .. }
        ));
    }

    #[tokio::test]
    async fn wrong_dimension_question_falls_back() {
        let svc = service(FixedEmbedder(vec![1.0, 2.0, 3.0]));
        assert!(svc.retrieve("q", 1).await.is_fallback());
    }

    #[tokio::test]
    async fn empty_index_falls_back() {
        let svc = RetrievalService::from_parts(
            VectorIndex::new(4, Metric::L2),
            ChunkStore::new(),
            Arc::new(HashingEmbedder::new(4)),
            options(),
        );
        assert!(matches!(
            svc.retrieve("q", 1).await,
            Retrieval::Fallback { reason: FallbackReason::EmptyIndex, .. }
        ));
    }

    #[tokio::test]
    async fn unpaired_parts_are_treated_as_unbuilt() {
        let (index, _) = abc();
        let svc = RetrievalService::from_parts(
            index,
            ChunkStore::new(),
            Arc::new(FixedEmbedder(vec![0.0, 0.0])),
            options(),
        );
        assert_eq!(svc.status(), IndexStatus::Unbuilt);
        assert!(matches!(
            svc.retrieve("q", 1).await,
            Retrieval::Fallback { reason: FallbackReason::Inconsistent, .. }
        ));
    }

    #[tokio::test]
    async fn load_without_artifacts_is_unbuilt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let svc = RetrievalService::load(tmp.path(), Arc::new(HashingEmbedder::new(8)), options())
            .await
            .unwrap();
        assert_eq!(svc.status(), IndexStatus::Unbuilt);
        assert!(svc.is_empty());
        assert!(matches!(
            svc.retrieve("q", 1).await,
            Retrieval::Fallback { reason: FallbackReason::Unbuilt, .. }
        ));
    }

    #[test]
    fn options_fall_back_to_default_context() {
        let config = crate::config::parse_config("[storage]\nroot = \"x\"\n[profile]\nfallback_context = \"  \"\n").unwrap();
        let opts = RetrievalOptions::from_config(&config);
        assert_eq!(opts.fallback_context, DEFAULT_FALLBACK_CONTEXT);
        assert_eq!(opts.timeout, Duration::from_millis(10_000));
    }
}
