//! Ingestion pipeline orchestration.
//!
//! Coordinates a full build: sources → chunking → embedding → index +
//! chunk store → persisted artifacts. Builds are all-or-nothing; if any
//! non-optional source or any embedding batch fails, nothing is written
//! and the previous build (if any) stays in place.

use anyhow::{bail, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use profile_rag_core::builder::IndexBuilder;
use profile_rag_core::chunk::{ChunkPolicy, Chunker};
use profile_rag_core::embedding::{check_batch, Embedder, Metric};
use profile_rag_core::models::{Chunk, Document};
use profile_rag_core::RagError;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::persist::{self, ArtifactPaths, IndexMeta};
use crate::sources::{self, ConfiguredSource};

pub const LOCK_FILE: &str = ".ingest.lock";

/// Advisory single-writer lock on a storage root.
///
/// Holds `<root>/.ingest.lock` for its lifetime; the file is removed on drop.
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => bail!(
                "Another ingestion holds {}. Remove it if no ingestion is running.",
                path.display()
            ),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove ingest lock");
        }
    }
}

/// Per-source outcome of a run.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    pub documents: usize,
    /// Set when an optional source failed and was skipped.
    pub skipped: Option<String>,
}

#[derive(Debug)]
pub struct IngestReport {
    pub sources: Vec<SourceReport>,
    pub documents: usize,
    pub chunks: usize,
    pub meta: IndexMeta,
    pub paths: ArtifactPaths,
    pub elapsed: Duration,
}

/// Knobs for [`ingest`], taken from the `[chunking]` and `[embedding]` sections.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub policy: ChunkPolicy,
    pub metric: Metric,
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            policy: config.chunking.policy()?,
            metric: config.retrieval.metric,
            batch_size: config.embedding.batch_size,
            max_concurrency: config.embedding.max_concurrency,
        })
    }
}

/// `profile-rag ingest`: build and persist the index described by `config`.
pub async fn run_ingest(config: &Config, dry_run: bool) -> Result<()> {
    let sources = sources::from_config(config)?;
    let options = IngestOptions::from_config(config)?;

    if dry_run {
        let (documents, reports) = fetch_all(&sources).await?;
        let chunks = Chunker::new(options.policy).chunk_all(&documents);
        println!("ingest (dry-run)");
        print_sources(&reports);
        println!("  documents: {}", documents.len());
        println!("  estimated chunks: {}", chunks.len());
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Configure [embedding] before ingesting.");
    }
    let embedder = create_embedder(&config.embedding)?;

    let report = ingest(&config.storage.root, &sources, embedder, options).await?;

    println!("ingest");
    print_sources(&report.sources);
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("  model: {} ({} dims, {})", report.meta.model, report.meta.dims, report.meta.metric.as_str());
    println!("  build id: {}", report.meta.build_id);
    println!("  vectors: {}", report.paths.vectors.display());
    println!("  chunk store: {}", report.paths.chunks.display());
    println!("  elapsed: {:.1}s", report.elapsed.as_secs_f64());
    println!("ok");
    Ok(())
}

fn print_sources(reports: &[SourceReport]) {
    println!("  sources:");
    for report in reports {
        match &report.skipped {
            Some(reason) => println!("    {:<40} skipped ({})", report.name, reason),
            None => println!("    {:<40} {} documents", report.name, report.documents),
        }
    }
}

/// Run a build against an explicit set of sources and an embedder.
pub async fn ingest(
    root: &Path,
    sources: &[ConfiguredSource],
    embedder: Arc<dyn Embedder>,
    options: IngestOptions,
) -> Result<IngestReport> {
    let started = Instant::now();
    let _lock = BuildLock::acquire(root)?;

    let (documents, source_reports) = fetch_all(sources).await?;
    let chunks = Chunker::new(options.policy).chunk_all(&documents);
    tracing::info!(documents = documents.len(), chunks = chunks.len(), "chunked corpus");

    let vectors = embed_chunks(
        &chunks,
        Arc::clone(&embedder),
        options.batch_size,
        options.max_concurrency,
    )
    .await?;

    let mut builder = IndexBuilder::new(embedder.dims(), options.metric);
    builder.add_batch(&chunks, &vectors)?;
    let (index, store) = builder.finish()?;

    let meta = persist::save(root, &index, &store, embedder.model_name()).await?;

    Ok(IngestReport {
        sources: source_reports,
        documents: documents.len(),
        chunks: chunks.len(),
        meta,
        paths: ArtifactPaths::new(root),
        elapsed: started.elapsed(),
    })
}

/// Fetch every source concurrently, merging documents in configuration order.
///
/// A failing non-optional source is a [`RagError::Ingestion`]; a failing
/// optional one is logged and reported as skipped.
pub async fn fetch_all(sources: &[ConfiguredSource]) -> Result<(Vec<Document>, Vec<SourceReport>)> {
    let mut tasks = JoinSet::new();
    for (position, source) in sources.iter().enumerate() {
        let adapter = Arc::clone(&source.adapter);
        tasks.spawn(async move { (position, adapter.fetch().await) });
    }

    let mut results: Vec<Option<Result<Vec<Document>>>> = (0..sources.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (position, result) = joined?;
        results[position] = Some(result);
    }

    let mut documents = Vec::new();
    let mut reports = Vec::with_capacity(sources.len());
    for (source, result) in sources.iter().zip(results) {
        let name = source.adapter.name();
        match result {
            Some(Ok(docs)) => {
                tracing::info!(source = %name, documents = docs.len(), "fetched source");
                reports.push(SourceReport {
                    name,
                    documents: docs.len(),
                    skipped: None,
                });
                documents.extend(docs);
            }
            Some(Err(e)) if source.optional => {
                tracing::warn!(source = %name, error = %format!("{:#}", e), "optional source failed, skipping");
                reports.push(SourceReport {
                    name,
                    documents: 0,
                    skipped: Some(format!("{:#}", e)),
                });
            }
            Some(Err(e)) => {
                return Err(RagError::Ingestion(format!("source {} failed: {:#}", name, e)).into());
            }
            None => {
                return Err(RagError::Ingestion(format!("source {} did not complete", name)).into());
            }
        }
    }

    Ok((documents, reports))
}

/// Embed chunk texts in batches with at most `max_concurrency` batches in
/// flight. Vectors come back in chunk order. The first failing batch aborts
/// the batches in flight and no further batches are sent.
pub async fn embed_chunks(
    chunks: &[Chunk],
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    max_concurrency: usize,
) -> profile_rag_core::Result<Vec<Vec<f32>>> {
    let batches: Vec<Vec<String>> = chunks
        .chunks(batch_size.max(1))
        .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
        .collect();
    let total = batches.len();
    let dims = embedder.dims();
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks: JoinSet<BatchOutcome> = JoinSet::new();
    let mut results: Vec<Option<Vec<Vec<f32>>>> = (0..total).map(|_| None).collect();

    for (position, texts) in batches.into_iter().enumerate() {
        // Collect finished batches while waiting for a slot, so a failure stops dispatch.
        let permit = loop {
            tokio::select! {
                biased;
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = store_batch(joined, &mut results) {
                        tasks.abort_all();
                        return Err(e);
                    }
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    break permit.map_err(|e| RagError::Embedding(e.to_string()))?;
                }
            }
        };
        let embedder = Arc::clone(&embedder);
        tasks.spawn(async move {
            let _permit = permit;
            let result = embedder
                .embed_batch(&texts)
                .await
                .and_then(|vectors| check_batch(dims, texts.len(), &vectors).map(|()| vectors));
            (position, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = store_batch(joined, &mut results) {
            tasks.abort_all();
            return Err(e);
        }
    }

    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in results {
        vectors.extend(batch.ok_or_else(|| RagError::Embedding("missing embedding batch".into()))?);
    }
    Ok(vectors)
}

type BatchOutcome = (usize, profile_rag_core::Result<Vec<Vec<f32>>>);

fn store_batch(
    joined: std::result::Result<BatchOutcome, JoinError>,
    results: &mut [Option<Vec<Vec<f32>>>],
) -> profile_rag_core::Result<()> {
    let (position, result) =
        joined.map_err(|e| RagError::Embedding(format!("embedding task failed: {}", e)))?;
    let vectors = result?;
    tracing::debug!(batch = position + 1, total = results.len(), "embedded batch");
    results[position] = Some(vectors);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceAdapter;
    use async_trait::async_trait;
    use profile_rag_core::embedding::HashingEmbedder;
    use profile_rag_core::models::OriginRef;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StaticSource {
        name: &'static str,
        texts: Vec<&'static str>,
        delay_ms: u64,
    }

    #[async_trait]
    impl SourceAdapter for StaticSource {
        fn name(&self) -> String {
            self.name.to_string()
        }
        async fn fetch(&self) -> Result<Vec<Document>> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(self
                .texts
                .iter()
                .map(|t| Document::new(*t, OriginRef::profile(self.name)))
                .collect())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl SourceAdapter for BrokenSource {
        fn name(&self) -> String {
            "broken".to_string()
        }
        async fn fetch(&self) -> Result<Vec<Document>> {
            bail!("connection refused")
        }
    }

    /// Records peak concurrency; fails on the batch whose first text is "fail".
    struct CountingEmbedder {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_batch(&self, texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if texts.first().map(String::as_str) == Some("fail") {
                return Err(RagError::Embedding("upstream 503".into()));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn configured(adapter: impl SourceAdapter + 'static, optional: bool) -> ConfiguredSource {
        ConfiguredSource {
            adapter: Arc::new(adapter),
            optional,
        }
    }

    fn chunks_of(texts: &[&str]) -> Vec<Chunk> {
        let docs: Vec<Document> = texts
            .iter()
            .map(|t| Document::new(*t, OriginRef::file("t.txt")))
            .collect();
        Chunker::new(ChunkPolicy::default()).chunk_all(&docs)
    }

    fn options() -> IngestOptions {
        IngestOptions {
            policy: ChunkPolicy::default(),
            metric: Metric::L2,
            batch_size: 2,
            max_concurrency: 2,
        }
    }

    #[tokio::test]
    async fn fetch_all_keeps_configuration_order() {
        let sources = vec![
            configured(StaticSource { name: "slow", texts: vec!["first"], delay_ms: 30 }, false),
            configured(StaticSource { name: "fast", texts: vec!["second", "third"], delay_ms: 0 }, false),
        ];
        let (docs, reports) = fetch_all(&sources).await.unwrap();
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(reports[1].documents, 2);
    }

    #[tokio::test]
    async fn optional_source_failure_is_skipped() {
        let sources = vec![
            configured(BrokenSource, true),
            configured(StaticSource { name: "ok", texts: vec!["kept"], delay_ms: 0 }, false),
        ];
        let (docs, reports) = fetch_all(&sources).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(reports[0].skipped.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn required_source_failure_aborts() {
        let sources = vec![configured(BrokenSource, false)];
        let err = fetch_all(&sources).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::Ingestion(_))));
    }

    #[tokio::test]
    async fn embed_chunks_preserves_order_and_bounds_concurrency() {
        let chunks = chunks_of(&["a", "bb", "ccc", "dddd", "eeeee", "ffffff", "g"]);
        let embedder = Arc::new(CountingEmbedder {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let vectors = embed_chunks(&chunks, embedder.clone(), 2, 2).await.unwrap();
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 1.0]);
        assert!(embedder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn one_failed_batch_fails_the_build() {
        let chunks = chunks_of(&["ok", "ok", "fail", "ok"]);
        let embedder = Arc::new(CountingEmbedder {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let err = embed_chunks(&chunks, embedder, 2, 4).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    /// Fails its first call; later calls succeed after a short delay.
    struct FailsFirstEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FailsFirstEmbedder {
        fn model_name(&self) -> &str {
            "fails-first"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_batch(&self, texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(RagError::Embedding("upstream 429".into()));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    #[tokio::test]
    async fn early_failure_stops_dispatching_batches() {
        let texts: Vec<String> = (0..40).map(|i| format!("chunk {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let chunks = chunks_of(&refs);
        let embedder = Arc::new(FailsFirstEmbedder {
            calls: AtomicUsize::new(0),
        });

        let err = embed_chunks(&chunks, embedder.clone(), 1, 2).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
        assert!(
            embedder.calls.load(Ordering::SeqCst) <= 3,
            "sent {} batches after the first failure",
            embedder.calls.load(Ordering::SeqCst)
        );
    }

    /// Returns one vector too few for the first batch and one too many for the second.
    struct MiscountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for MiscountingEmbedder {
        fn model_name(&self) -> &str {
            "miscounting"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_batch(&self, texts: &[String]) -> profile_rag_core::Result<Vec<Vec<f32>>> {
            let count = match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => texts.len() - 1,
                _ => texts.len() + 1,
            };
            Ok((0..count).map(|_| vec![0.0]).collect())
        }
    }

    #[tokio::test]
    async fn each_batch_must_match_its_input_count() {
        let chunks = chunks_of(&["a", "b", "c", "d"]);
        let embedder = Arc::new(MiscountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let err = embed_chunks(&chunks, embedder, 2, 1).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[tokio::test]
    async fn failed_build_leaves_previous_artifacts() {
        let tmp = TempDir::new().unwrap();
        let sources = vec![configured(
            StaticSource { name: "profile", texts: vec!["Qudus is an ML engineer."], delay_ms: 0 },
            false,
        )];
        let first = ingest(tmp.path(), &sources, Arc::new(HashingEmbedder::new(16)), options())
            .await
            .unwrap();
        assert_eq!(first.chunks, 1);

        let failing = vec![configured(BrokenSource, false)];
        assert!(ingest(tmp.path(), &failing, Arc::new(HashingEmbedder::new(16)), options())
            .await
            .is_err());

        let loaded = persist::load(tmp.path()).await.unwrap().unwrap();
        assert_eq!(loaded.meta.build_id, first.meta.build_id);
        assert!(!tmp.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let tmp = TempDir::new().unwrap();
        let lock = BuildLock::acquire(tmp.path()).unwrap();
        assert!(BuildLock::acquire(tmp.path()).is_err());
        drop(lock);
        assert!(BuildLock::acquire(tmp.path()).is_ok());
    }
}
