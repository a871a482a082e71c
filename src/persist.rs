//! On-disk artifacts for a built index.
//!
//! A build is stored as two files under the storage root:
//!
//! | File | Contents |
//! |------|----------|
//! | `index.vec` | Binary vector artifact (header + `(id, vector)` records) |
//! | `chunks.sqlite` | Chunk text, origins, and build metadata |
//!
//! # Vector artifact layout
//!
//! All integers little-endian.
//!
//! ```text
//! magic    b"PRVI"
//! version  u32      (currently 1)
//! metric   u8       (0 = l2, 1 = inner_product)
//! dims     u32
//! count    u64
//! build_id [u8; 16] (UUID, also recorded in the chunk store)
//! count × { id: u64, vector: dims × f32 }
//! ```
//!
//! # Pairing
//!
//! Both files carry the same `build_id`, and the chunk store records the
//! SHA-256 of the vector artifact. Saving writes both under temporary names
//! and renames the vector file first, then the chunk store. A crash between
//! the two renames leaves mismatched build ids, which [`load`] reports as an
//! index consistency error rather than serving a mixed index.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use profile_rag_core::embedding::{blob_to_vec, vec_to_blob, Metric};
use profile_rag_core::index::VectorIndex;
use profile_rag_core::models::{Chunk, OriginKind, OriginRef};
use profile_rag_core::store::{verify_pairing, ChunkStore};
use profile_rag_core::RagError;

use crate::{db, migrate};

pub const VECTOR_FILE: &str = "index.vec";
pub const CHUNK_STORE_FILE: &str = "chunks.sqlite";

const MAGIC: &[u8; 4] = b"PRVI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8 + 16;

/// Metadata recorded alongside a build.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub build_id: Uuid,
    pub model: String,
    pub dims: usize,
    pub metric: Metric,
    pub chunk_count: usize,
    pub vectors_sha256: String,
    pub built_at: DateTime<Utc>,
}

/// A loaded, validated build.
#[derive(Debug)]
pub struct LoadedIndex {
    pub meta: IndexMeta,
    pub index: VectorIndex,
    pub store: ChunkStore,
}

/// Locations of the two artifacts under a storage root.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub vectors: PathBuf,
    pub chunks: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            vectors: root.join(VECTOR_FILE),
            chunks: root.join(CHUNK_STORE_FILE),
        }
    }
}

fn inconsistent(message: impl Into<String>) -> anyhow::Error {
    RagError::IndexConsistency(message.into()).into()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Persist a paired index and chunk store under `root`.
///
/// Replaces any previous build. Returns the metadata written.
pub async fn save(
    root: &Path,
    index: &VectorIndex,
    store: &ChunkStore,
    model: &str,
) -> Result<IndexMeta> {
    verify_pairing(index, store)?;
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("Failed to create storage root {}", root.display()))?;

    let paths = ArtifactPaths::new(root);
    let build_id = Uuid::new_v4();
    let bytes = encode_vectors(index, build_id);
    let meta = IndexMeta {
        build_id,
        model: model.to_string(),
        dims: index.dims(),
        metric: index.metric(),
        chunk_count: index.len(),
        vectors_sha256: sha256_hex(&bytes),
        built_at: Utc::now(),
    };

    let vectors_tmp = tmp_path(&paths.vectors);
    let chunks_tmp = tmp_path(&paths.chunks);
    remove_if_exists(&chunks_tmp).await?;

    let mut file = tokio::fs::File::create(&vectors_tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    write_chunk_store(&chunks_tmp, store, &meta).await?;

    tokio::fs::rename(&vectors_tmp, &paths.vectors).await?;
    tokio::fs::rename(&chunks_tmp, &paths.chunks).await?;

    tracing::info!(
        build_id = %meta.build_id,
        chunks = meta.chunk_count,
        root = %root.display(),
        "index saved"
    );
    Ok(meta)
}

/// Load the build under `root`.
///
/// Returns `Ok(None)` when neither artifact exists (nothing has been built
/// yet). Any other disagreement between the two files is an
/// [`RagError::IndexConsistency`].
pub async fn load(root: &Path) -> Result<Option<LoadedIndex>> {
    let paths = ArtifactPaths::new(root);
    match (paths.vectors.exists(), paths.chunks.exists()) {
        (false, false) => return Ok(None),
        (true, false) => {
            return Err(inconsistent(format!(
                "{} exists but {} is missing",
                paths.vectors.display(),
                paths.chunks.display()
            )))
        }
        (false, true) => {
            return Err(inconsistent(format!(
                "{} exists but {} is missing",
                paths.chunks.display(),
                paths.vectors.display()
            )))
        }
        (true, true) => {}
    }

    let bytes = tokio::fs::read(&paths.vectors)
        .await
        .with_context(|| format!("Failed to read {}", paths.vectors.display()))?;
    let (build_id, index) = decode_vectors(&bytes)?;

    let pool = db::open_read_only(&paths.chunks).await.map_err(|e| {
        inconsistent(format!(
            "{} is not a readable chunk store: {:#}",
            paths.chunks.display(),
            e
        ))
    })?;
    let meta = read_meta(&pool).await;
    let store = read_chunks(&pool).await;
    pool.close().await;
    let (meta, store) = (meta?, store?);

    if meta.build_id != build_id {
        return Err(inconsistent(format!(
            "vector artifact is from build {} but chunk store is from build {}",
            build_id, meta.build_id
        )));
    }
    if meta.vectors_sha256 != sha256_hex(&bytes) {
        return Err(inconsistent("vector artifact checksum does not match"));
    }
    if meta.dims != index.dims() || meta.metric != index.metric() {
        return Err(inconsistent(format!(
            "chunk store records {}-dim {} vectors, artifact holds {}-dim {}",
            meta.dims,
            meta.metric.as_str(),
            index.dims(),
            index.metric().as_str()
        )));
    }
    if meta.chunk_count != index.len() {
        return Err(inconsistent(format!(
            "chunk store records {} chunks, artifact holds {} vectors",
            meta.chunk_count,
            index.len()
        )));
    }
    verify_pairing(&index, &store)?;

    Ok(Some(LoadedIndex { meta, index, store }))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ============ Vector artifact ============

fn encode_vectors(index: &VectorIndex, build_id: Uuid) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + index.len() * (8 + index.dims() * 4));
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(index.metric().tag());
    out.extend_from_slice(&(index.dims() as u32).to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    out.extend_from_slice(build_id.as_bytes());
    for (id, vector) in index.iter() {
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&vec_to_blob(vector));
    }
    out
}

fn decode_vectors(bytes: &[u8]) -> Result<(Uuid, VectorIndex)> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(inconsistent("vector artifact has no valid header"));
    }
    let version = u32::from_le_bytes(read_array(bytes, 4));
    if version != FORMAT_VERSION {
        return Err(inconsistent(format!(
            "unsupported vector artifact version {}",
            version
        )));
    }
    let metric = Metric::from_tag(bytes[8])
        .ok_or_else(|| inconsistent(format!("unknown metric tag {}", bytes[8])))?;
    let dims = u32::from_le_bytes(read_array(bytes, 9)) as usize;
    let count = u64::from_le_bytes(read_array(bytes, 13)) as usize;
    let build_id = Uuid::from_bytes(read_array(bytes, 21));

    let record_len = 8 + dims * 4;
    let body = &bytes[HEADER_LEN..];
    if body.len() != count.saturating_mul(record_len) {
        return Err(inconsistent(format!(
            "vector artifact declares {} records of {} bytes but holds {} bytes",
            count,
            record_len,
            body.len()
        )));
    }

    let mut ids = Vec::with_capacity(count);
    let mut data = Vec::with_capacity(count * dims);
    for record in body.chunks_exact(record_len) {
        ids.push(u64::from_le_bytes(read_array(record, 0)));
        data.extend(blob_to_vec(&record[8..]));
    }
    let index = VectorIndex::from_parts(dims, metric, ids, data)
        .map_err(|e| inconsistent(format!("vector artifact is malformed: {}", e)))?;
    Ok((build_id, index))
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

// ============ Chunk store ============

async fn write_chunk_store(path: &Path, store: &ChunkStore, meta: &IndexMeta) -> Result<()> {
    let pool = db::create(path).await?;
    migrate::create_schema(&pool).await?;

    let mut tx = pool.begin().await?;
    for chunk in store.iter() {
        sqlx::query(
            "INSERT INTO chunks (id, origin_kind, origin_locator, origin_title, start_offset, length, text)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(chunk.id as i64)
        .bind(chunk.origin.kind.as_str())
        .bind(&chunk.origin.locator)
        .bind(chunk.origin.title.as_deref())
        .bind(chunk.start_offset as i64)
        .bind(chunk.length as i64)
        .bind(&chunk.text)
        .execute(&mut *tx)
        .await?;
    }

    let entries = [
        ("build_id", meta.build_id.to_string()),
        ("model", meta.model.clone()),
        ("dims", meta.dims.to_string()),
        ("metric", meta.metric.as_str().to_string()),
        ("chunk_count", meta.chunk_count.to_string()),
        ("vectors_sha256", meta.vectors_sha256.clone()),
        ("built_at", meta.built_at.to_rfc3339()),
    ];
    for (key, value) in entries {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    pool.close().await;
    Ok(())
}

async fn read_meta(pool: &SqlitePool) -> Result<IndexMeta> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await
        .map_err(|e| inconsistent(format!("chunk store metadata is unreadable: {}", e)))?;
    let map: HashMap<String, String> = rows.into_iter().collect();
    let get = |key: &str| {
        map.get(key)
            .cloned()
            .ok_or_else(|| inconsistent(format!("chunk store metadata is missing '{}'", key)))
    };

    let build_id = Uuid::parse_str(&get("build_id")?)
        .map_err(|e| inconsistent(format!("invalid build_id: {}", e)))?;
    let metric_name = get("metric")?;
    let metric = Metric::parse(&metric_name)
        .ok_or_else(|| inconsistent(format!("unknown metric '{}'", metric_name)))?;
    let built_at = DateTime::parse_from_rfc3339(&get("built_at")?)
        .map_err(|e| inconsistent(format!("invalid built_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(IndexMeta {
        build_id,
        model: get("model")?,
        dims: parse_count(&get("dims")?, "dims")?,
        metric,
        chunk_count: parse_count(&get("chunk_count")?, "chunk_count")?,
        vectors_sha256: get("vectors_sha256")?,
        built_at,
    })
}

fn parse_count(value: &str, key: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| inconsistent(format!("invalid {} '{}'", key, value)))
}

type ChunkRow = (i64, String, String, Option<String>, i64, i64, String);

async fn read_chunks(pool: &SqlitePool) -> Result<ChunkStore> {
    let rows: Vec<ChunkRow> = sqlx::query_as(
        "SELECT id, origin_kind, origin_locator, origin_title, start_offset, length, text
         FROM chunks ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| inconsistent(format!("chunk store rows are unreadable: {}", e)))?;

    let mut store = ChunkStore::new();
    for (id, kind, locator, title, start_offset, length, text) in rows {
        let kind = OriginKind::parse(&kind)
            .ok_or_else(|| inconsistent(format!("chunk {} has unknown origin kind '{}'", id, kind)))?;
        store.insert(Chunk {
            id: id as u64,
            text,
            origin: OriginRef {
                kind,
                locator,
                title,
            },
            start_offset: start_offset as usize,
            length: length as usize,
        })?;
    }
    Ok(store)
}
