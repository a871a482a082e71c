//! Index status overview.
//!
//! Used by `profile-rag status` to show whether a build exists, whether its
//! two artifacts agree, and what it contains.

use anyhow::Result;
use std::collections::BTreeMap;

use profile_rag_core::RagError;

use crate::config::Config;
use crate::persist::{self, ArtifactPaths};

/// Run the status command: load the artifacts and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let root = &config.storage.root;
    let paths = ArtifactPaths::new(root);

    println!("profile-rag index status");
    println!("========================");
    println!();
    println!("  Root:        {}", root.display());
    println!("  Vectors:     {}", file_size(&paths.vectors));
    println!("  Chunk store: {}", file_size(&paths.chunks));
    println!();

    let loaded = match persist::load(root).await {
        Ok(Some(loaded)) => loaded,
        Ok(None) => {
            println!("  State:       unbuilt (run `profile-rag ingest`)");
            return Ok(());
        }
        Err(e) => match e.downcast_ref::<RagError>() {
            Some(RagError::IndexConsistency(reason)) => {
                println!("  State:       inconsistent ({})", reason);
                println!("               queries will use the fallback context until re-ingested");
                return Ok(());
            }
            _ => return Err(e),
        },
    };

    let meta = &loaded.meta;
    println!("  State:       ready");
    println!("  Build id:    {}", meta.build_id);
    println!("  Built:       {}", meta.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Model:       {}", meta.model);
    println!("  Dimensions:  {}", meta.dims);
    println!("  Metric:      {}", meta.metric.as_str());
    println!("  Chunks:      {}", meta.chunk_count);

    let mut by_kind: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for chunk in loaded.store.iter() {
        let entry = by_kind.entry(chunk.origin.kind.as_str()).or_default();
        entry.0 += 1;
        entry.1 += chunk.length;
    }
    if !by_kind.is_empty() {
        println!();
        println!("  By origin:");
        println!("  {:<14} {:>8} {:>12}", "KIND", "CHUNKS", "CHARS");
        println!("  {}", "-".repeat(36));
        for (kind, (chunks, chars)) in by_kind {
            println!("  {:<14} {:>8} {:>12}", kind, chunks, chars);
        }
    }
    println!();

    Ok(())
}

fn file_size(path: &std::path::Path) -> String {
    match std::fs::metadata(path) {
        Ok(m) => format!("{} ({})", path.display(), format_bytes(m.len())),
        Err(_) => format!("{} (missing)", path.display()),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
