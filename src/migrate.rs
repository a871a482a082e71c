use anyhow::Result;
use sqlx::SqlitePool;

/// Create the chunk store schema in a fresh database.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Chunk text and provenance, keyed by the id shared with the vector artifact
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY,
            origin_kind TEXT NOT NULL,
            origin_locator TEXT NOT NULL,
            origin_title TEXT,
            start_offset INTEGER NOT NULL,
            length INTEGER NOT NULL,
            text TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Build metadata: build_id, model, dims, metric, chunk_count, vectors_sha256, built_at
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_origin ON chunks(origin_kind, origin_locator)")
        .execute(pool)
        .await?;

    Ok(())
}
