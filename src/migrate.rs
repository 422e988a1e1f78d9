//! Database schema migrations.
//!
//! Creates the documents and chunks relations and their indexes. Designed to
//! be idempotent; run via `docbase init` or at server startup.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            original_filename TEXT NOT NULL,
            storage_handle TEXT NOT NULL,
            file_type TEXT NOT NULL,
            byte_length INTEGER NOT NULL,
            fingerprint TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            error_message TEXT,
            last_ingested_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            parent_chunk_id TEXT,
            sequence_in_document INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(document_id, sequence_in_document),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
            FOREIGN KEY (parent_chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_parent_chunk_id ON chunks(parent_chunk_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
