//! Document and chunk-hierarchy repository.
//!
//! The metadata store owns `SourceDocument` rows and the chunk hierarchy.
//! Status transitions are single-statement guarded updates: the caller names
//! the states it expects to move from, and the affected-row count reports
//! whether the guard held. That guard is what serializes pipeline runs per
//! document without any in-process lock.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{store_error, Result, ServiceError};
use crate::models::{FileType, IngestionStatus, SourceDocument, StructuredChunk};

/// Sortable columns for the list endpoint, keyed by their API names.
const SORT_COLUMNS: &[(&str, &str)] = &[
    ("createdAt", "created_at"),
    ("updatedAt", "updated_at"),
    ("originalFilename", "original_filename"),
    ("status", "status"),
    ("byteLength", "byte_length"),
    ("fileType", "file_type"),
];

/// Insert a freshly uploaded document (status PENDING).
///
/// A concurrent upload of identical bytes loses the race on the fingerprint
/// UNIQUE constraint and surfaces as a duplicate.
pub async fn insert_document(pool: &SqlitePool, doc: &SourceDocument) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO documents
            (id, original_filename, storage_handle, file_type, byte_length,
             fingerprint, status, error_message, last_ingested_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.original_filename)
    .bind(&doc.storage_handle)
    .bind(doc.file_type.as_str())
    .bind(doc.byte_length)
    .bind(&doc.fingerprint)
    .bind(doc.status.as_str())
    .bind(&doc.error_message)
    .bind(doc.last_ingested_at.map(|t| t.to_rfc3339()))
    .bind(doc.created_at.to_rfc3339())
    .bind(doc.updated_at.to_rfc3339())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err))
            if db_err.message().contains("documents.fingerprint") =>
        {
            Err(ServiceError::duplicate(&doc.fingerprint))
        }
        Err(e) => Err(store_error(e)),
    }
}

pub async fn find_by_fingerprint(
    pool: &SqlitePool,
    fingerprint: &str,
) -> Result<Option<SourceDocument>> {
    let row = sqlx::query("SELECT * FROM documents WHERE fingerprint = ?")
        .bind(fingerprint)
        .fetch_optional(pool)
        .await
        .map_err(store_error)?;
    row.map(|r| document_from_row(&r)).transpose()
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<SourceDocument>> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(store_error)?;
    row.map(|r| document_from_row(&r)).transpose()
}

/// Paged listing. `sort` is `<field>` or `<field>,<asc|desc>` over the API
/// field names; unknown fields are rejected.
pub async fn list_documents(
    pool: &SqlitePool,
    page: u32,
    size: u32,
    sort: &str,
) -> Result<(Vec<SourceDocument>, i64)> {
    let (column, descending) = parse_sort(sort)?;
    let direction = if descending { "DESC" } else { "ASC" };

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await
        .map_err(store_error)?;

    // Column and direction come from the whitelist above, never from input.
    let sql = format!(
        "SELECT * FROM documents ORDER BY {} {}, id ASC LIMIT ? OFFSET ?",
        column, direction
    );
    let rows = sqlx::query(&sql)
        .bind(size as i64)
        .bind(page as i64 * size as i64)
        .fetch_all(pool)
        .await
        .map_err(store_error)?;

    let docs = rows
        .iter()
        .map(document_from_row)
        .collect::<Result<Vec<_>>>()?;
    Ok((docs, total))
}

fn parse_sort(sort: &str) -> Result<(&'static str, bool)> {
    let mut parts = sort.splitn(2, ',');
    let field = parts.next().unwrap_or("").trim();
    let direction = parts.next().unwrap_or("asc").trim();

    let column = SORT_COLUMNS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, col)| *col)
        .ok_or_else(|| ServiceError::validation(format!("unknown sort field: {}", field)))?;

    let descending = match direction.to_ascii_lowercase().as_str() {
        "asc" => false,
        "desc" => true,
        other => {
            return Err(ServiceError::validation(format!(
                "unknown sort direction: {}",
                other
            )))
        }
    };
    Ok((column, descending))
}

/// Move a document between lifecycle states, but only when its current
/// status is one of `from`. Entering a non-ERROR state clears the error
/// message; entering COMPLETED also stamps `last_ingested_at`.
///
/// Returns whether the guarded update applied.
pub async fn advance_status(
    pool: &SqlitePool,
    id: &str,
    from: &[IngestionStatus],
    to: IngestionStatus,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let placeholders = vec!["?"; from.len()].join(", ");
    let extra = if to == IngestionStatus::Completed {
        ", last_ingested_at = ?"
    } else {
        ""
    };
    let sql = format!(
        "UPDATE documents SET status = ?, error_message = NULL, updated_at = ?{} \
         WHERE id = ? AND status IN ({})",
        extra, placeholders
    );

    let mut query = sqlx::query(&sql).bind(to.as_str()).bind(&now);
    if to == IngestionStatus::Completed {
        query = query.bind(&now);
    }
    query = query.bind(id);
    for state in from {
        query = query.bind(state.as_str());
    }

    let result = query.execute(pool).await.map_err(store_error)?;
    Ok(result.rows_affected() > 0)
}

/// Record a stage failure: status ERROR plus the underlying message. Applies
/// from any in-flight state (the four pipeline stages or DELETING).
pub async fn record_error(pool: &SqlitePool, id: &str, message: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE documents SET status = 'ERROR', error_message = ?, updated_at = ?
        WHERE id = ? AND status IN ('PARSING', 'CHUNKING', 'EMBEDDING', 'INDEXING', 'DELETING')
        "#,
    )
    .bind(message)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await
    .map_err(store_error)?;
    Ok(result.rows_affected() > 0)
}

/// Remove the document row. Chunk rows cascade.
pub async fn delete_document_row(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(store_error)?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_chunk_rows(pool: &SqlitePool, document_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(pool)
        .await
        .map_err(store_error)?;
    Ok(result.rows_affected())
}

/// Insert the hierarchy rows for one document in a single transaction.
/// Title-based chunks are independent sections, so `parent_chunk_id` is NULL.
pub async fn insert_chunk_rows(pool: &SqlitePool, chunks: &[StructuredChunk]) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await.map_err(store_error)?;

    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, parent_chunk_id, sequence_in_document, created_at)
            VALUES (?, ?, NULL, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.sequence_in_document)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;
    }

    tx.commit().await.map_err(store_error)?;
    Ok(())
}

pub async fn chunk_ids_for_document(pool: &SqlitePool, document_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT id FROM chunks WHERE document_id = ? ORDER BY sequence_in_document ASC",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await
    .map_err(store_error)?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SourceDocument> {
    let file_type: String = row.get("file_type");
    let status: String = row.get("status");
    let last_ingested_at: Option<String> = row.get("last_ingested_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(SourceDocument {
        id: row.get("id"),
        original_filename: row.get("original_filename"),
        storage_handle: row.get("storage_handle"),
        file_type: FileType::parse(&file_type).ok_or_else(|| {
            ServiceError::external(format!("corrupt file_type in store: {}", file_type))
        })?,
        byte_length: row.get("byte_length"),
        fingerprint: row.get("fingerprint"),
        status: IngestionStatus::parse(&status).ok_or_else(|| {
            ServiceError::external(format!("corrupt status in store: {}", status))
        })?,
        error_message: row.get("error_message"),
        last_ingested_at: last_ingested_at.as_deref().map(parse_rfc3339).transpose()?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ServiceError::external(format!("corrupt timestamp in store: {}", e)))
}
