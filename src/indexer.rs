//! Two-phase chunk persistence.
//!
//! Chunks are written search-index-first: the index is the bulk store, so a
//! failed bulk write must not leave hierarchy rows behind. When the
//! hierarchy write fails after a successful bulk write, the index side is
//! compensated with a delete-by-document so the two stores do not drift.
//!
//! Prior state for the document is cleared before writing, which makes a
//! resync replace its chunks instead of accreting stale ones: chunk ids are
//! deterministic, but a shrinking document would otherwise leave orphans.

use sqlx::SqlitePool;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::blob::BlobStore;
use crate::error::Result;
use crate::metadata;
use crate::models::{SourceDocument, StructuredChunk};
use crate::search_index::SearchIndex;

/// Attempts per deletion step; steps are independent, a failed step does not
/// undo completed ones.
const DELETE_STEP_ATTEMPTS: u32 = 3;

/// Persist one document's chunks: search-index bulk write, then hierarchy
/// rows in a single transaction.
pub async fn index_document_chunks(
    pool: &SqlitePool,
    index: &dyn SearchIndex,
    document_id: &str,
    chunks: &[StructuredChunk],
) -> Result<()> {
    index.delete_by_document(document_id).await?;
    metadata::delete_chunk_rows(pool, document_id).await?;

    index.bulk_index(chunks).await?;

    if let Err(e) = metadata::insert_chunk_rows(pool, chunks).await {
        if let Err(comp) = index.delete_by_document(document_id).await {
            warn!(
                document_id,
                error = %comp,
                "compensating index deletion failed; resync will retry it"
            );
        }
        return Err(e);
    }

    Ok(())
}

/// Remove every trace of a document: index documents, chunk rows, blob, and
/// finally the document row itself. Steps run in that order and each one is
/// retried independently.
pub async fn delete_document_everywhere(
    pool: &SqlitePool,
    index: &dyn SearchIndex,
    blob: &dyn BlobStore,
    document: &SourceDocument,
) -> Result<()> {
    with_retries(DELETE_STEP_ATTEMPTS, || {
        index.delete_by_document(&document.id)
    })
    .await?;

    with_retries(DELETE_STEP_ATTEMPTS, || async move {
        metadata::delete_chunk_rows(pool, &document.id)
            .await
            .map(|_| ())
    })
    .await?;

    with_retries(DELETE_STEP_ATTEMPTS, || {
        blob.delete(&document.storage_handle)
    })
    .await?;

    with_retries(DELETE_STEP_ATTEMPTS, || async move {
        metadata::delete_document_row(pool, &document.id)
            .await
            .map(|_| ())
    })
    .await?;

    Ok(())
}

async fn with_retries<F, Fut>(attempts: u32, mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
        }
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.expect("at least one attempt"))
}
