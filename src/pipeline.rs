//! Ingestion coordinator.
//!
//! Owns the document lifecycle end to end: upload ingress, the asynchronous
//! PARSING → CHUNKING → EMBEDDING → INDEXING pipeline, resync, and deletion.
//!
//! Execution model: handlers validate, move the status machine, enqueue a
//! job, and return; a bounded worker pool drains the queue. Per-document
//! exclusivity is not the scheduler's job — the guarded PENDING → PARSING
//! claim in the metadata store is the mutual-exclusion point, so a duplicate
//! job for the same document finds the claim already taken and becomes a
//! no-op. No in-process lock is held across any outbound call.
//!
//! A stage failure records ERROR with the underlying message on the document
//! row; resync is the only recovery path and re-drives the pipeline from
//! parsing.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::blob::{self, BlobStore};
use crate::chunker;
use crate::config::Config;
use crate::embedder::{self, EmbeddingClient};
use crate::error::{Result, ServiceError};
use crate::fingerprint;
use crate::indexer;
use crate::metadata;
use crate::models::{IngestionStatus, SourceDocument};
use crate::parser::DocumentParser;
use crate::search_index::SearchIndex;

/// Depth of the job queue; uploads block (briefly) rather than grow an
/// unbounded backlog.
const JOB_QUEUE_DEPTH: usize = 256;

/// Everything a pipeline run needs, shared across workers.
pub struct PipelineContext {
    pub pool: SqlitePool,
    pub blob: Arc<dyn BlobStore>,
    pub parser: Arc<dyn DocumentParser>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub index: Arc<dyn SearchIndex>,
    pub embed_batch_size: usize,
    pub upload_max_bytes: u64,
}

impl PipelineContext {
    pub fn new(
        pool: SqlitePool,
        blob: Arc<dyn BlobStore>,
        parser: Arc<dyn DocumentParser>,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn SearchIndex>,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            blob,
            parser,
            embedder,
            index,
            embed_batch_size: config.embedding.batch_size,
            upload_max_bytes: config.upload.max_bytes,
        }
    }
}

enum Job {
    Ingest { document_id: String },
    Delete { document_id: String },
}

/// Handle for submitting lifecycle operations. Cheap to clone; the worker
/// pool lives as long as any clone does.
#[derive(Clone)]
pub struct Coordinator {
    ctx: Arc<PipelineContext>,
    jobs: mpsc::Sender<Job>,
}

impl Coordinator {
    /// Spawn the worker pool and return the submission handle.
    pub fn start(ctx: PipelineContext, workers: usize) -> Coordinator {
        let (tx, rx) = mpsc::channel::<Job>(JOB_QUEUE_DEPTH);
        let ctx = Arc::new(ctx);
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let ctx = Arc::clone(&ctx);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    match job {
                        Job::Ingest { document_id } => {
                            if let Err(e) = run_ingestion(&ctx, &document_id).await {
                                error!(worker_id, document_id = %document_id, error = %e, "ingestion run failed");
                            }
                        }
                        Job::Delete { document_id } => {
                            if let Err(e) = run_deletion(&ctx, &document_id).await {
                                error!(worker_id, document_id = %document_id, error = %e, "deletion run failed");
                            }
                        }
                    }
                }
            });
        }

        Coordinator { ctx, jobs: tx }
    }

    /// Ingress: fingerprint, create the PENDING row, store the bytes, and
    /// enqueue the pipeline. Returns the created document; the pipeline runs
    /// after this call returns.
    pub async fn upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<SourceDocument> {
        if filename.trim().is_empty() {
            return Err(ServiceError::validation("filename must not be empty"));
        }
        if bytes.is_empty() {
            return Err(ServiceError::validation("uploaded file is empty"));
        }
        if bytes.len() as u64 > self.ctx.upload_max_bytes {
            return Err(ServiceError::payload_too_large(self.ctx.upload_max_bytes));
        }

        let file_type = fingerprint::resolve_file_type(filename, content_type)?;
        let digest = fingerprint::sha256_hex(bytes);

        if let Some(existing) = metadata::find_by_fingerprint(&self.ctx.pool, &digest).await? {
            info!(
                document_id = %existing.id,
                fingerprint = %digest,
                "duplicate upload rejected"
            );
            return Err(ServiceError::duplicate(&digest));
        }

        let now = Utc::now();
        let document = SourceDocument {
            id: fingerprint::new_document_id(),
            original_filename: filename.to_string(),
            storage_handle: blob::generate_handle(filename),
            file_type,
            byte_length: bytes.len() as i64,
            fingerprint: digest,
            status: IngestionStatus::Pending,
            error_message: None,
            last_ingested_at: None,
            created_at: now,
            updated_at: now,
        };

        // A concurrent identical upload loses here on the UNIQUE constraint.
        metadata::insert_document(&self.ctx.pool, &document).await?;

        if let Err(e) = self
            .ctx
            .blob
            .put(&document.storage_handle, bytes, file_type.mime())
            .await
        {
            // The document never entered the pipeline; remove the orphan row.
            if let Err(cleanup) =
                metadata::delete_document_row(&self.ctx.pool, &document.id).await
            {
                warn!(document_id = %document.id, error = %cleanup, "orphan row cleanup failed");
            }
            return Err(e);
        }

        self.enqueue(Job::Ingest {
            document_id: document.id.clone(),
        })
        .await?;

        info!(
            document_id = %document.id,
            filename, "upload accepted, ingestion queued"
        );
        Ok(document)
    }

    /// Reset a document to PENDING and re-drive the pipeline from parsing.
    pub async fn resync(&self, document_id: &str) -> Result<()> {
        let document = metadata::get_document(&self.ctx.pool, document_id)
            .await?
            .ok_or_else(|| ServiceError::document_not_found(document_id))?;

        if document.status.is_processing() || document.status == IngestionStatus::Deleting {
            return Err(ServiceError::conflict(format!(
                "document {} is {}; resync refused",
                document_id, document.status
            )));
        }

        let applied = metadata::advance_status(
            &self.ctx.pool,
            document_id,
            &[
                IngestionStatus::Pending,
                IngestionStatus::Completed,
                IngestionStatus::Error,
            ],
            IngestionStatus::Pending,
        )
        .await?;
        if !applied {
            // Raced with another operation between the read and the guard.
            return Err(ServiceError::conflict(format!(
                "document {} changed state; resync refused",
                document_id
            )));
        }

        self.enqueue(Job::Ingest {
            document_id: document_id.to_string(),
        })
        .await?;
        info!(document_id, "resync queued");
        Ok(())
    }

    /// Enter the deletion pipeline. Refused while a pipeline run owns the
    /// document; re-entering DELETING is allowed.
    pub async fn delete(&self, document_id: &str) -> Result<()> {
        let document = metadata::get_document(&self.ctx.pool, document_id)
            .await?
            .ok_or_else(|| ServiceError::document_not_found(document_id))?;

        if document.status.is_processing() {
            return Err(ServiceError::conflict(format!(
                "document {} is {}; delete refused",
                document_id, document.status
            )));
        }

        let applied = metadata::advance_status(
            &self.ctx.pool,
            document_id,
            &[
                IngestionStatus::Pending,
                IngestionStatus::Completed,
                IngestionStatus::Error,
                IngestionStatus::Deleting,
            ],
            IngestionStatus::Deleting,
        )
        .await?;
        if !applied {
            return Err(ServiceError::conflict(format!(
                "document {} changed state; delete refused",
                document_id
            )));
        }

        self.enqueue(Job::Delete {
            document_id: document_id.to_string(),
        })
        .await?;
        info!(document_id, "deletion queued");
        Ok(())
    }

    async fn enqueue(&self, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| ServiceError::external("pipeline worker pool is shut down"))
    }
}

/// One pipeline run: claim the document, drive it through the stages, record
/// the outcome. Public so tests can run it to completion deterministically.
pub async fn run_ingestion(ctx: &PipelineContext, document_id: &str) -> Result<()> {
    // PENDING → PARSING is the claim; losing it means another run owns the
    // document (or it left the pipeline) and this job is a no-op.
    let claimed = metadata::advance_status(
        &ctx.pool,
        document_id,
        &[IngestionStatus::Pending],
        IngestionStatus::Parsing,
    )
    .await?;
    if !claimed {
        info!(document_id, "ingestion job skipped; document not PENDING");
        return Ok(());
    }

    let document = match metadata::get_document(&ctx.pool, document_id).await? {
        Some(doc) => doc,
        None => {
            warn!(document_id, "document row vanished after claim");
            return Ok(());
        }
    };

    match drive_stages(ctx, &document).await {
        Ok(chunk_count) => {
            info!(document_id, chunk_count, "ingestion completed");
            Ok(())
        }
        Err(e) => {
            error!(document_id, error = %e, "ingestion failed");
            metadata::record_error(&ctx.pool, document_id, &e.message).await?;
            Err(e)
        }
    }
}

async fn drive_stages(ctx: &PipelineContext, document: &SourceDocument) -> Result<usize> {
    let document_id = document.id.as_str();

    // PARSING
    let bytes = ctx.blob.get(&document.storage_handle).await?;
    let elements = ctx
        .parser
        .parse(&bytes, &document.original_filename, document.file_type)
        .await?;
    info!(document_id, elements = elements.len(), "parsed");

    // CHUNKING
    advance_or_abort(ctx, document_id, IngestionStatus::Parsing, IngestionStatus::Chunking).await?;
    let chunks = chunker::chunk_elements(document_id, &elements, document.file_type);
    info!(document_id, chunks = chunks.len(), "chunked");

    // EMBEDDING
    advance_or_abort(
        ctx,
        document_id,
        IngestionStatus::Chunking,
        IngestionStatus::Embedding,
    )
    .await?;
    let chunks = embedder::embed_chunks(ctx.embedder.as_ref(), ctx.embed_batch_size, chunks).await?;

    // INDEXING
    advance_or_abort(
        ctx,
        document_id,
        IngestionStatus::Embedding,
        IngestionStatus::Indexing,
    )
    .await?;
    indexer::index_document_chunks(&ctx.pool, ctx.index.as_ref(), document_id, &chunks).await?;

    // COMPLETED
    advance_or_abort(
        ctx,
        document_id,
        IngestionStatus::Indexing,
        IngestionStatus::Completed,
    )
    .await?;

    Ok(chunks.len())
}

async fn advance_or_abort(
    ctx: &PipelineContext,
    document_id: &str,
    from: IngestionStatus,
    to: IngestionStatus,
) -> Result<()> {
    let applied = metadata::advance_status(&ctx.pool, document_id, &[from], to).await?;
    if applied {
        Ok(())
    } else {
        Err(ServiceError::ingestion_failed(format!(
            "status left {} externally; pipeline aborted",
            from
        )))
    }
}

/// One deletion run: remove index documents, chunk rows, blob, and the
/// document row. Failures rewind to ERROR so the operator can retry.
pub async fn run_deletion(ctx: &PipelineContext, document_id: &str) -> Result<()> {
    let document = match metadata::get_document(&ctx.pool, document_id).await? {
        Some(doc) => doc,
        // Already gone; deletion is idempotent.
        None => return Ok(()),
    };

    if document.status != IngestionStatus::Deleting {
        info!(document_id, status = %document.status, "deletion job skipped");
        return Ok(());
    }

    match indexer::delete_document_everywhere(
        &ctx.pool,
        ctx.index.as_ref(),
        ctx.blob.as_ref(),
        &document,
    )
    .await
    {
        Ok(()) => {
            info!(document_id, "deletion completed");
            Ok(())
        }
        Err(e) => {
            let message = format!("deletion failed: {}", e.message);
            error!(document_id, error = %e, "deletion failed");
            metadata::record_error(&ctx.pool, document_id, &message).await?;
            Err(ServiceError::deletion_failed(message))
        }
    }
}
