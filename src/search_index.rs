//! Search-index adapter.
//!
//! Talks to an OpenSearch-compatible index over HTTP: bulk chunk writes,
//! query execution, single-document fetches, and delete-by-document. This is
//! the bulk store for chunk content and vectors; the metadata store only
//! keeps the hierarchy rows.
//!
//! Bulk requests are NDJSON sent as raw UTF-8 bytes — chunk content passes
//! through without any intermediate re-encoding, so non-ASCII code points
//! survive byte-for-byte.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use crate::config::SearchIndexConfig;
use crate::error::{Result, ServiceError};
use crate::models::StructuredChunk;

/// One hit returned from a query: id, raw engine score, and the stored
/// source document.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk_id: String,
    pub score: f64,
    pub source: serde_json::Value,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the index with explicit mappings when it does not exist.
    async fn ensure_index(&self) -> Result<()>;

    /// Write one document's chunks in a single bulk request. Any per-item
    /// failure fails the whole call.
    async fn bulk_index(&self, chunks: &[StructuredChunk]) -> Result<()>;

    /// Execute a query DSL body and return hits in engine order.
    async fn search(&self, body: &serde_json::Value) -> Result<Vec<IndexHit>>;

    /// Fetch one chunk's content. `Err(CHUNK_NOT_FOUND)` when the chunk is
    /// absent, `Ok(None)` when it exists without a content field.
    async fn fetch_content(&self, chunk_id: &str) -> Result<Option<String>>;

    /// Remove every chunk of a document. A missing index counts as success.
    async fn delete_by_document(&self, document_id: &str) -> Result<()>;
}

pub struct HttpSearchIndex {
    client: reqwest::Client,
    base_url: String,
    index_name: String,
    dimension: usize,
}

impl HttpSearchIndex {
    pub fn new(config: &SearchIndexConfig, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::external(format!("index client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
            dimension,
        })
    }

    fn index_url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url, self.index_name, suffix)
    }
}

/// Serialize chunks into an NDJSON `_bulk` body keyed by chunk id.
pub fn bulk_body(index_name: &str, chunks: &[StructuredChunk]) -> Result<Vec<u8>> {
    let indexed_at = Utc::now().to_rfc3339();
    let mut body = Vec::new();

    for chunk in chunks {
        let embedding = chunk.embedding.as_ref().ok_or_else(|| {
            ServiceError::ingestion_failed(format!("chunk {} has no embedding", chunk.id))
        })?;

        let action = serde_json::json!({
            "index": {"_index": index_name, "_id": chunk.id}
        });
        let payload = serde_json::json!({
            "chunkId": chunk.id,
            "sourceDocumentId": chunk.document_id,
            "content": chunk.content,
            "embedding": embedding,
            "indexedAt": indexed_at,
            "metadata": chunk.metadata,
        });

        body.extend_from_slice(
            serde_json::to_string(&action)
                .map_err(|e| ServiceError::ingestion_failed(format!("bulk encode failed: {}", e)))?
                .as_bytes(),
        );
        body.push(b'\n');
        body.extend_from_slice(
            serde_json::to_string(&payload)
                .map_err(|e| ServiceError::ingestion_failed(format!("bulk encode failed: {}", e)))?
                .as_bytes(),
        );
        body.push(b'\n');
    }

    Ok(body)
}

/// Scan a `_bulk` response for per-item failures; the first error reason
/// fails the whole write.
pub fn scan_bulk_response(body: &serde_json::Value) -> Result<()> {
    if !body.get("errors").and_then(|e| e.as_bool()).unwrap_or(false) {
        return Ok(());
    }

    let items = body
        .get("items")
        .and_then(|i| i.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[]);

    for item in items {
        let op = item
            .get("index")
            .or_else(|| item.get("create"))
            .or_else(|| item.get("update"));
        if let Some(op) = op {
            if let Some(error) = op.get("error") {
                let reason = error
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown bulk item error");
                let id = op.get("_id").and_then(|i| i.as_str()).unwrap_or("?");
                return Err(ServiceError::ingestion_failed(format!(
                    "bulk index failed for {}: {}",
                    id, reason
                )));
            }
        }
    }

    Err(ServiceError::ingestion_failed(
        "bulk index reported errors without an item reason",
    ))
}

/// Parse `hits.hits[]` into [`IndexHit`]s, preserving engine order.
pub fn hits_from_response(body: &serde_json::Value) -> Vec<IndexHit> {
    body.get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(|h| h.as_array())
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let chunk_id = hit.get("_id")?.as_str()?.to_string();
                    let score = hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0);
                    let source = hit
                        .get("_source")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    Some(IndexHit {
                        chunk_id,
                        score,
                        source,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn index_mappings(dimension: usize) -> serde_json::Value {
    serde_json::json!({
        "settings": {"index": {"knn": true}},
        "mappings": {
            "properties": {
                "chunkId": {"type": "keyword"},
                "sourceDocumentId": {"type": "keyword"},
                "content": {"type": "text"},
                "embedding": {"type": "knn_vector", "dimension": dimension},
                "indexedAt": {"type": "date"},
                "metadata": {
                    "properties": {
                        "title": {"type": "text"},
                        "hierarchyLevel": {"type": "integer"},
                        "sequenceInDocument": {"type": "integer"},
                        "language": {"type": "keyword"},
                        "fileType": {"type": "keyword"},
                        "breadcrumbs": {"type": "text"}
                    }
                }
            }
        }
    })
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn ensure_index(&self) -> Result<()> {
        let head = self
            .client
            .head(self.index_url(""))
            .send()
            .await
            .map_err(|e| ServiceError::external(format!("search index unreachable: {}", e)))?;

        if head.status().is_success() {
            return Ok(());
        }
        if head.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::external(format!(
                "search index HEAD failed (HTTP {})",
                head.status()
            )));
        }

        let resp = self
            .client
            .put(self.index_url(""))
            .json(&index_mappings(self.dimension))
            .send()
            .await
            .map_err(|e| ServiceError::external(format!("search index unreachable: {}", e)))?;

        // A concurrent creator winning the race is fine.
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::BAD_REQUEST {
            return Ok(());
        }
        Err(ServiceError::external(format!(
            "search index creation failed (HTTP {})",
            resp.status()
        )))
    }

    async fn bulk_index(&self, chunks: &[StructuredChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let body = bulk_body(&self.index_name, chunks)?;

        let resp = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.base_url))
            .header("Content-Type", "application/x-ndjson; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| ServiceError::external(format!("search index unreachable: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ServiceError::ingestion_failed(format!(
                "bulk index failed (HTTP {}): {}",
                status,
                detail.chars().take(300).collect::<String>()
            )));
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| {
            ServiceError::ingestion_failed(format!("bulk response undecodable: {}", e))
        })?;
        scan_bulk_response(&json)
    }

    async fn search(&self, body: &serde_json::Value) -> Result<Vec<IndexHit>> {
        let resp = self
            .client
            .post(self.index_url("/_search"))
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::external(format!("search index unreachable: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ServiceError::search_failed(format!(
                "search query failed (HTTP {}): {}",
                status,
                detail.chars().take(300).collect::<String>()
            )));
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| {
            ServiceError::search_failed(format!("search response undecodable: {}", e))
        })?;
        Ok(hits_from_response(&json))
    }

    async fn fetch_content(&self, chunk_id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/_doc/{}?_source=content",
            self.index_url(""),
            chunk_id
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::external(format!("search index unreachable: {}", e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::chunk_not_found(chunk_id));
        }
        if !resp.status().is_success() {
            return Err(ServiceError::search_failed(format!(
                "chunk fetch failed (HTTP {}) for {}",
                resp.status(),
                chunk_id
            )));
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| {
            ServiceError::search_failed(format!("chunk fetch undecodable: {}", e))
        })?;

        // The _doc API reports found=false with 200 on some engines.
        if !json.get("found").and_then(|f| f.as_bool()).unwrap_or(true) {
            return Err(ServiceError::chunk_not_found(chunk_id));
        }

        Ok(json
            .get("_source")
            .and_then(|s| s.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string()))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "query": {"term": {"sourceDocumentId": document_id}}
        });
        let resp = self
            .client
            .post(self.index_url("/_delete_by_query?refresh=true"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::external(format!("search index unreachable: {}", e)))?;

        // No index yet means nothing to delete.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(ServiceError::deletion_failed(format!(
                "delete-by-document failed (HTTP {}) for {}",
                resp.status(),
                document_id
            )));
        }
        Ok(())
    }
}
