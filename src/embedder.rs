//! Embedding client.
//!
//! Turns chunk text into fixed-dimension vectors by calling the embedding
//! service in ordered batches. The text submitted for a chunk is
//! `"Title: <title>\n<content>"` when the chunk has a title, else the content
//! alone, so the section heading contributes to the vector.
//!
//! # Retry Strategy
//!
//! Transient failures are retried with exponential backoff before the stage
//! gives up:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Result, ServiceError};
use crate::models::StructuredChunk;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The deployment's fixed vector dimensionality.
    fn dimension(&self) -> usize;
}

/// The text submitted to the embedding model for one chunk.
pub fn embed_text_for(chunk: &StructuredChunk) -> String {
    if chunk.title.is_empty() {
        chunk.content.clone()
    } else {
        format!("Title: {}\n{}", chunk.title, chunk.content)
    }
}

/// Attach vectors to chunks, processing them in order in batches of
/// `batch_size`. Any vector of the wrong dimensionality fails the stage.
pub async fn embed_chunks(
    client: &dyn EmbeddingClient,
    batch_size: usize,
    mut chunks: Vec<StructuredChunk>,
) -> Result<Vec<StructuredChunk>> {
    let expected = client.dimension();

    for batch in chunks.chunks_mut(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(embed_text_for).collect();
        let vectors = client.embed(&texts).await?;

        if vectors.len() != batch.len() {
            return Err(ServiceError::ingestion_failed(format!(
                "embedding failed: {} texts submitted, {} vectors returned",
                batch.len(),
                vectors.len()
            )));
        }

        for (chunk, vector) in batch.iter_mut().zip(vectors) {
            if vector.len() != expected {
                return Err(ServiceError::ingestion_failed(format!(
                    "embedding dimension mismatch for {}: expected {}, got {}",
                    chunk.id,
                    expected,
                    vector.len()
                )));
            }
            chunk.embedding = Some(vector);
        }
    }

    Ok(chunks)
}

/// Embed a single query string with the same model as indexing.
pub async fn embed_query(client: &dyn EmbeddingClient, text: &str) -> Result<Vec<f32>> {
    let vectors = client.embed(&[text.to_string()]).await?;
    let vector = vectors
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::search_failed("empty embedding response"))?;
    if vector.len() != client.dimension() {
        return Err(ServiceError::search_failed(format!(
            "query embedding dimension mismatch: expected {}, got {}",
            client.dimension(),
            vector.len()
        )));
    }
    Ok(vector)
}

/// HTTP client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::external(format!("embedder client init failed: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&self.url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            ServiceError::ingestion_failed(format!(
                                "embedding failed: undecodable response: {}",
                                e
                            ))
                        })?;
                        return parse_embedding_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let detail = response.text().await.unwrap_or_default();
                        last_err = Some(ServiceError::external(format!(
                            "embedding service error {}: {}",
                            status,
                            detail.chars().take(200).collect::<String>()
                        )));
                        continue;
                    }

                    let detail = response.text().await.unwrap_or_default();
                    return Err(ServiceError::ingestion_failed(format!(
                        "embedding failed (HTTP {}): {}",
                        status,
                        detail.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) => {
                    last_err = Some(ServiceError::external(format!(
                        "embedding service unreachable: {}",
                        e
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ServiceError::external("embedding failed after retries")))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Extract `data[].embedding` arrays, one per input, in response order.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            ServiceError::ingestion_failed("embedding failed: response missing data array")
        })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                ServiceError::ingestion_failed("embedding failed: response item missing embedding")
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}
