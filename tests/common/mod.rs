//! Shared test doubles: in-process stand-ins for the blob store, parser,
//! embedder, and search index, plus config/pool helpers.

// Each integration-test crate compiles this module separately and uses a
// different subset of it.
#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use docbase::blob::BlobStore;
use docbase::config::Config;
use docbase::embedder::EmbeddingClient;
use docbase::error::{Result, ServiceError};
use docbase::models::{ElementType, FileType, ParsedElement, StructuredChunk};
use docbase::parser::DocumentParser;
use docbase::search_index::{IndexHit, SearchIndex};

pub const EMBEDDING_DIMENSION: usize = 8;

pub fn test_config() -> Config {
    let toml_str = r#"
apiKey = "secret-key"

[server]
bind = "127.0.0.1:0"

[blobStore]
bucket = "docs"
endpoint = "http://localhost:9000"

[metadataStore]
url = "sqlite::memory:"

[searchIndex]
url = "http://localhost:9200"
indexName = "docbase-chunks"

[parser]
url = "http://localhost:8000/general/v0/general"

[embedding]
url = "http://localhost:8081/v1/embeddings"
model = "test-model"
dimension = 8
batchSize = 2
"#;
    toml::from_str(toml_str).unwrap()
}

pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    docbase::migrate::run_migrations(&pool).await.unwrap();
    pool
}

// ============ Blob store ============

#[derive(Default)]
pub struct FakeBlob {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for FakeBlob {
    async fn put(&self, handle: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(handle.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| {
                ServiceError::ingestion_failed(format!("stored object missing: {}", handle))
            })
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(handle);
        Ok(())
    }

    async fn exists(&self, handle: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(handle))
    }
}

// ============ Parser ============

/// Element-izes text the way the external parser does for Markdown with
/// top-level-only titles: blank-line separated blocks, `# ` blocks become
/// Title elements.
pub struct FakeParser;

#[async_trait]
impl DocumentParser for FakeParser {
    async fn parse(
        &self,
        bytes: &[u8],
        _filename: &str,
        _file_type: FileType,
    ) -> Result<Vec<ParsedElement>> {
        let text = String::from_utf8_lossy(bytes);
        let mut elements = Vec::new();
        for block in text.split("\n\n") {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            if let Some(title) = block.strip_prefix("# ") {
                elements.push(ParsedElement::new(ElementType::Title, title.trim()));
            } else {
                elements.push(ParsedElement::new(ElementType::NarrativeText, block));
            }
        }
        Ok(elements)
    }
}

// ============ Embedder ============

/// Deterministic embeddings: a text hashes to the same vector every run.
/// `fail_next` makes exactly one call fail, for exercising the ERROR path.
#[derive(Default)]
pub struct FakeEmbedder {
    pub fail_next: AtomicBool,
}

pub fn embedding_for(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIMENSION];
    for (i, b) in text.bytes().enumerate() {
        v[i % EMBEDDING_DIMENSION] += b as f32 / 255.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::external("embedding service unreachable"));
        }
        Ok(texts.iter().map(|t| embedding_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

// ============ Search index ============

/// A miniature engine over the bulk payloads: lexical scoring counts query
/// terms in content and title, vector scoring is shifted cosine similarity,
/// both weighted by the boosts carried in the query body.
#[derive(Default)]
pub struct FakeIndex {
    pub documents: Mutex<HashMap<String, serde_json::Value>>,
}

impl FakeIndex {
    pub fn ids_for_document(&self, document_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, doc)| doc["sourceDocumentId"] == document_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na * nb < f32::EPSILON {
        return 0.0;
    }
    (dot / (na * nb)) as f64
}

#[async_trait]
impl SearchIndex for FakeIndex {
    async fn ensure_index(&self) -> Result<()> {
        Ok(())
    }

    async fn bulk_index(&self, chunks: &[StructuredChunk]) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        for chunk in chunks {
            let embedding = chunk.embedding.as_ref().ok_or_else(|| {
                ServiceError::ingestion_failed(format!("chunk {} has no embedding", chunk.id))
            })?;
            documents.insert(
                chunk.id.clone(),
                serde_json::json!({
                    "chunkId": chunk.id,
                    "sourceDocumentId": chunk.document_id,
                    "content": chunk.content,
                    "embedding": embedding,
                    "metadata": chunk.metadata,
                }),
            );
        }
        Ok(())
    }

    async fn search(&self, body: &serde_json::Value) -> Result<Vec<IndexHit>> {
        let should = &body["query"]["bool"]["should"];
        let query = should[0]["multi_match"]["query"].as_str().unwrap_or("");
        let bm25_weight = should[0]["multi_match"]["boost"].as_f64().unwrap_or(1.0);
        let vector_weight = should[1]["script_score"]["boost"].as_f64().unwrap_or(1.0);
        let query_vector: Vec<f32> = should[1]["script_score"]["script"]["params"]["query_vector"]
            .as_array()
            .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
            .unwrap_or_default();
        let size = body["size"].as_u64().unwrap_or(10) as usize;

        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();

        let documents = self.documents.lock().unwrap();
        let mut hits: Vec<IndexHit> = documents
            .iter()
            .map(|(id, doc)| {
                let content = doc["content"].as_str().unwrap_or("").to_lowercase();
                let title = doc["metadata"]["title"].as_str().unwrap_or("").to_lowercase();
                let matches = terms
                    .iter()
                    .filter(|t| content.contains(*t) || title.contains(*t))
                    .count() as f64;
                let lexical = matches * bm25_weight;

                let embedding: Vec<f32> = doc["embedding"]
                    .as_array()
                    .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
                    .unwrap_or_default();
                let vector = (cosine(&query_vector, &embedding) + 1.0) * vector_weight;

                IndexHit {
                    chunk_id: id.clone(),
                    score: lexical + vector,
                    source: doc.clone(),
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(size);
        Ok(hits)
    }

    async fn fetch_content(&self, chunk_id: &str) -> Result<Option<String>> {
        let documents = self.documents.lock().unwrap();
        match documents.get(chunk_id) {
            None => Err(ServiceError::chunk_not_found(chunk_id)),
            Some(doc) => Ok(doc
                .get("content")
                .and_then(|c| c.as_str())
                .map(|s| s.to_string())),
        }
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        self.documents
            .lock()
            .unwrap()
            .retain(|_, doc| doc["sourceDocumentId"] != document_id);
        Ok(())
    }
}

// ============ Wiring ============

pub struct Harness {
    pub pool: SqlitePool,
    pub blob: Arc<FakeBlob>,
    pub embedder: Arc<FakeEmbedder>,
    pub index: Arc<FakeIndex>,
    pub coordinator: docbase::pipeline::Coordinator,
    pub ctx: Arc<docbase::pipeline::PipelineContext>,
    pub config: Config,
}

/// Build a fully wired coordinator over fakes, plus a second context handle
/// for driving pipeline runs deterministically.
pub async fn harness() -> Harness {
    let config = test_config();
    let pool = test_pool().await;
    let blob = Arc::new(FakeBlob::default());
    let embedder = Arc::new(FakeEmbedder::default());
    let index = Arc::new(FakeIndex::default());

    let make_ctx = || {
        docbase::pipeline::PipelineContext::new(
            pool.clone(),
            blob.clone(),
            Arc::new(FakeParser),
            embedder.clone(),
            index.clone(),
            &config,
        )
    };

    let coordinator = docbase::pipeline::Coordinator::start(make_ctx(), 2);
    let ctx = Arc::new(make_ctx());

    Harness {
        pool,
        blob,
        embedder,
        index,
        coordinator,
        ctx,
        config,
    }
}
