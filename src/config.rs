//! Configuration parsing and validation.
//!
//! docbase is configured via a TOML file (default: `config/docbase.toml`).
//! Section and key names are camelCase, matching the deployment documentation:
//!
//! ```toml
//! apiKey = "change-me"
//!
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [blobStore]
//! bucket = "docbase"
//! endpoint = "http://localhost:9000"
//!
//! [metadataStore]
//! url = "sqlite:data/docbase.sqlite"
//!
//! [searchIndex]
//! url = "http://localhost:9200"
//! indexName = "docbase-chunks"
//!
//! [parser]
//! url = "http://localhost:8000/general/v0/general"
//!
//! [embedding]
//! url = "http://localhost:8081/v1/embeddings"
//! model = "bge-m3"
//! dimension = 1024
//! ```
//!
//! Secrets can be kept out of the file: `DOCBASE_API_KEY` overrides `apiKey`,
//! and blob-store credentials are always read from `BLOB_ACCESS_KEY_ID` /
//! `BLOB_SECRET_ACCESS_KEY` (+ optional `BLOB_SESSION_TOKEN`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Admin API key required on the `/api/v1/sources` endpoints.
    #[serde(default)]
    pub api_key: Option<String>,
    pub server: ServerConfig,
    pub blob_store: BlobStoreConfig,
    pub metadata_store: MetadataStoreConfig,
    pub search_index: SearchIndexConfig,
    pub parser: ParserConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BlobStoreConfig {
    pub bucket: String,
    /// S3-compatible endpoint, e.g. `http://localhost:9000` for MinIO.
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_blob_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MetadataStoreConfig {
    /// sqlx connection URL, e.g. `sqlite:data/docbase.sqlite`.
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexConfig {
    pub url: String,
    pub index_name: String,
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParserConfig {
    pub url: String,
    /// Parsing a large PDF can take minutes; the timeout must cover it.
    #[serde(default = "default_parser_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    pub url: String,
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fixed vector dimensionality; every produced vector is checked against it.
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    #[serde(default = "default_snippet_max_length")]
    pub snippet_max_length: usize,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            snippet_max_length: default_snippet_max_length(),
            bm25_weight: default_bm25_weight(),
            vector_weight: default_vector_weight(),
            default_top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContentConfig {
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: usize,
    /// Name of the token estimator; a label, not a tokenizer binding.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: default_max_tokens(),
            tokenizer: default_tokenizer(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Size of the bounded worker pool executing ingestion and deletion jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_blob_timeout() -> u64 {
    60
}
fn default_index_timeout() -> u64 {
    30
}
fn default_parser_timeout() -> u64 {
    300
}
fn default_batch_size() -> usize {
    10
}
fn default_embedding_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}
fn default_snippet_max_length() -> usize {
    50
}
fn default_bm25_weight() -> f64 {
    0.3
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_top_k() -> usize {
    50
}
fn default_max_tokens() -> usize {
    25_000
}
fn default_tokenizer() -> String {
    "tiktoken-cl100k_base".to_string()
}
fn default_max_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_workers() -> usize {
    4
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(config)
}

fn validate(mut config: Config) -> Result<Config> {
    if let Ok(key) = std::env::var("DOCBASE_API_KEY") {
        if !key.is_empty() {
            config.api_key = Some(key);
        }
    }

    if config.embedding.dimension == 0 {
        anyhow::bail!("embedding.dimension must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batchSize must be >= 1");
    }
    if config.search.bm25_weight < 0.0 || config.search.vector_weight < 0.0 {
        anyhow::bail!("search weights must be >= 0");
    }
    if config.search.snippet_max_length == 0 {
        anyhow::bail!("search.snippetMaxLength must be >= 1");
    }
    if config.search.default_top_k == 0 {
        anyhow::bail!("search.defaultTopK must be >= 1");
    }
    if config.content.default_max_tokens == 0 {
        anyhow::bail!("content.defaultMaxTokens must be >= 1");
    }
    if config.upload.max_bytes == 0 {
        anyhow::bail!("upload.maxBytes must be >= 1");
    }
    if config.pipeline.workers == 0 {
        anyhow::bail!("pipeline.workers must be >= 1");
    }

    Ok(config)
}
