//! # docbase
//!
//! **A self-hosted retrieval-augmented knowledge service.**
//!
//! Operators upload source documents (PDF, Markdown, plain text); docbase
//! converts each into structured, embedded chunks and answers two-phase
//! queries: exploratory hybrid search over chunk summaries, then focused
//! retrieval of one chunk's full text under a token budget. Downstream AI
//! assistants treat it as their authoritative knowledge source.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌──────────────────────────────────┐   ┌─────────────┐
//! │ Upload │──▶│ Pipeline                         │──▶│ Search index│
//! │ (HTTP) │   │ parse → chunk → embed → index    │   │ (BM25+kNN)  │
//! └────────┘   └───────┬──────────────────────────┘   └──────┬──────┘
//!                      │                                     │
//!                ┌─────▼─────┐   ┌──────────┐         ┌──────▼──────┐
//!                │ Metadata  │   │   Blob   │         │ search /    │
//!                │ (SQLite)  │   │  (S3)    │         │ get-content │
//!                └───────────┘   └──────────┘         └─────────────┘
//! ```
//!
//! ## Document Lifecycle
//!
//! 1. **Upload** fingerprints the bytes (SHA-256), rejects duplicates,
//!    stores the original in the blob store, and creates a PENDING row.
//! 2. The **pipeline** drives PARSING → CHUNKING → EMBEDDING → INDEXING →
//!    COMPLETED per document on a bounded worker pool; failures land in
//!    ERROR with the underlying message.
//! 3. **Resync** resets a document to PENDING and re-runs the pipeline;
//!    chunk ids are deterministic, so an unchanged file reproduces the same
//!    chunks.
//! 4. **Deletion** removes index documents, chunk rows, the blob, and the
//!    document row, in that order.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Business error taxonomy and HTTP mapping |
//! | [`models`] | Core data types: `SourceDocument`, `StructuredChunk`, statuses |
//! | [`fingerprint`] | Content hashing, id assignment, file-type resolution |
//! | [`blob`] | S3-compatible object store adapter (SigV4) |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`metadata`] | Document/chunk repository and guarded status transitions |
//! | [`parser`] | External parser adapter (typed element stream) |
//! | [`chunker`] | Title-delimited chunker |
//! | [`embedder`] | Batch embedding client with retry/backoff |
//! | [`search_index`] | Search-index adapter: bulk, query, fetch, delete |
//! | [`indexer`] | Two-phase chunk persistence with compensation |
//! | [`pipeline`] | Ingestion coordinator and worker pool |
//! | [`search`] | Hybrid query construction and score normalization |
//! | [`content`] | Token estimation and budgeted truncation |
//! | [`server`] | Axum HTTP facade |

pub mod blob;
pub mod chunker;
pub mod config;
pub mod content;
pub mod db;
pub mod embedder;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod search;
pub mod search_index;
pub mod server;
