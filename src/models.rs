//! Core data models used throughout docbase.
//!
//! These types represent the documents, parsed elements, and chunks that flow
//! through the ingestion pipeline, plus the lifecycle status machine that the
//! coordinator drives.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical file type of an uploaded source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Markdown,
    Text,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "PDF",
            FileType::Markdown => "MARKDOWN",
            FileType::Text => "TEXT",
        }
    }

    pub fn parse(s: &str) -> Option<FileType> {
        match s {
            "PDF" => Some(FileType::Pdf),
            "MARKDOWN" => Some(FileType::Markdown),
            "TEXT" => Some(FileType::Text),
            _ => None,
        }
    }

    /// Canonical MIME type, used for blob storage and parser submissions.
    pub fn mime(&self) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Markdown => "text/markdown",
            FileType::Text => "text/plain",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a source document.
///
/// The happy path is PENDING → PARSING → CHUNKING → EMBEDDING → INDEXING →
/// COMPLETED. Any in-flight stage may fall to ERROR; resync resets ERROR or
/// COMPLETED back to PENDING. DELETING is entered by the deletion pipeline
/// and ends with the row being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    Pending,
    Parsing,
    Chunking,
    Embedding,
    Indexing,
    Completed,
    Error,
    Deleting,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "PENDING",
            IngestionStatus::Parsing => "PARSING",
            IngestionStatus::Chunking => "CHUNKING",
            IngestionStatus::Embedding => "EMBEDDING",
            IngestionStatus::Indexing => "INDEXING",
            IngestionStatus::Completed => "COMPLETED",
            IngestionStatus::Error => "ERROR",
            IngestionStatus::Deleting => "DELETING",
        }
    }

    pub fn parse(s: &str) -> Option<IngestionStatus> {
        match s {
            "PENDING" => Some(IngestionStatus::Pending),
            "PARSING" => Some(IngestionStatus::Parsing),
            "CHUNKING" => Some(IngestionStatus::Chunking),
            "EMBEDDING" => Some(IngestionStatus::Embedding),
            "INDEXING" => Some(IngestionStatus::Indexing),
            "COMPLETED" => Some(IngestionStatus::Completed),
            "ERROR" => Some(IngestionStatus::Error),
            "DELETING" => Some(IngestionStatus::Deleting),
            _ => None,
        }
    }

    /// True while an ingestion pipeline run owns the document. Resync and
    /// delete are refused in these states.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            IngestionStatus::Parsing
                | IngestionStatus::Chunking
                | IngestionStatus::Embedding
                | IngestionStatus::Indexing
        )
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single ingested file, as persisted in the metadata store.
///
/// Rows are created at upload (status PENDING) and mutated only by the
/// ingestion coordinator.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub original_filename: String,
    pub storage_handle: String,
    pub file_type: FileType,
    pub byte_length: i64,
    /// SHA-256 of the file bytes, lowercase hex. Unique across documents.
    pub fingerprint: String,
    pub status: IngestionStatus,
    pub error_message: Option<String>,
    pub last_ingested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Element type tag produced by the external parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ElementType {
    Title,
    Header,
    NarrativeText,
    ListItem,
    Table,
    Code,
    BlockQuote,
    HorizontalRule,
    Other,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Title => "Title",
            ElementType::Header => "Header",
            ElementType::NarrativeText => "NarrativeText",
            ElementType::ListItem => "ListItem",
            ElementType::Table => "Table",
            ElementType::Code => "Code",
            ElementType::BlockQuote => "BlockQuote",
            ElementType::HorizontalRule => "HorizontalRule",
            ElementType::Other => "Other",
        }
    }

    /// Map a parser type label to the canonical tag. Unknown labels become
    /// [`ElementType::Other`] and still contribute their text to chunks.
    pub fn from_label(label: &str) -> ElementType {
        match label {
            "Title" => ElementType::Title,
            "Header" => ElementType::Header,
            "NarrativeText" | "Text" | "UncategorizedText" => ElementType::NarrativeText,
            "ListItem" => ElementType::ListItem,
            "Table" => ElementType::Table,
            "Code" | "CodeSnippet" => ElementType::Code,
            "BlockQuote" => ElementType::BlockQuote,
            "HorizontalRule" => ElementType::HorizontalRule,
            _ => ElementType::Other,
        }
    }
}

/// One element of the typed stream returned by the parser adapter.
#[derive(Debug, Clone)]
pub struct ParsedElement {
    pub element_type: ElementType,
    pub text: String,
    /// Parser-specific extras (heading depth, detected languages, page number).
    pub metadata: serde_json::Value,
}

impl ParsedElement {
    pub fn new(element_type: ElementType, text: impl Into<String>) -> Self {
        Self {
            element_type,
            text: text.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Heading depth from parser metadata; the parser reports `depth` for
    /// Header elements, defaulting to 2 when absent.
    pub fn depth(&self) -> u64 {
        self.metadata
            .get("depth")
            .and_then(|d| d.as_u64())
            .unwrap_or(2)
    }

    /// First detected language, if the parser reported one.
    pub fn language(&self) -> Option<String> {
        self.metadata
            .get("languages")
            .and_then(|l| l.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// Metadata carried by every indexed chunk, mirrored into the search index
/// payload under `metadata`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub title: String,
    pub hierarchy_level: i64,
    pub sequence_in_document: i64,
    pub language: Option<String>,
    pub file_type: String,
    pub breadcrumbs: Option<String>,
}

/// One atomic retrieval unit emitted by the chunker.
///
/// Ephemeral until the indexer persists it: the hierarchy row lands in the
/// metadata store and the full payload (content + vector) in the search
/// index, both keyed by the same id.
#[derive(Debug, Clone)]
pub struct StructuredChunk {
    /// Stable id: `<documentId>-chunk-<index>`.
    pub id: String,
    pub document_id: String,
    pub title: String,
    pub hierarchy_level: i64,
    pub sequence_in_document: i64,
    /// Chunking strategy tag, `"TitleBasedChunk"` for title-delimited chunks.
    pub element_type: String,
    pub content: String,
    /// Attached by the embedder; `None` until the EMBEDDING stage ran.
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
    /// Count of source element types that fed this chunk.
    pub element_histogram: BTreeMap<ElementType, u32>,
}

impl StructuredChunk {
    /// Chunk ids are a pure function of document id and emission index, so a
    /// resync of unchanged bytes reproduces identical ids.
    pub fn chunk_id(document_id: &str, index: i64) -> String {
        format!("{}-chunk-{}", document_id, index)
    }
}
