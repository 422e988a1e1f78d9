//! Business error taxonomy.
//!
//! Every fallible core operation returns a [`ServiceError`] tagging the
//! failure with an [`ErrorKind`]; the HTTP facade maps kinds to status codes
//! and envelope error codes. Pipeline stage failures are additionally
//! recorded on the document row (status ERROR + message) by the coordinator.

use axum::http::StatusCode;

/// Machine-readable error kinds surfaced through the API envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or empty input.
    ValidationFailed,
    /// Missing or invalid API key.
    InsufficientPermission,
    /// Unknown document id.
    SourceDocumentNotFound,
    /// Unknown chunk id.
    ChunkNotFound,
    /// Fingerprint already present.
    Duplicate,
    /// A pipeline run currently owns the document.
    ConflictProcessing,
    /// Upload exceeds the configured byte limit.
    PayloadTooLarge,
    /// File type not accepted.
    UnsupportedMediaType,
    /// Chunk exists but has no content field.
    ContentUnavailable,
    /// Search index query error.
    SearchFailed,
    /// A pipeline stage failed.
    IngestionFailed,
    /// The deletion pipeline failed.
    DeletionFailed,
    /// Parser, embedder, index, or a backing store is unreachable.
    ExternalUnavailable,
}

impl ErrorKind {
    /// Envelope error code, e.g. `"DUPLICATE"`.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::InsufficientPermission => "INSUFFICIENT_PERMISSION",
            ErrorKind::SourceDocumentNotFound => "SOURCE_DOCUMENT_NOT_FOUND",
            ErrorKind::ChunkNotFound => "CHUNK_NOT_FOUND",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::ConflictProcessing => "CONFLICT_PROCESSING",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            ErrorKind::ContentUnavailable => "CONTENT_UNAVAILABLE",
            ErrorKind::SearchFailed => "SEARCH_FAILED",
            ErrorKind::IngestionFailed => "INGESTION_FAILED",
            ErrorKind::DeletionFailed => "DELETION_FAILED",
            ErrorKind::ExternalUnavailable => "EXTERNAL_UNAVAILABLE",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorKind::InsufficientPermission => StatusCode::FORBIDDEN,
            ErrorKind::SourceDocumentNotFound | ErrorKind::ChunkNotFound => StatusCode::NOT_FOUND,
            ErrorKind::Duplicate | ErrorKind::ConflictProcessing => StatusCode::CONFLICT,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::ContentUnavailable => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::SearchFailed | ErrorKind::IngestionFailed | ErrorKind::DeletionFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorKind::ExternalUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// A tagged business error: kind plus a human-readable message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn forbidden() -> Self {
        Self::new(
            ErrorKind::InsufficientPermission,
            "missing or invalid API key",
        )
    }

    pub fn document_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::SourceDocumentNotFound,
            format!("source document not found: {}", id),
        )
    }

    pub fn chunk_not_found(id: &str) -> Self {
        Self::new(ErrorKind::ChunkNotFound, format!("chunk not found: {}", id))
    }

    pub fn duplicate(fingerprint: &str) -> Self {
        Self::new(
            ErrorKind::Duplicate,
            format!("a document with fingerprint {} already exists", fingerprint),
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConflictProcessing, message)
    }

    pub fn payload_too_large(limit: u64) -> Self {
        Self::new(
            ErrorKind::PayloadTooLarge,
            format!("upload exceeds the {} byte limit", limit),
        )
    }

    pub fn unsupported_media_type(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedMediaType, detail)
    }

    pub fn content_unavailable(id: &str) -> Self {
        Self::new(
            ErrorKind::ContentUnavailable,
            format!("chunk {} has no content", id),
        )
    }

    pub fn search_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SearchFailed, message)
    }

    pub fn ingestion_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IngestionFailed, message)
    }

    pub fn deletion_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeletionFailed, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalUnavailable, message)
    }

    /// True for failures worth a resync without any operator change
    /// (collaborator was unreachable, as opposed to bad input).
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::ExternalUnavailable
    }
}

/// Map a metadata-store failure. The relational store is an external
/// collaborator; when it misbehaves the operation is reported unavailable.
pub fn store_error(e: sqlx::Error) -> ServiceError {
    ServiceError::external(format!("metadata store error: {}", e))
}
