//! Identity and fingerprinting.
//!
//! Computes content fingerprints for duplicate detection, assigns opaque
//! document ids, and resolves the canonical file type of an upload.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::models::FileType;

/// SHA-256 over the full file bytes, as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Assign a fresh opaque document id (random 128-bit, hyphenated form).
pub fn new_document_id() -> String {
    Uuid::new_v4().to_string()
}

/// Resolve the canonical file type of an upload.
///
/// Resolution order: a recognized content-type header wins; otherwise the
/// filename extension decides; anything else is rejected. Content-type
/// parameters (`; charset=utf-8`) are ignored when matching.
pub fn resolve_file_type(filename: &str, content_type: Option<&str>) -> Result<FileType> {
    if let Some(ct) = content_type {
        let essence = ct.split(';').next().unwrap_or(ct).trim();
        match essence {
            "application/pdf" => return Ok(FileType::Pdf),
            "text/markdown" => return Ok(FileType::Markdown),
            "text/plain" => return Ok(FileType::Text),
            _ => {}
        }
    }

    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pdf") => Ok(FileType::Pdf),
        Some("md") | Some("markdown") => Ok(FileType::Markdown),
        Some("txt") => Ok(FileType::Text),
        _ => Err(ServiceError::unsupported_media_type(format!(
            "unsupported file type: {} ({})",
            filename,
            content_type.unwrap_or("no content type")
        ))),
    }
}
