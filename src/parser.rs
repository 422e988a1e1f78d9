//! External parser adapter.
//!
//! Sends the original file bytes to the parsing service as a multipart
//! request and receives an ordered stream of typed elements. Parsing hints
//! ride along as form fields, chosen per file type: PDFs ask for
//! high-resolution layout with table-structure inference, Markdown asks for
//! only top-level `#` headings to be emitted as Title elements.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::ParserConfig;
use crate::error::{Result, ServiceError};
use crate::models::{ElementType, FileType, ParsedElement};

#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse one file into its element stream, preserving document order.
    async fn parse(
        &self,
        bytes: &[u8],
        filename: &str,
        file_type: FileType,
    ) -> Result<Vec<ParsedElement>>;
}

/// HTTP client for the parsing service.
pub struct HttpParser {
    client: reqwest::Client,
    url: String,
}

impl HttpParser {
    pub fn new(config: &ParserConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Parsing a large scanned PDF is minutes, not seconds.
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::external(format!("parser client init failed: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

/// Form fields steering the parser, per file type.
fn parsing_hints(file_type: FileType) -> Vec<(&'static str, &'static str)> {
    match file_type {
        FileType::Pdf => vec![
            ("strategy", "hi_res"),
            ("pdf_infer_table_structure", "true"),
        ],
        FileType::Markdown => vec![("markdown_top_level_only", "true")],
        FileType::Text => Vec::new(),
    }
}

#[async_trait]
impl DocumentParser for HttpParser {
    async fn parse(
        &self,
        bytes: &[u8],
        filename: &str,
        file_type: FileType,
    ) -> Result<Vec<ParsedElement>> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str(file_type.mime())
            .map_err(|e| ServiceError::external(format!("parser request build failed: {}", e)))?;

        let mut form = reqwest::multipart::Form::new().part("files", part);
        for (key, value) in parsing_hints(file_type) {
            form = form.text(key, value);
        }

        let resp = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::external(format!("document parser unreachable: {}", e)))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(ServiceError::external(format!(
                "document parser unavailable (HTTP {})",
                status
            )));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ServiceError::ingestion_failed(format!(
                "parse failed (HTTP {}): {}",
                status,
                detail.chars().take(300).collect::<String>()
            )));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            ServiceError::ingestion_failed(format!("parse failed: undecodable response: {}", e))
        })?;
        elements_from_response(&body)
    }
}

/// Decode the parser's JSON array into the typed element stream.
pub fn elements_from_response(body: &serde_json::Value) -> Result<Vec<ParsedElement>> {
    let array = body.as_array().ok_or_else(|| {
        ServiceError::ingestion_failed("parse failed: response is not an element array")
    })?;

    let mut elements = Vec::with_capacity(array.len());
    for item in array {
        let label = item.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let text = item
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();
        let metadata = item
            .get("metadata")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        elements.push(ParsedElement {
            element_type: ElementType::from_label(label),
            text,
            metadata,
        });
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_per_file_type() {
        let pdf = parsing_hints(FileType::Pdf);
        assert!(pdf.contains(&("strategy", "hi_res")));
        assert!(pdf.contains(&("pdf_infer_table_structure", "true")));

        let md = parsing_hints(FileType::Markdown);
        assert_eq!(md, vec![("markdown_top_level_only", "true")]);

        assert!(parsing_hints(FileType::Text).is_empty());
    }

    #[test]
    fn decodes_element_stream_in_order() {
        let body = serde_json::json!([
            {"type": "Title", "text": "Intro", "metadata": {"languages": ["en"]}},
            {"type": "NarrativeText", "text": "Some prose."},
            {"type": "CodeSnippet", "text": "let x = 1;", "metadata": {}},
            {"type": "Mystery", "text": "???"},
        ]);
        let elements = elements_from_response(&body).unwrap();
        assert_eq!(elements.len(), 4);
        assert_eq!(elements[0].element_type, ElementType::Title);
        assert_eq!(elements[0].language().as_deref(), Some("en"));
        assert_eq!(elements[1].element_type, ElementType::NarrativeText);
        assert_eq!(elements[2].element_type, ElementType::Code);
        assert_eq!(elements[3].element_type, ElementType::Other);
    }

    #[test]
    fn rejects_non_array_response() {
        let body = serde_json::json!({"detail": "boom"});
        let err = elements_from_response(&body).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::IngestionFailed);
    }

    #[test]
    fn tolerates_missing_fields() {
        let body = serde_json::json!([{"type": "Title"}]);
        let elements = elements_from_response(&body).unwrap();
        assert_eq!(elements[0].text, "");
        assert!(elements[0].metadata.is_null());
    }
}
