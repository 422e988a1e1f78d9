//! Title-delimited chunker.
//!
//! Walks the parsed element stream and opens a new chunk at every Title
//! element (or a `# ` Markdown heading detected inside a NarrativeText
//! element). Everything else is rendered into the current chunk's body with
//! type-aware formatting:
//!
//! | Element type | Rendering |
//! |--------------|-----------|
//! | Header | `#` × depth + text |
//! | BlockQuote | `> ` + text |
//! | Code | fenced with ``` |
//! | ListItem | `• ` + text |
//! | HorizontalRule | `---` |
//! | Table | `[Table]` + newline + text |
//! | Other | text as-is |
//!
//! The chunker is deterministic: the same element stream always yields the
//! same chunks, with ids `<documentId>-chunk-<index>` assigned in emission
//! order.

use std::collections::BTreeMap;

use crate::models::{
    ChunkMetadata, ElementType, FileType, ParsedElement, StructuredChunk,
};

/// Title given to a leading chunk when content precedes the first heading.
const SYNTHETIC_START_TITLE: &str = "Document Start";
/// Title of the single chunk produced when no heading is recognized at all.
const FALLBACK_TITLE: &str = "Document Content";
/// Strategy tag recorded on every chunk.
const CHUNK_TYPE: &str = "TitleBasedChunk";

/// Tokens that disqualify a `# ` line from being treated as a heading; a
/// leading hash in source code (shell comments, shebang-adjacent text pasted
/// into prose) must not split chunks.
const CODE_TOKENS: &[&str] = &[
    "console.", "function ", "var ", "let ", "const ", "if(", "for(", "while(", "class ",
    "return ", "break;", "continue;",
];

/// Convert a parsed element stream into ordered chunks for one document.
///
/// Returns an empty vector for a stream with no renderable text.
pub fn chunk_elements(
    document_id: &str,
    elements: &[ParsedElement],
    file_type: FileType,
) -> Vec<StructuredChunk> {
    let mut builder = ChunkBuilder::new(document_id, file_type);

    for element in elements {
        let text = element.text.trim();

        if element.element_type == ElementType::HorizontalRule {
            builder.append(element.element_type, "---".to_string(), element);
            continue;
        }
        if text.is_empty() {
            continue;
        }

        match element.element_type {
            ElementType::Title => builder.open_titled(text, element),
            ElementType::NarrativeText => {
                if let Some(title) = detect_markdown_heading(text) {
                    builder.open_titled(title, element);
                } else {
                    builder.append(element.element_type, text.to_string(), element);
                }
            }
            ElementType::Header => {
                let hashes = "#".repeat(element.depth().max(1) as usize);
                builder.append(element.element_type, format!("{} {}", hashes, text), element);
            }
            ElementType::BlockQuote => {
                builder.append(element.element_type, format!("> {}", text), element);
            }
            ElementType::Code => {
                builder.append(
                    element.element_type,
                    format!("```\n{}\n```", text),
                    element,
                );
            }
            ElementType::ListItem => {
                builder.append(element.element_type, format!("• {}", text), element);
            }
            ElementType::Table => {
                builder.append(element.element_type, format!("[Table]\n{}", text), element);
            }
            ElementType::HorizontalRule => unreachable!("handled above"),
            ElementType::Other => {
                builder.append(element.element_type, text.to_string(), element);
            }
        }
    }

    builder.finish()
}

/// Detect a top-level Markdown heading inside narrative text: a single `#`
/// followed by whitespace, on a line that is not recognizably source code.
/// Returns the heading text.
fn detect_markdown_heading(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('#')?;
    if rest.starts_with('#') {
        return None;
    }
    let title = rest.strip_prefix(|c: char| c == ' ' || c == '\t')?.trim();
    if title.is_empty() || looks_like_code(text) {
        return None;
    }
    // Only single-line candidates qualify; a heading never spans lines.
    if title.contains('\n') {
        return None;
    }
    Some(title)
}

fn looks_like_code(text: &str) -> bool {
    CODE_TOKENS.iter().any(|token| text.contains(token))
}

struct ChunkBuilder {
    document_id: String,
    file_type: FileType,
    chunks: Vec<StructuredChunk>,
    current: Option<PendingChunk>,
    saw_title: bool,
}

struct PendingChunk {
    title: String,
    fragments: Vec<String>,
    histogram: BTreeMap<ElementType, u32>,
    language: Option<String>,
}

impl ChunkBuilder {
    fn new(document_id: &str, file_type: FileType) -> Self {
        Self {
            document_id: document_id.to_string(),
            file_type,
            chunks: Vec::new(),
            current: None,
            saw_title: false,
        }
    }

    /// Start a chunk at a heading, flushing any current chunk first.
    fn open_titled(&mut self, title: &str, element: &ParsedElement) {
        self.flush();
        self.saw_title = true;
        let mut pending = PendingChunk {
            title: title.to_string(),
            fragments: Vec::new(),
            histogram: BTreeMap::new(),
            language: element.language(),
        };
        *pending.histogram.entry(ElementType::Title).or_insert(0) += 1;
        self.current = Some(pending);
    }

    /// Append a rendered fragment, opening a synthetic-titled chunk when the
    /// stream starts with non-title content.
    fn append(&mut self, element_type: ElementType, rendered: String, element: &ParsedElement) {
        let pending = self.current.get_or_insert_with(|| PendingChunk {
            title: SYNTHETIC_START_TITLE.to_string(),
            fragments: Vec::new(),
            histogram: BTreeMap::new(),
            language: None,
        });
        *pending.histogram.entry(element_type).or_insert(0) += 1;
        if pending.language.is_none() {
            pending.language = element.language();
        }
        pending.fragments.push(rendered);
    }

    fn flush(&mut self) {
        if let Some(pending) = self.current.take() {
            let index = self.chunks.len() as i64;
            let content = pending.fragments.join("\n\n");
            let id = StructuredChunk::chunk_id(&self.document_id, index);
            self.chunks.push(StructuredChunk {
                id,
                document_id: self.document_id.clone(),
                title: pending.title.clone(),
                hierarchy_level: 1,
                sequence_in_document: index,
                element_type: CHUNK_TYPE.to_string(),
                content,
                embedding: None,
                metadata: ChunkMetadata {
                    title: pending.title.clone(),
                    hierarchy_level: 1,
                    sequence_in_document: index,
                    language: pending.language,
                    file_type: self.file_type.as_str().to_string(),
                    breadcrumbs: Some(pending.title),
                },
                element_histogram: pending.histogram,
            });
        }
    }

    fn finish(mut self) -> Vec<StructuredChunk> {
        self.flush();

        // No heading anywhere: the whole document is one chunk.
        if !self.saw_title && self.chunks.len() == 1 {
            let chunk = &mut self.chunks[0];
            chunk.title = FALLBACK_TITLE.to_string();
            chunk.metadata.title = FALLBACK_TITLE.to_string();
            chunk.metadata.breadcrumbs = Some(FALLBACK_TITLE.to_string());
        }

        self.chunks
    }
}
