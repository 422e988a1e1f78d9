//! Token-bounded content retrieval.
//!
//! Fetches a single chunk's text from the search index and applies a token
//! budget. Budget enforcement truncates from the end (the head of a section
//! carries the context) by binary-searching the largest character prefix
//! whose estimated token count fits.
//!
//! The estimator is a named heuristic, not a tokenizer binding: the default
//! label `tiktoken-cl100k_base` denotes the mixed-script approximation
//! `ceil(ascii/4) + ceil(cjk/1.5) + ceil(other/2)`, floored at 1. Truncation
//! only relies on the estimator being monotone over prefixes, so swapping in
//! another estimator never changes the algorithm.

use serde::Serialize;

use crate::error::{Result, ServiceError};
use crate::search_index::SearchIndex;

/// Estimates how many tokens a piece of text will cost a model.
///
/// Implementations must be monotone: appending text never decreases the
/// estimate.
pub trait TokenEstimator: Send + Sync {
    fn name(&self) -> &str;
    fn count(&self, text: &str) -> usize;
}

/// Character-class based estimator used for every configured name.
pub struct HeuristicEstimator {
    name: String,
}

impl HeuristicEstimator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self, text: &str) -> usize {
        let mut ascii = 0usize;
        let mut cjk = 0usize;
        let mut other = 0usize;
        for c in text.chars() {
            if c.is_ascii() {
                ascii += 1;
            } else if is_cjk(c) {
                cjk += 1;
            } else {
                other += 1;
            }
        }
        // ceil(ascii/4) + ceil(cjk/1.5) + ceil(other/2), floored at 1.
        let tokens = ascii.div_ceil(4) + (cjk * 2).div_ceil(3) + other.div_ceil(2);
        tokens.max(1)
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}' // CJK Extension A
        | '\u{F900}'..='\u{FAFF}' // CJK Compatibility Ideographs
        | '\u{3040}'..='\u{309F}' // Hiragana
        | '\u{30A0}'..='\u{30FF}' // Katakana
        | '\u{AC00}'..='\u{D7AF}' // Hangul Syllables
    )
}

/// Look up the estimator registered under `name`. Unknown names fall back to
/// the heuristic labeled with that name; the name is a reporting label.
pub fn estimator_for(name: &str) -> Box<dyn TokenEstimator> {
    Box::new(HeuristicEstimator::new(name))
}

/// Token accounting attached to every content response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub tokenizer: String,
    pub actual_tokens: usize,
    pub truncated: bool,
}

/// A chunk's text after budget enforcement.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedContent {
    pub chunk_id: String,
    pub content: String,
    pub token_info: TokenInfo,
}

/// Fetch one chunk's content and enforce `max_tokens`.
pub async fn retrieve_content(
    index: &dyn SearchIndex,
    estimator: &dyn TokenEstimator,
    chunk_id: &str,
    max_tokens: usize,
) -> Result<RetrievedContent> {
    if chunk_id.trim().is_empty() {
        return Err(ServiceError::validation("chunkId must not be empty"));
    }
    if max_tokens == 0 {
        return Err(ServiceError::validation("maxTokens must be >= 1"));
    }

    let content = match index.fetch_content(chunk_id).await? {
        Some(content) => content,
        None => return Err(ServiceError::content_unavailable(chunk_id)),
    };

    let (content, actual_tokens, truncated) = enforce_budget(estimator, &content, max_tokens);

    Ok(RetrievedContent {
        chunk_id: chunk_id.to_string(),
        content,
        token_info: TokenInfo {
            tokenizer: estimator.name().to_string(),
            actual_tokens,
            truncated,
        },
    })
}

/// Apply the token budget, preserving the head of the content.
///
/// Returns the (possibly truncated) text, its estimated token count, and
/// whether truncation occurred.
pub fn enforce_budget(
    estimator: &dyn TokenEstimator,
    content: &str,
    max_tokens: usize,
) -> (String, usize, bool) {
    let total = estimator.count(content);
    if total <= max_tokens {
        return (content.to_string(), total, false);
    }

    // Byte offsets of each character boundary; prefix i = content[..offsets[i]].
    let offsets: Vec<usize> = content
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(content.len()))
        .collect();

    // Largest prefix whose estimate fits; the estimator is monotone over
    // prefixes, so binary search applies.
    let mut lo = 0usize;
    let mut hi = offsets.len() - 1;
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if estimator.count(&content[..offsets[mid]]) <= max_tokens {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    let prefix = &content[..offsets[lo]];
    (prefix.to_string(), estimator.count(prefix), true)
}
