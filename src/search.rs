//! Hybrid search.
//!
//! Translates a query string into one compound index query with two sibling
//! should-clauses — a lexical multi-field match (BM25) and a script-scored
//! cosine similarity over the chunk vectors — then normalizes the combined
//! scores per response and shapes the hits for exploratory consumption:
//! title, short snippet, relevance in `[0, 1]`.
//!
//! Normalization divides by the response maximum, so scores are comparable
//! within one response and never across queries.

use serde::Serialize;

use crate::config::SearchConfig;
use crate::embedder::{self, EmbeddingClient};
use crate::error::{ErrorKind, Result, ServiceError};
use crate::search_index::{IndexHit, SearchIndex};

/// One exploratory search hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub chunk_id: String,
    pub title: String,
    pub snippet: String,
    /// Normalized to `[0.0, 1.0]` within this response.
    pub relevance_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumbs: Option<String>,
}

/// Run a hybrid query and shape the hits.
pub async fn hybrid_search(
    index: &dyn SearchIndex,
    embedding: &dyn EmbeddingClient,
    config: &SearchConfig,
    query: &str,
    top_k: usize,
) -> Result<Vec<SearchResultItem>> {
    if query.trim().is_empty() {
        return Err(ServiceError::validation("query must not be empty"));
    }
    if top_k == 0 {
        return Err(ServiceError::validation("topK must be >= 1"));
    }

    // The same model embeds queries and chunks; any failure here is a search
    // failure from the caller's point of view.
    let query_vector = embedder::embed_query(embedding, query)
        .await
        .map_err(|e| ServiceError::search_failed(format!("query embedding failed: {}", e)))?;

    let body = build_hybrid_query(
        query,
        &query_vector,
        top_k,
        config.bm25_weight,
        config.vector_weight,
    );

    let hits = index.search(&body).await.map_err(|e| match e.kind {
        ErrorKind::SearchFailed => e,
        _ => ServiceError::search_failed(e.message),
    })?;

    Ok(items_from_hits(&hits, config.snippet_max_length))
}

/// The compound query: lexical and vector clauses as siblings under a
/// `bool.should`, each weighted by its configured boost.
pub fn build_hybrid_query(
    query: &str,
    query_vector: &[f32],
    top_k: usize,
    bm25_weight: f64,
    vector_weight: f64,
) -> serde_json::Value {
    serde_json::json!({
        "size": top_k,
        "_source": ["chunkId", "sourceDocumentId", "content", "metadata"],
        "query": {
            "bool": {
                "should": [
                    {
                        "multi_match": {
                            "query": query,
                            "fields": ["content^2", "metadata.title^1.5"],
                            "type": "best_fields",
                            "fuzziness": "AUTO",
                            "boost": bm25_weight
                        }
                    },
                    {
                        "script_score": {
                            "query": {"match_all": {}},
                            "script": {
                                "source": "cosineSimilarity(params.query_vector, doc['embedding']) + 1.0",
                                "params": {"query_vector": query_vector}
                            },
                            "boost": vector_weight
                        }
                    }
                ]
            }
        }
    })
}

/// Shape raw hits into result items with per-response score normalization.
pub fn items_from_hits(hits: &[IndexHit], snippet_max: usize) -> Vec<SearchResultItem> {
    let max_score = hits
        .iter()
        .map(|h| h.score)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|hit| {
            let metadata = hit.source.get("metadata");
            let title = metadata
                .and_then(|m| m.get("title"))
                .and_then(|t| t.as_str())
                .unwrap_or("Untitled")
                .to_string();
            let breadcrumbs = metadata
                .and_then(|m| m.get("breadcrumbs"))
                .and_then(|b| b.as_str())
                .map(|s| s.to_string());
            let content = hit
                .source
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("");

            let relevance_score = if max_score > 0.0 {
                (hit.score / max_score).clamp(0.0, 1.0)
            } else {
                0.0
            };

            SearchResultItem {
                chunk_id: hit.chunk_id.clone(),
                title,
                snippet: make_snippet(content, snippet_max),
                relevance_score,
                breadcrumbs,
            }
        })
        .collect()
}

/// First `max_chars` characters of the trimmed content, with a literal
/// `"..."` appended when anything was cut.
fn make_snippet(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    let prefix: String = trimmed.chars().take(max_chars).collect();
    if trimmed.chars().count() > max_chars {
        format!("{}...", prefix)
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f64, title: Option<&str>, content: &str) -> IndexHit {
        let metadata = match title {
            Some(t) => serde_json::json!({"title": t, "breadcrumbs": t}),
            None => serde_json::json!({}),
        };
        IndexHit {
            chunk_id: id.to_string(),
            score,
            source: serde_json::json!({
                "chunkId": id,
                "sourceDocumentId": "doc-1",
                "content": content,
                "metadata": metadata,
            }),
        }
    }

    #[test]
    fn query_shape_carries_both_clauses_and_weights() {
        let body = build_hybrid_query("jwt filter", &[0.1, 0.2], 50, 0.3, 0.7);
        assert_eq!(body["size"], 50);

        let should = body["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 2);

        let lexical = &should[0]["multi_match"];
        assert_eq!(lexical["query"], "jwt filter");
        assert_eq!(lexical["fields"][0], "content^2");
        assert_eq!(lexical["fields"][1], "metadata.title^1.5");
        assert_eq!(lexical["type"], "best_fields");
        assert_eq!(lexical["fuzziness"], "AUTO");
        assert!((lexical["boost"].as_f64().unwrap() - 0.3).abs() < 1e-9);

        let vector = &should[1]["script_score"];
        assert!(vector["script"]["source"]
            .as_str()
            .unwrap()
            .contains("+ 1.0"));
        assert_eq!(
            vector["script"]["params"]["query_vector"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert!((vector["boost"].as_f64().unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn snippet_exact_rules() {
        // At or under the limit: returned as-is, no ellipsis.
        assert_eq!(make_snippet("text-a", 50), "text-a");
        let exactly_fifty = "x".repeat(50);
        assert_eq!(make_snippet(&exactly_fifty, 50), exactly_fifty);

        // Over the limit: first 50 characters plus a literal ellipsis.
        let long = "y".repeat(51);
        let snippet = make_snippet(&long, 50);
        assert_eq!(snippet, format!("{}...", "y".repeat(50)));
    }

    #[test]
    fn snippet_counts_characters_not_bytes() {
        let cjk = "情".repeat(60);
        let snippet = make_snippet(&cjk, 50);
        assert_eq!(snippet.chars().count(), 53);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn normalization_tops_out_at_one() {
        let hits = vec![
            hit("c1", 4.0, Some("A"), "alpha"),
            hit("c2", 2.0, Some("B"), "beta"),
            hit("c3", 1.0, Some("C"), "gamma"),
        ];
        let items = items_from_hits(&hits, 50);
        assert!((items[0].relevance_score - 1.0).abs() < 1e-9);
        assert!((items[1].relevance_score - 0.5).abs() < 1e-9);
        assert!((items[2].relevance_score - 0.25).abs() < 1e-9);
        for item in &items {
            assert!(item.relevance_score >= 0.0 && item.relevance_score <= 1.0);
        }
    }

    #[test]
    fn missing_title_becomes_untitled() {
        let items = items_from_hits(&[hit("c1", 1.0, None, "body")], 50);
        assert_eq!(items[0].title, "Untitled");
        assert!(items[0].breadcrumbs.is_none());
    }

    #[test]
    fn empty_hits_produce_empty_items() {
        assert!(items_from_hits(&[], 50).is_empty());
    }

    #[test]
    fn ordering_preserved_from_engine() {
        let hits = vec![
            hit("best", 3.0, Some("Best"), "verbatim jwt filter match"),
            hit("near", 2.1, Some("Near"), "semantically related content"),
        ];
        let items = items_from_hits(&hits, 50);
        assert_eq!(items[0].chunk_id, "best");
        assert!(items[0].relevance_score > items[1].relevance_score);
    }
}
