//! HTTP facade.
//!
//! Thin request router over the core: argument validation, API-key checks,
//! and error mapping — no business logic. Every JSON body is wrapped in the
//! common envelope `{success, data, message, errorCode, timestamp}`.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Status |
//! |--------|------|------|--------|
//! | `POST` | `/api/v1/sources/upload` | API key | 202 |
//! | `GET`  | `/api/v1/sources` | API key | 200 |
//! | `GET`  | `/api/v1/sources/{id}` | API key | 200 |
//! | `POST` | `/api/v1/sources/{id}/resync` | API key | 202 |
//! | `DELETE` | `/api/v1/sources/{id}` | API key | 202 |
//! | `GET`  | `/api/v1/search` | none | 200 |
//! | `POST` | `/api/v1/get-content` | none | 200 |
//! | `GET`  | `/health` | none | 200 |
//!
//! Administrative endpoints require the `X-API-KEY` header to match the
//! deployment secret; search and get-content are open by design for
//! intra-network use.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::content::{self, TokenEstimator};
use crate::embedder::EmbeddingClient;
use crate::error::ServiceError;
use crate::metadata;
use crate::models::SourceDocument;
use crate::pipeline::Coordinator;
use crate::search;
use crate::search_index::SearchIndex;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub coordinator: Coordinator,
    pub index: Arc<dyn SearchIndex>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub estimator: Arc<dyn TokenEstimator>,
}

/// Build the router over prepared state. Separate from [`run_server`] so
/// tests can drive it in-process.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart framing overhead rides on top of the payload limit; the
    // exact byte check lives in the coordinator.
    let body_limit = state.config.upload.max_bytes as usize + 1024 * 1024;

    Router::new()
        .route("/api/v1/sources/upload", post(handle_upload))
        .route("/api/v1/sources", get(handle_list))
        .route(
            "/api/v1/sources/{id}",
            get(handle_get_document).delete(handle_delete),
        )
        .route("/api/v1/sources/{id}/resync", post(handle_resync))
        .route("/api/v1/search", get(handle_search))
        .route("/api/v1/get-content", post(handle_get_content))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    if state.config.api_key.is_none() {
        warn!("no apiKey configured; administrative endpoints will refuse every request");
    }

    let app = build_router(state);
    info!(bind = %bind_addr, "docbase listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Envelope ============

/// The common response envelope. Every field is always present.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T: Serialize> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
    error_code: Option<String>,
    timestamp: String,
}

fn ok_envelope<T: Serialize>(status: StatusCode, data: T) -> Response {
    let body = Envelope {
        success: true,
        data: Some(data),
        message: None,
        error_code: None,
        timestamp: Utc::now().to_rfc3339(),
    };
    (status, Json(body)).into_response()
}

/// Business errors rendered as enveloped HTTP responses.
struct AppError(ServiceError);

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Envelope::<()> {
            success: false,
            data: None,
            message: Some(self.0.message.clone()),
            error_code: Some(self.0.kind.code().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        };
        (self.0.kind.http_status(), Json(body)).into_response()
    }
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let configured = match &state.config.api_key {
        Some(key) => key,
        None => return Err(ServiceError::forbidden().into()),
    };
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented != configured {
        return Err(ServiceError::forbidden().into());
    }
    Ok(())
}

// ============ Upload ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    source_document_id: String,
    original_filename: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    require_api_key(&state, &headers)?;

    let mut upload: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError(ServiceError::validation(format!(
            "malformed multipart body: {}",
            e
        )))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError(ServiceError::validation("file part needs a filename")))?;
        let content_type = field.content_type().map(|s| s.to_string());
        let bytes = field.bytes().await.map_err(|e| {
            AppError(ServiceError::validation(format!(
                "failed to read file part: {}",
                e
            )))
        })?;
        upload = Some((filename, content_type, bytes.to_vec()));
        break;
    }

    let (filename, content_type, bytes) = upload
        .ok_or_else(|| AppError(ServiceError::validation("multipart field 'file' is required")))?;

    let document = state
        .coordinator
        .upload(&filename, content_type.as_deref(), &bytes)
        .await?;

    Ok(ok_envelope(
        StatusCode::ACCEPTED,
        UploadResponse {
            source_document_id: document.id,
            original_filename: document.original_filename,
        },
    ))
}

// ============ List / get ============

#[derive(Deserialize)]
struct ListParams {
    page: Option<u32>,
    size: Option<u32>,
    sort: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentSummary {
    id: String,
    original_filename: String,
    file_type: String,
    byte_length: i64,
    fingerprint: String,
    status: String,
    error_message: Option<String>,
    last_ingested_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<&SourceDocument> for DocumentSummary {
    fn from(doc: &SourceDocument) -> Self {
        Self {
            id: doc.id.clone(),
            original_filename: doc.original_filename.clone(),
            file_type: doc.file_type.as_str().to_string(),
            byte_length: doc.byte_length,
            fingerprint: doc.fingerprint.clone(),
            status: doc.status.as_str().to_string(),
            error_message: doc.error_message.clone(),
            last_ingested_at: doc.last_ingested_at.map(|t| t.to_rfc3339()),
            created_at: doc.created_at.to_rfc3339(),
            updated_at: doc.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageResponse {
    items: Vec<DocumentSummary>,
    page: u32,
    size: u32,
    total_elements: i64,
    total_pages: i64,
}

async fn handle_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Response, AppError> {
    require_api_key(&state, &headers)?;

    let page = params.page.unwrap_or(0);
    let size = params.size.unwrap_or(20);
    if size == 0 || size > 200 {
        return Err(AppError(ServiceError::validation(
            "size must be between 1 and 200",
        )));
    }
    let sort = params.sort.unwrap_or_else(|| "createdAt,desc".to_string());

    let (documents, total) = metadata::list_documents(&state.pool, page, size, &sort).await?;
    let total_pages = (total + size as i64 - 1) / size as i64;

    Ok(ok_envelope(
        StatusCode::OK,
        PageResponse {
            items: documents.iter().map(DocumentSummary::from).collect(),
            page,
            size,
            total_elements: total,
            total_pages,
        },
    ))
}

async fn handle_get_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    require_api_key(&state, &headers)?;

    let document = metadata::get_document(&state.pool, &id)
        .await?
        .ok_or_else(|| AppError(ServiceError::document_not_found(&id)))?;

    Ok(ok_envelope(StatusCode::OK, DocumentSummary::from(&document)))
}

// ============ Resync / delete ============

async fn handle_resync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    require_api_key(&state, &headers)?;
    state.coordinator.resync(&id).await?;
    Ok(ok_envelope(
        StatusCode::ACCEPTED,
        serde_json::json!({"sourceDocumentId": id}),
    ))
}

async fn handle_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    require_api_key(&state, &headers)?;
    state.coordinator.delete(&id).await?;
    Ok(ok_envelope(
        StatusCode::ACCEPTED,
        serde_json::json!({"sourceDocumentId": id}),
    ))
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchParams {
    query: Option<String>,
    #[serde(rename = "topK")]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<search::SearchResultItem>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, AppError> {
    let query = params.query.unwrap_or_default();
    let top_k = params.top_k.unwrap_or(state.config.search.default_top_k);

    let results = search::hybrid_search(
        state.index.as_ref(),
        state.embedder.as_ref(),
        &state.config.search,
        &query,
        top_k,
    )
    .await?;

    Ok(ok_envelope(StatusCode::OK, SearchResponse { results }))
}

// ============ Content ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetContentRequest {
    chunk_id: String,
    max_tokens: Option<usize>,
}

async fn handle_get_content(
    State(state): State<AppState>,
    Json(req): Json<GetContentRequest>,
) -> Result<Response, AppError> {
    let max_tokens = req
        .max_tokens
        .unwrap_or(state.config.content.default_max_tokens);

    let retrieved = content::retrieve_content(
        state.index.as_ref(),
        state.estimator.as_ref(),
        &req.chunk_id,
        max_tokens,
    )
    .await?;

    Ok(ok_envelope(StatusCode::OK, retrieved))
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Response {
    ok_envelope(
        StatusCode::OK,
        HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
}
