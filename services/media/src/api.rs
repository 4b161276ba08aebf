use crate::config::ApiConfig;
use crate::error::{MediaError, Result};
use crate::metadata_store::MetadataStore;
use crate::notifications::parse_storage_write;
use crate::object_store::{image_key, ObjectStore, PresignMethod};
use crate::processing::EventProcessor;
use crate::record::{now_millis, MetadataRecord, RecordPatch};
use crate::validation::{
    parse_json_body, require_json_content, validate_filename, validate_id,
    validate_optional_filename,
};
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub processor: Arc<EventProcessor>,
    pub bucket: String,
    pub presigned_url_expiry: Duration,
}

impl AppState {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        presigned_url_expiry: Duration,
        thumbnail_size: u32,
    ) -> Self {
        let processor = Arc::new(EventProcessor::new(
            metadata.clone(),
            objects.clone(),
            thumbnail_size,
        ));

        Self {
            metadata,
            objects,
            processor,
            bucket: bucket.into(),
            presigned_url_expiry,
        }
    }
}

/// Signed URL descriptor returned to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrl {
    pub id: String,
    pub url: String,
    pub method: PresignMethod,
    /// Seconds until the URL stops working
    pub expires_in: u64,
}

/// One record plus the URL that goes with it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    pub metadata: MetadataRecord,
    pub pre_signed_url: Option<PresignedUrl>,
}

/// Every record plus download URLs for the uploaded ones
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordListResponse {
    pub metadata: Vec<MetadataRecord>,
    pub pre_signed_urls: Vec<PresignedUrl>,
}

/// Result of a processed storage notification
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub metadata: MetadataRecord,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metadata", post(create_metadata).get(list_metadata))
        .route("/metadata/:id", get(get_metadata).put(replace_metadata))
        .route("/events/analysis", post(analysis_event))
        .route("/events/thumbnail", post(thumbnail_event))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "media-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    // Point read of a key that never exists
    match state.metadata.get(&Uuid::nil().to_string()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "metadata_store": "connected"
            })),
        ),
        Err(e) => {
            error!(error = %e, "Metadata store readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "metadata_store": "disconnected"
                })),
            )
        }
    }
}

/// Issue a signed URL for a record's original image
async fn presign(
    state: &AppState,
    method: PresignMethod,
    id: &str,
    filename: &str,
) -> Result<PresignedUrl> {
    let url = state
        .objects
        .presign(
            method,
            &state.bucket,
            &image_key(id, filename),
            state.presigned_url_expiry,
        )
        .await?;

    Ok(PresignedUrl {
        id: id.to_string(),
        url,
        method,
        expires_in: state.presigned_url_expiry.as_secs(),
    })
}

/// Register a new upload and hand back a PUT URL for it
#[instrument(skip(state, headers, body))]
async fn create_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RecordResponse>> {
    require_json_content(&headers)?;
    let body = parse_json_body(&body)?;
    let filename = validate_filename(body.get("filename"))?;

    let record = MetadataRecord::new(Uuid::new_v4().to_string(), filename, Utc::now());
    state.metadata.put(&record).await?;

    let url = presign(&state, PresignMethod::Put, &record.id, &record.filename).await?;

    metrics::counter!("media.records.created").increment(1);
    info!(id = %record.id, filename = %record.filename, "Metadata record created");

    Ok(Json(RecordResponse {
        metadata: record,
        pre_signed_url: Some(url),
    }))
}

/// Fetch one record, with a GET URL once its image is uploaded
#[instrument(skip(state))]
async fn get_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordResponse>> {
    validate_id(&id)?;

    let record = state.metadata.get(&id).await?.ok_or(MediaError::NotFound)?;

    let url = if record.is_uploaded {
        Some(presign(&state, PresignMethod::Get, &record.id, &record.filename).await?)
    } else {
        None
    };

    Ok(Json(RecordResponse {
        metadata: record,
        pre_signed_url: url,
    }))
}

/// Fetch every record in scan order
#[instrument(skip(state))]
async fn list_metadata(State(state): State<AppState>) -> Result<Json<RecordListResponse>> {
    let records = state.metadata.scan_all().await?;

    let mut urls = Vec::new();
    for record in records.iter().filter(|r| r.is_uploaded) {
        urls.push(presign(&state, PresignMethod::Get, &record.id, &record.filename).await?);
    }

    info!(
        records = records.len(),
        urls = urls.len(),
        "Listed metadata records"
    );

    Ok(Json(RecordListResponse {
        metadata: records,
        pre_signed_urls: urls,
    }))
}

/// Re-issue a PUT URL for an existing record, optionally under a new filename
#[instrument(skip(state, body))]
async fn replace_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<RecordResponse>> {
    validate_id(&id)?;

    let mut record = state.metadata.get(&id).await?.ok_or(MediaError::NotFound)?;

    // Anything other than a JSON object counts as no body
    let replacement = match parse_json_body(&body).ok() {
        Some(serde_json::Value::Object(fields)) => validate_optional_filename(&fields)?,
        _ => None,
    };

    if let Some(filename) = replacement {
        record = state
            .metadata
            .update(&id, &RecordPatch::ReplaceFilename { filename }, now_millis())
            .await?;

        metrics::counter!("media.records.replaced").increment(1);
        info!(id = %id, filename = %record.filename, "Metadata record filename replaced");
    }

    let url = presign(&state, PresignMethod::Put, &record.id, &record.filename).await?;

    Ok(Json(RecordResponse {
        metadata: record,
        pre_signed_url: Some(url),
    }))
}

/// Storage notification: analyze the uploaded original
async fn analysis_event(State(state): State<AppState>, body: Bytes) -> Result<Json<EventResponse>> {
    let write = parse_storage_write(&body)?;
    let metadata = state.processor.analyze_upload(&write).await?;
    Ok(Json(EventResponse { metadata }))
}

/// Storage notification: build the thumbnail
async fn thumbnail_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<EventResponse>> {
    let write = parse_storage_write(&body)?;
    let metadata = state.processor.create_thumbnail(&write).await?;
    Ok(Json(EventResponse { metadata }))
}

/// Start the media API server, serving until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting media API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
