//! Route handlers. Each one resolves a [`Document`], then goes through
//! [`process_document`] so caching and the document semaphore apply everywhere.

use super::AppState;
use crate::cache::ResultCache;
use crate::drive::{DriveClient, DriveFile, DriveOcrItem};
use crate::error::ServiceError;
use crate::extract::{extract, ExtractOptions};
use crate::output::OcrOutput;
use crate::pipeline::input::{fetch_url, Document};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const PONG: &str = "pong from ultra-minimal test";

pub async fn ping() -> Json<Value> {
    info!("Ping route hit");
    Json(json!({ "message": PONG }))
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn capabilities(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "engine": state.engine.name(),
        "renderer": config.renderer.to_string(),
        "language": config.language,
        "dpi": config.dpi,
        "formats": ["pdf", "png", "jpeg"],
        "max_upload_bytes": config.max_upload_bytes,
        "workers": config.workers,
        "cache": {
            "ttl_secs": config.ttl_secs,
            "capacity": config.cache_capacity,
            "entries": state.cache.entry_count(),
        },
        "drive": {
            "configured": state.drive.is_some() && config.drive.is_configured(),
            "max_files": config.max_files,
        },
    }))
}

/// Body of a successful OCR response.
#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub cached: bool,
    #[serde(flatten)]
    pub output: OcrOutput,
}

/// Query string of `POST /v1/ocr`.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub pages: Option<String>,
    pub lang: Option<String>,
    pub dpi: Option<u32>,
    pub password: Option<String>,
    /// Display name for logs and metadata.
    pub name: Option<String>,
}

pub async fn ocr_upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<OcrResponse>, ServiceError> {
    if body.is_empty() {
        return Err(ServiceError::InvalidInput("request body is empty".into()));
    }
    let name = query.name.unwrap_or_else(|| "upload".to_string());
    let options = ExtractOptions {
        pages: query.pages,
        lang: query.lang,
        dpi: query.dpi,
        password: query.password,
    };
    let doc = Document::from_bytes(name, body)?;
    let (output, cached) = process_document(&state, &doc, &options).await?;
    Ok(Json(OcrResponse {
        cached,
        output: output.as_ref().clone(),
    }))
}

/// JSON body of `POST /v1/ocr/url`.
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
    #[serde(flatten)]
    pub options: ExtractOptions,
}

pub async fn ocr_url(
    State(state): State<AppState>,
    Json(request): Json<UrlRequest>,
) -> Result<Json<OcrResponse>, ServiceError> {
    let doc = fetch_url(
        &request.url,
        state.config.download_timeout_secs,
        state.config.max_upload_bytes,
    )
    .await?;
    let (output, cached) = process_document(&state, &doc, &request.options).await?;
    Ok(Json(OcrResponse {
        cached,
        output: output.as_ref().clone(),
    }))
}

#[derive(Debug, Serialize)]
pub struct DriveFilesResponse {
    pub folder_id: String,
    pub files: Vec<DriveFile>,
}

pub async fn drive_files(
    State(state): State<AppState>,
) -> Result<Json<DriveFilesResponse>, ServiceError> {
    let (drive, folder_id) = drive_context(&state)?;
    let files = drive.list_recent(&folder_id, state.config.max_files).await?;
    Ok(Json(DriveFilesResponse { folder_id, files }))
}

/// Query string of `POST /v1/drive/ocr`.
#[derive(Debug, Default, Deserialize)]
pub struct DriveOcrQuery {
    pub pages: Option<String>,
    pub lang: Option<String>,
    pub dpi: Option<u32>,
    /// Number of files to process; capped at `max_files`.
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DriveOcrResponse {
    pub folder_id: String,
    pub processed: usize,
    pub failed: usize,
    pub items: Vec<DriveOcrItem>,
}

pub async fn drive_ocr(
    State(state): State<AppState>,
    Query(query): Query<DriveOcrQuery>,
) -> Result<Json<DriveOcrResponse>, ServiceError> {
    let (drive, folder_id) = drive_context(&state)?;
    let limit = query
        .limit
        .unwrap_or(state.config.max_files)
        .clamp(1, state.config.max_files);
    let options = ExtractOptions {
        pages: query.pages,
        lang: query.lang,
        dpi: query.dpi,
        password: None,
    };

    let files = drive.list_recent(&folder_id, limit).await?;
    info!("OCR of {} Drive files from folder {}", files.len(), folder_id);

    let items: Vec<DriveOcrItem> = join_all(
        files
            .into_iter()
            .map(|file| ocr_drive_file(&state, &drive, file, &options)),
    )
    .await;

    let failed = items.iter().filter(|i| i.error.is_some()).count();
    Ok(Json(DriveOcrResponse {
        folder_id,
        processed: items.len() - failed,
        failed,
        items,
    }))
}

async fn ocr_drive_file(
    state: &AppState,
    drive: &DriveClient,
    file: DriveFile,
    options: &ExtractOptions,
) -> DriveOcrItem {
    let key = ResultCache::drive_key(
        &file.id,
        &file.modified_time,
        &options.fingerprint(&state.config),
    );
    let result = state
        .cache
        .get_or_try_insert(key, async {
            let bytes = drive.download(&file, state.config.max_upload_bytes).await?;
            let doc = Document::from_bytes(file.name.clone(), bytes)?;
            run_extract(state, &doc, options).await
        })
        .await;

    match result {
        Ok((output, cached)) => DriveOcrItem {
            file,
            cached,
            output: Some(output.as_ref().clone()),
            error: None,
        },
        Err(e) => {
            warn!("Drive file '{}' failed: {}", file.name, e);
            DriveOcrItem {
                file,
                cached: false,
                output: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn drive_context(state: &AppState) -> Result<(Arc<DriveClient>, String), ServiceError> {
    let drive = state.drive.clone().ok_or_else(|| {
        ServiceError::DriveNotConfigured("NEST_TOKEN_JSON is not set".into())
    })?;
    let folder_id = state
        .config
        .drive
        .folder_id
        .clone()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| {
            ServiceError::DriveNotConfigured("NEST_DRIVE_FOLDER_ID is not set".into())
        })?;
    Ok((drive, folder_id))
}

/// OCR a document through the result cache.
pub async fn process_document(
    state: &AppState,
    doc: &Document,
    options: &ExtractOptions,
) -> Result<(Arc<OcrOutput>, bool), ServiceError> {
    let key = ResultCache::content_key(&doc.bytes, &options.fingerprint(&state.config));
    state
        .cache
        .get_or_try_insert(key, run_extract(state, doc, options))
        .await
}

async fn run_extract(
    state: &AppState,
    doc: &Document,
    options: &ExtractOptions,
) -> Result<OcrOutput, ServiceError> {
    let _permit = state
        .permits
        .acquire()
        .await
        .map_err(|e| ServiceError::Internal(format!("document semaphore closed: {e}")))?;
    extract(doc, options, &state.engine, &state.config).await
}
