//! Error types for the nest-service library and HTTP surface.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ServiceError`] is **fatal**: the request cannot be served at all
//!   (unsupported upload, unreachable URL, corrupt PDF, OCR engine missing).
//!   Returned as `Err(ServiceError)` from [`crate::extract::extract`] and
//!   rendered as a JSON error body by the HTTP layer.
//!
//! * [`PageError`] is **non-fatal**: a single page failed (render glitch,
//!   tesseract crash, transient vision-API error) while the other pages are
//!   fine. Stored inside [`crate::output::PageResult`] so clients see partial
//!   success instead of losing the whole document to one bad page.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// All fatal errors returned by the service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Request was syntactically valid but its content is not usable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The uploaded or downloaded bytes are neither a PDF nor a supported image.
    #[error("Unsupported document '{name}': first bytes {magic:?} are not PDF, PNG or JPEG")]
    UnsupportedDocument { name: String, magic: [u8; 4] },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// A downloaded document is larger than `max_upload_bytes`.
    #[error("Document from '{source_name}' exceeds the {limit}-byte limit")]
    DocumentTooLarge { source_name: String, limit: usize },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password but none (or a wrong one) was provided.
    #[error("PDF '{name}' is encrypted and requires a valid password")]
    PasswordRequired { name: String },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// Could not bind to a pdfium library.
    #[error("Failed to bind to pdfium library: {0}\nSet NEST_PDFIUM_LIB_DIR or switch to --renderer poppler.")]
    PdfiumBindingFailed(String),

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The configured OCR engine cannot run (binary missing, no API key).
    #[error("OCR engine '{engine}' is unavailable: {hint}")]
    EngineUnavailable { engine: String, hint: String },

    /// Every page failed after all retries; output would be empty.
    #[error("All {total} pages failed after {retries} retries each. First error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── Drive errors ──────────────────────────────────────────────────────
    /// A Drive endpoint was hit but no folder or credentials are configured.
    #[error("Google Drive is not configured: {0}")]
    DriveNotConfigured(String),

    /// Client-secret or token JSON could not be read or parsed.
    #[error("Invalid Google credentials: {0}")]
    InvalidCredentials(String),

    /// The Drive or OAuth API answered with a failure.
    #[error("Google Drive API error ({status}): {message}")]
    DriveApi { status: u16, message: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable identifier used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::UnsupportedDocument { .. } => "unsupported_document",
            ServiceError::DownloadFailed { .. } => "download_failed",
            ServiceError::DownloadTimeout { .. } => "download_timeout",
            ServiceError::DocumentTooLarge { .. } => "document_too_large",
            ServiceError::CorruptPdf { .. } => "corrupt_pdf",
            ServiceError::PasswordRequired { .. } => "password_required",
            ServiceError::PageOutOfRange { .. } => "page_out_of_range",
            ServiceError::PdfiumBindingFailed(_) => "pdfium_unavailable",
            ServiceError::EngineUnavailable { .. } => "engine_unavailable",
            ServiceError::AllPagesFailed { .. } => "all_pages_failed",
            ServiceError::DriveNotConfigured(_) => "drive_not_configured",
            ServiceError::InvalidCredentials(_) => "invalid_credentials",
            ServiceError::DriveApi { .. } => "drive_api_error",
            ServiceError::InvalidConfig(_) => "invalid_config",
            ServiceError::Internal(_) => "internal",
        }
    }

    /// HTTP status the error maps to when it escapes a handler.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) | ServiceError::PageOutOfRange { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::UnsupportedDocument { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::DocumentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::CorruptPdf { .. } | ServiceError::PasswordRequired { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::DownloadFailed { .. }
            | ServiceError::DriveApi { .. }
            | ServiceError::AllPagesFailed { .. } => StatusCode::BAD_GATEWAY,
            ServiceError::DownloadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::EngineUnavailable { .. }
            | ServiceError::PdfiumBindingFailed(_)
            | ServiceError::DriveNotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::InvalidCredentials(_)
            | ServiceError::InvalidConfig(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "request failed: {self}");
        } else {
            tracing::warn!(kind = self.kind(), "request rejected: {self}");
        }
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails.
/// The overall extraction continues unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// Page rasterisation or image decoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// OCR engine failed after retries.
    #[error("Page {page}: OCR failed after {retries} retries: {detail}")]
    OcrFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// OCR call timed out on the last attempt.
    #[error("Page {page}: OCR timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}
