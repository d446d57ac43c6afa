//! Result types returned by an OCR extraction.
//!
//! Everything here is `Serialize` because the HTTP layer hands these structs
//! straight to `axum::Json`.

use crate::error::PageError;
use serde::{Deserialize, Serialize};

/// The full result of OCR'ing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    /// Assembled text of every successful page, in page order.
    pub text: String,
    /// Per-page results sorted by `page_num`, failures included.
    pub pages: Vec<PageResult>,
    pub metadata: DocumentMetadata,
    pub stats: OcrStats,
}

/// Outcome for a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Cleaned OCR text. Empty when `error` is set.
    pub text: String,
    pub duration_ms: u64,
    /// Number of retries spent before success or giving up.
    pub retries: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Document-level metadata. Images report a single page and no PDF fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    pub page_count: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pdf_version: String,
}

/// Timing and page counters for one extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    /// Selected pages the rasteriser could not produce.
    pub skipped_pages: usize,
    pub render_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Name of the engine that produced the text.
    pub engine: String,
}
