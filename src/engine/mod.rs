//! OCR engines: the component that turns one page image into text.
//!
//! The HTTP layer and the pipeline only see `Arc<dyn OcrEngine>`, so the
//! engine is picked once at startup and tests can substitute a fake.
//!
//! | Engine | Backend | Needs |
//! |--------|---------|-------|
//! | [`TesseractEngine`] | `tesseract` binary | tesseract-ocr + language data |
//! | [`VisionEngine`]    | vision LLM via edgequake-llm | provider API key |

pub mod tesseract;
pub mod vision;

pub use tesseract::TesseractEngine;
pub use vision::VisionEngine;

use crate::config::{EngineKind, ServiceConfig};
use crate::error::ServiceError;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;

/// A backend capable of reading the text on a page image.
///
/// `recognize` returns the raw text or a human-readable failure reason; retry,
/// timeout and cleanup are applied by [`crate::pipeline::ocr::recognize_page`].
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short engine name reported in stats and `/v1/capabilities`.
    fn name(&self) -> &str;

    /// Check that the engine can run with the given language list.
    async fn check(&self, language: &str) -> Result<(), ServiceError>;

    /// OCR a single page (1-indexed `page_num` is only used for logging).
    async fn recognize(
        &self,
        page_num: usize,
        image: &DynamicImage,
        language: &str,
    ) -> Result<String, String>;
}

/// Construct the engine selected in `config`.
pub fn build_engine(config: &ServiceConfig) -> Result<Arc<dyn OcrEngine>, ServiceError> {
    match config.engine {
        EngineKind::Tesseract => Ok(Arc::new(TesseractEngine::new(config.psm))),
        EngineKind::Vision => Ok(Arc::new(VisionEngine::from_config(config)?)),
    }
}
