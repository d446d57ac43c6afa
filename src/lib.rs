//! # nest-service
//!
//! HTTP service that extracts text from PDFs and images with OCR.
//!
//! ## Why this crate?
//!
//! Scanned documents carry no text layer, so `pdftotext` returns nothing
//! useful. This service rasterises each page and runs it through an OCR engine
//! (tesseract by default, or a vision LLM), then returns cleaned-up text with
//! per-page results. Documents can be uploaded, fetched from a URL, or pulled
//! from a Google Drive folder; results are cached for a configurable TTL.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes / URL / Drive file
//!  │
//!  ├─ 1. Input   sniff PDF / PNG / JPEG by magic bytes
//!  ├─ 2. Render  rasterise pages via pdfium (spawn_blocking) or pdftoppm
//!  ├─ 3. OCR     concurrent engine calls with timeout and retry
//!  ├─ 4. Polish  deterministic cleanup (line endings, hyphenation, fences)
//!  └─ 5. Output  assembled text + per-page results + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nest_service::{build_engine, server, AppState, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().port(8080).build()?;
//!     let engine = build_engine(&config)?;
//!     let listener = server::bind(&config).await?;
//!     server::serve(listener, AppState::new(config, engine)?).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `nest-service` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod drive;
pub mod engine;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::ResultCache;
pub use config::{
    DriveSettings, EngineKind, PageSelection, PageSeparator, RendererKind, ServiceConfig,
    ServiceConfigBuilder,
};
pub use drive::{DriveClient, DriveFile, GoogleCredentials};
pub use engine::{build_engine, OcrEngine, TesseractEngine, VisionEngine};
pub use error::{PageError, ServiceError};
pub use extract::{extract, ExtractOptions};
pub use output::{DocumentMetadata, OcrOutput, OcrStats, PageResult};
pub use pipeline::input::{Document, DocumentKind};
pub use server::{build_router, AppState};
