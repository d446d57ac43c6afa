//! Pipeline stages for document OCR.
//!
//! Each submodule implements exactly one transformation step, so stages can
//! be tested alone and backends swapped (pdfium ↔ poppler, tesseract ↔ vision)
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ ocr ──▶ postprocess
//! (bytes)   (pages)    (PNG)     (engine) (cleanup)
//! ```
//!
//! 1. [`input`]: sniff uploaded/downloaded bytes into a typed document
//! 2. [`render`]: rasterise selected pages; pdfium runs in `spawn_blocking`
//! 3. [`encode`]: PNG-encode page images for the engines
//! 4. [`ocr`]: drive the engine with timeout and retry/backoff
//! 5. [`postprocess`]: deterministic text cleanup

pub mod encode;
pub mod input;
pub mod ocr;
pub mod postprocess;
pub mod render;
