//! Document-level OCR: the orchestration behind every HTTP endpoint.
//!
//! [`extract`] waits for all selected pages and returns one [`OcrOutput`]. Page
//! failures are recorded per page; the call only fails outright when the
//! document itself is unusable or no page produced text.

use crate::config::{is_valid_language, PageSelection, ServiceConfig};
use crate::engine::OcrEngine;
use crate::error::{PageError, ServiceError};
use crate::output::{OcrOutput, OcrStats, PageResult};
use crate::pipeline::input::Document;
use crate::pipeline::render::{self, RenderSettings};
use crate::pipeline::{ocr, postprocess};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-request overrides of the service defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractOptions {
    /// Page selection such as `1-3` or `2,5`; all pages when unset.
    #[serde(default)]
    pub pages: Option<String>,
    /// tesseract language list, e.g. `eng+fra`.
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub dpi: Option<u32>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ExtractOptions {
    /// Stable string describing every option that changes the output; used in cache keys.
    ///
    /// The password enters as a SHA-256 digest, so an encrypted document
    /// unlocked once is only served from cache to callers with the same password.
    pub fn fingerprint(&self, config: &ServiceConfig) -> String {
        let password = match &self.password {
            Some(pw) => Sha256::digest(pw.as_bytes())
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>(),
            None => "none".to_string(),
        };
        format!(
            "pages={};lang={};dpi={};pw={}",
            self.pages.as_deref().unwrap_or("all"),
            self.language(config),
            self.dpi(config),
            password
        )
    }

    pub fn language<'a>(&'a self, config: &'a ServiceConfig) -> &'a str {
        self.lang.as_deref().unwrap_or(&config.language)
    }

    /// Requested DPI clamped to 72–600, or the configured default.
    pub fn dpi(&self, config: &ServiceConfig) -> u32 {
        self.dpi.map_or(config.dpi, |dpi| dpi.clamp(72, 600))
    }
}

/// OCR a document.
///
/// # Errors
/// Returns `Err(ServiceError)` only for fatal errors:
/// - invalid options (bad page selection or language)
/// - corrupt or password-protected PDF, renderer unavailable
/// - selection matches no page, or every page failed
pub async fn extract(
    doc: &Document,
    options: &ExtractOptions,
    engine: &Arc<dyn OcrEngine>,
    config: &ServiceConfig,
) -> Result<OcrOutput, ServiceError> {
    let total_start = Instant::now();
    info!("Starting OCR: '{}' ({})", doc.name, doc.kind);

    // ── Step 1: Validate options ─────────────────────────────────────────
    let selection = PageSelection::parse(options.pages.as_deref().unwrap_or(""))?;
    let language = options.language(config).to_string();
    if !is_valid_language(&language) {
        return Err(ServiceError::InvalidInput(format!(
            "'{language}' is not a valid language list"
        )));
    }
    let mut settings = RenderSettings::from_config(config);
    settings.dpi = options.dpi(config);
    settings.password = options.password.clone();

    // ── Step 2: Metadata and page indices ────────────────────────────────
    let metadata = render::extract_metadata(doc, &settings).await?;
    let total_pages = metadata.page_count;
    if total_pages == 0 {
        return Err(ServiceError::CorruptPdf {
            name: doc.name.clone(),
            detail: "document has no pages".into(),
        });
    }
    let page_indices = selection.to_indices(total_pages);
    if page_indices.is_empty() {
        return Err(ServiceError::PageOutOfRange {
            page: selection.first_requested(),
            total: total_pages,
        });
    }
    debug!("Selected {} of {} pages", page_indices.len(), total_pages);

    // ── Step 3: Rasterise ────────────────────────────────────────────────
    let render_start = Instant::now();
    let rendered = render::render_pages(doc, &settings, &page_indices).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", rendered.len(), render_duration_ms);

    // ── Step 4: OCR concurrently ─────────────────────────────────────────
    let ocr_start = Instant::now();
    let mut pages: Vec<PageResult> = stream::iter(rendered.into_iter().map(|page| {
        let engine = Arc::clone(engine);
        let language = language.clone();
        async move {
            let page_num = page.index + 1;
            match page.image {
                Ok(image) => {
                    ocr::recognize_page(engine.as_ref(), page_num, &image, &language, config).await
                }
                Err(detail) => {
                    warn!("Page {}: render failed: {}", page_num, detail);
                    PageResult {
                        page_num,
                        text: String::new(),
                        duration_ms: 0,
                        retries: 0,
                        error: Some(PageError::RenderFailed {
                            page: page_num,
                            detail,
                        }),
                    }
                }
            }
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;
    let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

    // ── Step 5: Clean up and order ───────────────────────────────────────
    for page in pages.iter_mut().filter(|p| p.is_ok()) {
        page.text = postprocess::clean_text(&page.text);
    }
    pages.sort_by_key(|p| p.page_num);

    // ── Step 6: Stats ────────────────────────────────────────────────────
    let processed = pages.iter().filter(|p| p.is_ok()).count();
    let failed = pages.len() - processed;
    let skipped = page_indices.len().saturating_sub(pages.len());

    if processed == 0 {
        let first_error = pages
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no page could be rendered".to_string());
        return Err(ServiceError::AllPagesFailed {
            total: page_indices.len(),
            retries: config.max_retries,
            first_error,
        });
    }

    let text = assemble_text(&pages, config);
    let stats = OcrStats {
        total_pages,
        processed_pages: processed,
        failed_pages: failed,
        skipped_pages: skipped,
        render_duration_ms,
        ocr_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        engine: engine.name().to_string(),
    };

    info!(
        "OCR complete: '{}' {}/{} pages, {}ms total",
        doc.name, processed, total_pages, stats.total_duration_ms
    );

    Ok(OcrOutput {
        text,
        pages,
        metadata,
        stats,
    })
}

/// Join successful pages with the configured separator.
fn assemble_text(pages: &[PageResult], config: &ServiceConfig) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().filter(|p| p.is_ok()).enumerate() {
        if i > 0 {
            out.push_str(&config.page_separator.render(page.page_num));
        }
        out.push_str(&page.text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSeparator;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    struct Echo;

    #[async_trait]
    impl OcrEngine for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn check(&self, _language: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn recognize(
            &self,
            _page_num: usize,
            image: &DynamicImage,
            language: &str,
        ) -> Result<String, String> {
            Ok(format!("{}x{} {language}   \r\n\u{000C}", image.width(), image.height()))
        }
    }

    struct Broken;

    #[async_trait]
    impl OcrEngine for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn check(&self, _language: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn recognize(&self, _: usize, _: &DynamicImage, _: &str) -> Result<String, String> {
            Err("engine crashed".into())
        }
    }

    fn png_doc() -> Document {
        let white = Rgba([255, 255, 255, 255]);
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(12, 8, white));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        Document::from_bytes("scan.png", buf).unwrap()
    }

    fn page(n: usize, text: &str, ok: bool) -> PageResult {
        PageResult {
            page_num: n,
            text: text.to_string(),
            duration_ms: 0,
            retries: 0,
            error: (!ok).then(|| PageError::Timeout { page: n, secs: 1 }),
        }
    }

    #[tokio::test]
    async fn extracts_image_with_cleanup() {
        let engine: Arc<dyn OcrEngine> = Arc::new(Echo);
        let options = ExtractOptions {
            lang: Some("deu".into()),
            ..Default::default()
        };
        let out = extract(&png_doc(), &options, &engine, &ServiceConfig::default())
            .await
            .unwrap();
        assert_eq!(out.text, "12x8 deu\n");
        assert_eq!(out.stats.processed_pages, 1);
        assert_eq!(out.stats.engine, "echo");
        assert_eq!(out.metadata.kind, "png");
    }

    #[tokio::test]
    async fn page_outside_image_is_rejected() {
        let engine: Arc<dyn OcrEngine> = Arc::new(Echo);
        let options = ExtractOptions {
            pages: Some("2".into()),
            ..Default::default()
        };
        let err = extract(&png_doc(), &options, &engine, &ServiceConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PageOutOfRange { page: 2, total: 1 }));
    }

    #[tokio::test]
    async fn invalid_language_is_rejected() {
        let engine: Arc<dyn OcrEngine> = Arc::new(Echo);
        let options = ExtractOptions {
            lang: Some("../etc".into()),
            ..Default::default()
        };
        let err = extract(&png_doc(), &options, &engine, &ServiceConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn all_pages_failed() {
        let engine: Arc<dyn OcrEngine> = Arc::new(Broken);
        let config = ServiceConfig::builder()
            .max_retries(0)
            .build()
            .unwrap();
        let err = extract(&png_doc(), &ExtractOptions::default(), &engine, &config)
            .await
            .unwrap_err();
        match err {
            ServiceError::AllPagesFailed { total, first_error, .. } => {
                assert_eq!(total, 1);
                assert!(first_error.contains("engine crashed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn assemble_skips_failed_pages() {
        let config = ServiceConfig::builder()
            .page_separator(PageSeparator::Marker)
            .build()
            .unwrap();
        let pages = vec![page(1, "one\n", true), page(2, "", false), page(3, "three\n", true)];
        assert_eq!(assemble_text(&pages, &config), "one\n\n--- page 3 ---\n\nthree\n");
    }

    #[test]
    fn fingerprint_tracks_options() {
        let config = ServiceConfig::default();
        let a = ExtractOptions::default().fingerprint(&config);
        let b = ExtractOptions {
            pages: Some("1".into()),
            ..Default::default()
        }
        .fingerprint(&config);
        assert_ne!(a, b);
        assert_eq!(a, "pages=all;lang=eng;dpi=200;pw=none");
    }

    #[test]
    fn fingerprint_separates_passwords() {
        let config = ServiceConfig::default();
        let with = |pw: &str| ExtractOptions {
            password: Some(pw.into()),
            ..Default::default()
        };
        let right = with("right").fingerprint(&config);
        assert_ne!(right, with("wrong").fingerprint(&config));
        assert_eq!(right, with("right").fingerprint(&config));
        assert!(!right.contains("right"));
    }

    #[test]
    fn fingerprint_uses_clamped_dpi() {
        let config = ServiceConfig::default();
        let dpi = |d: u32| ExtractOptions {
            dpi: Some(d),
            ..Default::default()
        };
        assert_eq!(dpi(601).fingerprint(&config), dpi(10_000).fingerprint(&config));
        assert_eq!(dpi(10).dpi(&config), 72);
    }
}
