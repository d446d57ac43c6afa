//! Rasterisation: turn a [`Document`] into one `DynamicImage` per selected page.
//!
//! Two backends are supported. pdfium (through `pdfium-render`) runs
//! in-process inside `spawn_blocking`, because the C++ library keeps
//! thread-local state and must not stall the Tokio workers. poppler runs as
//! the `pdftoppm` / `pdfinfo` binaries shipped in the OCR container image.
//!
//! PNG and JPEG uploads skip rasterisation entirely: they are decoded once and
//! treated as a single page.
//!
//! Both backends cap the longest edge at `max_rendered_pixels` while
//! rendering, so a poster sized page at high DPI cannot exhaust memory.
//! poppler gets a per-page DPI derived from the page size `pdfinfo` reports,
//! and only the selected pages are handed to `pdftoppm`.

use crate::config::{RendererKind, ServiceConfig};
use crate::error::ServiceError;
use crate::output::DocumentMetadata;
use crate::pipeline::input::{Document, DocumentKind};
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Knobs the rasteriser needs, resolved from config plus per-request overrides.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub renderer: RendererKind,
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub pdfium_lib_dir: Option<PathBuf>,
    pub password: Option<String>,
}

impl RenderSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            renderer: config.renderer,
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            pdfium_lib_dir: config.pdfium_lib_dir.clone(),
            password: None,
        }
    }
}

/// One rasterised page, or the reason it could not be produced.
pub struct RenderedPage {
    /// 0-indexed page number.
    pub index: usize,
    pub image: Result<DynamicImage, String>,
}

/// Read document metadata and the page count without rendering.
pub async fn extract_metadata(
    doc: &Document,
    settings: &RenderSettings,
) -> Result<DocumentMetadata, ServiceError> {
    if doc.kind.is_image() {
        return Ok(DocumentMetadata {
            name: doc.name.clone(),
            kind: doc.kind.to_string(),
            page_count: 1,
            ..Default::default()
        });
    }

    match settings.renderer {
        RendererKind::Pdfium => {
            let doc = doc.clone();
            let settings = settings.clone();
            tokio::task::spawn_blocking(move || pdfium_metadata_blocking(&doc, &settings))
                .await
                .map_err(|e| ServiceError::Internal(format!("Metadata task panicked: {}", e)))?
        }
        RendererKind::Poppler => poppler_metadata(doc, settings).await,
    }
}

/// Rasterise the selected 0-indexed pages of a document.
pub async fn render_pages(
    doc: &Document,
    settings: &RenderSettings,
    page_indices: &[usize],
) -> Result<Vec<RenderedPage>, ServiceError> {
    if doc.kind.is_image() {
        let bytes = doc.bytes.clone();
        let max_pixels = settings.max_rendered_pixels;
        let image = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes)
                .map(|img| cap_pixels(img, max_pixels))
                .map_err(|e| format!("image decode failed: {e}"))
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("Decode task panicked: {}", e)))?;
        return Ok(vec![RenderedPage { index: 0, image }]);
    }

    match settings.renderer {
        RendererKind::Pdfium => {
            let doc = doc.clone();
            let settings = settings.clone();
            let indices = page_indices.to_vec();
            tokio::task::spawn_blocking(move || pdfium_render_blocking(&doc, &settings, &indices))
                .await
                .map_err(|e| ServiceError::Internal(format!("Render task panicked: {}", e)))?
        }
        RendererKind::Poppler => poppler_render(doc, settings, page_indices).await,
    }
}

/// Scale an image down so neither edge exceeds `max_pixels`.
fn cap_pixels(img: DynamicImage, max_pixels: u32) -> DynamicImage {
    if img.width() <= max_pixels && img.height() <= max_pixels {
        return img;
    }
    img.resize(max_pixels, max_pixels, FilterType::Lanczos3)
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Bind to libpdfium in `lib_dir`, or to the system library when unset.
pub fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, ServiceError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ServiceError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn load_error(doc: &Document, e: PdfiumError) -> ServiceError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        ServiceError::PasswordRequired {
            name: doc.name.clone(),
        }
    } else {
        ServiceError::CorruptPdf {
            name: doc.name.clone(),
            detail: err_str,
        }
    }
}

fn pdfium_render_blocking(
    doc: &Document,
    settings: &RenderSettings,
    page_indices: &[usize],
) -> Result<Vec<RenderedPage>, ServiceError> {
    let pdfium = bind_pdfium(settings.pdfium_lib_dir.as_deref())?;
    let password = settings.password.as_deref();

    let document = pdfium
        .load_pdf_from_byte_slice(&doc.bytes, password)
        .map_err(|e| load_error(doc, e))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF '{}' loaded: {} pages", doc.name, total_pages);

    let max_pixels = settings.max_rendered_pixels as i32;
    let mut results = Vec::with_capacity(page_indices.len());

    for &idx in page_indices {
        if idx >= total_pages {
            warn!(
                "Skipping page {} (out of range, total={})",
                idx + 1,
                total_pages
            );
            continue;
        }

        let image = pages
            .get(idx as u16)
            .map_err(|e| format!("{:?}", e))
            .and_then(|page| {
                let width_px = (page.width().value * settings.dpi as f32 / 72.0).round() as i32;
                let render_config = PdfRenderConfig::new()
                    .set_target_width(width_px.clamp(1, max_pixels))
                    .set_maximum_height(max_pixels);
                page.render_with_config(&render_config)
                    .map(|bitmap| bitmap.as_image())
                    .map_err(|e| format!("{:?}", e))
            });

        if let Ok(ref img) = image {
            debug!("Rendered page {} → {}x{} px", idx + 1, img.width(), img.height());
        }
        results.push(RenderedPage { index: idx, image });
    }

    Ok(results)
}

fn pdfium_metadata_blocking(
    doc: &Document,
    settings: &RenderSettings,
) -> Result<DocumentMetadata, ServiceError> {
    let pdfium = bind_pdfium(settings.pdfium_lib_dir.as_deref())?;
    let password = settings.password.as_deref();

    let document = pdfium
        .load_pdf_from_byte_slice(&doc.bytes, password)
        .map_err(|e| load_error(doc, e))?;

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentMetadata {
        name: doc.name.clone(),
        kind: doc.kind.to_string(),
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}

// ── poppler ──────────────────────────────────────────────────────────────

/// Write the document into a fresh temp dir for the poppler binaries.
async fn stage_pdf(doc: &Document) -> Result<(tempfile::TempDir, PathBuf), ServiceError> {
    let dir = tempfile::TempDir::new()
        .map_err(|e| ServiceError::Internal(format!("tempdir: {e}")))?;
    let path = dir.path().join("input.pdf");
    tokio::fs::write(&path, &doc.bytes)
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to write temp file: {}", e)))?;
    Ok((dir, path))
}

fn poppler_error(doc: &Document, tool: &str, stderr: &[u8]) -> ServiceError {
    let detail = String::from_utf8_lossy(stderr).trim().to_string();
    if detail.to_ascii_lowercase().contains("password") {
        ServiceError::PasswordRequired {
            name: doc.name.clone(),
        }
    } else {
        ServiceError::CorruptPdf {
            name: doc.name.clone(),
            detail: format!("{tool}: {detail}"),
        }
    }
}

async fn run_tool(tool: &str, args: &[String]) -> Result<std::process::Output, ServiceError> {
    Command::new(tool)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ServiceError::EngineUnavailable {
            engine: tool.to_string(),
            hint: format!("could not run '{tool}' ({e}); install poppler-utils"),
        })
}

fn password_args(settings: &RenderSettings) -> Vec<String> {
    match settings.password {
        Some(ref pwd) => vec!["-upw".to_string(), pwd.clone()],
        None => vec![],
    }
}

async fn poppler_metadata(
    doc: &Document,
    settings: &RenderSettings,
) -> Result<DocumentMetadata, ServiceError> {
    let (_dir, path) = stage_pdf(doc).await?;
    let mut args = password_args(settings);
    args.push(path.to_string_lossy().to_string());

    let output = run_tool("pdfinfo", &args).await?;
    if !output.status.success() {
        return Err(poppler_error(doc, "pdfinfo", &output.stderr));
    }
    let mut meta = parse_pdfinfo(&String::from_utf8_lossy(&output.stdout));
    meta.name = doc.name.clone();
    meta.kind = DocumentKind::Pdf.to_string();
    Ok(meta)
}

/// Parse the `Key: value` lines printed by `pdfinfo`.
pub fn parse_pdfinfo(stdout: &str) -> DocumentMetadata {
    let mut meta = DocumentMetadata::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let text = (!value.is_empty()).then(|| value.to_string());
        match key.trim() {
            "Title" => meta.title = text,
            "Author" => meta.author = text,
            "Subject" => meta.subject = text,
            "Creator" => meta.creator = text,
            "Producer" => meta.producer = text,
            "Pages" => meta.page_count = value.parse().unwrap_or(0),
            "PDF version" => meta.pdf_version = value.to_string(),
            _ => {}
        }
    }
    meta
}

async fn poppler_render(
    doc: &Document,
    settings: &RenderSettings,
    page_indices: &[usize],
) -> Result<Vec<RenderedPage>, ServiceError> {
    let (Some(&first), Some(&last)) = (page_indices.first(), page_indices.last()) else {
        return Ok(vec![]);
    };
    let (dir, path) = stage_pdf(doc).await?;
    let prefix = dir.path().join("page");
    let sizes = poppler_page_sizes(&path, settings, first + 1, last + 1).await;

    let batches = render_batches(page_indices, |index| {
        capped_dpi(
            settings.dpi,
            sizes.get(&(index + 1)).copied(),
            settings.max_rendered_pixels,
        )
    });
    for batch in &batches {
        let mut args = vec![
            "-r".to_string(),
            batch.dpi.to_string(),
            "-png".to_string(),
            "-f".to_string(),
            (batch.first + 1).to_string(),
            "-l".to_string(),
            (batch.last + 1).to_string(),
        ];
        args.extend(password_args(settings));
        args.push(path.to_string_lossy().to_string());
        args.push(prefix.to_string_lossy().to_string());

        debug!(
            "pdftoppm pages {}-{} at {} DPI",
            batch.first + 1,
            batch.last + 1,
            batch.dpi
        );
        let output = run_tool("pdftoppm", &args).await?;
        if !output.status.success() {
            return Err(poppler_error(doc, "pdftoppm", &output.stderr));
        }
    }

    let wanted: BTreeSet<usize> = page_indices.iter().copied().collect();
    let max_pixels = settings.max_rendered_pixels;
    let dir_path = dir.path().to_path_buf();

    let pages = tokio::task::spawn_blocking(move || -> Result<Vec<RenderedPage>, ServiceError> {
        let mut files: Vec<(usize, PathBuf)> = std::fs::read_dir(&dir_path)
            .map_err(|e| ServiceError::Internal(format!("read_dir: {e}")))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|p| pdftoppm_page_number(&p).map(|n| (n, p)))
            .filter(|(n, _)| *n >= 1 && wanted.contains(&(n - 1)))
            .collect();
        files.sort_by_key(|(n, _)| *n);

        Ok(files
            .into_iter()
            .map(|(n, p)| RenderedPage {
                index: n - 1,
                image: image::open(&p)
                    .map(|img| cap_pixels(img, max_pixels))
                    .map_err(|e| format!("{}: {e}", p.display())),
            })
            .collect())
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("Render task panicked: {}", e)))??;

    // Keep the temp dir alive until the blocking read finished.
    drop(dir);
    info!(
        "pdftoppm rendered {} pages of '{}' in {} runs",
        pages.len(),
        doc.name,
        batches.len()
    );
    Ok(pages)
}

/// Page sizes in points for pages `first..=last` (1-based).
///
/// Empty when `pdfinfo` fails; rendering then falls back to the requested DPI
/// and the post-decode cap.
async fn poppler_page_sizes(
    path: &Path,
    settings: &RenderSettings,
    first: usize,
    last: usize,
) -> BTreeMap<usize, (f32, f32)> {
    let mut args = vec![
        "-f".to_string(),
        first.to_string(),
        "-l".to_string(),
        last.to_string(),
    ];
    args.extend(password_args(settings));
    args.push(path.to_string_lossy().to_string());

    match run_tool("pdfinfo", &args).await {
        Ok(output) if output.status.success() => {
            parse_page_sizes(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            warn!(
                "pdfinfo page sizes failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            BTreeMap::new()
        }
        Err(e) => {
            warn!("pdfinfo page sizes failed: {}", e);
            BTreeMap::new()
        }
    }
}

/// Parse `Page    3 size: 612 x 792 pts (letter)` lines.
fn parse_page_sizes(stdout: &str) -> BTreeMap<usize, (f32, f32)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (head, size) = line.strip_prefix("Page")?.split_once("size:")?;
            let page: usize = head.trim().parse().ok()?;
            let mut parts = size.split_whitespace();
            let width: f32 = parts.next()?.parse().ok()?;
            let _x = parts.next()?;
            let height: f32 = parts.next()?.parse().ok()?;
            Some((page, (width, height)))
        })
        .collect()
}

/// Highest DPI not above `dpi` that keeps the longest edge within `max_pixels`.
fn capped_dpi(dpi: u32, size_pts: Option<(f32, f32)>, max_pixels: u32) -> u32 {
    let Some((w, h)) = size_pts else {
        return dpi;
    };
    let longest = w.max(h);
    if longest <= 0.0 {
        return dpi;
    }
    let limit = (max_pixels as f32 * 72.0 / longest).floor() as u32;
    dpi.min(limit).max(1)
}

/// A contiguous run of pages rendered by one `pdftoppm` call.
#[derive(Debug, PartialEq, Eq)]
struct RenderBatch {
    first: usize,
    last: usize,
    dpi: u32,
}

/// Group sorted page indices into runs that are contiguous and share a DPI.
fn render_batches(indices: &[usize], dpi_for: impl Fn(usize) -> u32) -> Vec<RenderBatch> {
    let mut batches: Vec<RenderBatch> = Vec::new();
    for &index in indices {
        let dpi = dpi_for(index);
        match batches.last_mut() {
            Some(batch) if batch.last + 1 == index && batch.dpi == dpi => batch.last = index,
            _ => batches.push(RenderBatch {
                first: index,
                last: index,
                dpi,
            }),
        }
    }
    batches
}

/// `page-07.png` → 7. pdftoppm zero-pads to the width of the page count.
fn pdftoppm_page_number(path: &Path) -> Option<usize> {
    if path.extension()?.to_str()? != "png" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (_, num) = stem.rsplit_once('-')?;
    num.parse().ok()
}
