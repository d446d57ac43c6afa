//! Configuration types for the OCR service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. One struct carries the HTTP bind settings,
//! the OCR pipeline knobs and the Google Drive settings so it can be shared
//! across handlers behind an `Arc` and logged at startup in one line.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default Drive v3 REST endpoint.
pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Upper bound on per-page OCR retries.
pub const MAX_RETRIES: u32 = 10;

/// Configuration for the whole service.
///
/// Built via [`ServiceConfig::builder()`] or using [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use nest_service::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .port(9090)
///     .workers(2)
///     .language("eng+deu")
///     .build()
///     .unwrap();
/// assert_eq!(config.bind_addr(), "0.0.0.0:9090");
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Interface to bind. Default: `0.0.0.0`.
    pub host: String,

    /// TCP port to bind. Default: 8080.
    pub port: u16,

    /// Runtime worker threads, also the number of documents processed at once. Default: 4.
    pub workers: usize,

    /// OCR engine used for every page. Default: [`EngineKind::Tesseract`].
    pub engine: EngineKind,

    /// PDF rasteriser. Default: [`RendererKind::Pdfium`].
    pub renderer: RendererKind,

    /// Directory holding libpdfium. If None, the system library search path is used.
    pub pdfium_lib_dir: Option<PathBuf>,

    /// Tesseract language string, e.g. `eng` or `eng+fra`. Default: `eng`.
    pub language: String,

    /// Tesseract page segmentation mode. Default: 3 (fully automatic).
    pub psm: u8,

    /// Rendering DPI for PDF pages. Range: 72–600. Default: 200.
    ///
    /// Tesseract is tuned for roughly 300 DPI text; 200 keeps memory reasonable
    /// on dense documents while still reading 9pt fonts reliably.
    pub dpi: u32,

    /// Longest edge of a rendered page in pixels. Default: 2500.
    pub max_rendered_pixels: u32,

    /// Pages OCR'd concurrently within one document. Default: 4.
    pub concurrency: usize,

    /// Retry attempts per page after a failed OCR call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled on each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-page OCR timeout in seconds. Default: 120.
    pub ocr_timeout_secs: u64,

    /// Timeout for URL and Drive downloads in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Largest accepted request body in bytes. Default: 25 MiB.
    pub max_upload_bytes: usize,

    /// Separator inserted between pages in the assembled text.
    pub page_separator: PageSeparator,

    /// Vision provider name (`openai`, `anthropic`, `ollama`, …) for [`EngineKind::Vision`].
    pub vision_provider: Option<String>,

    /// Vision model identifier for [`EngineKind::Vision`].
    pub vision_model: Option<String>,

    /// Maximum number of Drive files processed per request. Default: 5.
    pub max_files: usize,

    /// Lifetime of cached OCR results in seconds. Default: 3600.
    pub ttl_secs: u64,

    /// Maximum number of cached OCR results. Default: 256.
    pub cache_capacity: u64,

    /// Google Drive integration settings.
    pub drive: DriveSettings,
}

/// Google Drive credentials and folder.
///
/// The two JSON fields accept either the JSON document itself or a path to a
/// file containing it.
#[derive(Clone, Default)]
pub struct DriveSettings {
    /// OAuth client-secret JSON (`installed` or `web` section).
    pub client_secret_json: Option<String>,
    /// Authorized-user token JSON holding at least a `refresh_token`.
    pub token_json: Option<String>,
    /// Folder whose files are listed and OCR'd.
    pub folder_id: Option<String>,
    /// Drive REST base URL. Default: [`DEFAULT_DRIVE_API_BASE`].
    pub api_base: Option<String>,
}

impl DriveSettings {
    /// True when a folder and a token are both present.
    pub fn is_configured(&self) -> bool {
        self.folder_id.as_deref().is_some_and(|f| !f.is_empty())
            && self.token_json.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_DRIVE_API_BASE)
    }
}

impl fmt::Debug for DriveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("DriveSettings")
            .field("client_secret_json", &redact(&self.client_secret_json))
            .field("token_json", &redact(&self.token_json))
            .field("folder_id", &self.folder_id)
            .field("api_base", &self.api_base())
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: 4,
            engine: EngineKind::default(),
            renderer: RendererKind::default(),
            pdfium_lib_dir: None,
            language: "eng".to_string(),
            psm: 3,
            dpi: 200,
            max_rendered_pixels: 2500,
            concurrency: 4,
            max_retries: 2,
            retry_backoff_ms: 500,
            ocr_timeout_secs: 120,
            download_timeout_secs: 60,
            max_upload_bytes: 25 * 1024 * 1024,
            page_separator: PageSeparator::default(),
            vision_provider: None,
            vision_model: None,
            max_files: 5,
            ttl_secs: 3600,
            cache_capacity: 256,
            drive: DriveSettings::default(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("bind", &self.bind_addr())
            .field("workers", &self.workers)
            .field("engine", &self.engine)
            .field("renderer", &self.renderer)
            .field("language", &self.language)
            .field("dpi", &self.dpi)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("max_files", &self.max_files)
            .field("ttl_secs", &self.ttl_secs)
            .field("drive", &self.drive)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// `host:port` string handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn renderer(mut self, renderer: RendererKind) -> Self {
        self.config.renderer = renderer;
        self
    }

    pub fn pdfium_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_dir = Some(dir.into());
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn psm(mut self, psm: u8) -> Self {
        self.config.psm = psm.min(13);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    /// Retries per page, capped at [`MAX_RETRIES`].
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn vision_provider(mut self, name: impl Into<String>) -> Self {
        self.config.vision_provider = Some(name.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn max_files(mut self, n: usize) -> Self {
        self.config.max_files = n.max(1);
        self
    }

    pub fn ttl_secs(mut self, secs: u64) -> Self {
        self.config.ttl_secs = secs;
        self
    }

    pub fn cache_capacity(mut self, n: u64) -> Self {
        self.config.cache_capacity = n;
        self
    }

    pub fn drive(mut self, drive: DriveSettings) -> Self {
        self.config.drive = drive;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let c = &self.config;
        if c.host.trim().is_empty() {
            return Err(ServiceError::InvalidConfig("host must not be empty".into()));
        }
        if c.port == 0 {
            return Err(ServiceError::InvalidConfig("port must be non-zero".into()));
        }
        if c.dpi < 72 || c.dpi > 600 {
            return Err(ServiceError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if !is_valid_language(&c.language) {
            return Err(ServiceError::InvalidConfig(format!(
                "language '{}' is not a tesseract language list",
                c.language
            )));
        }
        let folder_set = c.drive.folder_id.as_deref().is_some_and(|f| !f.is_empty());
        let token_set = c.drive.token_json.as_deref().is_some_and(|t| !t.is_empty());
        if folder_set && !token_set {
            return Err(ServiceError::InvalidConfig(
                "NEST_DRIVE_FOLDER_ID is set but NEST_TOKEN_JSON is missing".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Accepts tesseract language lists such as `eng`, `chi_sim`, `eng+fra`.
pub fn is_valid_language(lang: &str) -> bool {
    !lang.is_empty()
        && lang.split('+').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which OCR engine reads the page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Local `tesseract` binary. (default)
    #[default]
    Tesseract,
    /// Vision language model through edgequake-llm.
    Vision,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Tesseract => f.write_str("tesseract"),
            EngineKind::Vision => f.write_str("vision"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Ok(EngineKind::Tesseract),
            "vision" | "vlm" | "llm" => Ok(EngineKind::Vision),
            other => Err(format!("unknown OCR engine '{other}' (expected tesseract or vision)")),
        }
    }
}

/// Which rasteriser turns PDF pages into images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// pdfium through pdfium-render. (default)
    #[default]
    Pdfium,
    /// poppler-utils `pdftoppm` / `pdfinfo` binaries.
    Poppler,
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendererKind::Pdfium => f.write_str("pdfium"),
            RendererKind::Poppler => f.write_str("poppler"),
        }
    }
}

impl FromStr for RendererKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdfium" => Ok(RendererKind::Pdfium),
            "poppler" | "pdftoppm" => Ok(RendererKind::Poppler),
            other => Err(format!("unknown renderer '{other}' (expected pdfium or poppler)")),
        }
    }
}

/// Specifies which pages of a document to OCR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Several pages and ranges, kept unexpanded as inclusive `(start, end)`
    /// pairs until the page count is known.
    Set(Vec<(usize, usize)>),
}

impl PageSelection {
    /// Parse `all`, `3`, `2-5` or `1,3,7-9`.
    pub fn parse(input: &str) -> Result<Self, ServiceError> {
        let s = input.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }

        let invalid = |part: &str| {
            ServiceError::InvalidInput(format!("invalid page selection '{part}' in '{input}'"))
        };
        let page = |part: &str| -> Result<usize, ServiceError> {
            match part.trim().parse::<usize>() {
                Ok(n) if n >= 1 => Ok(n),
                _ => Err(invalid(part)),
            }
        };
        let range = |part: &str| -> Result<(usize, usize), ServiceError> {
            let (a, b) = part.split_once('-').ok_or_else(|| invalid(part))?;
            let (a, b) = (page(a)?, page(b)?);
            if a > b {
                return Err(invalid(part));
            }
            Ok((a, b))
        };

        if !s.contains(',') {
            if s.contains('-') {
                let (a, b) = range(s)?;
                return Ok(PageSelection::Range(a, b));
            }
            return Ok(PageSelection::Single(page(s)?));
        }

        let mut parts = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.contains('-') {
                parts.push(range(part)?);
            } else {
                let p = page(part)?;
                parts.push((p, p));
            }
        }
        if parts.is_empty() {
            return Err(invalid(s));
        }
        Ok(PageSelection::Set(parts))
    }

    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(parts) => parts
                .iter()
                .flat_map(|&(start, end)| (start.max(1) - 1)..end.min(total_pages))
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// First requested page, used in out-of-range errors.
    pub fn first_requested(&self) -> usize {
        match self {
            PageSelection::All => 1,
            PageSelection::Single(p) => *p,
            PageSelection::Range(s, _) => *s,
            PageSelection::Set(parts) => parts.iter().map(|&(s, _)| s).min().unwrap_or(1),
        }
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSelection::All => f.write_str("all"),
            PageSelection::Single(p) => write!(f, "{p}"),
            PageSelection::Range(a, b) => write!(f, "{a}-{b}"),
            PageSelection::Set(parts) => {
                let parts: Vec<String> = parts
                    .iter()
                    .map(|&(a, b)| if a == b { a.to_string() } else { format!("{a}-{b}") })
                    .collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// How to separate pages in the assembled text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blank line between pages. (default)
    #[default]
    Blank,
    /// Form feed, the separator `tesseract` itself emits between pages.
    FormFeed,
    /// Marker line with the page number: `--- page N ---`.
    Marker,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::Blank => "\n".to_string(),
            PageSeparator::FormFeed => "\u{000C}".to_string(),
            PageSeparator::Marker => format!("\n--- page {} ---\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n{}\n\n", s),
        }
    }
}

impl FromStr for PageSeparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blank" => Ok(PageSeparator::Blank),
            "formfeed" | "ff" => Ok(PageSeparator::FormFeed),
            "marker" => Ok(PageSeparator::Marker),
            other => Ok(PageSeparator::Custom(other.to_string())),
        }
    }
}
