//! Server binary for nest-service.
//!
//! A thin shim over the library crate: maps CLI flags and `NEST_*`
//! environment variables to `ServiceConfig`, sets up logging and the Tokio
//! runtime, then serves until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use nest_service::{
    build_engine, server, AppState, DriveSettings, EngineKind, PageSeparator, RendererKind,
    ServiceConfig,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const AFTER_HELP: &str = r#"ENVIRONMENT VARIABLES:
  NEST_CLIENT_SECRET_JSON Google OAuth client secret (JSON or path to file)
  NEST_TOKEN_JSON         Google authorized-user token (JSON or path to file)
  NEST_DRIVE_FOLDER_ID    Drive folder whose newest files are OCR'd
  NEST_MAX_FILES          Files processed per Drive request (default 5)
  NEST_TTL_SECS           Result cache TTL in seconds (default 3600)
  OPENAI_API_KEY          Enables the vision engine with OpenAI
  RUST_LOG                Overrides --log-level with a full filter directive

ROUTES:
  GET  /, /ping           liveness pong
  GET  /healthz           "ok"
  GET  /v1/capabilities   engine, renderer and limits
  POST /v1/ocr            raw PDF/PNG/JPEG body (?pages=&lang=&dpi=&password=&name=)
  POST /v1/ocr/url        {"url": "...", "pages": "1-3"}
  GET  /v1/drive/files    newest files in NEST_DRIVE_FOLDER_ID
  POST /v1/drive/ocr      OCR the newest files (?limit=&pages=&lang=)
"#;

/// OCR web service for PDFs and images.
#[derive(Parser, Debug)]
#[command(
    name = "nest-service",
    version,
    about = "OCR web service for PDFs and images",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "NEST_HOST", default_value = "0.0.0.0")]
    host: String,

    /// TCP port to bind.
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Runtime worker threads; also the number of documents OCR'd at once.
    #[arg(short, long, env = "NEST_WORKERS", default_value_t = 4)]
    workers: usize,

    /// OCR engine: tesseract or vision.
    #[arg(long, env = "NEST_ENGINE", default_value = "tesseract")]
    engine: EngineKind,

    /// PDF renderer: pdfium or poppler.
    #[arg(long, env = "NEST_RENDERER", default_value = "pdfium")]
    renderer: RendererKind,

    /// Directory containing libpdfium (system library path when unset).
    #[arg(long, env = "NEST_PDFIUM_LIB_DIR")]
    pdfium_lib_dir: Option<PathBuf>,

    /// Default tesseract language list, e.g. eng or eng+fra.
    #[arg(long, env = "NEST_LANG", default_value = "eng")]
    lang: String,

    /// Tesseract page segmentation mode (0–13).
    #[arg(long, env = "NEST_PSM", default_value_t = 3)]
    psm: u8,

    /// Rendering DPI (72–600).
    #[arg(long, env = "NEST_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Pages OCR'd concurrently within one document.
    #[arg(short, long, env = "NEST_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per page on OCR failure (capped at 10).
    #[arg(long, env = "NEST_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-page OCR timeout in seconds.
    #[arg(long, env = "NEST_OCR_TIMEOUT", default_value_t = 120)]
    ocr_timeout: u64,

    /// URL and Drive download timeout in seconds.
    #[arg(long, env = "NEST_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Largest accepted upload in bytes.
    #[arg(long, env = "NEST_MAX_UPLOAD_BYTES", default_value_t = 25 * 1024 * 1024)]
    max_upload_bytes: usize,

    /// Page separator: blank, formfeed, marker, or a custom string.
    #[arg(long, env = "NEST_SEPARATOR", default_value = "blank")]
    separator: PageSeparator,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "NEST_VISION_PROVIDER")]
    vision_provider: Option<String>,

    /// Vision model id.
    #[arg(long, env = "NEST_VISION_MODEL")]
    vision_model: Option<String>,

    /// Drive files processed per request.
    #[arg(long, env = "NEST_MAX_FILES", default_value_t = 5)]
    max_files: usize,

    /// Result cache TTL in seconds.
    #[arg(long, env = "NEST_TTL_SECS", default_value_t = 3600)]
    ttl_secs: u64,

    /// Maximum cached results.
    #[arg(long, env = "NEST_CACHE_CAPACITY", default_value_t = 256)]
    cache_capacity: u64,

    #[arg(long, env = "NEST_CLIENT_SECRET_JSON", hide_env_values = true)]
    client_secret_json: Option<String>,

    #[arg(long, env = "NEST_TOKEN_JSON", hide_env_values = true)]
    token_json: Option<String>,

    #[arg(long, env = "NEST_DRIVE_FOLDER_ID")]
    drive_folder_id: Option<String>,

    /// Drive REST base URL (for testing against a mock).
    #[arg(long, env = "NEST_DRIVE_API_BASE", hide = true)]
    drive_api_base: Option<String>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, env = "NEST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "NEST_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> Result<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .host(self.host)
            .port(self.port)
            .workers(self.workers)
            .engine(self.engine)
            .renderer(self.renderer)
            .language(self.lang)
            .psm(self.psm)
            .dpi(self.dpi)
            .concurrency(self.concurrency)
            .max_retries(self.max_retries)
            .ocr_timeout_secs(self.ocr_timeout)
            .download_timeout_secs(self.download_timeout)
            .max_upload_bytes(self.max_upload_bytes)
            .page_separator(self.separator)
            .max_files(self.max_files)
            .ttl_secs(self.ttl_secs)
            .cache_capacity(self.cache_capacity)
            .drive(DriveSettings {
                client_secret_json: self.client_secret_json,
                token_json: self.token_json,
                folder_id: self.drive_folder_id,
                api_base: self.drive_api_base,
            });
        if let Some(dir) = self.pdfium_lib_dir {
            builder = builder.pdfium_lib_dir(dir);
        }
        if let Some(provider) = self.vision_provider {
            builder = builder.vision_provider(provider);
        }
        if let Some(model) = self.vision_model {
            builder = builder.vision_model(model);
        }
        builder.build().context("invalid configuration")
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "Mythos booting");

    let config = cli.into_config()?;
    info!("{:?}", config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .thread_name("nest-worker")
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: ServiceConfig) -> Result<()> {
    let engine = build_engine(&config).context("failed to initialise OCR engine")?;
    // The slim image ships without tesseract; ping must keep working there.
    if let Err(e) = engine.check(&config.language).await {
        warn!("OCR engine check failed, OCR requests will fail: {e}");
    } else {
        info!("OCR engine '{}' ready ({})", engine.name(), config.language);
    }

    let state = AppState::new(config, engine).context("failed to initialise service state")?;
    if state.drive.is_none() {
        info!("Google Drive integration disabled (NEST_TOKEN_JSON not set)");
    }

    let listener = server::bind(&state.config).await?;
    server::serve(listener, state).await?;
    Ok(())
}
