//! HTTP surface: shared state, router and the serve loop.
//!
//! ```text
//! GET  /                 pong
//! GET  /ping             pong
//! GET  /healthz          "ok"
//! GET  /v1/capabilities  engine, renderer and limits
//! POST /v1/ocr           raw PDF/PNG/JPEG body
//! POST /v1/ocr/url       {"url": ..} JSON body
//! GET  /v1/drive/files   newest files in the configured folder
//! POST /v1/drive/ocr     OCR the newest files in the folder
//! ```

pub mod handlers;
pub mod middleware;

use crate::cache::ResultCache;
use crate::config::ServiceConfig;
use crate::drive::DriveClient;
use crate::engine::OcrEngine;
use crate::error::ServiceError;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// State shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub engine: Arc<dyn OcrEngine>,
    pub cache: ResultCache,
    pub drive: Option<Arc<DriveClient>>,
    /// Bounds documents processed at once to `config.workers`.
    pub permits: Arc<Semaphore>,
    pub request_id_seed: Arc<AtomicU64>,
}

impl AppState {
    /// Build state from config. A Drive client is created when a token is configured.
    pub fn new(config: ServiceConfig, engine: Arc<dyn OcrEngine>) -> Result<Self, ServiceError> {
        let drive = if config.drive.token_json.as_deref().is_some_and(|t| !t.is_empty()) {
            let client = DriveClient::from_settings(&config.drive, config.download_timeout_secs)?;
            Some(Arc::new(client))
        } else {
            None
        };
        Ok(Self {
            cache: ResultCache::from_config(&config),
            permits: Arc::new(Semaphore::new(config.workers)),
            config: Arc::new(config),
            engine,
            drive,
            request_id_seed: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Replace the Drive client, e.g. with one pointed at a test server.
    pub fn with_drive(mut self, drive: DriveClient) -> Self {
        self.drive = Some(Arc::new(drive));
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::ping))
        .route("/ping", get(handlers::ping))
        .route("/healthz", get(handlers::healthz))
        .route("/v1/capabilities", get(handlers::capabilities))
        .route("/v1/ocr", post(handlers::ocr_upload))
        .route("/v1/ocr/url", post(handlers::ocr_url))
        .route("/v1/drive/files", get(handlers::drive_files))
        .route("/v1/drive/ocr", post(handlers::drive_ocr))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::request_tracing_middleware,
        ))
        .with_state(state)
}

/// Bind the configured `host:port`.
pub async fn bind(config: &ServiceConfig) -> Result<TcpListener, ServiceError> {
    let addr = config.bind_addr();
    TcpListener::bind(&addr)
        .await
        .map_err(|e| ServiceError::Internal(format!("bind {addr} failed: {e}")))
}

/// Serve until SIGINT/SIGTERM, then let in-flight requests finish.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ServiceError> {
    if let Ok(addr) = listener.local_addr() {
        info!("nest-service listening on {addr}");
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .map_err(|e| ServiceError::Internal(format!("server failed: {e}")))?;
    info!("nest-service stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM received, draining"),
                    _ = sigint.recv() => info!("SIGINT received, draining"),
                }
            }
            _ => {
                warn!("could not register signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
