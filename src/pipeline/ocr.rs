//! Per-page OCR with retry, backoff and timeout.
//!
//! ## Retry Strategy
//!
//! tesseract occasionally dies on malformed scans and vision APIs return
//! 429/503 under load. Each attempt is bounded by `ocr_timeout_secs`; failed
//! attempts back off exponentially (`retry_backoff_ms * 2^attempt`), so with
//! 500 ms base and 2 retries the wait sequence is 500 ms → 1 s.

use crate::config::ServiceConfig;
use crate::engine::OcrEngine;
use crate::error::PageError;
use crate::output::PageResult;
use image::DynamicImage;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// OCR one page. Never fails: exhausted retries produce a `PageResult` with `error` set.
pub async fn recognize_page(
    engine: &dyn OcrEngine,
    page_num: usize,
    image: &DynamicImage,
    language: &str,
    config: &ServiceConfig,
) -> PageResult {
    let start = Instant::now();
    let limit = Duration::from_secs(config.ocr_timeout_secs);
    let mut last_err: Option<PageError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(limit, engine.recognize(page_num, image, language)).await {
            Ok(Ok(text)) => {
                let duration = start.elapsed();
                debug!("Page {}: recognised in {:?}", page_num, duration);
                return PageResult {
                    page_num,
                    text,
                    duration_ms: duration.as_millis() as u64,
                    retries: saturating_u8(attempt),
                    error: None,
                };
            }
            Ok(Err(detail)) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, detail);
                last_err = Some(PageError::OcrFailed {
                    page: page_num,
                    retries: saturating_u8(config.max_retries),
                    detail,
                });
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_num,
                    attempt + 1,
                    config.ocr_timeout_secs
                );
                last_err = Some(PageError::Timeout {
                    page: page_num,
                    secs: config.ocr_timeout_secs,
                });
            }
        }
    }

    PageResult {
        page_num,
        text: String::new(),
        duration_ms: start.elapsed().as_millis() as u64,
        retries: saturating_u8(config.max_retries),
        error: last_err,
    }
}

/// Wait before retry `attempt` (1-based): `base * 2^(attempt-1)`, saturating.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base.saturating_mul(factor)
}

fn saturating_u8(n: u32) -> u8 {
    u8::try_from(n).unwrap_or(u8::MAX)
}
