//! TTL cache of finished OCR results.
//!
//! Keys are content-addressed: SHA-256 of the document bytes plus the option
//! fingerprint, so the same upload under a different name still hits. Drive
//! files use their id and `modifiedTime` instead, which avoids downloading a
//! file only to discover its result is cached.
//!
//! Concurrent requests for the same key are coalesced by moka: only one
//! extraction runs and the others wait for its result.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::output::OcrOutput;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct ResultCache {
    inner: Cache<String, Arc<OcrOutput>>,
}

impl ResultCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.cache_capacity, Duration::from_secs(config.ttl_secs))
    }

    /// Key for an uploaded or downloaded document.
    pub fn content_key(bytes: &[u8], fingerprint: &str) -> String {
        let digest = Sha256::digest(bytes);
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("sha256:{hex};{fingerprint}")
    }

    /// Key for a Drive file revision.
    pub fn drive_key(file_id: &str, modified_time: &str, fingerprint: &str) -> String {
        format!("drive:{file_id}@{modified_time};{fingerprint}")
    }

    /// Return the cached output for `key`, or run `init` and cache its result.
    ///
    /// The boolean is true on a cache hit. Errors are never cached.
    pub async fn get_or_try_insert<F>(
        &self,
        key: String,
        init: F,
    ) -> Result<(Arc<OcrOutput>, bool), ServiceError>
    where
        F: Future<Output = Result<OcrOutput, ServiceError>>,
    {
        let mut computed = false;
        let result = self
            .inner
            .try_get_with(key.clone(), async {
                computed = true;
                init.await.map(Arc::new)
            })
            .await;

        match result {
            Ok(output) => {
                debug!(key = %key, hit = !computed, "result cache lookup");
                Ok((output, !computed))
            }
            Err(err) => Err(err.as_ref().clone()),
        }
    }

    /// Number of live entries. Approximate until pending tasks run.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}
