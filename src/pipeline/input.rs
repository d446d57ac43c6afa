//! Input resolution: turn uploaded or downloaded bytes into a typed [`Document`].
//!
//! Every document is sniffed by its magic bytes before anything else touches
//! it, so clients get a 415 with the offending bytes instead of a pdfium or
//! tesseract crash deep inside the pipeline.

use crate::error::ServiceError;
use axum::body::Bytes;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

/// Formats the pipeline knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Png,
    Jpeg,
}

impl DocumentKind {
    pub fn is_image(self) -> bool {
        !matches!(self, DocumentKind::Pdf)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Pdf => f.write_str("pdf"),
            DocumentKind::Png => f.write_str("png"),
            DocumentKind::Jpeg => f.write_str("jpeg"),
        }
    }
}

/// An in-memory document ready for the pipeline.
#[derive(Clone)]
pub struct Document {
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: Bytes,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Document {
    /// Sniff `bytes` and wrap them, rejecting anything that is not PDF/PNG/JPEG.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Result<Self, ServiceError> {
        let name = name.into();
        let bytes = bytes.into();
        let kind = detect_kind(&name, &bytes)?;
        debug!("Resolved '{}' as {} ({} bytes)", name, kind, bytes.len());
        Ok(Self { name, kind, bytes })
    }
}

/// Identify a document by its leading bytes.
pub fn detect_kind(name: &str, bytes: &[u8]) -> Result<DocumentKind, ServiceError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(DocumentKind::Pdf);
    }
    if bytes.starts_with(&PNG_SIGNATURE) {
        return Ok(DocumentKind::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Ok(DocumentKind::Jpeg);
    }
    let mut magic = [0u8; 4];
    for (dst, src) in magic.iter_mut().zip(bytes.iter()) {
        *dst = *src;
    }
    Err(ServiceError::UnsupportedDocument {
        name: name.to_string(),
        magic,
    })
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Download a URL and sniff the result. Bodies over `max_bytes` are rejected.
pub async fn fetch_url(
    url: &str,
    timeout_secs: u64,
    max_bytes: usize,
) -> Result<Document, ServiceError> {
    if !is_url(url) {
        return Err(ServiceError::InvalidInput(format!(
            "'{url}' is not an HTTP/HTTPS URL"
        )));
    }
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ServiceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            ServiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ServiceError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_error)?;

    if !response.status().is_success() {
        return Err(ServiceError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let bytes = read_capped(response, max_bytes, url, to_error).await?;
    info!("Downloaded {} bytes from {}", bytes.len(), url);

    Document::from_bytes(filename, bytes)
}

/// Read a response body, failing as soon as it grows past `limit` bytes.
///
/// A declared `Content-Length` over the limit is rejected before any body
/// is read; chunked bodies are cut off mid-stream.
pub async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
    source_name: &str,
    on_error: impl Fn(reqwest::Error) -> ServiceError,
) -> Result<Bytes, ServiceError> {
    let too_large = || ServiceError::DocumentTooLarge {
        source_name: source_name.to_string(),
        limit,
    };
    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(&on_error)? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(body))
}

/// Extract a reasonable file name from the URL path.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn detects_supported_kinds() {
        assert_eq!(detect_kind("a", b"%PDF-1.7\n").unwrap(), DocumentKind::Pdf);
        assert_eq!(detect_kind("b", &PNG_SIGNATURE).unwrap(), DocumentKind::Png);
        assert_eq!(
            detect_kind("c", &[0xFF, 0xD8, 0xFF, 0xE0, 0x00]).unwrap(),
            DocumentKind::Jpeg
        );
    }

    #[test]
    fn rejects_unknown_bytes_with_magic() {
        match detect_kind("notes.txt", b"hello world") {
            Err(ServiceError::UnsupportedDocument { name, magic }) => {
                assert_eq!(name, "notes.txt");
                assert_eq!(&magic, b"hell");
            }
            other => panic!("unexpected: {other:?}"),
        }
        // Shorter than four bytes still reports what it saw.
        match detect_kind("x", b"%") {
            Err(ServiceError::UnsupportedDocument { magic, .. }) => {
                assert_eq!(magic, [b'%', 0, 0, 0])
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_from_url("https://x.org/files/report.pdf?dl=1"), "report.pdf");
        assert_eq!(filename_from_url("https://x.org/files/"), "downloaded");
    }

    #[tokio::test]
    async fn fetch_url_rejects_non_http() {
        let err = fetch_url("ftp://x.org/a.pdf", 5, 1024).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
