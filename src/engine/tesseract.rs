//! tesseract engine: one `tesseract` process per page.
//!
//! The page is PNG-encoded into a temp file and tesseract writes the text to
//! stdout. The child is spawned with `kill_on_drop`, so when the pipeline's
//! timeout drops the future the process is killed instead of leaking.

use super::OcrEngine;
use crate::error::ServiceError;
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use image::DynamicImage;
use std::io::Write;
use tokio::process::Command;
use tracing::{debug, info};

const DEFAULT_BINARY: &str = "tesseract";

#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    psm: u8,
}

impl TesseractEngine {
    pub fn new(psm: u8) -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            psm,
        }
    }

    /// Use a binary other than `tesseract` from `PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Languages installed for this tesseract, from `--list-langs`.
    pub async fn available_languages(&self) -> Result<Vec<String>, ServiceError> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .output()
            .await
            .map_err(|e| self.unavailable(format!("could not run '{}': {e}", self.binary)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(self.unavailable(stderr));
        }
        Ok(parse_list_langs(&String::from_utf8_lossy(&output.stdout)))
    }

    fn unavailable(&self, hint: String) -> ServiceError {
        ServiceError::EngineUnavailable {
            engine: DEFAULT_BINARY.to_string(),
            hint,
        }
    }
}

/// Parse `tesseract --list-langs`; the first line is a header.
pub fn parse_list_langs(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip_while(|l| l.starts_with("List of available languages"))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        DEFAULT_BINARY
    }

    async fn check(&self, language: &str) -> Result<(), ServiceError> {
        let installed = self.available_languages().await?;
        let missing: Vec<&str> = language
            .split('+')
            .filter(|l| !installed.iter().any(|i| i.as_str() == *l))
            .collect();
        if !missing.is_empty() {
            return Err(self.unavailable(format!(
                "language data missing for {}; installed: {}",
                missing.join(", "),
                installed.join(", ")
            )));
        }
        info!("tesseract ready, languages: {}", installed.join(", "));
        Ok(())
    }

    async fn recognize(
        &self,
        page_num: usize,
        image: &DynamicImage,
        language: &str,
    ) -> Result<String, String> {
        let img = image.clone();
        let png = tokio::task::spawn_blocking(move || encode_png(&img))
            .await
            .map_err(|e| format!("encode task panicked: {e}"))?
            .map_err(|e| format!("PNG encoding failed: {e}"))?;

        let mut file = tempfile::Builder::new()
            .prefix("nest-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| format!("tempfile: {e}"))?;
        file.write_all(&png)
            .map_err(|e| format!("tempfile write: {e}"))?;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .args(["-l", language, "--psm"])
            .arg(self.psm.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("could not run '{}': {e}", self.binary))?;

        if !output.status.success() {
            return Err(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("Page {}: tesseract returned {} chars", page_num, text.len());
        Ok(text)
    }
}
