//! Google Drive source: OAuth token refresh, folder listing and downloads.
//!
//! Only the installed-app refresh-token flow is supported. The token JSON is
//! the "authorized user" document Google's client libraries write after the
//! consent screen; the client-secret JSON supplies the client id and secret
//! when the token file does not carry them.

use crate::config::DriveSettings;
use crate::error::ServiceError;
use crate::output::OcrOutput;
use crate::pipeline::input::read_capped;
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Google's OAuth token endpoint, used when neither JSON names one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Access tokens are refreshed this long before Google says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A file entry returned by `files.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "modifiedTime", default)]
    pub modified_time: String,
    /// Drive reports sizes as decimal strings; absent for native Google docs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// One Drive file's OCR outcome in a `/v1/drive/ocr` response.
#[derive(Debug, Clone, Serialize)]
pub struct DriveOcrItem {
    pub file: DriveFile,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OcrOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth client credentials plus the long-lived refresh token.
#[derive(Clone, PartialEq, Eq)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_uri: String,
}

impl fmt::Debug for GoogleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleCredentials")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Default, Deserialize)]
struct ClientSecretSection {
    client_id: Option<String>,
    client_secret: Option<String>,
    token_uri: Option<String>,
}

#[derive(Default, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecretSection>,
    web: Option<ClientSecretSection>,
}

#[derive(Deserialize)]
struct AuthorizedUserFile {
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_uri: Option<String>,
}

impl GoogleCredentials {
    /// Load credentials from the configured JSON values (inline or file paths).
    pub fn from_settings(settings: &DriveSettings) -> Result<Self, ServiceError> {
        let token = settings
            .token_json
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::DriveNotConfigured("NEST_TOKEN_JSON is not set".into()))?;
        let token = load_json_source(token, "token")?;
        let secret = match settings.client_secret_json.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(load_json_source(s, "client secret")?),
            None => None,
        };
        Self::parse(secret.as_deref(), &token)
    }

    /// Merge the two JSON documents. Fields in the token document win.
    pub fn parse(client_secret_json: Option<&str>, token_json: &str) -> Result<Self, ServiceError> {
        let token: AuthorizedUserFile = serde_json::from_str(token_json)
            .map_err(|e| ServiceError::InvalidCredentials(format!("token JSON: {e}")))?;

        let section = match client_secret_json {
            Some(raw) => {
                let file: ClientSecretFile = serde_json::from_str(raw).map_err(|e| {
                    ServiceError::InvalidCredentials(format!("client secret JSON: {e}"))
                })?;
                file.installed.or(file.web).ok_or_else(|| {
                    ServiceError::InvalidCredentials(
                        "client secret JSON has neither an 'installed' nor a 'web' section".into(),
                    )
                })?
            }
            None => ClientSecretSection::default(),
        };

        let missing = |field: &str| ServiceError::InvalidCredentials(format!("missing {field}"));
        Ok(Self {
            refresh_token: token.refresh_token.ok_or_else(|| missing("refresh_token"))?,
            client_id: token
                .client_id
                .or(section.client_id)
                .ok_or_else(|| missing("client_id"))?,
            client_secret: token
                .client_secret
                .or(section.client_secret)
                .ok_or_else(|| missing("client_secret"))?,
            token_uri: token
                .token_uri
                .or(section.token_uri)
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        })
    }
}

/// A JSON value is used inline when it looks like an object, otherwise it is a path.
fn load_json_source(value: &str, label: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }
    std::fs::read_to_string(Path::new(trimmed)).map_err(|e| {
        ServiceError::InvalidCredentials(format!("cannot read {label} file '{trimmed}': {e}"))
    })
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Minimal Drive v3 client.
pub struct DriveClient {
    http: reqwest::Client,
    credentials: GoogleCredentials,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl DriveClient {
    /// Build a client from settings. Fails when no token is configured.
    pub fn from_settings(
        settings: &DriveSettings,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let credentials = GoogleCredentials::from_settings(settings)?;
        Self::new(credentials, settings.api_base(), timeout_secs)
    }

    pub fn new(
        credentials: GoogleCredentials,
        api_base: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            credentials,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    /// Current access token, refreshed when missing or about to expire.
    pub async fn access_token(&self) -> Result<String, ServiceError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    async fn refresh(&self) -> Result<CachedToken, ServiceError> {
        debug!("Refreshing Google access token via {}", self.credentials.token_uri);
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(&self.credentials.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await.map_err(transport_error)?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        info!("Obtained Google access token (expires in {}s)", lifetime.as_secs());
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }

    /// Newest PDFs and images in `folder_id`, most recently modified first.
    pub async fn list_recent(
        &self,
        folder_id: &str,
        limit: usize,
    ) -> Result<Vec<DriveFile>, ServiceError> {
        let token = self.access_token().await?;
        let query = folder_query(folder_id);
        let page_size = limit.to_string();
        let response = self
            .http
            .get(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("orderBy", "modifiedTime desc"),
                ("pageSize", page_size.as_str()),
                ("fields", "files(id,name,mimeType,modifiedTime,size)"),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let list: FileList = response.json().await.map_err(transport_error)?;
        let mut files = list.files;
        files.truncate(limit);
        debug!("Listed {} files in folder {}", files.len(), folder_id);
        Ok(files)
    }

    /// Download a file's content, refusing bodies over `max_bytes`.
    pub async fn download(
        &self,
        file: &DriveFile,
        max_bytes: usize,
    ) -> Result<Bytes, ServiceError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/files/{}", self.api_base, file.id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let bytes = read_capped(response, max_bytes, &file.name, transport_error).await?;
        info!("Downloaded '{}' ({} bytes) from Drive", file.name, bytes.len());
        Ok(bytes)
    }
}

/// `files.list` query selecting non-trashed PDFs and images directly in a folder.
fn folder_query(folder_id: &str) -> String {
    let escaped = folder_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "'{escaped}' in parents and trashed=false and \
         (mimeType='application/pdf' or mimeType contains 'image/')"
    )
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    ServiceError::DriveApi {
        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        message: e.to_string(),
    }
}

/// Turn a non-2xx response into `DriveApi`, preferring Google's error message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = google_error_message(&body).unwrap_or_else(|| {
        if body.is_empty() {
            status.to_string()
        } else {
            body
        }
    });
    warn!("Google API returned {}: {}", status, message);
    Err(ServiceError::DriveApi {
        status: status.as_u16(),
        message,
    })
}

/// Drive errors look like `{"error":{"message":..}}`; OAuth errors like
/// `{"error":"invalid_grant","error_description":..}`.
fn google_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    if let Some(msg) = error.get("message").and_then(|m| m.as_str()) {
        return Some(msg.to_string());
    }
    let code = error.as_str()?;
    match value.get("error_description").and_then(|d| d.as_str()) {
        Some(desc) => Some(format!("{code}: {desc}")),
        None => Some(code.to_string()),
    }
}
