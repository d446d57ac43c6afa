//! HTTP-level tests: the full router driven with `tower::ServiceExt::oneshot`,
//! a fake OCR engine, and a local mock of the Google OAuth and Drive APIs.
//!
//! Nothing here needs tesseract, poppler or pdfium; PNG uploads skip
//! rasterisation.

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Form, Path, Query, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use nest_service::{
    build_router, AppState, DriveClient, DriveSettings, GoogleCredentials, OcrEngine,
    ServiceConfig, ServiceError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check(&self, _language: &str) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn recognize(
        &self,
        page_num: usize,
        _image: &DynamicImage,
        language: &str,
    ) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Hello from page {page_num} ({language})  \n"))
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([255, 255, 255, 255]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn app_with(config: ServiceConfig) -> (Router, Arc<FakeEngine>) {
    let engine = Arc::new(FakeEngine::default());
    let state = AppState::new(config, engine.clone()).unwrap();
    (build_router(state), engine)
}

fn app() -> (Router, Arc<FakeEngine>) {
    app_with(ServiceConfig::builder().max_retries(0).build().unwrap())
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(router, request).await;
    let value = serde_json::from_slice(&body)
        .unwrap_or_else(|e| panic!("non-JSON body ({e}): {}", String::from_utf8_lossy(&body)));
    (status, value)
}

fn get_req(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn drive_ocr_req() -> Request<Body> {
    Request::post("/v1/drive/ocr").body(Body::empty()).unwrap()
}

fn upload(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(body))
        .unwrap()
}

// ── Liveness ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn root_and_ping_return_pong() {
    let (router, _) = app();
    for path in ["/", "/ping"] {
        let (status, body) = send_json(&router, get_req(path)).await;
        assert_eq!(status, StatusCode::OK, "{path}");
        assert_eq!(body, json!({ "message": "pong from ultra-minimal test" }));
    }
}

#[tokio::test]
async fn healthz_returns_ok() {
    let (router, _) = app();
    let (status, _, body) = send(&router, get_req("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let (router, _) = app();

    let request = Request::get("/ping")
        .header("x-request-id", "abc-123")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&router, request).await;
    assert_eq!(headers["x-request-id"], "abc-123");

    let (_, headers, _) = send(&router, get_req("/ping")).await;
    let generated = headers["x-request-id"].to_str().unwrap();
    assert!(generated.starts_with("req-"), "{generated}");
}

#[tokio::test]
async fn capabilities_report_engine_and_limits() {
    let (router, _) = app();
    let (status, body) = send_json(&router, get_req("/v1/capabilities")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["engine"], "fake");
    assert_eq!(body["renderer"], "pdfium");
    assert_eq!(body["drive"]["configured"], false);
    assert_eq!(body["drive"]["max_files"], 5);
    assert_eq!(body["cache"]["ttl_secs"], 3600);
}

// ── Upload OCR ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn png_upload_returns_engine_text() {
    let (router, engine) = app();
    let request = upload("/v1/ocr?name=scan.png&lang=deu", png_bytes(40, 20));
    let (status, body) = send_json(&router, request).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["cached"], false);
    assert_eq!(body["text"], "Hello from page 1 (deu)\n");
    assert_eq!(body["metadata"]["name"], "scan.png");
    assert_eq!(body["metadata"]["kind"], "png");
    assert_eq!(body["stats"]["processed_pages"], 1);
    assert_eq!(body["stats"]["engine"], "fake");
    assert_eq!(body["pages"][0]["page_num"], 1);
    assert!(body["pages"][0].get("error").is_none());
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn identical_upload_is_served_from_cache() {
    let (router, engine) = app();
    let png = png_bytes(30, 30);

    let (_, first) = send_json(&router, upload("/v1/ocr", png.clone())).await;
    let renamed = upload("/v1/ocr?name=renamed.png", png.clone());
    let (status, second) = send_json(&router, renamed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cached"], false);
    assert_eq!(second["cached"], true);
    assert_eq!(second["text"], first["text"]);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);

    // A different option set is a different cache entry.
    let (_, third) = send_json(&router, upload("/v1/ocr?lang=fra", png)).await;
    assert_eq!(third["cached"], false);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cache_entries_are_per_password() {
    let (router, engine) = app();
    let doc = png_bytes(24, 24);

    let (_, right) = send_json(&router, upload("/v1/ocr?password=right", doc.clone())).await;
    assert_eq!(right["cached"], false);

    let (status, wrong) = send_json(&router, upload("/v1/ocr?password=wrong", doc.clone())).await;
    assert_eq!(status, StatusCode::OK, "{wrong}");
    assert_eq!(wrong["cached"], false);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);

    let (_, again) = send_json(&router, upload("/v1/ocr?password=right", doc)).await;
    assert_eq!(again["cached"], true);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn garbage_upload_is_415() {
    let (router, engine) = app();
    let request = upload("/v1/ocr?name=notes.txt", b"hello world".to_vec());
    let (status, body) = send_json(&router, request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"], "unsupported_document");
    assert!(body["message"].as_str().unwrap().contains("notes.txt"));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_upload_is_400() {
    let (router, _) = app();
    let (status, body) = send_json(&router, upload("/v1/ocr", Vec::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn bad_page_selection_is_400() {
    let (router, _) = app();
    let (status, body) = send_json(&router, upload("/v1/ocr?pages=5-2", png_bytes(8, 8))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    let (status, body) = send_json(&router, upload("/v1/ocr?pages=3", png_bytes(8, 8))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "page_out_of_range");
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let config = ServiceConfig::builder()
        .max_upload_bytes(64)
        .build()
        .unwrap();
    let (router, _) = app_with(config);
    let (status, _, _) = send(&router, upload("/v1/ocr", vec![0u8; 1024])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn url_endpoint_rejects_non_http_urls() {
    let (router, _) = app();
    let request = Request::post("/v1/ocr/url")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"url":"file:///etc/passwd"}"#))
        .unwrap();
    let (status, body) = send_json(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn url_endpoint_downloads_and_ocrs() {
    let served = png_bytes(16, 16);
    let mock = Router::new().route(
        "/scans/page.png",
        get(move || {
            let body = served.clone();
            async move { body }
        }),
    );
    let base = spawn_mock(mock).await;

    let (router, _) = app();
    let request = Request::post("/v1/ocr/url")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "url": format!("{base}/scans/page.png"), "lang": "eng" }).to_string(),
        ))
        .unwrap();
    let (status, body) = send_json(&router, request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["metadata"]["name"], "page.png");
    assert_eq!(body["text"], "Hello from page 1 (eng)\n");
}

#[tokio::test]
async fn url_download_over_limit_is_413() {
    let mock = Router::new()
        .route("/big.pdf", get(|| async { vec![b'%'; 1024] }))
        .route(
            "/chunked.pdf",
            get(|| async {
                let chunks: Vec<Result<Bytes, std::io::Error>> =
                    (0..4).map(|_| Ok(Bytes::from(vec![b'%'; 50]))).collect();
                Body::from_stream(futures::stream::iter(chunks))
            }),
        );
    let base = spawn_mock(mock).await;

    let config = ServiceConfig::builder()
        .max_upload_bytes(128)
        .build()
        .unwrap();
    let (router, engine) = app_with(config);
    for path in ["big.pdf", "chunked.pdf"] {
        let request = Request::post("/v1/ocr/url")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "url": format!("{base}/{path}") }).to_string()))
            .unwrap();
        let (status, body) = send_json(&router, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{path}: {body}");
        assert_eq!(body["error"], "document_too_large");
    }
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

// ── Google Drive ─────────────────────────────────────────────────────────────

async fn spawn_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Clone, Default)]
struct MockGoogle {
    token_calls: Arc<AtomicUsize>,
    list_queries: Arc<std::sync::Mutex<Vec<HashMap<String, String>>>>,
}

async fn mock_token(
    State(mock): State<MockGoogle>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    mock.token_calls.fetch_add(1, Ordering::SeqCst);
    if form.get("grant_type").map(String::as_str) != Some("refresh_token")
        || form.get("refresh_token").map(String::as_str) != Some("rt-1")
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "Bad Request" })),
        )
            .into_response();
    }
    Json(json!({ "access_token": "at-1", "expires_in": 3600, "token_type": "Bearer" }))
        .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .is_some_and(|v| v == "Bearer at-1")
}

async fn mock_list(
    State(mock): State<MockGoogle>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "code": 401, "message": "Invalid Credentials" } })),
        )
            .into_response();
    }
    mock.list_queries.lock().unwrap().push(query);
    Json(json!({
        "files": [
            {
                "id": "png-1",
                "name": "receipt.png",
                "mimeType": "image/png",
                "modifiedTime": "2024-05-02T09:00:00.000Z",
                "size": "1234"
            },
            {
                "id": "pdf-1",
                "name": "broken.pdf",
                "mimeType": "application/pdf",
                "modifiedTime": "2024-05-01T09:00:00.000Z",
                "size": "10"
            }
        ]
    }))
    .into_response()
}

async fn mock_download(
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) || query.get("alt").map(String::as_str) != Some("media") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match id.as_str() {
        "png-1" => png_bytes(20, 10).into_response(),
        _ => b"not really a pdf".to_vec().into_response(),
    }
}

async fn drive_app() -> (Router, Arc<FakeEngine>, MockGoogle) {
    let mock = MockGoogle::default();
    let google = Router::new()
        .route("/token", post(mock_token))
        .route("/drive/v3/files", get(mock_list))
        .route("/drive/v3/files/:id", get(mock_download))
        .with_state(mock.clone());
    let base = spawn_mock(google).await;

    let config = ServiceConfig::builder()
        .max_retries(0)
        .max_files(3)
        .drive(DriveSettings {
            token_json: Some(
                r#"{"refresh_token":"rt-1","client_id":"cid","client_secret":"cs"}"#.into(),
            ),
            folder_id: Some("folder-1".into()),
            ..Default::default()
        })
        .build()
        .unwrap();

    let credentials = GoogleCredentials {
        client_id: "cid".into(),
        client_secret: "cs".into(),
        refresh_token: "rt-1".into(),
        token_uri: format!("{base}/token"),
    };
    let drive = DriveClient::new(credentials, format!("{base}/drive/v3"), 5).unwrap();

    let engine = Arc::new(FakeEngine::default());
    let state = AppState::new(config, engine.clone())
        .unwrap()
        .with_drive(drive);
    (build_router(state), engine, mock)
}

#[tokio::test]
async fn drive_files_lists_folder_with_one_token_refresh() {
    let (router, _, mock) = drive_app().await;

    let (status, body) = send_json(&router, get_req("/v1/drive/files")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["folder_id"], "folder-1");
    assert_eq!(body["files"][0]["id"], "png-1");
    assert_eq!(body["files"][0]["mimeType"], "image/png");

    let (status, _) = send_json(&router, get_req("/v1/drive/files")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);

    let queries = mock.list_queries.lock().unwrap();
    let first = &queries[0];
    assert!(first["q"].starts_with("'folder-1' in parents and trashed=false"));
    assert_eq!(first["orderBy"], "modifiedTime desc");
    assert_eq!(first["pageSize"], "3");
}

#[tokio::test]
async fn drive_ocr_reports_each_file_and_caches() {
    let (router, engine, _) = drive_app().await;

    let (status, body) = send_json(&router, drive_ocr_req()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["processed"], 1);
    assert_eq!(body["failed"], 1);

    let items = body["items"].as_array().unwrap();
    assert_eq!(items[0]["file"]["name"], "receipt.png");
    assert_eq!(items[0]["cached"], false);
    assert_eq!(items[0]["output"]["text"], "Hello from page 1 (eng)\n");
    assert!(items[1]["error"].as_str().unwrap().contains("broken.pdf"));
    assert!(items[1].get("output").is_none());

    let (_, again) = send_json(&router, drive_ocr_req()).await;
    assert_eq!(again["items"][0]["cached"], true);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn drive_endpoints_without_configuration_are_503() {
    let (router, _) = app();
    let (status, body) = send_json(&router, get_req("/v1/drive/files")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "drive_not_configured");

    let (status, _) = send_json(&router, drive_ocr_req()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn rejected_refresh_token_surfaces_as_502() {
    let mock = MockGoogle::default();
    let google = Router::new()
        .route("/token", post(mock_token))
        .with_state(mock.clone());
    let base = spawn_mock(google).await;

    let credentials = GoogleCredentials {
        client_id: "cid".into(),
        client_secret: "cs".into(),
        refresh_token: "revoked".into(),
        token_uri: format!("{base}/token"),
    };
    let drive = DriveClient::new(credentials, format!("{base}/drive/v3"), 5).unwrap();
    let err = drive.access_token().await.unwrap_err();
    match &err {
        ServiceError::DriveApi { status, message } => {
            assert_eq!(*status, 400);
            assert_eq!(message, "invalid_grant: Bad Request");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
}
