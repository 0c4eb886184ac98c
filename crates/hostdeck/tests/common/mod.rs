//! Test utilities and common setup.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use hostdeck::config::AppConfig;
use hostdeck::{AppState, create_router};
use hostdeck_core::ShellKind;

/// A router over a fresh temporary sandbox. Keep the `TempDir` alive for
/// the duration of the test.
pub struct TestApp {
    pub dir: TempDir,
    pub router: Router,
}

impl TestApp {
    pub fn root(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn scripts_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("scripts")
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub fn test_config(root: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.sandbox.root = root.display().to_string();
    config.terminal.default_shell = ShellKind::Sh;
    config.terminal.timeout_secs = 5;
    config.files.max_backup_bytes = 1024 * 1024;
    config
}

/// Create a test application rooted at a temporary directory.
pub fn test_app() -> TestApp {
    test_app_with(|_| {})
}

pub fn test_app_with(customize: impl FnOnce(&mut AppConfig)) -> TestApp {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut config = test_config(&root);
    customize(&mut config);
    let state = AppState::new(config).unwrap();
    TestApp {
        dir,
        router: create_router(state),
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn with_cookie(mut request: Request<Body>, cookie: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    request
}

/// Multipart body with a single `file` field.
pub fn multipart_upload(uri: &str, file_name: &str, contents: &[u8]) -> Request<Body> {
    let boundary = "hostdeck-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .uri(uri)
        .method(Method::POST)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// The `name=value` part of the session cookie set on a response.
pub fn session_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(';').next())
        .unwrap_or_default()
        .to_string()
}
