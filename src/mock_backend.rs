//! In-process backend for client tests.
//!
//! Routes live under `/api/v1` like the real service. Tokens are checked
//! against `valid_token`, which `/auth/refresh` rotates to `access-<n>`.
//! Anything without a dedicated route is echoed back as JSON so tests can
//! inspect method, path, query pairs, and `Authorization` headers.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, OriginalUri, Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::session::{SessionHandle, TokenPair};

pub(crate) const ACCESS_TOKEN: &str = "access-0";
pub(crate) const STALE_TOKEN: &str = "access-stale";
pub(crate) const REFRESH_TOKEN: &str = "refresh-1";
pub(crate) const PASSWORD: &str = "secret";
pub(crate) const FACEBOOK_TOKEN: &str = "fb-good";
pub(crate) const TAKEN_EMAIL: &str = "taken@example.test";
pub(crate) const EXPORT_BODY: &str = "date,reach\n2024-01-01,42\n";

pub(crate) struct Backend {
    pub valid_token: Mutex<String>,
    pub refresh_calls: AtomicUsize,
    pub refresh_fails: AtomicBool,
    pub refresh_delay_ms: AtomicU64,
    pub logout_status: AtomicU16,
    pub logout_calls: AtomicUsize,
}

impl Backend {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        token.is_some_and(|t| t == *self.valid_token.lock().unwrap())
    }

    fn issue(&self, email: &str, full_name: &str) -> Response {
        let access = self.valid_token.lock().unwrap().clone();
        Json(json!({
            "access_token": access,
            "refresh_token": REFRESH_TOKEN,
            "token_type": "bearer",
            "expires_in": 1800,
            "user": user_json(email, full_name),
        }))
        .into_response()
    }
}

pub(crate) struct MockBackend {
    pub state: Arc<Backend>,
    pub base_url: String,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(Backend {
            valid_token: Mutex::new(ACCESS_TOKEN.to_owned()),
            refresh_calls: AtomicUsize::new(0),
            refresh_fails: AtomicBool::new(false),
            refresh_delay_ms: AtomicU64::new(0),
            logout_status: AtomicU16::new(200),
            logout_calls: AtomicUsize::new(0),
        });
        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/register", post(register))
            .route("/auth/facebook", post(facebook))
            .route("/auth/refresh", post(refresh))
            .route("/auth/logout", post(logout))
            .route("/auth/me", get(profile))
            .route("/users/profile", get(profile).put(update_profile))
            .route("/users/account", axum::routing::delete(delete_account))
            .route("/protected", get(protected))
            .route("/always-401", get(always_unauthorized))
            .route("/status/{code}", get(status))
            .route("/upload", post(upload))
            .route("/export", get(export))
            .route("/files/summary.txt", get(summary_file))
            .route("/files/broken.csv", get(broken_file))
            .route("/empty", axum::routing::delete(empty));
        let router = Router::new()
            .nest("/api/v1", api)
            .fallback(echo)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self { state, base_url: format!("http://{addr}") }
    }

    pub fn client(&self, session: SessionHandle) -> ApiClient {
        ApiClient::new(ClientConfig::new(&self.base_url).unwrap(), session).unwrap()
    }

    /// Client whose session holds `access` and the backend's refresh token.
    pub fn signed_in_client(&self, access: &str) -> ApiClient {
        let tokens = TokenPair { access_token: access.to_owned(), refresh_token: Some(REFRESH_TOKEN.to_owned()) };
        self.client(SessionHandle::with_tokens(tokens, None))
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }
}

/// Base URL nothing listens on.
pub(crate) fn unreachable_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub(crate) fn user_json(email: &str, full_name: &str) -> Value {
    json!({
        "id": "65a1f0c2e4b0a1b2c3d4e5f6",
        "email": email,
        "full_name": full_name,
        "is_active": true,
        "timezone": "UTC",
        "language": "en",
        "email_notifications": true,
        "marketing_emails": false,
        "pages_connected": 2,
        "reports_generated": 5,
        "created_at": "2024-01-10T09:00:00",
        "updated_at": "2024-01-12T09:00:00",
        "is_facebook_connected": false
    })
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn unauthorized() -> Response {
    detail(StatusCode::UNAUTHORIZED, "Could not validate credentials")
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    if body["password"] != PASSWORD {
        return detail(StatusCode::UNAUTHORIZED, "Incorrect email or password");
    }
    backend.issue(body["email"].as_str().unwrap_or_default(), "Ana Analyst")
}

async fn register(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    let email = body["email"].as_str().unwrap_or_default();
    if email == TAKEN_EMAIL {
        return detail(StatusCode::BAD_REQUEST, "Email already registered");
    }
    backend.issue(email, body["full_name"].as_str().unwrap_or_default())
}

async fn facebook(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    if body["access_token"] != FACEBOOK_TOKEN {
        return detail(StatusCode::BAD_REQUEST, "Invalid Facebook access token");
    }
    backend.issue("fb-user@example.test", "Facebook User")
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    let n = backend.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = backend.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if backend.refresh_fails.load(Ordering::SeqCst) || body["refresh_token"] != REFRESH_TOKEN {
        return detail(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    let access = format!("access-{n}");
    *backend.valid_token.lock().unwrap() = access.clone();
    Json(json!({
        "access_token": access,
        "refresh_token": REFRESH_TOKEN,
        "token_type": "bearer",
        "expires_in": 1800
    }))
    .into_response()
}

async fn logout(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.logout_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let status = StatusCode::from_u16(backend.logout_status.load(Ordering::SeqCst)).unwrap();
    if status.is_success() {
        Json(json!({ "message": "Successfully logged out" })).into_response()
    } else {
        detail(status, "logout failed")
    }
}

async fn profile(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    Json(user_json("ana@example.test", "Ana Analyst")).into_response()
}

async fn update_profile(State(backend): State<Arc<Backend>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let mut user = user_json("ana@example.test", "Ana Analyst");
    if let (Some(target), Some(changes)) = (user.as_object_mut(), body.as_object()) {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
    Json(user).into_response()
}

async fn delete_account(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "message": "Account deleted" })).into_response()
}

async fn protected(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let mut response = Json(json!({ "ok": true })).into_response();
    let out = response.headers_mut();
    out.insert("x-ratelimit-limit", HeaderValue::from_static("100"));
    out.insert("x-ratelimit-remaining", HeaderValue::from_static("99"));
    out.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));
    response
}

async fn always_unauthorized() -> Response {
    unauthorized()
}

async fn status(Path(code): Path<u16>, Query(query): Query<Vec<(String, String)>>) -> Response {
    let status = StatusCode::from_u16(code).unwrap();
    let mut response = detail(status, &format!("status {code}"));
    if let Some((_, secs)) = query.iter().find(|(k, _)| k == "retry_after") {
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from_str(secs).unwrap());
    }
    response
}

async fn upload(State(backend): State<Arc<Backend>>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let mut received = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_owned();
        let file_name = field.file_name().map(ToOwned::to_owned);
        let size = field.bytes().await.unwrap().len();
        received.push(json!({ "field": name, "file_name": file_name, "size": size }));
    }
    Json(json!({ "parts": received })).into_response()
}

async fn export(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    (
        [(CONTENT_DISPOSITION, HeaderValue::from_static("attachment; filename=\"../../q1-report.csv\""))],
        EXPORT_BODY,
    )
        .into_response()
}

/// Sends one chunk, then fails the body so the connection drops mid-transfer.
async fn broken_file() -> Response {
    let chunks = futures_util::stream::iter([
        Ok(axum::body::Bytes::from_static(b"date,reach\n")),
        Err(std::io::Error::other("export worker died")),
    ]);
    axum::body::Body::from_stream(chunks).into_response()
}

async fn summary_file() -> &'static str {
    "summary"
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn echo(
    State(backend): State<Arc<Backend>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    let authorization: Vec<String> = headers
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|v| v.to_str().ok().map(ToOwned::to_owned))
        .collect();
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": query,
        "authorization": authorization,
        "authorized": backend.authorized(&headers),
        "request_id": headers.get("x-request-id").and_then(|v| v.to_str().ok()),
    }))
    .into_response()
}
