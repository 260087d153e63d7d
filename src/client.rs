//! Authenticated HTTP client.
//!
//! DESIGN
//! ======
//! Every call runs through one pipeline:
//!
//! 1. Attach `Authorization: Bearer <token>` when a session exists, a
//!    cache-busting `_t` query parameter, and an `X-Request-ID`.
//! 2. On 401 (first attempt only) recover through the refresh gate, then
//!    re-issue the request once with the new token.
//! 3. On any other failure classify it, emit a [`Notification`], and
//!    return the error.
//!
//! REFRESH COALESCING
//! ==================
//! Refreshes are serialized behind `refresh_gate`. A caller that reaches
//! the gate after another caller already rotated the token just retries
//! with the rotated one. A failed refresh tears the session down while the
//! gate is still held, so every late waiter observes `Anonymous` and gives
//! up instead of issuing its own refresh.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::TokenResponse;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::notify::{Notification, Notifier};
use crate::session::{AuthState, SessionHandle, TokenPair};

pub const CACHE_BUSTER_PARAM: &str = "_t";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
const REFRESH_PATH: &str = "/auth/refresh";

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// Per-call knobs layered on top of method, path, and body.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    /// Send without a bearer token even when a session exists.
    pub skip_auth: bool,
    /// Treat 401 as final instead of attempting a refresh.
    pub skip_refresh: bool,
    /// Override the client-wide request timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::Config(format!("invalid header name {name}: {e}")))?;
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    #[must_use]
    pub fn without_refresh(mut self) -> Self {
        self.skip_refresh = true;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Rate-limit headers reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the window resets.
    pub reset: u64,
}

impl RateLimitInfo {
    /// Parse `X-RateLimit-{Limit,Remaining,Reset}`; `None` unless all three
    /// are present and numeric.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        fn parse<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        }
        Some(Self {
            limit: parse(headers, "x-ratelimit-limit")?,
            remaining: parse(headers, "x-ratelimit-remaining")?,
            reset: parse(headers, "x-ratelimit-reset")?,
        })
    }
}

/// Successful response with its decoded body.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub data: T,
    pub rate_limit: Option<RateLimitInfo>,
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    session: SessionHandle,
    notifier: Notifier,
    refresh_gate: Arc<Mutex<()>>,
}

impl ApiClient {
    /// Build a client bound to `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: ClientConfig, session: SessionHandle) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, config: Arc::new(config), session, notifier: Notifier::new(), refresh_gate: Arc::new(Mutex::new(())) })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Issue a request and decode the JSON body into `T`.
    ///
    /// An empty success body decodes as JSON `null`, so `T = Value` or
    /// `T = ()` accept it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] for non-success statuses (after the 401
    /// refresh protocol has run), [`ApiError::Network`] when no response was
    /// received, and [`ApiError::Json`] when the body does not decode.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let response = self
            .execute(method, path, &options, |builder| {
                Ok(match body {
                    Some(json) => builder.json(json),
                    None => builder,
                })
            })
            .await?;
        decode_response(response).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> Result<T, ApiError> {
        Ok(self.request(Method::GET, path, None, options).await?.data)
    }

    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        Ok(self.request(Method::POST, path, Some(&body), RequestOptions::default()).await?.data)
    }

    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        Ok(self.request(Method::PUT, path, Some(&body), RequestOptions::default()).await?.data)
    }

    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn patch<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        Ok(self.request(Method::PATCH, path, Some(&body), RequestOptions::default()).await?.data)
    }

    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        Ok(self.request(Method::DELETE, path, None, RequestOptions::default()).await?.data)
    }

    /// Refresh the access token now, sharing the gate with 401 recovery.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotAuthenticated`] without a refresh token, or the
    /// refresh call's error. On failure the session has been torn down.
    pub async fn refresh_session(&self) -> Result<(), ApiError> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    // =========================================================================
    // PIPELINE
    // =========================================================================

    /// Send with the bearer/401/classification pipeline. `build` attaches the
    /// body and runs once per attempt, so non-replayable bodies (streams) are
    /// rebuilt for the retry.
    ///
    /// Absolute URLs outside the configured origin never receive the bearer
    /// token, and their 401s are returned as-is.
    pub(crate) async fn execute<F>(
        &self,
        method: Method,
        path: &str,
        options: &RequestOptions,
        build: F,
    ) -> Result<Response, ApiError>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder, ApiError>,
    {
        let url = self.config.endpoint(path);
        let same_origin = self.config.is_same_origin(&url);
        if !same_origin {
            tracing::debug!(%url, "foreign origin; sending without credentials");
        }
        // Only a 401 from our own backend, for a request that was allowed to
        // carry the session token, says anything about that token.
        let recoverable = same_origin && !options.skip_auth && !options.skip_refresh;
        let mut retried = false;

        loop {
            let token = if options.skip_auth || !same_origin { None } else { self.session.access_token() };
            let response = match self.send_once(&method, &url, options, token.as_deref(), &build).await {
                Ok(response) => response,
                Err(error) => {
                    tracing::warn!(%method, path, %error, "request failed without response");
                    self.surface(&error);
                    return Err(error);
                }
            };

            let status = response.status();
            if status.is_success() {
                tracing::debug!(%method, path, status = status.as_u16(), retried, "request ok");
                return Ok(response);
            }

            let error = error_from_response(response).await;
            tracing::info!(%method, path, status = status.as_u16(), retried, "request rejected");

            if status == reqwest::StatusCode::UNAUTHORIZED && recoverable {
                if retried {
                    tracing::warn!(path, "retry after refresh was rejected; ending session");
                    self.teardown();
                    return Err(error);
                }
                retried = true;
                if self.recover_from_unauthorized(token.as_deref()).await {
                    continue;
                }
                return Err(error);
            }

            self.surface(&error);
            return Err(error);
        }
    }

    async fn send_once<F>(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
        token: Option<&str>,
        build: &F,
    ) -> Result<Response, ApiError>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder, ApiError>,
    {
        let mut headers = options.headers.clone();
        if token.is_some() {
            headers.remove(AUTHORIZATION);
        }
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&Uuid::new_v4().to_string())?);

        let mut builder = self
            .http
            .request(method.clone(), url)
            .query(&[(CACHE_BUSTER_PARAM, cache_buster())])
            .headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        build(builder)?.send().await.map_err(ApiError::Network)
    }

    // =========================================================================
    // REFRESH
    // =========================================================================

    /// Decide whether a 401 seen with `used_token` can be retried. Returns
    /// `false` once the session has been torn down.
    async fn recover_from_unauthorized(&self, used_token: Option<&str>) -> bool {
        let _gate = self.refresh_gate.lock().await;

        match (self.session.access_token(), used_token) {
            (Some(current), Some(used)) if current != used => {
                tracing::debug!("token rotated by concurrent refresh; retrying");
                return true;
            }
            // Sent while anonymous; a login has since established a session.
            (Some(_), None) => return true,
            (None, Some(_)) => {
                tracing::debug!("session already ended by concurrent refresh");
                return false;
            }
            _ => {}
        }

        self.refresh_locked().await.is_ok()
    }

    /// Refresh while holding the gate. Tears the session down on failure.
    async fn refresh_locked(&self) -> Result<(), ApiError> {
        let Some(refresh_token) = self.session.begin_refresh() else {
            tracing::info!("no refresh token; re-authentication required");
            self.teardown();
            return Err(ApiError::NotAuthenticated);
        };

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(issued) => {
                let applied = self.session.complete_refresh(
                    TokenPair { access_token: issued.access_token, refresh_token: Some(issued.refresh_token) },
                    issued.user,
                );
                if !applied {
                    tracing::info!("session changed during refresh; discarding rotated tokens");
                    return Err(ApiError::NotAuthenticated);
                }
                tracing::info!("access token refreshed");
                Ok(())
            }
            Err(error) if self.session.state() == AuthState::Refreshing => {
                tracing::warn!(%error, "token refresh failed; ending session");
                self.teardown();
                Err(error)
            }
            Err(error) => {
                tracing::info!(%error, "token refresh failed after the session changed");
                Err(error)
            }
        }
    }

    /// `POST /auth/refresh` outside the pipeline: no bearer, no 401 recovery.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ApiError> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let options = RequestOptions::default();
        let url = self.config.endpoint(REFRESH_PATH);
        let response = self
            .send_once(&Method::POST, &url, &options, None, &|builder: RequestBuilder| Ok(builder.json(&body)))
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(decode_response::<TokenResponse>(response).await?.data)
    }

    // =========================================================================
    // SIDE CHANNELS
    // =========================================================================

    fn surface(&self, error: &ApiError) {
        if let Some(notification) = Notification::from_error(error) {
            self.notifier.emit(notification);
        }
    }

    /// Clear the session and ask the user to sign in again.
    fn teardown(&self) {
        self.session.clear();
        self.notifier.emit(Notification::ReauthRequired { login_path: self.config.login_path.clone() });
    }
}

// =============================================================================
// HELPERS
// =============================================================================

pub(crate) async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<ApiResponse<T>, ApiError> {
    let status = response.status().as_u16();
    let rate_limit = RateLimitInfo::from_headers(response.headers());
    let bytes = response.bytes().await.map_err(ApiError::Network)?;
    let data = if bytes.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(Value::Null)?
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(ApiResponse { status, data, rate_limit })
}

async fn error_from_response(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    ApiError::from_response_parts(status, &headers, &body)
}

fn cache_buster() -> String {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return "0".to_owned();
    };
    duration.as_millis().to_string()
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
