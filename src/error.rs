//! Error taxonomy and HTTP status classification.
//!
//! DESIGN
//! ======
//! Every failed call maps to exactly one [`ErrorKind`]. `AuthExpired` is
//! recovered inside the client via the refresh protocol; the other kinds
//! are returned to callers and mirrored as notifications.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Wait hint used when a 429 response carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Failure class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 401: access token missing or expired.
    AuthExpired,
    /// 403.
    Forbidden,
    /// 404.
    NotFound,
    /// 429, with the suggested wait before the next attempt.
    RateLimited { retry_after: Duration },
    /// Any 5xx.
    ServerError,
    /// No response was received (connect failure, timeout, broken body).
    NetworkError,
    /// Any other 4xx, e.g. validation failures.
    Client,
}

impl ErrorKind {
    /// Classify a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: u16, headers: &HeaderMap) -> Self {
        match status {
            401 => Self::AuthExpired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            429 => Self::RateLimited { retry_after: retry_after(headers) },
            500..=599 => Self::ServerError,
            _ => Self::Client,
        }
    }
}

/// Read `Retry-After` as whole seconds, falling back to
/// [`DEFAULT_RETRY_AFTER_SECS`]. HTTP-date values are not interpreted.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Duration {
    let secs = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs)
}

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String, kind: ErrorKind },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// A request body could not be encoded or a response body decoded.
    #[error("JSON encode/decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A caller-supplied header value was invalid.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// Local file access failed (uploads, downloads, session file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    Config(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The operation needs a session and none is established.
    #[error("not authenticated")]
    NotAuthenticated,
}

impl ApiError {
    /// Failure class, when the error came from the transport.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Http { kind, .. } => Some(*kind),
            Self::Network(_) => Some(ErrorKind::NetworkError),
            _ => None,
        }
    }

    /// HTTP status, when a response was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-provided `detail`, when a response was received.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Http { detail, .. } => Some(detail),
            _ => None,
        }
    }

    pub(crate) fn from_response_parts(status: u16, headers: &HeaderMap, body: &str) -> Self {
        Self::Http { status, detail: detail_from_body(status, body), kind: ErrorKind::from_status(status, headers) }
    }
}

/// Extract the `{ "detail": ... }` message from an error body.
///
/// Structured details (validation error lists) are rendered as JSON; a
/// non-JSON body is used verbatim, and an empty one falls back to the
/// canonical reason phrase.
pub(crate) fn detail_from_body(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("request failed")
            .to_owned();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => trimmed.to_owned(),
        },
        _ => trimmed.to_owned(),
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
