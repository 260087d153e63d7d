//! Client configuration parsed from environment variables.

use std::path::PathBuf;

use crate::error::ApiError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_API_PREFIX: &str = "/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Scheme and authority of the backend, without a trailing slash.
    pub base_url: String,
    /// Version prefix joined between `base_url` and every request path.
    pub api_prefix: String,
    pub timeouts: Timeouts,
    /// Login entry point announced when re-authentication is required.
    pub login_path: String,
    /// Where the session is persisted between runs, if anywhere.
    pub session_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Config for `base_url` with every other field at its default.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an `http://` or `https://` URL.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            api_prefix: DEFAULT_API_PREFIX.to_owned(),
            timeouts: Timeouts::default(),
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            session_file: None,
        })
    }

    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `PAGEDASH_API_BASE_URL`: default `http://localhost:8000`
    /// - `PAGEDASH_API_PREFIX`: default `/api/v1`
    /// - `PAGEDASH_REQUEST_TIMEOUT_SECS`: default 30
    /// - `PAGEDASH_CONNECT_TIMEOUT_SECS`: default 10
    /// - `PAGEDASH_LOGIN_PATH`: default `/login`
    /// - `PAGEDASH_SESSION_FILE`: unset means the session is not persisted
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is malformed.
    pub fn from_env() -> Result<Self, ApiError> {
        let base_url = std::env::var("PAGEDASH_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_owned());
        let api_prefix = std::env::var("PAGEDASH_API_PREFIX").unwrap_or_else(|_| DEFAULT_API_PREFIX.to_owned());
        let timeouts = Timeouts {
            request_secs: env_parse_u64("PAGEDASH_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("PAGEDASH_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let login_path = std::env::var("PAGEDASH_LOGIN_PATH").unwrap_or_else(|_| DEFAULT_LOGIN_PATH.to_owned());
        let session_file = std::env::var("PAGEDASH_SESSION_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            base_url: normalize_base_url(&base_url)?,
            api_prefix: normalize_prefix(&api_prefix),
            timeouts,
            login_path,
            session_file,
        })
    }

    #[must_use]
    pub fn with_api_prefix(mut self, prefix: &str) -> Self {
        self.api_prefix = normalize_prefix(prefix);
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Absolute URL for an API path. Paths that are already absolute URLs
    /// are passed through untouched.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        let path = path.trim_start_matches('/');
        format!("{}{}/{}", self.base_url, self.api_prefix, path)
    }

    /// Whether `url` lies under `base_url`: same scheme, host, and port, and
    /// a path boundary right after it. Compared ASCII case-insensitively.
    #[must_use]
    pub fn is_same_origin(&self, url: &str) -> bool {
        let origin_len = self.base_url.len();
        let Some(head) = url.get(..origin_len) else {
            return false;
        };
        head.eq_ignore_ascii_case(&self.base_url)
            && url[origin_len..]
                .chars()
                .next()
                .is_none_or(|c| matches!(c, '/' | '?' | '#'))
    }
}

fn normalize_base_url(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or_else(|| ApiError::Config(format!("invalid base URL: {raw}")))?;
    if rest.is_empty() {
        return Err(ApiError::Config(format!("invalid base URL: {raw}")));
    }
    Ok(trimmed.to_owned())
}

/// `"api/v1/"` and `"/api/v1"` both become `"/api/v1"`; blank becomes `""`.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
