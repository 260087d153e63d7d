//! Multipart upload with progress events, and file download.
//!
//! Progress is reported on an `mpsc` channel rather than a callback. Events
//! are sent with `try_send`: a slow observer loses intermediate events but
//! never stalls the upload.

use std::path::{Path, PathBuf};

use futures_util::{StreamExt, stream};
use reqwest::Method;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::client::{ApiClient, ApiResponse, RequestOptions, decode_response};
use crate::error::ApiError;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
const FALLBACK_FILE_NAME: &str = "download";

/// Bytes handed to the transport so far, out of `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
}

impl UploadProgress {
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = self.sent.min(self.total).saturating_mul(100) / self.total;
        u8::try_from(pct).unwrap_or(100)
    }
}

impl ApiClient {
    /// Upload `file_path` as multipart field `field_name` to `path`.
    ///
    /// The file is streamed in chunks; each chunk emits an [`UploadProgress`]
    /// on `progress`. The file is opened when the body is first polled, so
    /// a retry after a token refresh streams it again from the start.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, or any request error.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        file_path: &Path,
        field_name: &str,
        progress: Option<mpsc::Sender<UploadProgress>>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let total = tokio::fs::metadata(file_path).await?.len();
        let file_name = file_path
            .file_name()
            .map_or_else(|| FALLBACK_FILE_NAME.to_owned(), |n| n.to_string_lossy().into_owned());
        tracing::info!(path, file = %file_path.display(), total, "upload started");

        let response = self
            .execute(Method::POST, path, &RequestOptions::default(), |builder| {
                let body = progress_body(file_path.to_path_buf(), total, progress.clone());
                let part = Part::stream_with_length(body, total).file_name(file_name.clone());
                Ok(builder.multipart(Form::new().part(field_name.to_owned(), part)))
            })
            .await?;
        decode_response(response).await
    }

    /// Download `path` into `dest_dir` and return the written file.
    ///
    /// The file name is `file_name` if given, else the `Content-Disposition`
    /// filename, else the last segment of `path`. The body is streamed to
    /// disk; a transfer that breaks off midway leaves no partial file.
    ///
    /// # Errors
    ///
    /// Returns any request error, or an error if the file cannot be written.
    pub async fn download(&self, path: &str, dest_dir: &Path, file_name: Option<&str>) -> Result<PathBuf, ApiError> {
        let response = self.execute(Method::GET, path, &RequestOptions::default(), |builder| Ok(builder)).await?;

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);
        let name = file_name
            .map(ToOwned::to_owned)
            .or(disposition)
            .or_else(|| last_path_segment(path))
            .map_or_else(|| FALLBACK_FILE_NAME.to_owned(), |n| sanitize_file_name(&n));

        tokio::fs::create_dir_all(dest_dir).await?;
        let target = dest_dir.join(name);
        match write_body(response, &target).await {
            Ok(bytes) => {
                tracing::info!(path, file = %target.display(), bytes, "download saved");
                Ok(target)
            }
            Err(error) => {
                tracing::warn!(path, file = %target.display(), %error, "download aborted");
                let _ = tokio::fs::remove_file(&target).await;
                Err(error)
            }
        }
    }
}

async fn write_body(response: reqwest::Response, target: &Path) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(target).await?;
    let mut chunks = response.bytes_stream();
    let mut written = 0_u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(ApiError::Network)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

fn progress_body(file_path: PathBuf, total: u64, progress: Option<mpsc::Sender<UploadProgress>>) -> reqwest::Body {
    let chunks = stream::try_unfold((None, 0_u64), move |(file, sent): (Option<tokio::fs::File>, u64)| {
        let progress = progress.clone();
        let file_path = file_path.clone();
        async move {
            let mut file = match file {
                Some(file) => file,
                None => tokio::fs::File::open(&file_path).await?,
            };
            let mut buf = vec![0_u8; UPLOAD_CHUNK_SIZE];
            let read = file.read(&mut buf).await?;
            if read == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            buf.truncate(read);
            let sent = sent + read as u64;
            if let Some(tx) = &progress {
                let _ = tx.try_send(UploadProgress { sent, total });
            }
            Ok(Some((buf, (Some(file), sent))))
        }
    });
    reqwest::Body::wrap_stream(chunks)
}

/// `attachment; filename="q1.pdf"` -> `q1.pdf`. An RFC 5987 `filename*`
/// wins when it percent-decodes to UTF-8; otherwise the plain `filename`.
fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').map(str::trim) {
        if let Some(ext) = param.strip_prefix("filename*=") {
            let encoded = ext.rsplit("''").next().unwrap_or(ext).trim_matches('"');
            match urlencoding::decode(encoded) {
                Ok(name) if !name.is_empty() => return Some(name.into_owned()),
                Ok(_) => {}
                Err(error) => tracing::debug!(%error, "undecodable filename* in Content-Disposition"),
            }
        } else if let Some(raw) = param.strip_prefix("filename=") {
            let name = raw.trim_matches('"');
            if !name.is_empty() {
                plain = Some(name.to_owned());
            }
        }
    }
    plain
}

fn last_path_segment(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Keep only the final component so a server-chosen name cannot escape
/// `dest_dir`.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        FALLBACK_FILE_NAME.to_owned()
    } else {
        base.to_owned()
    }
}

#[cfg(test)]
#[path = "transfer_test.rs"]
mod tests;
