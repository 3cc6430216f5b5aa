//! Streaming transfer of one artifact.
//!
//! Bytes go to `<final>.part`; the final name only ever holds a verified
//! file. Any failure or cancellation deletes the part file.

use super::progress::ProgressSink;
use super::types::{ProgressEvent, TransferState};
use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::model_library::sanitize_filename;
use crate::resolver::ResolvedArtifact;
use crate::{AlchemistError, Result};
use futures::StreamExt;
use regex::Regex;
use reqwest::{header, Client, Response, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

static DISPOSITION_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filename="?([^";\n]+)"?"#).unwrap());

/// A finished, verified file.
#[derive(Debug, Clone)]
pub struct Transferred {
    pub path: PathBuf,
    pub filename: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Everything one transfer needs.
pub struct Transfer<'a> {
    pub client: &'a Client,
    pub task_id: &'a str,
    pub artifact: &'a ResolvedArtifact,
    pub api_key: Option<&'a str>,
    pub cancel: &'a CancellationToken,
    pub sink: &'a dyn ProgressSink,
}

impl Transfer<'_> {
    pub async fn run(&self) -> Result<Transferred> {
        let (url, mut target) = match (&self.artifact.download_url, &self.artifact.target_path) {
            (Some(url), Some(target)) => (url.as_str(), target.clone()),
            _ => {
                return Err(AlchemistError::Validation {
                    field: "artifact".to_string(),
                    message: format!("{} has no download URL or target path", self.artifact.label()),
                })
            }
        };

        self.cancel.check()?;
        let response = self.open(url).await?;

        let mut filename = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.artifact.label());
        if let Some(served) = disposition_filename(&response) {
            if served != filename {
                debug!("Server renamed {} to {}", filename, served);
                target.set_file_name(&served);
                filename = served;
            }
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AlchemistError::io_with_path(e, parent))?;
        }
        let part = part_path(&target);

        let result = self.write_part(url, response, &part, &filename).await;
        let (bytes, sha256) = match result {
            Ok(done) => done,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, &target).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(AlchemistError::DownloadFailed {
                url: url.to_string(),
                message: format!("Failed to move {} into place: {}", part.display(), e),
            });
        }

        info!("Downloaded {} ({} bytes) to {}", filename, bytes, target.display());
        Ok(Transferred {
            path: target,
            filename,
            bytes,
            sha256,
        })
    }

    async fn open(&self, url: &str) -> Result<Response> {
        let request_url = with_token(url, self.api_key)?;
        let response = self.client.get(request_url).send().await.map_err(|e| {
            AlchemistError::DownloadFailed {
                url: url.to_string(),
                message: format!("request failed: {}", e),
            }
        })?;

        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AlchemistError::Unauthorized {
                message: format!(
                    "download of {} was rejected ({}); check the API key",
                    self.artifact.label(),
                    response.status()
                ),
            }),
            s => Err(AlchemistError::DownloadFailed {
                url: url.to_string(),
                message: format!("server returned {}", s),
            }),
        }
    }

    /// Stream the body into `part`, returning byte count and hex digest.
    async fn write_part(
        &self,
        url: &str,
        response: Response,
        part: &Path,
        filename: &str,
    ) -> Result<(u64, String)> {
        let total = response.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| AlchemistError::io_with_path(e, part))?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        self.emit(filename, TransferState::Downloading, 0, total);
        let mut last_emit = Instant::now();

        while let Some(chunk) = stream.next().await {
            if self.cancel.is_cancelled() {
                debug!("Cancelled {} at {} bytes", filename, downloaded);
                return Err(AlchemistError::DownloadCancelled);
            }

            let chunk = chunk.map_err(|e| AlchemistError::DownloadFailed {
                url: url.to_string(),
                message: format!("stream interrupted: {}", e),
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| AlchemistError::io_with_path(e, part))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if last_emit.elapsed() >= NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL {
                self.emit(filename, TransferState::Downloading, downloaded, total);
                last_emit = Instant::now();
            }
        }

        file.flush()
            .await
            .map_err(|e| AlchemistError::io_with_path(e, part))?;
        file.sync_all()
            .await
            .map_err(|e| AlchemistError::io_with_path(e, part))?;
        drop(file);

        self.emit(filename, TransferState::Verifying, downloaded, total);
        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = self.artifact.sha256.as_deref().filter(|s| !s.is_empty()) {
            if !expected.eq_ignore_ascii_case(&actual) {
                warn!("Checksum mismatch for {}: expected {}, got {}", filename, expected, actual);
                return Err(AlchemistError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok((downloaded, actual))
    }

    fn emit(&self, filename: &str, status: TransferState, downloaded: u64, total: u64) {
        self.sink
            .emit(ProgressEvent::new(self.task_id, filename, status, downloaded, total));
    }
}

/// `<path>.part`
pub fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(NetworkConfig::DOWNLOAD_TEMP_SUFFIX);
    PathBuf::from(name)
}

fn with_token(url: &str, api_key: Option<&str>) -> Result<Url> {
    let mut parsed = Url::parse(url).map_err(|e| AlchemistError::DownloadFailed {
        url: url.to_string(),
        message: format!("invalid URL: {}", e),
    })?;
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        parsed.query_pairs_mut().append_pair("token", key);
    }
    Ok(parsed)
}

fn disposition_filename(response: &Response) -> Option<String> {
    let value = response
        .headers()
        .get(header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    parse_disposition(value)
}

/// Final path component of a content-disposition filename.
pub fn parse_disposition(value: &str) -> Option<String> {
    let captured = DISPOSITION_FILENAME.captures(value)?.get(1)?.as_str();
    sanitize_filename(captured.trim())
}
