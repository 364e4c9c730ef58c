//! Delivery routing for downloaded files
//!
//! Each file produced by a download is either handed back to the transport
//! for inline sending (small enough for the chat platform) or uploaded to an
//! HTTP file host, in which case the user receives a link. A failure for one
//! file is reported as [`DeliveryResult::Failed`] and never stops delivery of
//! the remaining files.

use crate::config::{DeliveryConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A file on disk that is ready to be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Path relative to the request's working directory (as listed in the manifest)
    pub relative: PathBuf,
    /// Absolute path on disk
    pub path: PathBuf,
    /// Size in bytes at the time the file was inspected
    pub size: u64,
}

impl OutputFile {
    /// Final path component, used as the upload name and in notices
    pub fn file_name(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.relative.display().to_string())
    }
}

/// Outcome of routing one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryResult {
    /// Small enough to send directly; the transport transmits the bytes
    Inline {
        /// File to send
        path: PathBuf,
    },
    /// Uploaded to the file host
    Linked {
        /// Download link returned by the host
        url: String,
    },
    /// Could not be delivered
    Failed {
        /// Human-readable reason
        reason: String,
    },
}

/// Uploads oversized files and returns a shareable link
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `file` and return the link
    async fn upload(&self, file: &OutputFile) -> Result<String>;
}

/// Uploader for transfer.sh-style hosts
///
/// Sends `PUT {endpoint}/{file name}` with the file contents and treats the
/// trimmed response body as the link.
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpUploader {
    /// Create an uploader from the delivery settings
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.upload_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.upload_endpoint.trim_end_matches('/').to_string(),
            timeout: config.upload_timeout,
        })
    }

    fn upload_url(&self, file: &OutputFile) -> String {
        format!(
            "{}/{}",
            self.endpoint,
            urlencoding::encode(&file.file_name())
        )
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, file: &OutputFile) -> Result<String> {
        let failed = |reason: String| Error::UploadFailed {
            file: file.relative.clone(),
            reason,
        };

        let body = tokio::fs::read(&file.path).await?;
        let url = self.upload_url(file);

        tracing::debug!(url = %url, size = body.len(), "Uploading file");

        let response = self.client.put(&url).body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                failed(format!("upload timed out after {}s", self.timeout.as_secs()))
            } else if e.is_connect() {
                failed(format!("upload host unreachable: {}", e))
            } else {
                Error::Network(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!(
                "upload host returned status {}",
                status.as_u16()
            )));
        }

        let text = response.text().await?;
        let link = text.trim();
        if link.is_empty() {
            return Err(failed("upload host returned an empty link".to_string()));
        }

        Ok(link.to_string())
    }
}

/// Routes files to inline delivery or upload
pub struct DeliveryRouter {
    uploader: Arc<dyn Uploader>,
    retry: RetryConfig,
}

impl DeliveryRouter {
    /// Create a router with the given uploader and upload retry policy
    pub fn new(uploader: Arc<dyn Uploader>, retry: RetryConfig) -> Self {
        Self { uploader, retry }
    }

    /// Inspect a manifest entry on disk
    ///
    /// Returns `None` when the file does not exist (or is not a regular
    /// file), which happens for entries the engine skipped.
    pub async fn output_file(work_dir: &Path, relative: &Path) -> Option<OutputFile> {
        let path = work_dir.join(relative);
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(OutputFile {
            relative: relative.to_path_buf(),
            path,
            size: metadata.len(),
        })
    }

    /// Route one file
    ///
    /// Files of at most `threshold` bytes are delivered inline; larger files
    /// are uploaded. Never returns an error: every failure becomes
    /// [`DeliveryResult::Failed`].
    pub async fn deliver(&self, file: &OutputFile, threshold: u64) -> DeliveryResult {
        let size = match tokio::fs::metadata(&file.path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                return DeliveryResult::Failed {
                    reason: format!("{} is not a regular file", file.relative.display()),
                };
            }
            Err(e) => {
                return DeliveryResult::Failed {
                    reason: format!("cannot read {}: {}", file.relative.display(), e),
                };
            }
        };

        if size <= threshold {
            return DeliveryResult::Inline {
                path: file.path.clone(),
            };
        }

        tracing::info!(
            file = %file.relative.display(),
            size,
            threshold,
            "File exceeds inline limit, uploading"
        );

        match with_retry(&self.retry, || self.uploader.upload(file)).await {
            Ok(url) => DeliveryResult::Linked { url },
            Err(e) => {
                tracing::warn!(file = %file.relative.display(), error = %e, "Upload failed");
                DeliveryResult::Failed {
                    reason: match e {
                        Error::UploadFailed { reason, .. } => reason,
                        other => other.to_string(),
                    },
                }
            }
        }
    }
}
