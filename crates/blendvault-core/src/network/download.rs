//! Streaming archive downloads with progress reporting and cooperative
//! cancellation.
//!
//! Archives stream to a `.part` temp file and are renamed into place only
//! once complete, so a partial download never masquerades as a finished
//! one. The cancel token is checked at chunk boundaries; cancelled
//! downloads delete their partial data.

use crate::cancel::CancelToken;
use crate::config::NetworkConfig;
use crate::network::client::HttpClient;
use crate::network::retry::{retry_request, RetryConfig};
use crate::{Result, VaultError};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

/// Progress information for one in-flight download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: f64,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total > 0 {
                (self.bytes_downloaded as f64 / total as f64) * 100.0
            } else {
                0.0
            }
        })
    }

    pub fn eta_seconds(&self) -> Option<f64> {
        self.total_bytes.and_then(|total| {
            (self.speed_bytes_per_sec > 0.0 && self.bytes_downloaded < total)
                .then(|| (total - self.bytes_downloaded) as f64 / self.speed_bytes_per_sec)
        })
    }
}

/// Streams archives to disk for the install pipeline.
pub struct ArchiveDownloader {
    http: Arc<HttpClient>,
}

impl ArchiveDownloader {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Download `url` to `destination`, reporting progress at intervals.
    ///
    /// Returns the number of bytes written.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancelToken,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| VaultError::io_with_path(e, parent))?;
            }
        }

        let temp_path = PathBuf::from(format!(
            "{}{}",
            destination.display(),
            NetworkConfig::DOWNLOAD_TEMP_SUFFIX
        ));

        let result = self
            .stream_to_file(url, &temp_path, cancel, progress_tx)
            .await;

        match result {
            Ok(bytes) => {
                std::fs::rename(&temp_path, destination).map_err(|e| {
                    let _ = std::fs::remove_file(&temp_path);
                    VaultError::io_with_path(e, destination)
                })?;
                info!("Downloaded {} bytes to {}", bytes, destination.display());
                Ok(bytes)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    /// Download with the standard retry policy. Cancellation is never
    /// retried.
    pub async fn download_with_retry(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancelToken,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<u64> {
        let retry_config = RetryConfig::new().with_base_delay(std::time::Duration::from_secs(2));
        retry_request(&retry_config, || {
            self.download(url, destination, cancel, progress_tx.clone())
        })
        .await
    }

    async fn stream_to_file(
        &self,
        url: &str,
        temp_path: &Path,
        cancel: &CancelToken,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<u64> {
        let response = self.http.get(url).await?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("Download failed with status {status}");
            if HttpClient::is_retryable_status(status) {
                return Err(VaultError::Network {
                    message,
                    cause: None,
                });
            }
            return Err(VaultError::DownloadFailed {
                url: url.to_string(),
                message,
            });
        }

        let total_bytes = response.content_length();
        let mut file =
            std::fs::File::create(temp_path).map_err(|e| VaultError::io_with_path(e, temp_path))?;

        let mut bytes_downloaded: u64 = 0;
        let started = Instant::now();
        let mut last_update = Instant::now();
        let mut stream = response.bytes_stream();

        if let Some(ref tx) = progress_tx {
            let _ = tx
                .send(DownloadProgress {
                    bytes_downloaded: 0,
                    total_bytes,
                    speed_bytes_per_sec: 0.0,
                })
                .await;
        }

        while let Some(chunk_result) = stream.next().await {
            cancel.check()?;

            let chunk = chunk_result.map_err(|e| VaultError::Network {
                message: format!("Error reading download stream: {e}"),
                cause: Some(e.to_string()),
            })?;

            file.write_all(&chunk)
                .map_err(|e| VaultError::io_with_path(e, temp_path))?;
            bytes_downloaded += chunk.len() as u64;

            if last_update.elapsed() >= NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL {
                if let Some(ref tx) = progress_tx {
                    let _ = tx
                        .send(DownloadProgress {
                            bytes_downloaded,
                            total_bytes,
                            speed_bytes_per_sec: speed(bytes_downloaded, started),
                        })
                        .await;
                }
                last_update = Instant::now();
            }
        }

        file.flush()
            .map_err(|e| VaultError::io_with_path(e, temp_path))?;

        if let Some(ref tx) = progress_tx {
            let _ = tx
                .send(DownloadProgress {
                    bytes_downloaded,
                    total_bytes,
                    speed_bytes_per_sec: speed(bytes_downloaded, started),
                })
                .await;
        }

        Ok(bytes_downloaded)
    }
}

fn speed(bytes: u64, started: Instant) -> f64 {
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        bytes as f64 / elapsed
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent_and_eta() {
        let progress = DownloadProgress {
            bytes_downloaded: 50,
            total_bytes: Some(100),
            speed_bytes_per_sec: 10.0,
        };
        assert_eq!(progress.percent(), Some(50.0));
        assert_eq!(progress.eta_seconds(), Some(5.0));
    }

    #[test]
    fn test_progress_unknown_total() {
        let progress = DownloadProgress {
            bytes_downloaded: 50,
            total_bytes: None,
            speed_bytes_per_sec: 10.0,
        };
        assert_eq!(progress.percent(), None);
        assert_eq!(progress.eta_seconds(), None);
    }
}
