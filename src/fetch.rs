use std::{
    path::Path,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::{
    config::{DownloadConfig, Param},
    constants::{CONNECT_TIMEOUT, DOWNLOAD_READ_TIMEOUT},
    job::{JobError, RemoteFile},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub downloaded: u64,
    pub total: u64,
    pub elapsed: Duration,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.downloaded as f64 * 100.0 / self.total as f64
        }
    }

    /// Bytes per second.
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.downloaded as f64 / secs
        } else {
            0.0
        }
    }
}

/// Receives download progress. Must return immediately.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

#[cfg(test)]
pub struct NoProgress;

#[cfg(test)]
impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) {}
}

/// Streams a remote file to disk.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Download `file` into `dest`, returning the number of bytes written.
    async fn fetch(
        &self,
        file: &RemoteFile,
        dest: &Path,
        max_size: u64,
        progress: &dyn ProgressSink,
    ) -> Result<u64, JobError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new<C: Param<DownloadConfig>>(cfg: &C) -> anyhow::Result<Self> {
        let download_config = cfg.param();
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(DOWNLOAD_READ_TIMEOUT);
        if let Some(secs) = download_config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            http: builder.build()?,
        })
    }
}

fn download_err(e: impl std::fmt::Display) -> JobError {
    JobError::Download(e.to_string())
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        file: &RemoteFile,
        dest: &Path,
        max_size: u64,
        progress: &dyn ProgressSink,
    ) -> Result<u64, JobError> {
        let resp = self
            .http
            .get(&file.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_err(e.without_url()))?;

        let content_length = resp.content_length();
        if let Some(len) = content_length {
            if len > max_size {
                return Err(JobError::Download(format!(
                    "server reports {len} bytes, over the {max_size} bytes limit"
                )));
            }
        }
        let total = content_length.unwrap_or(file.size);

        let mut out = tokio::fs::File::create(dest).await.map_err(download_err)?;
        let mut stream = resp.bytes_stream();
        let started = Instant::now();
        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.map_err(|e| download_err(e.without_url()))?;
            downloaded += chunk.len() as u64;
            if downloaded > max_size {
                return Err(JobError::Download(format!(
                    "received more than the {max_size} bytes limit"
                )));
            }
            out.write_all(&chunk).await.map_err(download_err)?;
            progress.report(Progress {
                downloaded,
                total,
                elapsed: started.elapsed(),
            });
        }
        out.flush().await.map_err(download_err)?;

        if let Some(len) = content_length {
            if downloaded != len {
                return Err(JobError::Download(format!(
                    "size mismatch: expected {len} bytes, got {downloaded}"
                )));
            }
        }
        Ok(downloaded)
    }
}
