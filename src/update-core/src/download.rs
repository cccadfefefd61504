//! HTTP fetching and artifact download.
//!
//! All network transfer goes through the [`Fetcher`] seam: small documents
//! (tree indexes, assertion files) via [`Fetcher::fetch`], the release
//! artifact via [`Fetcher::download`], which streams to disk and reports
//! progress. The production backend is reqwest with bounded connect and
//! read timeouts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::UpdateError;

/// Progress callback: (bytes downloaded, expected total or 0 when unknown).
pub type ProgressFn = Box<dyn Fn(u64, i64) + Send + Sync>;

/// An HTTP transfer primitive.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a document body into memory. Non-2xx statuses are errors.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UpdateError>;

    /// Stream a body to `path`, invoking `progress` as bytes arrive.
    async fn download(
        &self,
        url: &str,
        path: &Path,
        progress: ProgressFn,
    ) -> Result<(), UpdateError>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with bounded connect and read timeouts. No total
    /// request timeout is set so large artifact downloads are not cut off
    /// mid-stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, UpdateError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .read_timeout(timeout)
            .user_agent(format!("monero-update/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdateError::Http {
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, UpdateError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpdateError::Http {
                message: format!("request to {} failed: {}", url, e),
            })?;
        resp.error_for_status().map_err(|e| UpdateError::Http {
            message: format!("request to {} failed: {}", url, e),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        let resp = self.get(url).await?;
        let body = resp.bytes().await.map_err(|e| UpdateError::Http {
            message: format!("reading body of {} failed: {}", url, e),
        })?;
        debug!(len = body.len(), "fetched document");
        Ok(body.to_vec())
    }

    #[instrument(skip(self, progress))]
    async fn download(
        &self,
        url: &str,
        path: &Path,
        progress: ProgressFn,
    ) -> Result<(), UpdateError> {
        let resp = self.get(url).await?;
        let total = resp.content_length().map_or(0, |n| n as i64);

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = resp.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UpdateError::Http {
                message: format!("download of {} interrupted: {}", url, e),
            })?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total);
        }
        file.flush().await?;
        debug!(downloaded, "download complete");
        Ok(())
    }
}

/// A unique staging path in the system temp directory for `filename`.
#[must_use]
pub fn unique_download_path(filename: &str) -> PathBuf {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    std::env::temp_dir().join(format!("{}-{}", token, filename))
}
