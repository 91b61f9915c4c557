//! Seed list transports
//!
//! Fetching goes over HTTP; uploading is left to the deployment, the bundled
//! uploader copies the list into a directory that a web server publishes.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::SyncError;

/// Raw HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    pub status: u16,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait SeedListFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedBody, SyncError>;
}

#[async_trait]
pub trait SeedUploader: Send + Sync {
    /// Publish `file`; returns a human-readable log of what was done
    async fn upload(&self, file: &Path) -> Result<String, SyncError>;
}

/// Fetcher that bypasses intermediate caches
pub struct HttpSeedFetcher {
    client: reqwest::Client,
}

impl HttpSeedFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Http(format!("HTTP client error: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SeedListFetcher for HttpSeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBody, SyncError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::Http(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Http(format!("Read body failed: {}", e)))?;

        debug!("Fetched {} bytes from {} (status {})", bytes.len(), url, status);
        Ok(FetchedBody {
            status,
            bytes: bytes.to_vec(),
        })
    }
}

/// Uploader that copies the seed list to a fixed path
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    target: PathBuf,
}

impl DirectoryUploader {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self { target: target.into() }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

#[async_trait]
impl SeedUploader for DirectoryUploader {
    async fn upload(&self, file: &Path) -> Result<String, SyncError> {
        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Upload(e.to_string()))?;
        }
        let copied = tokio::fs::copy(file, &self.target)
            .await
            .map_err(|e| SyncError::Upload(format!("copy to {}: {}", self.target.display(), e)))?;
        Ok(format!("copied {} bytes to {}", copied, self.target.display()))
    }
}
