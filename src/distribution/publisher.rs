//! Seed list publishing and verification

use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::transport::{HttpSeedFetcher, SeedListFetcher, SeedUploader};
use super::SyncError;
use crate::registry::SeedRegistry;
use crate::types::Seed;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Publishes the active table and reads seed lists of other peers
pub struct SyncProtocol {
    registry: Arc<SeedRegistry>,
    fetcher: Arc<dyn SeedListFetcher>,
}

impl SyncProtocol {
    pub fn new(registry: Arc<SeedRegistry>, fetcher: Arc<dyn SeedListFetcher>) -> Self {
        Self { registry, fetcher }
    }

    /// Protocol with an HTTP fetcher configured from the registry settings
    pub fn from_config(registry: Arc<SeedRegistry>) -> Result<Self, SyncError> {
        let config = registry.config();
        let fetcher = HttpSeedFetcher::new(Duration::from_secs(config.http_timeout_secs), &config.user_agent)?;
        Ok(Self::new(registry, Arc::new(fetcher)))
    }

    /// Serialized active seeds in hash order, optionally led by the local seed
    pub fn seed_list_lines(&self, add_own: bool) -> Result<Vec<String>, SyncError> {
        let mut lines = Vec::with_capacity(self.registry.size_connected() + 1);
        if add_own {
            lines.push(self.registry.try_own_seed()?.to_line());
        }
        for seed in self.registry.seeds_connected(true, false, None, 0.0) {
            lines.push(seed.to_line());
        }
        Ok(lines)
    }

    /// Write the seed list to `path`; returns the lines written
    pub async fn store_cache(&self, path: &Path, add_own: bool) -> Result<Vec<String>, SyncError> {
        let lines = self.seed_list_lines(add_own)?;
        tokio::fs::write(path, join_crlf(&lines)).await?;
        debug!("Stored {} seeds to {}", lines.len(), path.display());
        Ok(lines)
    }

    /// Upload the seed list and verify the copy published at `url`.
    ///
    /// The list is staged in a temporary file next to the own seed file,
    /// which is removed whatever the outcome.
    pub async fn upload_cache(&self, uploader: &dyn SeedUploader, url: &str) -> Result<String, SyncError> {
        let staging_dir = self
            .registry
            .own_seed_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.registry.config().network_root.clone());
        tokio::fs::create_dir_all(&staging_dir).await?;

        let staged = tempfile::Builder::new()
            .prefix("seedFile")
            .suffix(".txt")
            .tempfile_in(&staging_dir)?;
        let lines = self.store_cache(staged.path(), true).await?;

        let log = uploader.upload(staged.path()).await?;
        debug!("Upload log: {}", log);

        let remote = self.download_seed_file(url).await?;
        check_cache(&lines, &remote)?;

        info!("📤 Published {} seeds to {}", lines.len(), url);
        Ok(log)
    }

    /// Fetch a seed list, one entry per non-empty line
    pub async fn download_seed_file(&self, url: &str) -> Result<Vec<String>, SyncError> {
        let body = self.fetcher.fetch(url).await?;
        if body.status != 200 {
            return Err(SyncError::BadStatus {
                url: url.to_string(),
                status: body.status,
            });
        }

        let bytes = if body.bytes.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::new();
            GzDecoder::new(body.bytes.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|e| SyncError::Decode(format!("gzip: {}", e)))?;
            inflated
        } else {
            body.bytes
        };

        let text = String::from_utf8(bytes).map_err(|e| SyncError::Decode(e.to_string()))?;
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Import a seed list as potential peers; returns how many were added
    pub async fn load_seed_list(&self, url: &str) -> Result<usize, SyncError> {
        let lines = self.download_seed_file(url).await?;

        let mut added = 0;
        for line in &lines {
            let seed = match Seed::from_line(line) {
                Ok(seed) => seed,
                Err(e) => {
                    debug!("Skipping unparsable seed line from {}: {}", url, e);
                    continue;
                }
            };
            if let Err(reason) = seed.is_proper() {
                debug!("Skipping seed {} from {}: {}", seed.hash(), url, reason);
                continue;
            }
            let hash = seed.hash();
            if self.registry.has_connected(&hash) || self.registry.has_disconnected(&hash) {
                continue;
            }
            self.registry.add_potential(&seed);
            if self.registry.has_potential(&hash) {
                added += 1;
            }
        }

        if added == 0 && !lines.is_empty() {
            warn!("Seed list {} had {} entries but none were new", url, lines.len());
        } else {
            info!("📥 Imported {} potential seeds from {}", added, url);
        }
        Ok(added)
    }
}

/// Compare a local seed list with its published copy, position by position
pub fn check_cache(local: &[String], remote: &[String]) -> Result<(), SyncError> {
    if let Some(position) = local.iter().zip(remote).position(|(l, r)| l != r) {
        return Err(SyncError::Mismatch { position });
    }
    if local.len() != remote.len() {
        return Err(SyncError::SizeMismatch {
            local: local.len(),
            remote: remote.len(),
        });
    }
    Ok(())
}

fn join_crlf(lines: &[String]) -> String {
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 2).sum());
    for line in lines {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}
