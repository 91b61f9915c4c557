//! Distribution Module
//!
//! Publishes the active peers as a seed list and checks that the published
//! copy is what was uploaded:
//! - one serialized seed per line, CRLF terminated, in hash order
//! - optionally prefixed with the local seed
//! - fetched back over HTTP (gzip tolerated) and compared line by line

mod publisher;
mod transport;

pub use publisher::{check_cache, SyncProtocol};
pub use transport::{DirectoryUploader, FetchedBody, HttpSeedFetcher, SeedListFetcher, SeedUploader};

use crate::registry::RegistryError;

/// Seed list synchronization failure
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Http(String),

    #[error("GET {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("cannot decode seed list: {0}")]
    Decode(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("published seed list differs at position {position}")]
    Mismatch { position: usize },

    #[error("published seed list has {remote} entries, expected {local}")]
    SizeMismatch { local: usize, remote: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
