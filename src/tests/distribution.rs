// Distribution Tests
// Seed list publishing, verification against the published copy, and import

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::common::{hash_of, peer, TestNet};
use crate::distribution::{DirectoryUploader, FetchedBody, SeedListFetcher, SyncError, SyncProtocol};
use crate::types::Seed;

const SEED_URL: &str = "http://seeds.example/seed.txt";

/// Serves whatever was uploaded to `path`, optionally corrupting one line
struct PublishedFile {
    path: PathBuf,
    tamper_line: Option<usize>,
}

#[async_trait]
impl SeedListFetcher for PublishedFile {
    async fn fetch(&self, _url: &str) -> Result<FetchedBody, SyncError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        if let Some(index) = self.tamper_line {
            if let Some(line) = lines.get_mut(index) {
                line.push_str("|tampered=1");
            }
        }
        Ok(FetchedBody {
            status: 200,
            bytes: lines.join("\r\n").into_bytes(),
        })
    }
}

/// Always answers with the same response
struct FixedResponse(FetchedBody);

#[async_trait]
impl SeedListFetcher for FixedResponse {
    async fn fetch(&self, _url: &str) -> Result<FetchedBody, SyncError> {
        Ok(self.0.clone())
    }
}

fn fixed(status: u16, bytes: Vec<u8>) -> Arc<FixedResponse> {
    Arc::new(FixedResponse(FetchedBody { status, bytes }))
}

fn staged_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("seedFile"))
        .collect()
}

// =============================================================================
// PUBLISHING
// =============================================================================

pub mod publishing {
    use super::*;

    #[tokio::test]
    async fn test_publish_round_trip() {
        let net = TestNet::new();
        for n in [3u8, 1, 2] {
            net.registry.add_connected(&peer(n));
        }
        let target = net.dir.path().join("www").join("seed.txt");
        let fetcher = Arc::new(PublishedFile {
            path: target.clone(),
            tamper_line: None,
        });

        let protocol = SyncProtocol::new(net.registry.clone(), fetcher);
        let log = protocol
            .upload_cache(&DirectoryUploader::new(&target), SEED_URL)
            .await
            .unwrap();

        assert!(log.contains("seed.txt"));
        assert!(staged_files(&net.config.network_root).is_empty());

        let published = tokio::fs::read_to_string(&target).await.unwrap();
        let hashes: Vec<_> = published
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .map(|line| Seed::from_line(line).unwrap().hash())
            .collect();
        assert_eq!(hashes, vec![net.registry.own_hash(), hash_of(1), hash_of(2), hash_of(3)]);
    }

    #[tokio::test]
    async fn test_tampered_copy_is_detected() {
        let net = TestNet::new();
        net.registry.add_connected(&peer(1));
        net.registry.add_connected(&peer(2));
        let target = net.dir.path().join("www").join("seed.txt");
        let fetcher = Arc::new(PublishedFile {
            path: target.clone(),
            tamper_line: Some(2),
        });

        let protocol = SyncProtocol::new(net.registry.clone(), fetcher);
        let err = protocol
            .upload_cache(&DirectoryUploader::new(&target), SEED_URL)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Mismatch { position: 2 }), "got {:?}", err);
        assert!(staged_files(&net.config.network_root).is_empty());
    }

    #[tokio::test]
    async fn test_seed_list_without_own_seed() {
        let net = TestNet::new();
        net.registry.add_connected(&peer(2));
        net.registry.add_connected(&peer(1));
        net.registry.add_potential(&peer(3));

        let protocol = SyncProtocol::new(net.registry.clone(), fixed(200, Vec::new()));
        let lines = protocol.seed_list_lines(false).unwrap();
        let hashes: Vec<_> = lines.iter().map(|l| Seed::from_line(l).unwrap().hash()).collect();
        assert_eq!(hashes, vec![hash_of(1), hash_of(2)]);
    }

    #[tokio::test]
    async fn test_store_cache_writes_crlf_lines() {
        let net = TestNet::new();
        net.registry.add_connected(&peer(1));
        let path = net.dir.path().join("cache.txt");

        let protocol = SyncProtocol::new(net.registry.clone(), fixed(200, Vec::new()));
        let lines = protocol.store_cache(&path, true).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(content, format!("{}\r\n{}\r\n", lines[0], lines[1]));
    }
}

// =============================================================================
// DOWNLOADING
// =============================================================================

pub mod downloading {
    use super::*;

    #[tokio::test]
    async fn test_gzip_body_is_inflated() {
        let net = TestNet::new();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"first\r\n\r\nsecond\r\n").unwrap();
        let body = encoder.finish().unwrap();

        let protocol = SyncProtocol::new(net.registry.clone(), fixed(200, body));
        let lines = protocol.download_seed_file(SEED_URL).await.unwrap();
        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let net = TestNet::new();
        let protocol = SyncProtocol::new(net.registry.clone(), fixed(404, b"not found".to_vec()));

        let err = protocol.download_seed_file(SEED_URL).await.unwrap_err();
        assert!(matches!(err, SyncError::BadStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_binary_body_is_rejected() {
        let net = TestNet::new();
        let protocol = SyncProtocol::new(net.registry.clone(), fixed(200, vec![0xff, 0xfe, 0x00]));

        let err = protocol.download_seed_file(SEED_URL).await.unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[tokio::test]
    async fn test_import_adds_new_proper_seeds_as_potential() {
        let net = TestNet::new();
        net.registry.add_connected(&peer(1));
        net.registry.add_disconnected(&peer(2));

        let mut improper = peer(5);
        improper.set_ip("999.1.1.1");
        let body = [
            peer(1).to_line(),
            peer(2).to_line(),
            peer(3).to_line(),
            "garbage without structure".to_string(),
            improper.to_line(),
            peer(4).to_line(),
        ]
        .join("\r\n");

        let protocol = SyncProtocol::new(net.registry.clone(), fixed(200, body.into_bytes()));
        let added = protocol.load_seed_list(SEED_URL).await.unwrap();

        assert_eq!(added, 2);
        assert!(net.registry.has_potential(&hash_of(3)));
        assert!(net.registry.has_potential(&hash_of(4)));
        assert!(!net.registry.has_potential(&hash_of(5)));
        assert!(net.registry.has_connected(&hash_of(1)));
        assert!(net.registry.has_disconnected(&hash_of(2)));
    }
}
