//! Seed Registry Configuration
//!
//! Where the peer tables live, how peers are named and partitioned, and how
//! the seed list is published and verified.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Protocol version announced in the local seed
pub const PROTOCOL_VERSION: &str = "1.0";

/// Main configuration for the seed registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    // === Storage ===

    /// Directory holding the peer tables and the own seed file
    pub network_root: PathBuf,

    /// Table of reachable peers
    pub active_table: String,

    /// Table of known but unreachable peers
    pub passive_table: String,

    /// Table of peers heard of but never contacted
    pub potential_table: String,

    /// File holding the serialized local seed
    pub own_seed_file: String,

    // === Identity ===

    /// Name for a freshly generated local seed (random when unset)
    pub peer_name: Option<String>,

    /// Port announced in a freshly generated local seed
    pub local_http_port: u16,

    /// Extra addresses that identify this host
    pub local_addresses: Vec<IpAddr>,

    // === DHT ===

    /// Replication factor for non-junior peers
    pub redundancy: usize,

    /// Vertical partitions are 2^partition_exponent
    pub partition_exponent: u32,

    // === Naming ===

    /// Suffix of peer names (`<name>.<suffix>`)
    pub name_suffix: String,

    /// Suffix of peer hashes (`<hash>.<suffix>`)
    pub hash_suffix: String,

    // === Lookup cache ===

    /// Maximum entries in the address cache
    pub address_cache_capacity: usize,

    /// Lifetime of an address cache entry (seconds)
    pub address_cache_ttl_secs: u64,

    // === Seed list ===

    /// URL the published seed list is served from
    pub seed_list_url: Option<String>,

    /// Directory the seed list is uploaded into
    pub upload_dir: Option<PathBuf>,

    /// Timeout for seed list downloads (seconds)
    pub http_timeout_secs: u64,

    /// User agent for seed list downloads
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            // Storage
            network_root: PathBuf::from("./data/network"),
            active_table: "seed.active.db".to_string(),
            passive_table: "seed.passive.db".to_string(),
            potential_table: "seed.potential.db".to_string(),
            own_seed_file: "own-seed.txt".to_string(),

            // Identity
            peer_name: None,
            local_http_port: 8090,
            local_addresses: vec![],

            // DHT
            redundancy: 3,
            partition_exponent: 4,  // 16 vertical partitions

            // Naming
            name_suffix: "yacy".to_string(),
            hash_suffix: "yacyh".to_string(),

            // Lookup cache
            address_cache_capacity: 1000,
            address_cache_ttl_secs: 600,  // 10 minutes

            // Seed list
            seed_list_url: None,
            upload_dir: None,
            http_timeout_secs: 10,
            user_agent: format!("kratos-seed-registry/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn active_path(&self) -> PathBuf {
        self.network_root.join(&self.active_table)
    }

    pub fn passive_path(&self) -> PathBuf {
        self.network_root.join(&self.passive_table)
    }

    pub fn potential_path(&self) -> PathBuf {
        self.network_root.join(&self.potential_table)
    }

    pub fn own_seed_path(&self) -> PathBuf {
        self.network_root.join(&self.own_seed_file)
    }

    // Builder-style methods for CLI overrides

    pub fn with_network_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.network_root = root.into();
        self
    }

    pub fn with_peer_name(mut self, name: Option<String>) -> Self {
        self.peer_name = name;
        self
    }

    pub fn with_seed_list_url(mut self, url: Option<String>) -> Self {
        if url.is_some() {
            self.seed_list_url = url;
        }
        self
    }

    pub fn with_upload_dir(mut self, dir: Option<PathBuf>) -> Self {
        if dir.is_some() {
            self.upload_dir = dir;
        }
        self
    }

    pub fn with_redundancy(mut self, redundancy: usize) -> Self {
        self.redundancy = redundancy;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        let tables = [&self.active_table, &self.passive_table, &self.potential_table];
        if tables.iter().any(|t| t.is_empty()) || self.own_seed_file.is_empty() {
            anyhow::bail!("table and own seed file names must not be empty");
        }
        if self.active_table == self.passive_table
            || self.active_table == self.potential_table
            || self.passive_table == self.potential_table
        {
            anyhow::bail!("active, passive and potential tables must use distinct names");
        }

        if self.redundancy == 0 {
            anyhow::bail!("redundancy must be at least 1");
        }

        if self.partition_exponent > 16 {
            anyhow::bail!(
                "partition_exponent ({}) must not exceed 16",
                self.partition_exponent
            );
        }

        if self.name_suffix.is_empty() || self.hash_suffix.is_empty() || self.name_suffix == self.hash_suffix {
            anyhow::bail!(
                "name_suffix ({:?}) and hash_suffix ({:?}) must be non-empty and distinct",
                self.name_suffix,
                self.hash_suffix
            );
        }

        if self.address_cache_capacity == 0 {
            anyhow::bail!("address_cache_capacity must be at least 1");
        }

        if self.local_http_port == 0 {
            anyhow::bail!("local_http_port must not be 0");
        }

        if let Some(url) = &self.seed_list_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("seed_list_url ({}) must be an http(s) URL", url);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.redundancy, 3);
        assert_eq!(config.name_suffix, "yacy");
        assert_eq!(config.active_path(), PathBuf::from("./data/network/seed.active.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RegistryConfig::default();
        config.passive_table = config.active_table.clone();
        assert!(config.validate().is_err());

        let mut config = RegistryConfig::default();
        config.hash_suffix = "yacy".to_string();
        assert!(config.validate().is_err());

        let config = RegistryConfig::default().with_seed_list_url(Some("ftp://x".to_string()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = RegistryConfig::default()
            .with_network_root("/tmp/net")
            .with_redundancy(5)
            .with_upload_dir(None);

        assert_eq!(config.network_root, PathBuf::from("/tmp/net"));
        assert_eq!(config.redundancy, 5);
        assert_eq!(config.upload_dir, None);
    }

    #[test]
    fn test_save_and_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");

        std::fs::write(&path, "redundancy = 7\nname_suffix = \"kratos\"\n").unwrap();
        let loaded = RegistryConfig::load(&path).unwrap();
        assert_eq!(loaded.redundancy, 7);
        assert_eq!(loaded.name_suffix, "kratos");
        assert_eq!(loaded.hash_suffix, "yacyh");

        loaded.save(&path).unwrap();
        let reloaded = RegistryConfig::load(&path).unwrap();
        assert_eq!(reloaded.redundancy, 7);
    }
}
