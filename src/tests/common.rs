// Shared fixtures for scenario tests

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use crate::config::RegistryConfig;
use crate::registry::{AddressResolver, SeedRegistry};
use crate::store::{MemoryStore, MemoryStoreFactory};
use crate::types::{fields, PeerType, Seed, SeedHash};

/// Resolves IP literals and a fixed set of host names
#[derive(Default)]
pub struct StubResolver {
    hosts: HashMap<String, IpAddr>,
}

impl StubResolver {
    pub fn with_host(mut self, host: &str, ip: &str) -> Self {
        self.hosts.insert(host.to_string(), ip.parse().unwrap());
        self
    }
}

impl AddressResolver for StubResolver {
    fn resolve(&self, host: &str) -> io::Result<IpAddr> {
        if let Ok(ip) = host.parse() {
            return Ok(ip);
        }
        self.hosts
            .get(host)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, host.to_string()))
    }
}

/// A registry on in-memory tables inside a temporary network root
pub struct TestNet {
    pub dir: TempDir,
    pub config: RegistryConfig,
    pub factory: Arc<MemoryStoreFactory>,
    pub registry: Arc<SeedRegistry>,
}

impl TestNet {
    pub fn new() -> Self {
        Self::with_resolver(StubResolver::default())
    }

    pub fn with_resolver(resolver: StubResolver) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig::default()
            .with_network_root(dir.path().join("network"))
            .with_peer_name(Some("self".to_string()));
        let factory = Arc::new(MemoryStoreFactory::new());
        let registry = SeedRegistry::open_with(config.clone(), factory.clone(), Arc::new(resolver)).unwrap();

        Self {
            dir,
            config,
            factory,
            registry: Arc::new(registry),
        }
    }

    /// Open a second registry over the same tables
    pub fn reopen(&self) -> SeedRegistry {
        SeedRegistry::open_with(self.config.clone(), self.factory.clone(), Arc::new(StubResolver::default())).unwrap()
    }

    pub fn active_store(&self) -> Arc<MemoryStore> {
        self.factory.store(&self.config.active_path()).unwrap()
    }

    pub fn passive_store(&self) -> Arc<MemoryStore> {
        self.factory.store(&self.config.passive_path()).unwrap()
    }

    pub fn potential_store(&self) -> Arc<MemoryStore> {
        self.factory.store(&self.config.potential_path()).unwrap()
    }
}

/// Hash whose first byte is `n`, so hashes sort by `n`
pub fn hash_of(n: u8) -> SeedHash {
    SeedHash::from_bytes([n, 0, 0, 0, 0, 0, 0, 0, 0])
}

/// A proper senior peer `peer<n>` at 10.0.0.n:8090
pub fn peer(n: u8) -> Seed {
    named_peer(n, &format!("peer{}", n))
}

pub fn named_peer(n: u8, name: &str) -> Seed {
    let mut seed = Seed::new(hash_of(n));
    seed.put(fields::NAME, name);
    seed.put(fields::IP, format!("10.0.0.{}", n));
    seed.put(fields::PORT, "8090");
    seed.put(fields::VERSION, "1.0");
    seed.set_peer_type(PeerType::Senior);
    seed.put(fields::URL_COUNT, (u64::from(n) * 10).to_string());
    seed.put(fields::INDEX_COUNT, (u64::from(n) * 100).to_string());
    seed.put(fields::INDEX_SPEED, "2");
    seed.put(fields::QUERY_SPEED, "1.5");
    seed
}

const CHILD_MARKER: &str = "SEED_REGISTRY_TEST_CHILD";

/// True inside a process started by [`exit_code_of`]
pub fn in_child() -> bool {
    std::env::var_os(CHILD_MARKER).is_some()
}

/// Run one test of this binary in a child process and return its exit code
pub fn exit_code_of(test: &str) -> Option<i32> {
    Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test, "--test-threads=1", "--nocapture"])
        .env(CHILD_MARKER, "1")
        .status()
        .unwrap()
        .code()
}

/// A second registry whose own seed file is a directory, so no identity can be loaded or created
pub fn without_identity(net: &TestNet) -> SeedRegistry {
    std::fs::create_dir_all(net.config.own_seed_path()).unwrap();
    net.reopen()
}
