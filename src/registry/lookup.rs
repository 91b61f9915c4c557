//! Name and address lookup
//!
//! Both caches are hints only. Every hit is checked against the tables
//! before it is returned; a hit that no longer holds is evicted and treated
//! as a miss.

use lru::LruCache;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::table::{SeedTable, TableKind};
use super::SeedRegistry;
use crate::store::Direction;
use crate::types::{Seed, SeedHash, LOCAL_PEER_ALIAS};

/// Turns a host name or literal address into an IP address
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, host: &str) -> io::Result<IpAddr>;
}

/// Resolver backed by the system's name service
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl AddressResolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        (host, 0)
            .to_socket_addrs()?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host)))
    }
}

/// Name and address caches
pub struct LookupIndex {
    /// lowercase name -> hash
    names: RwLock<HashMap<String, SeedHash>>,
    /// resolved address -> (hash, cached at)
    addresses: Mutex<LruCache<IpAddr, (SeedHash, Instant)>>,
    ttl: Duration,
    local_addresses: Vec<IpAddr>,
}

impl LookupIndex {
    pub fn new(capacity: usize, ttl: Duration, local_addresses: Vec<IpAddr>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            names: RwLock::new(HashMap::new()),
            addresses: Mutex::new(LruCache::new(capacity)),
            ttl,
            local_addresses,
        }
    }

    pub fn is_local(&self, ip: &IpAddr) -> bool {
        ip.is_loopback() || ip.is_unspecified() || self.local_addresses.contains(ip)
    }

    pub fn cached_name(&self, name: &str) -> Option<SeedHash> {
        self.names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name.to_lowercase())
            .copied()
    }

    pub fn remember_name(&self, seed: &Seed) {
        let name = seed.name();
        if name.is_empty() {
            return;
        }
        self.names
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_lowercase(), seed.hash());
    }

    pub fn forget_name(&self, name: &str) {
        self.names
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&name.to_lowercase());
    }

    pub fn name_count(&self) -> usize {
        self.names.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Cached hash for `ip`, unless the entry has expired
    pub fn cached_address(&self, ip: &IpAddr) -> Option<SeedHash> {
        let mut cache = self.addresses.lock().unwrap_or_else(|e| e.into_inner());
        let (hash, cached_at) = *cache.get(ip)?;
        if cached_at.elapsed() > self.ttl {
            cache.pop(ip);
            return None;
        }
        Some(hash)
    }

    pub fn remember_address(&self, ip: IpAddr, hash: SeedHash) {
        self.addresses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(ip, (hash, Instant::now()));
    }

    pub fn forget_address(&self, ip: &IpAddr) {
        self.addresses.lock().unwrap_or_else(|e| e.into_inner()).pop(ip);
    }

    pub fn clear(&self) {
        self.names.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.addresses.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Host part of `ip:port` or `[v6]:port`
pub(crate) fn host_of(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match address.rsplit_once(':') {
        Some((host, _)) => host,
        None => address,
    }
}

impl SeedRegistry {
    /// Find a peer by name, with or without the network name suffix
    pub fn lookup_by_name(&self, name: &str) -> Option<Seed> {
        let name = self.strip_name_suffix(name).to_lowercase();
        if name.is_empty() {
            return None;
        }
        if name == LOCAL_PEER_ALIAS {
            return Some(self.own_seed());
        }

        if let Some(hash) = self.index.cached_name(&name) {
            let hit = self
                .get_connected(&hash)
                .or_else(|| self.get_disconnected(&hash))
                .filter(|seed| seed.name().eq_ignore_ascii_case(&name));
            if hit.is_some() {
                return hit;
            }
            self.index.forget_name(&name);
        }

        for table in [&self.active, &self.passive] {
            if let Some(seed) = self.scan_for_name(table, &name) {
                return Some(seed);
            }
        }

        Some(self.own_seed()).filter(|own| own.name().eq_ignore_ascii_case(&name))
    }

    fn scan_for_name(&self, table: &Arc<SeedTable>, name: &str) -> Option<Seed> {
        let seeds = super::SeedEnum::rotating(table.clone(), Direction::Ascending, false, None, 0.0);
        for seed in seeds {
            if seed.is_proper().is_ok() {
                self.index.remember_name(&seed);
            }
            if seed.name().eq_ignore_ascii_case(name) {
                return Some(seed);
            }
        }
        None
    }

    /// Find the peer whose declared address resolves to `ip`
    pub fn lookup_by_address(
        &self,
        ip: IpAddr,
        look_active: bool,
        look_passive: bool,
        look_potential: bool,
    ) -> Option<Seed> {
        if self.index.is_local(&ip) {
            return Some(self.own_seed());
        }

        if let Some(hash) = self.index.cached_address(&ip) {
            if let Some(seed) = self.get(&hash) {
                if self.declared_ip(&seed).as_ref() == Some(&ip) {
                    return Some(seed);
                }
            }
            self.index.forget_address(&ip);
        }

        let scans = [
            (look_active, &self.active),
            (look_passive, &self.passive),
            (look_potential, &self.potential),
        ];
        for (enabled, table) in scans {
            if !enabled {
                continue;
            }
            if let Some(seed) = self.scan_for_address(table, ip) {
                return Some(seed);
            }
        }

        let own = self.own_seed_if_defined()?;
        (self.declared_ip(&own) == Some(ip)).then_some(own)
    }

    fn scan_for_address(&self, table: &Arc<SeedTable>, ip: IpAddr) -> Option<Seed> {
        let collect_bad = matches!(table.kind(), TableKind::Active | TableKind::Passive);
        let mut bad = Vec::new();
        let mut found = None;

        let seeds = super::SeedEnum::rotating(table.clone(), Direction::Ascending, false, None, 0.0);
        for seed in seeds {
            let Some(address) = seed.public_address() else {
                if collect_bad {
                    bad.push(seed.hash());
                }
                continue;
            };
            let resolved = match self.resolver.resolve(host_of(&address)) {
                Ok(resolved) => resolved,
                Err(e) => {
                    debug!("Cannot resolve {} of seed {}: {}", address, seed.hash(), e);
                    continue;
                }
            };
            if seed.is_proper().is_ok() {
                self.index.remember_address(resolved, seed.hash());
            }
            if resolved == ip {
                found = Some(seed);
                break;
            }
        }

        // Addressless peers are purged from the active table only
        if !bad.is_empty() {
            let _guard = self.lock_mutation();
            for hash in &bad {
                self.active.remove(hash);
            }
            info!("🗑️ Removed {} seeds without address from the active table", bad.len());
        }

        found
    }

    fn declared_ip(&self, seed: &Seed) -> Option<IpAddr> {
        let address = seed.public_address()?;
        self.resolver.resolve(host_of(&address)).ok()
    }

    fn strip_name_suffix<'a>(&self, name: &'a str) -> &'a str {
        let suffix = &self.config.name_suffix;
        let name = name.trim();
        if name.len() > suffix.len() + 1 {
            let split = name.len() - suffix.len() - 1;
            if name.is_char_boundary(split) {
                let (head, tail) = name.split_at(split);
                if tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(suffix) {
                    return head;
                }
            }
        }
        name
    }
}
