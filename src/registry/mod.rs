//! Seed Registry Module
//!
//! Tracks every known peer in one of three persistent tables:
//!
//! - **active**: peers that answered recently
//! - **passive**: peers known but currently unreachable
//! - **potential**: peers heard of but never contacted
//!
//! A peer lives in at most one table at a time, and the local peer's own
//! seed lives in none of them. All mutations are serialized by a single
//! registry-wide mutex; reads go straight to the tables.

mod enumerator;
mod identity;
mod lookup;
mod scheme;
mod table;

pub use enumerator::SeedEnum;
pub use lookup::{AddressResolver, LookupIndex, SystemResolver};
pub use scheme::{PartitionScheme, VerticalPartitionScheme};
pub use table::{SeedTable, TableKind};

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::RegistryConfig;
use crate::store::{Direction, RocksStoreFactory, StoreError, StoreFactory};
use crate::types::{fields, ImproperReason, Seed, SeedHash};

/// At or below this many active peers the DHT is considered idle
pub const DHT_ACTIVITY_MAGIC: usize = 32;

/// Registry failures that reach the caller
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("cannot open {table} table at {path}: {source}")]
    TableOpen {
        table: TableKind,
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("own seed file {path}: {reason}")]
    OwnSeed { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot of registry counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub active_peers: usize,
    pub passive_peers: usize,
    pub potential_peers: usize,

    /// URLs stored by active peers
    pub active_urls: i64,

    /// Index entries stored by active peers
    pub active_rwi: i64,

    /// Combined indexing speed of active peers (pages per minute)
    pub active_ppm: i64,

    /// Mean query speed of active peers (queries per minute)
    pub active_qpm: f64,

    pub passive_urls: i64,
    pub passive_rwi: i64,
    pub potential_urls: i64,
    pub potential_rwi: i64,

    pub own_hash: Option<String>,
    pub own_name: Option<String>,
    pub redundancy: usize,
    pub dht_idle: bool,
}

/// The peer registry
pub struct SeedRegistry {
    config: RegistryConfig,
    active: Arc<SeedTable>,
    passive: Arc<SeedTable>,
    potential: Arc<SeedTable>,
    own_seed_path: PathBuf,
    own: RwLock<Option<Seed>>,
    mutation: Mutex<()>,
    index: LookupIndex,
    resolver: Arc<dyn AddressResolver>,
    scheme: Arc<dyn PartitionScheme>,
}

impl SeedRegistry {
    /// Open the registry on RocksDB tables under `config.network_root`
    pub fn open(config: RegistryConfig) -> Result<Self, RegistryError> {
        Self::open_with(config, Arc::new(RocksStoreFactory), Arc::new(SystemResolver))
    }

    /// Open the registry with explicit storage and name resolution
    pub fn open_with(
        config: RegistryConfig,
        factory: Arc<dyn StoreFactory>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self, RegistryError> {
        std::fs::create_dir_all(&config.network_root)?;

        let active = Arc::new(SeedTable::open(TableKind::Active, &config.active_path(), factory.clone())?);
        let passive = Arc::new(SeedTable::open(TableKind::Passive, &config.passive_path(), factory.clone())?);
        let potential = Arc::new(SeedTable::open(TableKind::Potential, &config.potential_path(), factory)?);

        let index = LookupIndex::new(
            config.address_cache_capacity,
            Duration::from_secs(config.address_cache_ttl_secs),
            config.local_addresses.clone(),
        );
        let scheme = Arc::new(VerticalPartitionScheme::new(config.partition_exponent));

        let registry = Self {
            own_seed_path: config.own_seed_path(),
            config,
            active,
            passive,
            potential,
            own: RwLock::new(None),
            mutation: Mutex::new(()),
            index,
            resolver,
            scheme,
        };

        registry.purge_own_seed()?;

        info!(
            "🌐 Seed registry opened: {} active, {} passive, {} potential",
            registry.size_connected(),
            registry.size_disconnected(),
            registry.size_potential()
        );
        Ok(registry)
    }

    /// Replace the partition scheme
    pub fn with_scheme(mut self, scheme: Arc<dyn PartitionScheme>) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn scheme(&self) -> &dyn PartitionScheme {
        self.scheme.as_ref()
    }

    pub fn index(&self) -> &LookupIndex {
        &self.index
    }

    fn lock_mutation(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn table(&self, kind: TableKind) -> &Arc<SeedTable> {
        match kind {
            TableKind::Active => &self.active,
            TableKind::Passive => &self.passive,
            TableKind::Potential => &self.potential,
        }
    }

    // ===== OWN IDENTITY =====

    /// The local seed, created on first use.
    ///
    /// Terminates the process if no identity can be loaded or created.
    pub fn own_seed(&self) -> Seed {
        match self.try_own_seed() {
            Ok(seed) => seed,
            Err(e) => {
                error!("❌ Cannot initialize own seed: {}", e);
                std::process::exit(1);
            }
        }
    }

    /// The local seed, created on first use
    pub fn try_own_seed(&self) -> Result<Seed, RegistryError> {
        if let Some(seed) = self.own_seed_if_defined() {
            return Ok(seed);
        }

        let mut own = self.own.write().unwrap_or_else(|e| e.into_inner());
        if let Some(seed) = own.as_ref() {
            return Ok(seed.clone());
        }
        let seed = identity::load_or_create(&self.own_seed_path, &self.config)?;
        *own = Some(seed.clone());
        Ok(seed)
    }

    pub(crate) fn own_seed_if_defined(&self) -> Option<Seed> {
        self.own.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn own_seed_is_defined(&self) -> bool {
        self.own.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Persist the local seed, if one exists
    pub fn save_own_seed(&self) -> Result<(), RegistryError> {
        match self.own_seed_if_defined() {
            Some(seed) => identity::save(&self.own_seed_path, &seed),
            None => Ok(()),
        }
    }

    pub fn own_hash(&self) -> SeedHash {
        self.own_seed().hash()
    }

    pub fn own_name(&self) -> String {
        self.own_seed().name().to_string()
    }

    pub fn own_ip(&self) -> String {
        self.own_seed().ip().to_string()
    }

    pub fn own_port(&self) -> Option<u16> {
        self.own_seed().port()
    }

    /// `<own name>.<name suffix>`
    pub fn own_alternative_address(&self) -> String {
        format!("{}.{}", self.own_name(), self.config.name_suffix)
    }

    pub fn own_seed_path(&self) -> &std::path::Path {
        &self.own_seed_path
    }

    /// Purge the local seed's hash from all tables
    pub fn remove_own_seed(&self) {
        if let Err(e) = self.purge_own_seed() {
            error!("❌ Cannot initialize own seed: {}", e);
            std::process::exit(1);
        }
    }

    fn purge_own_seed(&self) -> Result<(), RegistryError> {
        if self.active.is_empty() && self.passive.is_empty() && self.potential.is_empty() {
            return Ok(());
        }
        let hash = self.try_own_seed()?.hash();

        let _guard = self.lock_mutation();
        let mut removed = 0;
        for kind in TableKind::ALL {
            if self.table(kind).remove(&hash) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("🧽 Removed own seed {} from {} table(s)", hash, removed);
        }
        Ok(())
    }

    // ===== LIFECYCLE =====

    /// Gate for every table write
    fn admit(&self, seed: &Seed) -> Result<(), ImproperReason> {
        seed.is_proper()?;
        if self.own_seed().hash() == seed.hash() {
            return Err(ImproperReason::OwnIdentity);
        }
        Ok(())
    }

    fn admitted(&self, seed: &Seed) -> bool {
        match self.admit(seed) {
            Ok(()) => true,
            Err(reason) => {
                debug!("Rejected seed {}: {}", seed.hash(), reason);
                false
            }
        }
    }

    /// Record a peer as reachable
    pub fn add_connected(&self, seed: &Seed) {
        if !self.admitted(seed) {
            return;
        }
        let hash = seed.hash();
        let _guard = self.lock_mutation();
        let properties = seed.properties().clone();
        self.active.put(&hash, &properties);
        self.passive.remove(&hash);
        self.potential.remove(&hash);
        self.index.remember_name(seed);
    }

    /// Record a peer as unreachable
    pub fn add_disconnected(&self, seed: &Seed) {
        if !self.admitted(seed) {
            return;
        }
        let hash = seed.hash();
        let _guard = self.lock_mutation();
        let properties = seed.properties().clone();
        self.passive.put(&hash, &properties);
        self.active.remove(&hash);
        self.potential.remove(&hash);
        self.index.forget_name(seed.name());
    }

    /// Record a peer we have only heard of
    pub fn add_potential(&self, seed: &Seed) {
        if !self.admitted(seed) {
            return;
        }
        let hash = seed.hash();
        let _guard = self.lock_mutation();
        let properties = seed.properties().clone();
        self.potential.put(&hash, &properties);
        self.active.remove(&hash);
        self.passive.remove(&hash);
    }

    pub fn remove_disconnected(&self, hash: &SeedHash) {
        let _guard = self.lock_mutation();
        self.passive.remove(hash);
    }

    pub fn remove_potential(&self, hash: &SeedHash) {
        let _guard = self.lock_mutation();
        self.potential.remove(hash);
    }

    /// Replace a record wherever it currently lives; unknown hashes are ignored
    pub fn update(&self, hash: &SeedHash, seed: &Seed) {
        if seed.hash() != *hash {
            debug!("Ignoring update of {} with record for {}", hash, seed.hash());
            return;
        }

        let _guard = self.lock_mutation();
        {
            let mut own = self.own.write().unwrap_or_else(|e| e.into_inner());
            if let Some(current) = own.as_mut() {
                if current.hash() == *hash {
                    *current = seed.clone();
                    return;
                }
            }
        }

        if let Err(reason) = seed.is_proper() {
            debug!("Rejected update of {}: {}", hash, reason);
            return;
        }

        let properties = seed.properties().clone();
        if self.active.has(hash) {
            self.active.put(hash, &properties);
            self.index.remember_name(seed);
        } else if self.passive.has(hash) {
            self.passive.put(hash, &properties);
        } else if self.potential.has(hash) {
            self.potential.put(hash, &properties);
        }
    }

    // ===== POINT QUERIES =====

    fn own_if(&self, hash: &SeedHash) -> Option<Seed> {
        self.own_seed_if_defined().filter(|own| own.hash() == *hash)
    }

    fn get_from(&self, kind: TableKind, hash: &SeedHash) -> Option<Seed> {
        if let Some(own) = self.own_if(hash) {
            return Some(own);
        }
        let properties = self.table(kind).get(hash)?;
        Some(Seed::with_properties(*hash, properties))
    }

    pub fn get_connected(&self, hash: &SeedHash) -> Option<Seed> {
        self.get_from(TableKind::Active, hash)
    }

    pub fn get_disconnected(&self, hash: &SeedHash) -> Option<Seed> {
        self.get_from(TableKind::Passive, hash)
    }

    pub fn get_potential(&self, hash: &SeedHash) -> Option<Seed> {
        self.get_from(TableKind::Potential, hash)
    }

    /// Look in active, then passive, then potential
    pub fn get(&self, hash: &SeedHash) -> Option<Seed> {
        self.get_connected(hash)
            .or_else(|| self.get_disconnected(hash))
            .or_else(|| self.get_potential(hash))
    }

    pub fn has_connected(&self, hash: &SeedHash) -> bool {
        self.active.has(hash)
    }

    pub fn has_disconnected(&self, hash: &SeedHash) -> bool {
        self.passive.has(hash)
    }

    pub fn has_potential(&self, hash: &SeedHash) -> bool {
        self.potential.has(hash)
    }

    // ===== SIZES AND AGGREGATES =====

    pub fn size_connected(&self) -> usize {
        self.active.len()
    }

    pub fn size_disconnected(&self) -> usize {
        self.passive.len()
    }

    pub fn size_potential(&self) -> usize {
        self.potential.len()
    }

    pub fn count_active_urls(&self) -> i64 {
        self.active.sum_of(fields::URL_COUNT)
    }

    pub fn count_active_rwi(&self) -> i64 {
        self.active.sum_of(fields::INDEX_COUNT)
    }

    pub fn count_active_ppm(&self) -> i64 {
        self.active.sum_of(fields::INDEX_SPEED)
    }

    pub fn count_active_qpm(&self) -> f64 {
        self.active.mean_of(fields::QUERY_SPEED)
    }

    pub fn count_passive_urls(&self) -> i64 {
        self.passive.sum_of(fields::URL_COUNT)
    }

    pub fn count_passive_rwi(&self) -> i64 {
        self.passive.sum_of(fields::INDEX_COUNT)
    }

    pub fn count_potential_urls(&self) -> i64 {
        self.potential.sum_of(fields::URL_COUNT)
    }

    pub fn count_potential_rwi(&self) -> i64 {
        self.potential.sum_of(fields::INDEX_COUNT)
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        let own = self.own_seed_if_defined();
        RegistryStats {
            active_peers: self.size_connected(),
            passive_peers: self.size_disconnected(),
            potential_peers: self.size_potential(),
            active_urls: self.count_active_urls(),
            active_rwi: self.count_active_rwi(),
            active_ppm: self.count_active_ppm(),
            active_qpm: self.count_active_qpm(),
            passive_urls: self.count_passive_urls(),
            passive_rwi: self.count_passive_rwi(),
            potential_urls: self.count_potential_urls(),
            potential_rwi: self.count_potential_rwi(),
            own_hash: own.as_ref().map(|s| s.hash().to_string()),
            own_name: own.as_ref().map(|s| s.name().to_string()),
            redundancy: self.redundancy(),
            dht_idle: self.no_dht_activity(),
        }
    }

    // ===== DHT POLICY =====

    /// Replication factor; junior peers cannot serve replicas
    pub fn redundancy(&self) -> usize {
        match self.own_seed_if_defined() {
            Some(own) if own.is_junior() => 1,
            _ => self.config.redundancy,
        }
    }

    /// Too few active peers for DHT transfers
    pub fn no_dht_activity(&self) -> bool {
        self.size_connected() <= DHT_ACTIVITY_MAGIC
    }

    pub fn dht_position(&self, hash: &SeedHash) -> u64 {
        self.scheme.dht_position(hash)
    }

    // ===== LISTING =====

    fn seeds_in(
        &self,
        kind: TableKind,
        up: bool,
        rotate: bool,
        first_hash: Option<SeedHash>,
        min_version: f64,
    ) -> SeedEnum {
        SeedEnum::rotating(
            self.table(kind).clone(),
            Direction::from_ascending(up),
            rotate,
            first_hash,
            min_version,
        )
    }

    pub fn seeds_connected(&self, up: bool, rotate: bool, first_hash: Option<SeedHash>, min_version: f64) -> SeedEnum {
        self.seeds_in(TableKind::Active, up, rotate, first_hash, min_version)
    }

    pub fn seeds_disconnected(&self, up: bool, rotate: bool, first_hash: Option<SeedHash>, min_version: f64) -> SeedEnum {
        self.seeds_in(TableKind::Passive, up, rotate, first_hash, min_version)
    }

    pub fn seeds_potential(&self, up: bool, rotate: bool, first_hash: Option<SeedHash>, min_version: f64) -> SeedEnum {
        self.seeds_in(TableKind::Potential, up, rotate, first_hash, min_version)
    }

    pub fn seeds_sorted_connected(&self, up: bool, field: &str) -> SeedEnum {
        SeedEnum::sorted(self.active.clone(), Direction::from_ascending(up), field)
    }

    pub fn seeds_sorted_disconnected(&self, up: bool, field: &str) -> SeedEnum {
        SeedEnum::sorted(self.passive.clone(), Direction::from_ascending(up), field)
    }

    pub fn seeds_sorted_potential(&self, up: bool, field: &str) -> SeedEnum {
        SeedEnum::sorted(self.potential.clone(), Direction::from_ascending(up), field)
    }

    /// Some active peer with at least `min_version`, starting from a random position
    pub fn any_seed_version(&self, min_version: f64) -> Option<Seed> {
        self.seeds_connected(true, true, Some(SeedHash::random()), min_version).next()
    }

    // ===== MAINTENANCE =====

    pub fn reset_active_table(&self) {
        let _guard = self.lock_mutation();
        self.active.reset();
        self.index.clear();
    }

    pub fn reset_passive_table(&self) {
        let _guard = self.lock_mutation();
        self.passive.reset();
    }

    pub fn reset_potential_table(&self) {
        let _guard = self.lock_mutation();
        self.potential.reset();
    }

    /// Close all tables; the registry is unusable afterwards
    pub fn close(&self) {
        let _guard = self.lock_mutation();
        for kind in TableKind::ALL {
            self.table(kind).close();
        }
        info!("Seed registry closed");
    }
}
