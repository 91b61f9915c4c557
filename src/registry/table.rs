//! Self-healing seed tables
//!
//! A [`SeedTable`] wraps one store and treats every storage fault as
//! corruption: the store is closed, its files are deleted and an empty store
//! is opened in its place. Each reset bumps the table generation so running
//! traversals can notice they are reading a store that no longer exists.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use super::RegistryError;
use crate::store::{Direction, SeedStore, StoreError, StoreFactory, StoreResult};
use crate::types::{Properties, SeedHash};

/// The three peer tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// Peers currently reachable
    Active,
    /// Peers known but unreachable
    Passive,
    /// Peers heard of but never contacted
    Potential,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [TableKind::Active, TableKind::Passive, TableKind::Potential];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Active => "active",
            TableKind::Passive => "passive",
            TableKind::Potential => "potential",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TableSlot {
    store: Arc<dyn SeedStore>,
    generation: u64,
}

/// One persistent peer table
pub struct SeedTable {
    kind: TableKind,
    path: PathBuf,
    factory: Arc<dyn StoreFactory>,
    slot: RwLock<TableSlot>,
}

impl SeedTable {
    /// Open the table, retrying once on a fresh store if the first open fails
    pub fn open(kind: TableKind, path: &Path, factory: Arc<dyn StoreFactory>) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = open_store(kind, path, factory.as_ref())?;

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            factory,
            slot: RwLock::new(TableSlot { store, generation: 0 }),
        })
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current store handle and its generation
    pub fn snapshot(&self) -> (Arc<dyn SeedStore>, u64) {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        (slot.store.clone(), slot.generation)
    }

    pub fn generation(&self) -> u64 {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).generation
    }

    /// Drop all content: close, delete files, reopen empty
    pub fn reset(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        self.reopen_empty(&mut slot);
    }

    /// Reset after `cause`, unless another caller already replaced the
    /// store the fault was seen on
    pub fn reset_if_current(&self, generation: u64, cause: &StoreError) {
        if matches!(cause, StoreError::Closed) {
            debug!("{} table is closed", self.kind);
            return;
        }
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if slot.generation != generation {
            return;
        }
        error!("💥 {} seed table corrupted ({}), resetting {}", self.kind, cause, self.path.display());
        self.reopen_empty(&mut slot);
    }

    fn reopen_empty(&self, slot: &mut TableSlot) {
        let _ = slot.store.close();
        if let Err(e) = self.factory.destroy(&self.path) {
            warn!("Failed to delete {} table files: {}", self.kind, e);
        }

        slot.store = match open_store(self.kind, &self.path, self.factory.as_ref()) {
            Ok(store) => store,
            Err(e) => {
                error!("❌ Cannot recover {} seed table: {}", self.kind, e);
                std::process::exit(1);
            }
        };
        slot.generation += 1;
        info!("🧹 {} seed table reset (generation {})", self.kind, slot.generation);
    }

    /// Run a store operation; a fault resets the table and yields `fallback`
    fn recovering<T>(&self, fallback: T, op: impl FnOnce(&dyn SeedStore) -> StoreResult<T>) -> T {
        let (store, generation) = self.snapshot();
        match op(store.as_ref()) {
            Ok(value) => value,
            Err(e) => {
                self.reset_if_current(generation, &e);
                fallback
            }
        }
    }

    pub fn get(&self, hash: &SeedHash) -> Option<Properties> {
        self.recovering(None, |store| store.get(hash.as_key()))
    }

    pub fn put(&self, hash: &SeedHash, properties: &Properties) {
        self.recovering((), |store| store.put(hash.as_key(), properties))
    }

    pub fn remove(&self, hash: &SeedHash) -> bool {
        self.recovering(false, |store| store.remove(hash.as_key()))
    }

    pub fn has(&self, hash: &SeedHash) -> bool {
        self.recovering(false, |store| store.has(hash.as_key()))
    }

    pub fn len(&self) -> usize {
        self.recovering(0, |store| store.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sum_of(&self, field: &str) -> i64 {
        self.recovering(0, |store| store.sum_of(field))
    }

    pub fn mean_of(&self, field: &str) -> f64 {
        self.recovering(0.0, |store| store.mean_of(field))
    }

    pub fn keys_by_field(&self, field: &str, direction: Direction) -> Vec<Vec<u8>> {
        self.recovering(Vec::new(), |store| store.keys_by_field(field, direction))
    }

    pub fn close(&self) {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = slot.store.close() {
            warn!("Failed to close {} table: {}", self.kind, e);
        }
    }
}

/// Open the store at `path`; on failure delete its files and try exactly once more
fn open_store(kind: TableKind, path: &Path, factory: &dyn StoreFactory) -> Result<Arc<dyn SeedStore>, RegistryError> {
    match factory.open(path) {
        Ok(store) => Ok(store),
        Err(first) => {
            warn!("Cannot open {} table at {} ({}), recreating", kind, path.display(), first);
            if let Err(e) = factory.destroy(path) {
                warn!("Failed to delete {} table files: {}", kind, e);
            }
            factory.open(path).map_err(|source| RegistryError::TableOpen {
                table: kind,
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStoreFactory;

    /// Memory stores whose files can never be deleted
    struct LockedFiles(MemoryStoreFactory);

    impl StoreFactory for LockedFiles {
        fn open(&self, path: &Path) -> StoreResult<Arc<dyn SeedStore>> {
            self.0.open(path)
        }

        fn destroy(&self, _path: &Path) -> StoreResult<()> {
            Err(StoreError::WriteFailed("files in use".to_string()))
        }
    }

    fn hash(s: &str) -> SeedHash {
        SeedHash::parse(s).unwrap()
    }

    fn props(name: &str) -> Properties {
        let mut p = Properties::new();
        p.insert("Name".to_string(), name.to_string());
        p
    }

    #[test]
    fn test_fault_resets_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active.db");
        let factory = Arc::new(MemoryStoreFactory::new());
        let table = SeedTable::open(TableKind::Active, &path, factory.clone()).unwrap();

        table.put(&hash("AAAAAAAAAAAA"), &props("a"));
        table.put(&hash("BAAAAAAAAAAA"), &props("b"));
        assert_eq!(table.len(), 2);

        factory.store(&path).unwrap().fail_next(1);
        assert_eq!(table.get(&hash("AAAAAAAAAAAA")), None);
        assert_eq!(table.len(), 0);
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn test_stale_fault_does_not_reset_twice() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MemoryStoreFactory::new());
        let table = SeedTable::open(TableKind::Passive, &dir.path().join("p.db"), factory).unwrap();

        let (_, generation) = table.snapshot();
        let fault = StoreError::Corrupt("bad block".to_string());
        table.reset_if_current(generation, &fault);
        table.put(&hash("AAAAAAAAAAAA"), &props("a"));
        table.reset_if_current(generation, &fault);

        assert_eq!(table.generation(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_closed_table_is_not_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        let factory = Arc::new(MemoryStoreFactory::new());
        let table = SeedTable::open(TableKind::Active, &path, factory.clone()).unwrap();
        table.put(&hash("AAAAAAAAAAAA"), &props("a"));

        table.close();
        assert_eq!(table.len(), 0);
        assert_eq!(table.generation(), 0);
        assert_eq!(factory.open(&path).unwrap().len().unwrap(), 1);
    }

    #[test]
    fn test_open_retries_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("potential.db");
        let factory = Arc::new(MemoryStoreFactory::new());

        factory.fail_open(&path, 1);
        assert!(SeedTable::open(TableKind::Potential, &path, factory.clone()).is_ok());
        assert!(dir.path().join("nested").is_dir());

        factory.fail_open(&path, 2);
        let err = SeedTable::open(TableKind::Potential, &path, factory).err().unwrap();
        assert!(matches!(err, RegistryError::TableOpen { table: TableKind::Potential, .. }));
    }

    #[test]
    fn test_open_retry_survives_failed_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active.db");
        let factory = Arc::new(LockedFiles(MemoryStoreFactory::new()));

        factory.0.fail_open(&path, 1);
        let table = SeedTable::open(TableKind::Active, &path, factory.clone()).unwrap();
        table.put(&hash("AAAAAAAAAAAA"), &props("a"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_recovery_retries_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active.db");
        let factory = Arc::new(MemoryStoreFactory::new());
        let table = SeedTable::open(TableKind::Active, &path, factory.clone()).unwrap();
        table.put(&hash("AAAAAAAAAAAA"), &props("a"));

        factory.fail_open(&path, 1);
        factory.store(&path).unwrap().fail_next(1);
        assert_eq!(table.get(&hash("AAAAAAAAAAAA")), None);
        assert_eq!(table.generation(), 1);

        // the replacement store is the one registered at the table path
        table.put(&hash("BAAAAAAAAAAA"), &props("b"));
        assert_eq!(factory.store(&path).unwrap().len().unwrap(), 1);
        assert_eq!(factory.open(&path).unwrap().len().unwrap(), 1);
    }
}
