//! In-memory seed store
//!
//! Volatile store used by tests. Supports fault injection: after
//! `fail_next(n)` the next `n` operations fail with [`StoreError::Corrupt`].

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::{Accumulators, Direction, RawEntry, SeedStore, StoreError, StoreFactory, StoreResult};
use crate::types::Properties;

#[derive(Default)]
struct Tables {
    entries: BTreeMap<Vec<u8>, Properties>,
    accumulators: Accumulators,
    closed: bool,
}

/// Seed table held in a `BTreeMap`
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
    pending_faults: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail
    pub fn fail_next(&self, count: usize) {
        self.pending_faults.store(count, Ordering::SeqCst);
    }

    pub fn pending_faults(&self) -> usize {
        self.pending_faults.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Fresh handle over the same contents, as reopening a file would give
    fn reopened(&self) -> Self {
        let tables = self.read();
        Self {
            inner: RwLock::new(Tables {
                entries: tables.entries.clone(),
                accumulators: tables.accumulators.clone(),
                closed: false,
            }),
            pending_faults: AtomicUsize::new(0),
        }
    }

    fn inject(&self, operation: &str) -> StoreResult<()> {
        let fired = self
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fired {
            debug!(operation = operation, "Injecting store fault");
            return Err(StoreError::Corrupt(format!("injected fault during {}", operation)));
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn open_read(&self, operation: &str) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.inject(operation)?;
        let tables = self.read();
        if tables.closed {
            return Err(StoreError::Closed);
        }
        Ok(tables)
    }

    fn open_write(&self, operation: &str) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.inject(operation)?;
        let tables = self.write();
        if tables.closed {
            return Err(StoreError::Closed);
        }
        Ok(tables)
    }
}

impl SeedStore for MemoryStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Properties>> {
        Ok(self.open_read("get")?.entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], properties: &Properties) -> StoreResult<()> {
        let mut tables = self.open_write("put")?;
        if let Some(old) = tables.entries.insert(key.to_vec(), properties.clone()) {
            tables.accumulators.subtract(&old);
        }
        tables.accumulators.add(properties);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StoreResult<bool> {
        let mut tables = self.open_write("remove")?;
        match tables.entries.remove(key) {
            Some(old) => {
                tables.accumulators.subtract(&old);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.open_read("len")?.entries.len())
    }

    fn seek(&self, from: Bound<&[u8]>, direction: Direction) -> StoreResult<Option<RawEntry>> {
        let tables = self.open_read("seek")?;
        let found = match direction {
            Direction::Ascending => tables
                .entries
                .range::<[u8], _>((from, Bound::Unbounded))
                .next(),
            Direction::Descending => tables
                .entries
                .range::<[u8], _>((Bound::Unbounded, from))
                .next_back(),
        };
        Ok(found.map(|(key, properties)| RawEntry {
            key: key.clone(),
            properties: properties.clone(),
        }))
    }

    fn sum_of(&self, field: &str) -> StoreResult<i64> {
        Ok(self.open_read("sum_of")?.accumulators.sum(field))
    }

    fn mean_of(&self, field: &str) -> StoreResult<f64> {
        Ok(self.open_read("mean_of")?.accumulators.mean(field))
    }

    fn clear(&self) -> StoreResult<()> {
        let mut tables = self.open_write("clear")?;
        tables.entries.clear();
        tables.accumulators = Accumulators::default();
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.write().closed = true;
        Ok(())
    }
}

/// Hands out one [`MemoryStore`] per path.
///
/// Destroying a path drops its store so the next open starts empty. Opens
/// can be made to fail per path to exercise the open retry.
#[derive(Default)]
pub struct MemoryStoreFactory {
    stores: Mutex<HashMap<PathBuf, Arc<MemoryStore>>>,
    open_failures: Mutex<HashMap<PathBuf, usize>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store currently registered at `path`
    pub fn store(&self, path: &Path) -> Option<Arc<MemoryStore>> {
        self.stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Make the next `count` opens of `path` fail
    pub fn fail_open(&self, path: &Path, count: usize) {
        self.open_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), count);
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn open(&self, path: &Path) -> StoreResult<Arc<dyn SeedStore>> {
        {
            let mut failures = self.open_failures.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(remaining) = failures.get_mut(path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::OpenFailed {
                        path: path.to_path_buf(),
                        reason: "injected open failure".to_string(),
                    });
                }
            }
        }

        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        let store = stores
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(MemoryStore::new()));
        if store.is_closed() {
            *store = Arc::new(store.reopened());
        }
        let store: Arc<dyn SeedStore> = store.clone();
        Ok(store)
    }

    fn destroy(&self, path: &Path) -> StoreResult<()> {
        self.stores.lock().unwrap_or_else(|e| e.into_inner()).remove(path);
        Ok(())
    }
}
