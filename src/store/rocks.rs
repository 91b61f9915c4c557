//! RocksDB seed store
//!
//! Values are bincode-encoded property bags. The entry count and the
//! accumulators live in memory and are rebuilt by a full scan on open.

use rocksdb::{IteratorMode, Options, DB};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::{Accumulators, Direction, RawEntry, SeedStore, StoreError, StoreFactory, StoreResult};
use crate::types::Properties;

struct OpenDb {
    db: DB,
    count: usize,
    accumulators: Accumulators,
}

/// Seed table backed by RocksDB
pub struct RocksSeedStore {
    path: PathBuf,
    inner: RwLock<Option<OpenDb>>,
}

impl RocksSeedStore {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(100);
        opts.set_keep_log_file_num(3);

        let db = DB::open(&opts, path).map_err(|e| StoreError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // Rebuild count and accumulators; an undecodable value fails the open
        let mut count = 0usize;
        let mut accumulators = Accumulators::default();
        for item in db.iterator(IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let properties = decode(&value).map_err(|e| StoreError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            accumulators.add(&properties);
            count += 1;
        }

        info!("📦 Loaded {} seeds from {}", count, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(Some(OpenDb { db, count, accumulators })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<OpenDb>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<OpenDb>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn decode(value: &[u8]) -> StoreResult<Properties> {
    bincode::deserialize(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn encode(properties: &Properties) -> StoreResult<Vec<u8>> {
    bincode::serialize(properties).map_err(|e| StoreError::WriteFailed(e.to_string()))
}

fn first_entry<I>(mut iter: I, skip: Option<&[u8]>) -> StoreResult<Option<RawEntry>>
where
    I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    loop {
        let Some(item) = iter.next() else {
            return Ok(None);
        };
        let (key, value) = item.map_err(|e| StoreError::ReadFailed(e.to_string()))?;
        if skip == Some(&key[..]) {
            continue;
        }
        return Ok(Some(RawEntry {
            key: key.into_vec(),
            properties: decode(&value)?,
        }));
    }
}

impl SeedStore for RocksSeedStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Properties>> {
        let guard = self.read();
        let open = guard.as_ref().ok_or(StoreError::Closed)?;
        match open.db.get(key) {
            Ok(Some(value)) => Ok(Some(decode(&value)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::ReadFailed(e.to_string())),
        }
    }

    fn put(&self, key: &[u8], properties: &Properties) -> StoreResult<()> {
        let value = encode(properties)?;
        let mut guard = self.write();
        let open = guard.as_mut().ok_or(StoreError::Closed)?;

        let previous = match open.db.get(key) {
            Ok(Some(old)) => Some(decode(&old)?),
            Ok(None) => None,
            Err(e) => return Err(StoreError::ReadFailed(e.to_string())),
        };
        open.db
            .put(key, &value)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        match previous {
            Some(old) => open.accumulators.subtract(&old),
            None => open.count += 1,
        }
        open.accumulators.add(properties);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StoreResult<bool> {
        let mut guard = self.write();
        let open = guard.as_mut().ok_or(StoreError::Closed)?;

        let previous = match open.db.get(key) {
            Ok(Some(old)) => decode(&old)?,
            Ok(None) => return Ok(false),
            Err(e) => return Err(StoreError::ReadFailed(e.to_string())),
        };
        open.db
            .delete(key)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        open.count = open.count.saturating_sub(1);
        open.accumulators.subtract(&previous);
        Ok(true)
    }

    fn len(&self) -> StoreResult<usize> {
        let guard = self.read();
        Ok(guard.as_ref().ok_or(StoreError::Closed)?.count)
    }

    fn seek(&self, from: Bound<&[u8]>, direction: Direction) -> StoreResult<Option<RawEntry>> {
        let guard = self.read();
        let open = guard.as_ref().ok_or(StoreError::Closed)?;

        let rocks_direction = match direction {
            Direction::Ascending => rocksdb::Direction::Forward,
            Direction::Descending => rocksdb::Direction::Reverse,
        };
        let entry = match from {
            Bound::Unbounded => {
                let mode = match direction {
                    Direction::Ascending => IteratorMode::Start,
                    Direction::Descending => IteratorMode::End,
                };
                first_entry(open.db.iterator(mode), None)
            }
            Bound::Included(key) => first_entry(open.db.iterator(IteratorMode::From(key, rocks_direction)), None),
            Bound::Excluded(key) => {
                first_entry(open.db.iterator(IteratorMode::From(key, rocks_direction)), Some(key))
            }
        };
        entry
    }

    fn sum_of(&self, field: &str) -> StoreResult<i64> {
        let guard = self.read();
        Ok(guard.as_ref().ok_or(StoreError::Closed)?.accumulators.sum(field))
    }

    fn mean_of(&self, field: &str) -> StoreResult<f64> {
        let guard = self.read();
        Ok(guard.as_ref().ok_or(StoreError::Closed)?.accumulators.mean(field))
    }

    fn clear(&self) -> StoreResult<()> {
        let mut guard = self.write();
        let open = guard.as_mut().ok_or(StoreError::Closed)?;

        let mut keys = Vec::with_capacity(open.count);
        for item in open.db.iterator(IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::ReadFailed(e.to_string()))?;
            keys.push(key);
        }
        for key in keys {
            open.db
                .delete(&key)
                .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        }

        open.count = 0;
        open.accumulators = Accumulators::default();
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        let mut guard = self.write();
        if let Some(open) = guard.take() {
            if let Err(e) = open.db.flush() {
                warn!("Failed to flush {} on close: {}", self.path.display(), e);
            }
            debug!("Closed seed store {}", self.path.display());
        }
        Ok(())
    }
}

/// Opens [`RocksSeedStore`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RocksStoreFactory;

impl StoreFactory for RocksStoreFactory {
    fn open(&self, path: &Path) -> StoreResult<Arc<dyn SeedStore>> {
        Ok(Arc::new(RocksSeedStore::open(path)?))
    }

    fn destroy(&self, path: &Path) -> StoreResult<()> {
        if !path.exists() {
            return Ok(());
        }
        DB::destroy(&Options::default(), path).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        }
        Ok(())
    }
}
