//! Seed Table Storage
//!
//! Ordered key/value storage behind the seed tables. Keys are seed hash keys
//! (see [`SeedHash::as_key`](crate::types::SeedHash::as_key)), values are
//! property bags. Every store keeps running sums and means over the counter
//! fields so table statistics never need a scan.

mod memory;
mod rocks;

pub use memory::{MemoryStore, MemoryStoreFactory};
pub use rocks::{RocksSeedStore, RocksStoreFactory};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::{fields, Properties};

/// Storage failure. The registry treats every variant as table corruption.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open store at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corrupt entry: {0}")]
    Corrupt(String),

    #[error("store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn from_ascending(up: bool) -> Self {
        if up {
            Direction::Ascending
        } else {
            Direction::Descending
        }
    }
}

/// A stored entry as found on disk; the key is not validated yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: Vec<u8>,
    pub properties: Properties,
}

/// Ordered key/value store holding one seed table
pub trait SeedStore: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Properties>>;

    /// Insert or overwrite
    fn put(&self, key: &[u8], properties: &Properties) -> StoreResult<()>;

    /// Delete; returns whether the key was present
    fn remove(&self, key: &[u8]) -> StoreResult<bool>;

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// First entry at or after `from` in the given direction.
    ///
    /// `Unbounded` starts at the first (ascending) or last (descending) key.
    fn seek(&self, from: Bound<&[u8]>, direction: Direction) -> StoreResult<Option<RawEntry>>;

    /// Running sum of an integer counter field
    fn sum_of(&self, field: &str) -> StoreResult<i64>;

    /// Running mean of a decimal field over all entries
    fn mean_of(&self, field: &str) -> StoreResult<f64>;

    fn clear(&self) -> StoreResult<()>;

    /// Release the backing resources; later calls fail with [`StoreError::Closed`]
    fn close(&self) -> StoreResult<()>;

    /// All keys ordered by the value of `field`.
    ///
    /// Values compare numerically when both sides parse as numbers, as
    /// strings otherwise; missing values sort first. Ties are broken by key.
    fn keys_by_field(&self, field: &str, direction: Direction) -> StoreResult<Vec<Vec<u8>>> {
        let mut rows: Vec<(Vec<u8>, Option<String>)> = Vec::new();
        let mut cursor = self.seek(Bound::Unbounded, Direction::Ascending)?;
        while let Some(entry) = cursor {
            let value = entry.properties.get(field).cloned();
            cursor = self.seek(Bound::Excluded(entry.key.as_slice()), Direction::Ascending)?;
            rows.push((entry.key, value));
        }

        rows.sort_by(|(ka, va), (kb, vb)| compare_field(va.as_deref(), vb.as_deref()).then_with(|| ka.cmp(kb)));
        if direction == Direction::Descending {
            rows.reverse();
        }
        Ok(rows.into_iter().map(|(key, _)| key).collect())
    }
}

fn compare_field(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.cmp(b),
        },
    }
}

/// Opens and destroys stores by path
pub trait StoreFactory: Send + Sync {
    fn open(&self, path: &Path) -> StoreResult<Arc<dyn SeedStore>>;

    /// Delete every backing file of the store at `path`
    fn destroy(&self, path: &Path) -> StoreResult<()>;
}

// =============================================================================
// ACCUMULATORS
// =============================================================================

/// Running sums over [`fields::SUM_FIELDS`] and [`fields::MEAN_FIELDS`]
#[derive(Debug, Clone, Default)]
pub(crate) struct Accumulators {
    sums: HashMap<&'static str, i64>,
    totals: HashMap<&'static str, f64>,
    entries: usize,
}

impl Accumulators {
    pub(crate) fn add(&mut self, properties: &Properties) {
        self.entries += 1;
        self.apply(properties, 1);
    }

    pub(crate) fn subtract(&mut self, properties: &Properties) {
        self.entries = self.entries.saturating_sub(1);
        self.apply(properties, -1);
    }

    fn apply(&mut self, properties: &Properties, sign: i64) {
        for field in fields::SUM_FIELDS {
            let value = integer_value(properties, field);
            *self.sums.entry(field).or_insert(0) += sign * value;
        }
        for field in fields::MEAN_FIELDS {
            let value = decimal_value(properties, field);
            *self.totals.entry(field).or_insert(0.0) += sign as f64 * value;
        }
    }

    pub(crate) fn sum(&self, field: &str) -> i64 {
        self.sums.get(field).copied().unwrap_or(0)
    }

    pub(crate) fn mean(&self, field: &str) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        self.totals.get(field).copied().unwrap_or(0.0) / self.entries as f64
    }
}

fn integer_value(properties: &Properties, field: &str) -> i64 {
    properties
        .get(field)
        .and_then(|v| {
            let v = v.trim();
            v.parse::<i64>().ok().or_else(|| v.parse::<f64>().ok().map(|f| f as i64))
        })
        .unwrap_or(0)
}

fn decimal_value(properties: &Properties, field: &str) -> f64 {
    properties
        .get(field)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
