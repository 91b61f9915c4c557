//! Lazy traversal over a seed table
//!
//! An enumerator walks a table either in hash order, optionally starting at
//! an arbitrary hash and wrapping around, or in the order of a property
//! value. It is single-pass and holds no lock between steps; every step
//! re-reads the store, so records written meanwhile may or may not show up.

use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

use super::table::SeedTable;
use crate::store::{Direction, RawEntry, SeedStore, StoreError, StoreResult};
use crate::types::{Seed, SeedHash};

enum Mode {
    Rotating {
        direction: Direction,
        origin: Option<Vec<u8>>,
        rotate: bool,
        position: Option<Vec<u8>>,
        wrapped: bool,
    },
    Sorted {
        keys: std::vec::IntoIter<Vec<u8>>,
    },
}

/// Iterator over the seeds of one table
pub struct SeedEnum {
    table: Arc<SeedTable>,
    store: Arc<dyn SeedStore>,
    generation: u64,
    mode: Mode,
    min_version: f64,
    peeked: Option<Seed>,
    finished: bool,
}

impl SeedEnum {
    /// Walk in hash order starting at `first` (or at the table edge).
    ///
    /// With `rotate`, reaching the end continues from the other edge up to
    /// `first`. Only seeds with a version of at least `min_version` are
    /// yielded.
    pub fn rotating(
        table: Arc<SeedTable>,
        direction: Direction,
        rotate: bool,
        first: Option<SeedHash>,
        min_version: f64,
    ) -> Self {
        let (store, generation) = table.snapshot();
        Self {
            table,
            store,
            generation,
            mode: Mode::Rotating {
                direction,
                origin: first.map(|h| h.as_key().to_vec()),
                rotate,
                position: None,
                wrapped: false,
            },
            min_version,
            peeked: None,
            finished: false,
        }
    }

    /// Walk in the order of `field`'s value
    pub fn sorted(table: Arc<SeedTable>, direction: Direction, field: &str) -> Self {
        let keys = table.keys_by_field(field, direction);
        Self::sorted_from(table, keys)
    }

    /// An enumerator that yields nothing
    pub fn empty(table: Arc<SeedTable>) -> Self {
        let mut seeds = Self::sorted_from(table, Vec::new());
        seeds.finished = true;
        seeds
    }

    fn sorted_from(table: Arc<SeedTable>, keys: Vec<Vec<u8>>) -> Self {
        let (store, generation) = table.snapshot();
        Self {
            table,
            store,
            generation,
            mode: Mode::Sorted { keys: keys.into_iter() },
            min_version: 0.0,
            peeked: None,
            finished: false,
        }
    }

    pub fn has_next(&mut self) -> bool {
        self.fill();
        self.peeked.is_some()
    }

    fn fill(&mut self) {
        while self.peeked.is_none() && !self.finished {
            if self.table.generation() != self.generation {
                debug!("{} table was reset, ending traversal", self.table.kind());
                self.finished = true;
                return;
            }

            let entry = match self.next_raw() {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.finished = true;
                    return;
                }
                Err(e) => {
                    self.fail(&e);
                    return;
                }
            };

            let Some(hash) = SeedHash::from_key(&entry.key) else {
                debug!("Skipping malformed key in {} table", self.table.kind());
                continue;
            };
            let seed = Seed::with_properties(hash, entry.properties);
            if seed.version() >= self.min_version {
                self.peeked = Some(seed);
            }
        }
    }

    fn fail(&mut self, cause: &StoreError) {
        self.table.reset_if_current(self.generation, cause);
        self.finished = true;
    }

    fn next_raw(&mut self) -> StoreResult<Option<RawEntry>> {
        match &mut self.mode {
            Mode::Sorted { keys } => {
                for key in keys.by_ref() {
                    if let Some(properties) = self.store.get(&key)? {
                        return Ok(Some(RawEntry { key, properties }));
                    }
                }
                Ok(None)
            }
            Mode::Rotating {
                direction,
                origin,
                rotate,
                position,
                wrapped,
            } => loop {
                let bound = match (position.as_deref(), *wrapped, origin.as_deref()) {
                    (Some(key), _, _) => Bound::Excluded(key),
                    (None, false, Some(start)) => Bound::Included(start),
                    _ => Bound::Unbounded,
                };

                match self.store.seek(bound, *direction)? {
                    None => {
                        if *rotate && origin.is_some() && !*wrapped {
                            *wrapped = true;
                            *position = None;
                            continue;
                        }
                        return Ok(None);
                    }
                    Some(entry) => {
                        if *wrapped {
                            if let Some(start) = origin.as_deref() {
                                let reached = match direction {
                                    Direction::Ascending => entry.key.as_slice() >= start,
                                    Direction::Descending => entry.key.as_slice() <= start,
                                };
                                if reached {
                                    return Ok(None);
                                }
                            }
                        }
                        *position = Some(entry.key.clone());
                        return Ok(Some(entry));
                    }
                }
            },
        }
    }
}

impl Iterator for SeedEnum {
    type Item = Seed;

    fn next(&mut self) -> Option<Seed> {
        self.fill();
        self.peeked.take()
    }
}
