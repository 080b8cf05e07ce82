//! Memtable: the mutable in-memory write buffer.
//!
//! ## Design Invariants
//!
//! - Every mutation is appended to the WAL **before** the skip list is
//!   touched, so acknowledged writes always survive a crash.
//! - Each key appears at most once; the latest write fully replaces any
//!   earlier one. Deletes are tombstones, not physical removals.
//! - `get` reports tombstones faithfully; interpretation is the engine's
//!   job.
//! - The size counter tracks the skip list's approximate residency via the
//!   deltas returned by [`SkipList::set`], so the engine can bound memory
//!   without heap introspection.
//!
//! ## Recovery
//!
//! [`Memtable::open`] enumerates every `wal-*.log` in the directory, sorts
//! by generation, and replays them oldest-first into the skip list. The
//! surviving records are consolidated into a fresh active WAL (generation
//! `max + 1`) and the replayed files are deleted. A corrupt record stops
//! replay of that file with a warning; everything before the damage is
//! recovered.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{info, trace, warn};

use crate::entry::{Entry, Key};
use crate::skiplist::SkipList;
use crate::wal::{Wal, WalError, WalRecord};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O failure while scanning the WAL directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Keys must be non-empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Memtable core
// ------------------------------------------------------------------------------------------------

/// Skip list + active WAL + size counter.
pub struct Memtable {
    /// Ordered in-memory state, guarded for concurrent readers.
    inner: RwLock<MemtableInner>,

    /// Active write-ahead log for this memtable generation.
    wal: Wal,

    /// Next version to assign; versions are monotone across the engine's
    /// lifetime.
    next_version: AtomicU64,
}

struct MemtableInner {
    list: SkipList,
    size: usize,
}

impl Memtable {
    /// Opens a memtable in `dir`, running WAL recovery.
    ///
    /// All `wal-*.log` files are replayed oldest-generation-first and
    /// consolidated into a new active WAL; the replayed files are deleted.
    pub fn open(dir: &Path, sync_on_append: bool) -> Result<Self, MemtableError> {
        let mut old_paths = Vec::new();
        for dirent in std::fs::read_dir(dir)? {
            let path = dirent?.path();
            if let Some(generation) = Wal::parse_generation(&path) {
                old_paths.push((generation, path));
            }
        }
        old_paths.sort_by_key(|(generation, _)| *generation);

        let next_generation = old_paths.last().map_or(1, |(generation, _)| generation + 1);
        let wal = Wal::open(dir, next_generation, sync_on_append)?;

        let mut list = SkipList::new();
        let mut size = 0usize;
        let mut max_version = 0u64;

        for (generation, path) in &old_paths {
            let old_wal = Wal::open_path(path, sync_on_append)?;
            let mut replayed = 0u64;

            for item in old_wal.replay_iter() {
                let record = match item {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(
                            "WAL {:?} replay stopped after {} records: {}",
                            path, replayed, e
                        );
                        break;
                    }
                };

                max_version = max_version.max(record.version());
                wal.append(&record)?;

                let entry = match record {
                    WalRecord::Set {
                        key,
                        value,
                        version,
                    } => Entry::put(key, value, version),
                    WalRecord::Delete { key, version } => Entry::tombstone(key, version),
                };
                let delta = list.set(entry);
                size = size.saturating_add_signed(delta);
                replayed += 1;
            }

            info!(
                "recovered {} records from WAL generation {}",
                replayed, generation
            );
            old_wal.delete()?;
        }

        Ok(Self {
            inner: RwLock::new(MemtableInner { list, size }),
            wal,
            next_version: AtomicU64::new(max_version + 1),
        })
    }

    /// Creates an empty memtable with a fresh WAL at `generation`.
    ///
    /// Used by the engine after a flush; `start_version` continues the
    /// engine-wide version sequence.
    pub fn fresh(
        dir: &Path,
        generation: u64,
        sync_on_append: bool,
        start_version: u64,
    ) -> Result<Self, MemtableError> {
        let wal = Wal::open(dir, generation, sync_on_append)?;
        Ok(Self {
            inner: RwLock::new(MemtableInner {
                list: SkipList::new(),
                size: 0,
            }),
            wal,
            next_version: AtomicU64::new(start_version),
        })
    }

    /// Inserts or overwrites a key.
    ///
    /// WAL first, then the skip list; the size counter absorbs the
    /// returned delta.
    pub fn set(&self, key: Key, value: Vec<u8>) -> Result<(), MemtableError> {
        if key.is_empty() {
            return Err(MemtableError::EmptyKey);
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        trace!("memtable set, version {}", version);

        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("rwlock poisoned".into()))?;

        self.wal.append(&WalRecord::Set {
            key: key.clone(),
            value: value.clone(),
            version,
        })?;

        let delta = guard.list.set(Entry::put(key, value, version));
        guard.size = guard.size.saturating_add_signed(delta);
        Ok(())
    }

    /// Marks a key as deleted with a tombstone.
    pub fn delete(&self, key: Key) -> Result<(), MemtableError> {
        if key.is_empty() {
            return Err(MemtableError::EmptyKey);
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        trace!("memtable delete, version {}", version);

        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("rwlock poisoned".into()))?;

        self.wal.append(&WalRecord::Delete {
            key: key.clone(),
            version,
        })?;

        let delta = guard.list.set(Entry::tombstone(key, version));
        guard.size = guard.size.saturating_add_signed(delta);
        Ok(())
    }

    /// Pure in-memory lookup; a returned tombstone means "deleted here".
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("rwlock poisoned".into()))?;
        Ok(guard.list.get(key).cloned())
    }

    /// Approximate resident byte size.
    pub fn size(&self) -> usize {
        self.inner.read().map(|guard| guard.size).unwrap_or(0)
    }

    /// Number of distinct keys (live and tombstoned).
    pub fn len(&self) -> usize {
        self.inner.read().map(|guard| guard.list.len()).unwrap_or(0)
    }

    /// True when no entries are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry in ascending key order, for flushing.
    pub fn all(&self) -> Result<Vec<Entry>, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("rwlock poisoned".into()))?;
        Ok(guard.list.all())
    }

    /// Generation of the active WAL.
    pub fn generation(&self) -> u64 {
        self.wal.generation()
    }

    /// Next version the memtable would assign.
    pub fn next_version(&self) -> u64 {
        self.next_version.load(Ordering::SeqCst)
    }

    /// Consumes the memtable, yielding its WAL so the caller can delete
    /// the file once flushed contents are durable elsewhere.
    pub fn into_wal(self) -> Wal {
        self.wal
    }
}
