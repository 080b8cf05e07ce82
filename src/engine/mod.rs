//! LSM Storage Engine — the top-level façade.
//!
//! ## Design Overview
//!
//! The engine composes two layers, queried newest-first:
//!
//! 1. **Memtable** — a skip list fronted by a write-ahead log. Writes land
//!    here; the WAL makes them recoverable.
//! 2. **SSTable manager** — the leveled hierarchy of immutable on-disk
//!    tables, populated by memtable flushes and reshaped by compaction.
//!
//! When the memtable's approximate size reaches
//! [`EngineConfig::max_memtable_size`] after a write, its contents are
//! flushed to a new SSTable (`temp.sst`, admitted into level 0 by the
//! manager), a fresh memtable with a new WAL generation is swapped in, and
//! the flushed WAL file is deleted — replay work is bounded by exactly one
//! active WAL.
//!
//! ## Concurrency Model
//!
//! A single mutex serializes every operation, making user-visible
//! `get`/`set`/`delete` totally ordered. The memtable, WAL, and manager
//! keep their own finer-grained locks so each remains safe standalone.
//!
//! ## Guarantees
//!
//! - A successful `set`/`delete` is recorded in the WAL before returning.
//! - `get` observes every operation that returned before it.
//! - A lookup that reaches a tombstone stops with "key does not exist";
//!   the engine, not the manager, interprets deletion markers.
//! - After `close` + `open` on the same directory, reads return the same
//!   results (unflushed writes come back via WAL replay).

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::manager::{Manager, ManagerError};
use crate::memtable::{Memtable, MemtableError};
use crate::sstable::{SSTable, SSTableError, TableConfig, TableWriter};
use crate::wal::WalError;

/// Transient filename a flush writes before the manager admits it.
const FLUSH_TEMP_NAME: &str = "temp.sst";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced to engine callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The key is absent or tombstoned at the authoritative layer.
    #[error("key does not exist")]
    KeyNotFound,

    /// Error from the memtable subsystem.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error from the SSTable manager.
    #[error("manager error: {0}")]
    Manager(#[from] ManagerError),

    /// Error from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Error from the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on an engine that has been closed.
    #[error("engine is closed")]
    Closed,

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memtable size (bytes) at which a write triggers a flush.
    pub max_memtable_size: usize,

    /// Whether the WAL fsyncs after every append.
    pub wal_sync: bool,

    /// Layout and filter parameters for every SSTable the engine writes
    /// and opens.
    pub table: TableConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memtable_size: 1024 * 1024,
            wal_sync: true,
            table: TableConfig::default(),
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug)]
pub struct EngineStats {
    /// Approximate memtable residency in bytes.
    pub memtable_size: usize,

    /// Distinct keys buffered in the memtable.
    pub memtable_entries: usize,

    /// Number of tables per level.
    pub level_table_counts: Vec<usize>,
}

// ------------------------------------------------------------------------------------------------
// Engine core
// ------------------------------------------------------------------------------------------------

struct EngineInner {
    /// Active write buffer plus its WAL.
    memtable: Memtable,

    /// Leveled on-disk hierarchy.
    manager: Manager,

    /// Engine root directory.
    dir: PathBuf,

    config: EngineConfig,

    /// Set by `close`; all further operations are rejected.
    closed: bool,
}

/// The storage engine handle.
///
/// Cloneable; all clones share one serialized engine state.
pub struct Engine {
    inner: Arc<Mutex<EngineInner>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Engine {
    /// Opens (or creates) an engine rooted at `dir`.
    ///
    /// Recovery runs as part of construction: the memtable replays any
    /// WAL files left behind, and the manager reconstructs the level
    /// layout from the manifest or the table files.
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("opening engine at {:?}", dir);

        let memtable = Memtable::open(&dir, config.wal_sync)?;
        let manager = Manager::open(&dir, config.table.clone())?;

        info!("engine open, memtable holds {} entries", memtable.len());

        Ok(Self {
            inner: Arc::new(Mutex::new(EngineInner {
                memtable,
                manager,
                dir,
                config,
                closed: false,
            })),
        })
    }

    /// Looks up `key`.
    ///
    /// Consults the memtable first, then the manager. Reaching a
    /// tombstone anywhere terminates the lookup with
    /// [`EngineError::KeyNotFound`].
    pub fn get(&self, key: &str) -> Result<Vec<u8>, EngineError> {
        let inner = self.lock()?;
        if inner.closed {
            return Err(EngineError::Closed);
        }

        if let Some(entry) = inner.memtable.get(key.as_bytes())? {
            return if entry.tombstone {
                Err(EngineError::KeyNotFound)
            } else {
                Ok(entry.value)
            };
        }

        match inner.manager.get(key.as_bytes())? {
            Some(entry) if !entry.tombstone => Ok(entry.value),
            _ => Err(EngineError::KeyNotFound),
        }
    }

    /// Inserts or overwrites `key`, flushing the memtable if it is full.
    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Err(EngineError::Closed);
        }

        inner.memtable.set(key.as_bytes().to_vec(), value.into())?;
        Self::maybe_flush(&mut inner)
    }

    /// Deletes `key` by writing a tombstone, flushing if full.
    pub fn delete(&self, key: &str) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Err(EngineError::Closed);
        }

        inner.memtable.delete(key.as_bytes().to_vec())?;
        Self::maybe_flush(&mut inner)
    }

    /// Shuts the engine down, writing the manifest via the manager.
    ///
    /// Unflushed memtable contents stay in the WAL and are replayed on
    /// the next open.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Ok(());
        }

        inner.manager.close()?;
        inner.closed = true;
        info!("engine closed");
        Ok(())
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.lock()?;
        if inner.closed {
            return Err(EngineError::Closed);
        }

        Ok(EngineStats {
            memtable_size: inner.memtable.size(),
            memtable_entries: inner.memtable.len(),
            level_table_counts: inner.manager.level_table_counts()?,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EngineInner>, EngineError> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Internal("mutex poisoned".into()))
    }

    /// Flushes when the memtable has reached its size threshold.
    fn maybe_flush(inner: &mut EngineInner) -> Result<(), EngineError> {
        if inner.memtable.size() >= inner.config.max_memtable_size {
            Self::flush(inner)?;
        }
        Ok(())
    }

    /// Writes the memtable snapshot to a new SSTable and rotates the WAL.
    ///
    /// An empty memtable is a no-op. On success the old WAL file is
    /// deleted — its contents are durable in the admitted table.
    fn flush(inner: &mut EngineInner) -> Result<(), EngineError> {
        let entries = inner.memtable.all()?;
        if entries.is_empty() {
            debug!("flush requested on empty memtable, skipping");
            return Ok(());
        }

        info!(
            "flushing memtable: {} entries, ~{} bytes",
            entries.len(),
            inner.memtable.size()
        );

        let temp_path = inner.dir.join(FLUSH_TEMP_NAME);
        let mut writer = TableWriter::new(&temp_path, &inner.config.table)?;
        for entry in &entries {
            writer.add(entry)?;
        }
        writer.finish()?;

        let table = SSTable::open(&temp_path, &inner.config.table)?;
        inner.manager.add_sstable(table)?;

        // Rotate: fresh memtable on the next WAL generation, then drop
        // the flushed WAL so replay never grows unboundedly.
        let next_generation = inner.memtable.generation() + 1;
        let next_version = inner.memtable.next_version();
        let fresh = Memtable::fresh(
            &inner.dir,
            next_generation,
            inner.config.wal_sync,
            next_version,
        )?;
        let old = std::mem::replace(&mut inner.memtable, fresh);
        old.into_wal().delete()?;

        Ok(())
    }
}
