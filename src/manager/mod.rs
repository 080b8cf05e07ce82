//! Leveled SSTable manager: flush ingestion, compaction, and recovery.
//!
//! ## Level layout
//!
//! Tables are arranged as `levels[level][index]`. Level 0 accumulates
//! flushes and may contain overlapping key ranges; higher levels hold
//! compaction products. Within every level the highest index is the
//! newest table, and lookups probe levels in ascending order, tables
//! newest-first, so the youngest layer containing a key is authoritative.
//!
//! ## File naming & manifest
//!
//! Tables live as `<level>.<sequence>.sst` in the engine directory; a
//! freshly flushed `temp.sst` is renamed into its level-0 slot on
//! admission. At close the manager writes a `manifest` file recording the
//! level shape:
//!
//! ```text
//! [i64 num_levels][i64 num_tables]...   one count per level
//! ```
//!
//! Filenames are reconstructable from the naming convention, so the
//! manifest needs only the counts. Recovery prefers the manifest
//! (tolerating missing files with a warning) and falls back to scanning
//! the directory when no manifest exists.
//!
//! ## Compaction
//!
//! `add_sstable` appends to level 0 and then walks the levels: any level
//! holding two or more tables is folded pairwise into a single table at
//! the next level, with tombstones eliminated when the destination is the
//! bottom level and previously empty. Consumed inputs are closed and
//! their files removed; intermediate `*.tmp.<i>` outputs are cleaned up
//! as the fold advances.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{Decode, Encode, EncodingError};
use crate::entry::Entry;
use crate::sstable::{compact, SSTable, SSTableError, TableConfig};

/// Manifest filename inside the engine directory.
const MANIFEST_NAME: &str = "manifest";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Manifest encode/decode failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// SSTable-level failure.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Operation on a manager that has already been closed.
    #[error("manager is closed")]
    Closed,

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Manager core
// ------------------------------------------------------------------------------------------------

/// Owner of the leveled SSTable layout.
pub struct Manager {
    inner: RwLock<ManagerInner>,
}

struct ManagerInner {
    /// `levels[level][index]`; highest index within a level is newest.
    levels: Vec<Vec<SSTable>>,

    /// Engine directory holding table files and the manifest.
    dir: PathBuf,

    /// Table configuration applied to every write and open.
    config: TableConfig,

    /// Set by `close`; all further operations are rejected.
    closed: bool,
}

impl Manager {
    /// Opens the manager over `dir`, reconstructing the level layout from
    /// the manifest or, failing that, from the table files themselves.
    pub fn open(dir: impl AsRef<Path>, config: TableConfig) -> Result<Self, ManagerError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let manifest_path = dir.join(MANIFEST_NAME);
        let levels = if manifest_path.exists() {
            Self::recover_from_manifest(&manifest_path, &dir, &config)?
        } else {
            Self::recover_from_files(&dir, &config)?
        };

        let counts: Vec<usize> = levels.iter().map(Vec::len).collect();
        info!("SSTable layout recovered: {} levels, {:?} tables", levels.len(), counts);

        Ok(Self {
            inner: RwLock::new(ManagerInner {
                levels,
                dir,
                config,
                closed: false,
            }),
        })
    }

    /// Looks up `key` across the hierarchy, youngest layer first.
    ///
    /// Returns the first entry found — tombstones included; interpreting
    /// them is the engine's responsibility. A read error on one table is
    /// logged and treated as a miss on that table so a single damaged
    /// file does not take the whole store offline.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, ManagerError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ManagerError::Internal("rwlock poisoned".into()))?;
        if inner.closed {
            return Err(ManagerError::Closed);
        }

        for (level_idx, level) in inner.levels.iter().enumerate() {
            for (table_idx, table) in level.iter().enumerate().rev() {
                match table.get(key) {
                    Ok(Some(entry)) => {
                        debug!("key found in level {}, table {}", level_idx, table_idx);
                        return Ok(Some(entry));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            "error searching table {:?} (level {}): {}",
                            table.path(),
                            level_idx,
                            e
                        );
                    }
                }
            }
        }
        Ok(None)
    }

    /// Admits a freshly flushed table into level 0 and rebalances.
    ///
    /// The incoming file (typically `temp.sst`) is renamed to its level-0
    /// slot `0.<seq>.sst` so the transient flush name is immediately free
    /// for reuse.
    pub fn add_sstable(&self, table: SSTable) -> Result<(), ManagerError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ManagerError::Internal("rwlock poisoned".into()))?;
        if inner.closed {
            return Err(ManagerError::Closed);
        }

        if inner.levels.is_empty() {
            inner.levels.push(Vec::new());
        }

        let src = table.path().to_path_buf();
        let dst = inner.dir.join(format!("0.{}.sst", inner.levels[0].len()));
        let table = if src == dst {
            table
        } else {
            drop(table);
            fs::rename(&src, &dst)?;
            SSTable::open(&dst, &inner.config)?
        };
        inner.levels[0].push(table);

        inner.fix_levels()
    }

    /// Number of tables per level, for introspection and tests.
    pub fn level_table_counts(&self) -> Result<Vec<usize>, ManagerError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ManagerError::Internal("rwlock poisoned".into()))?;
        if inner.closed {
            return Err(ManagerError::Closed);
        }
        Ok(inner.levels.iter().map(Vec::len).collect())
    }

    /// Writes the manifest, closes every table, and forgets the layout.
    pub fn close(&self) -> Result<(), ManagerError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ManagerError::Internal("rwlock poisoned".into()))?;
        if inner.closed {
            return Ok(());
        }

        inner.write_manifest()?;
        inner.levels.clear();
        inner.closed = true;
        info!("SSTable manager closed");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Recovery
    // --------------------------------------------------------------------

    fn recover_from_manifest(
        manifest_path: &Path,
        dir: &Path,
        config: &TableConfig,
    ) -> Result<Vec<Vec<SSTable>>, ManagerError> {
        let mut bytes = Vec::new();
        File::open(manifest_path)?.read_to_end(&mut bytes)?;

        let mut offset = 0;
        let (num_levels, n) = i64::decode_from(&bytes[offset..])?;
        offset += n;

        let mut levels = Vec::new();
        for level_idx in 0..num_levels {
            let (num_tables, n) = i64::decode_from(&bytes[offset..])?;
            offset += n;

            let mut level = Vec::new();
            for table_idx in 0..num_tables {
                let path = dir.join(format!("{level_idx}.{table_idx}.sst"));
                if !path.exists() {
                    warn!("SSTable {:?} referenced by manifest not found, skipping", path);
                    continue;
                }
                match SSTable::open(&path, config) {
                    Ok(table) => level.push(table),
                    Err(e) => warn!("failed to open SSTable {:?}: {}, skipping", path, e),
                }
            }
            levels.push(level);
        }

        Ok(levels)
    }

    fn recover_from_files(
        dir: &Path,
        config: &TableConfig,
    ) -> Result<Vec<Vec<SSTable>>, ManagerError> {
        let mut level_files: Vec<Vec<String>> = Vec::new();
        let mut max_level = 0usize;

        for dirent in fs::read_dir(dir)? {
            let path = dirent?.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((level, _sequence)) = parse_table_name(name) else {
                continue;
            };

            max_level = max_level.max(level);
            if level_files.len() <= level {
                level_files.resize_with(level + 1, Vec::new);
            }
            level_files[level].push(name.to_string());
        }

        let mut levels: Vec<Vec<SSTable>> = Vec::with_capacity(max_level + 1);
        level_files.resize_with(max_level + 1, Vec::new);

        for files in &mut level_files {
            files.sort();
            let mut level = Vec::with_capacity(files.len());
            for name in files.iter() {
                let path = dir.join(name);
                match SSTable::open(&path, config) {
                    Ok(table) => level.push(table),
                    Err(e) => warn!("failed to open SSTable {:?}: {}, skipping", path, e),
                }
            }
            levels.push(level);
        }

        Ok(levels)
    }
}

impl ManagerInner {
    /// Serializes the level shape to the manifest file.
    fn write_manifest(&self) -> Result<(), ManagerError> {
        let mut bytes = Vec::new();
        (self.levels.len() as i64).encode_to(&mut bytes)?;
        for level in &self.levels {
            (level.len() as i64).encode_to(&mut bytes)?;
        }

        let path = self.dir.join(MANIFEST_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Walks levels from 0 upward, folding any level with two or more
    /// tables into a single table at the next level.
    fn fix_levels(&mut self) -> Result<(), ManagerError> {
        let mut level_idx = 0;
        while level_idx < self.levels.len() {
            if self.levels[level_idx].len() < 2 {
                level_idx += 1;
                continue;
            }

            if level_idx + 1 == self.levels.len() {
                self.levels.push(Vec::new());
            }
            let next_level = level_idx + 1;
            // Eliding tombstones is only sound when no older copy of any
            // key can survive the merge: the destination must be the
            // bottom level and must not already hold tables the fold
            // does not cover.
            let drop_tombstones =
                next_level == self.levels.len() - 1 && self.levels[next_level].is_empty();
            let out_path = self
                .dir
                .join(format!("{next_level}.{}.sst", self.levels[next_level].len()));

            info!(
                "compacting level {} ({} tables) into {:?}",
                level_idx,
                self.levels[level_idx].len(),
                out_path
            );

            let source = std::mem::take(&mut self.levels[level_idx]);
            let merged = Self::fold_tables(source, &out_path, drop_tombstones, &self.config)?;

            if let Some(table) = merged {
                self.levels[next_level].push(table);
            }

            level_idx += 1;
        }
        Ok(())
    }

    /// Pairwise fold: table 0 seeds the accumulator, then each further
    /// table is merged in with the accumulator as the older input. The
    /// final temporary is renamed to `out_path` and reopened. Consumed
    /// source files and intermediate temporaries are removed.
    fn fold_tables(
        tables: Vec<SSTable>,
        out_path: &Path,
        drop_tombstones: bool,
        config: &TableConfig,
    ) -> Result<Option<SSTable>, ManagerError> {
        let mut acc: Option<SSTable> = None;

        for (step, table) in tables.into_iter().enumerate() {
            acc = match acc {
                None => Some(table),
                Some(prev) => {
                    let tmp_path = PathBuf::from(format!("{}.tmp.{}", out_path.display(), step));
                    let merged = compact(&tmp_path, &prev, &table, drop_tombstones, config)?;

                    // Both inputs are fully consumed: close them and
                    // remove their backing files (source tables and
                    // intermediate temporaries alike).
                    let prev_path = prev.path().to_path_buf();
                    let table_path = table.path().to_path_buf();
                    drop(prev);
                    drop(table);
                    fs::remove_file(&prev_path)?;
                    fs::remove_file(&table_path)?;

                    merged
                }
            };
        }

        match acc {
            None => Ok(None),
            Some(table) => {
                // Promote the survivor to its final name.
                let src = table.path().to_path_buf();
                drop(table);
                fs::rename(&src, out_path)?;
                Ok(Some(SSTable::open(out_path, config)?))
            }
        }
    }
}

/// Parses `<level>.<sequence>.sst` into its two components.
fn parse_table_name(name: &str) -> Option<(usize, u64)> {
    let stem = name.strip_suffix(".sst")?;
    let (level, sequence) = stem.split_once('.')?;
    Some((level.parse().ok()?, sequence.parse().ok()?))
}
