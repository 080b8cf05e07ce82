//! Full-table iteration and two-way merge compaction.
//!
//! [`TableIterator`] streams one table's entries in ascending key order,
//! keeping a single decompressed block resident. [`compact`] merges two
//! tables into a new one, resolving duplicate keys newest-wins and
//! optionally eliding tombstones.

use std::path::Path;

use tracing::{info, trace};

use crate::entry::Entry;

use super::{BlockCursor, SSTable, SSTableError, TableConfig, TableWriter};

/// Ascending iterator over every entry of one SSTable.
pub struct TableIterator<'a> {
    table: &'a SSTable,
    block_idx: usize,
    cursor: Option<BlockCursor>,
}

impl<'a> TableIterator<'a> {
    /// Positions a new iterator before the table's first entry.
    pub fn new(table: &'a SSTable) -> Self {
        Self {
            table,
            block_idx: 0,
            cursor: None,
        }
    }

    /// Returns the next entry, loading data blocks on demand.
    pub fn next_entry(&mut self) -> Result<Option<Entry>, SSTableError> {
        loop {
            if self.cursor.is_none() {
                if self.block_idx >= self.table.block_count() {
                    return Ok(None);
                }
                let record = self.table.index_record(self.block_idx);
                self.cursor = Some(BlockCursor::new(self.table.read_block(record)?));
            }

            if let Some(cursor) = self.cursor.as_mut() {
                if let Some(entry) = cursor.next_entry()? {
                    return Ok(Some(entry));
                }
            }

            // Block exhausted; move on.
            self.cursor = None;
            self.block_idx += 1;
        }
    }
}

/// Merges tables `a` (older) and `b` (newer) into a fresh table at
/// `out_path`.
///
/// Keys are streamed in sorted order with a two-pointer merge. When both
/// inputs carry the same key, `b`'s entry wins and `a`'s is suppressed.
/// With `drop_tombstones`, deletion markers are omitted from the output —
/// only safe at the bottom level, where no older copy of any key survives
/// anywhere else.
///
/// Returns the reopened output table, or `None` when the merge produced no
/// entries (the temporary file is removed rather than becoming a live,
/// empty table).
pub fn compact(
    out_path: impl AsRef<Path>,
    a: &SSTable,
    b: &SSTable,
    drop_tombstones: bool,
    config: &TableConfig,
) -> Result<Option<SSTable>, SSTableError> {
    let out_path = out_path.as_ref();
    trace!(
        "compacting {:?} + {:?} -> {:?} (drop_tombstones={})",
        a.path(),
        b.path(),
        out_path,
        drop_tombstones
    );

    let mut iter_a = TableIterator::new(a);
    let mut iter_b = TableIterator::new(b);
    let mut writer = TableWriter::new(out_path, config)?;

    let mut current_a = iter_a.next_entry()?;
    let mut current_b = iter_b.next_entry()?;

    let mut emit = |writer: &mut TableWriter, entry: &Entry| -> Result<(), SSTableError> {
        if !(entry.tombstone && drop_tombstones) {
            writer.add(entry)?;
        }
        Ok(())
    };

    while let (Some(entry_a), Some(entry_b)) = (&current_a, &current_b) {
        match entry_a.key.cmp(&entry_b.key) {
            std::cmp::Ordering::Equal => {
                // b is the newer input; a's version of the key is dead.
                emit(&mut writer, entry_b)?;
                current_a = iter_a.next_entry()?;
                current_b = iter_b.next_entry()?;
            }
            std::cmp::Ordering::Less => {
                emit(&mut writer, entry_a)?;
                current_a = iter_a.next_entry()?;
            }
            std::cmp::Ordering::Greater => {
                emit(&mut writer, entry_b)?;
                current_b = iter_b.next_entry()?;
            }
        }
    }

    while let Some(entry) = &current_a {
        emit(&mut writer, entry)?;
        current_a = iter_a.next_entry()?;
    }
    while let Some(entry) = &current_b {
        emit(&mut writer, entry)?;
        current_b = iter_b.next_entry()?;
    }

    if writer.entry_count() == 0 {
        // Nothing survived the merge; do not leave an empty table behind.
        drop(writer);
        std::fs::remove_file(out_path)?;
        info!("compaction produced no entries, discarded {:?}", out_path);
        return Ok(None);
    }

    writer.finish()?;
    let merged = SSTable::open(out_path, config)?;
    info!(
        "compacted {} + {} entries into {} at {:?}",
        a.entry_count(),
        b.entry_count(),
        merged.entry_count(),
        out_path
    );
    Ok(Some(merged))
}
