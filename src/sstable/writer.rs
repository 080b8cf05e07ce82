//! Serializes a sorted entry stream into the SSTable format.
//!
//! Entries must arrive in strictly ascending key order. The writer buffers
//! prefix-compressed entries until the uncompressed pending block reaches
//! `data_block_size`, then compresses and flushes it; `finish` seals the
//! file by appending the filter, meta, and index blocks and the footer.
//!
//! `finish` consumes the writer, so use-after-finish is a compile error
//! rather than a runtime state to check.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use crate::bloom::BloomFilter;
use crate::encoding::{self, Encode};
use crate::entry::{Entry, Key};

use super::{Footer, IndexRecord, MetaBlock, SSTableError, TableConfig, MAGIC};

/// Streaming SSTable writer.
pub struct TableWriter {
    writer: BufWriter<File>,
    config: TableConfig,

    /// Pending uncompressed data block.
    block_buf: Vec<u8>,

    /// Previous full key within the current block, for prefix compression.
    /// Reset to empty at each block boundary.
    prev_key: Key,

    /// One record per flushed data block.
    index: Vec<IndexRecord>,

    meta: MetaBlock,

    filter: BloomFilter,

    /// Write offset of the next byte, tracked so blocks never need a
    /// seekable sink.
    offset: i64,
}

impl TableWriter {
    /// Creates the output file and an empty filter sized by `config`.
    pub fn new(path: impl AsRef<Path>, config: &TableConfig) -> Result<Self, SSTableError> {
        let file = File::create(path.as_ref())?;
        let filter = BloomFilter::new(
            config.expected_entry_count,
            config.filter_false_positive_rate,
        )?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        Ok(Self {
            writer: BufWriter::new(file),
            config: config.clone(),
            block_buf: Vec::new(),
            prev_key: Vec::new(),
            index: Vec::new(),
            meta: MetaBlock {
                timestamp,
                ..MetaBlock::default()
            },
            filter,
            offset: 0,
        })
    }

    /// Appends one entry.
    ///
    /// Keys must be strictly ascending across the whole table; a key at or
    /// below the previous one is rejected with [`SSTableError::OutOfOrder`].
    pub fn add(&mut self, entry: &Entry) -> Result<(), SSTableError> {
        if self.meta.entry_count > 0 && entry.key <= self.meta.max_key {
            return Err(SSTableError::OutOfOrder);
        }

        if self.meta.entry_count == 0 {
            self.meta.min_key = entry.key.clone();
        }
        self.meta.max_key = entry.key.clone();
        self.meta.entry_count += 1;
        self.filter.add(&entry.key);

        let lcp = longest_common_prefix(&self.prev_key, &entry.key);
        let suffix = &entry.key[lcp..];

        let buf = &mut self.block_buf;
        (lcp as u16).encode_to(buf)?;
        (suffix.len() as u16).encode_to(buf)?;
        buf.extend_from_slice(suffix);
        (entry.value.len() as u32).encode_to(buf)?;
        buf.extend_from_slice(&entry.value);
        entry.tombstone.encode_to(buf)?;

        self.prev_key = entry.key.clone();

        if self.block_buf.len() >= self.config.data_block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Seals the table: flushes the pending block, then writes the filter,
    /// meta, and index blocks and the footer.
    pub fn finish(mut self) -> Result<(), SSTableError> {
        self.flush_block()?;

        let filter_offset = self.offset;
        let filter_bytes = self.filter.encode();
        self.writer.write_all(&filter_bytes)?;
        self.offset += filter_bytes.len() as i64;

        let meta_offset = self.offset;
        let meta_bytes = encoding::encode_to_vec(&self.meta)?;
        self.writer.write_all(&meta_bytes)?;
        self.offset += meta_bytes.len() as i64;

        let index_offset = self.offset;
        let mut index_bytes = Vec::new();
        for record in &self.index {
            record.encode_to(&mut index_bytes)?;
        }
        self.writer.write_all(&index_bytes)?;
        self.offset += index_bytes.len() as i64;

        let footer = Footer {
            meta_offset,
            meta_size: meta_bytes.len() as u32,
            index_offset,
            index_size: index_bytes.len() as u32,
            filter_offset,
            filter_size: filter_bytes.len() as u32,
            magic: MAGIC,
        };
        let footer_bytes = encoding::encode_to_vec(&footer)?;
        self.writer.write_all(&footer_bytes)?;

        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| SSTableError::Io(e.into_error()))?;
        file.sync_all()?;

        trace!(
            "sealed SSTable: {} entries in {} blocks",
            self.meta.entry_count,
            self.index.len()
        );
        Ok(())
    }

    /// Number of entries added so far.
    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    /// Compresses and writes the pending block, recording its index entry.
    fn flush_block(&mut self) -> Result<(), SSTableError> {
        if self.block_buf.is_empty() {
            return Ok(());
        }

        let compressed = snap::raw::Encoder::new()
            .compress_vec(&self.block_buf)
            .map_err(|e| SSTableError::Corrupt(format!("block compression failed: {e}")))?;

        self.writer.write_all(&compressed)?;
        self.index.push(IndexRecord {
            last_key: self.prev_key.clone(),
            offset: self.offset,
            size: compressed.len() as i32,
        });

        self.offset += compressed.len() as i64;
        self.block_buf.clear();
        self.prev_key.clear();
        Ok(())
    }
}

/// Length of the longest common prefix of `a` and `b`.
fn longest_common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
