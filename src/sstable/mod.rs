//! Sorted String Table (SSTable) — the immutable on-disk run format.
//!
//! ## Design Overview
//!
//! An SSTable stores one sorted run of entries. Tables are written once by
//! [`TableWriter`], then only ever read; the leveled manager replaces whole
//! files during compaction instead of mutating them.
//!
//! # On-disk layout
//!
//! ```text
//! [DATA_BLOCK_0][DATA_BLOCK_1]...      Snappy-compressed, prefix-compressed
//! [FILTER_BLOCK]                       packed bloom filter bit array
//! [META_BLOCK]                         entry count, min/max key, timestamp
//! [INDEX_BLOCK]                        one record per data block
//! [FOOTER]                             fixed 44 bytes + magic
//! ```
//!
//! Each **data block** holds entries encoded back-to-back as
//!
//! ```text
//! [u16 lcp][u16 suffix_len][suffix][u32 value_len][value][u8 tombstone]
//! ```
//!
//! where `lcp` is the longest common prefix with the previous entry's full
//! key *within the same block* (the running prefix resets at each block
//! boundary, so every block is self-contained). The uncompressed payload is
//! compressed as a whole with raw Snappy.
//!
//! The **index block** stores, per data block, the block's last key and its
//! compressed extent:
//!
//! ```text
//! [u32 last_key_len][last_key][i64 offset][i32 compressed_size]
//! ```
//!
//! The **meta block** is
//! `[u64 entry_count][u32 min_key_len][min_key][u32 max_key_len][max_key][i64 timestamp_nanos]`,
//! and the **footer** is exactly [`FOOTER_SIZE`] bytes:
//! `[i64 meta_off][u32 meta_size][i64 index_off][u32 index_size][i64 filter_off][u32 filter_size][u64 magic]`.
//! All integers little-endian; magic is [`MAGIC`].
//!
//! # Reading
//!
//! [`SSTable::open`] reads the footer, index, meta, and bloom filter, and
//! memory-maps the file; data blocks are only touched when a lookup or
//! iterator needs them. Point lookups go min/max bounds → bloom filter →
//! index binary search → one block decompression → linear scan.
//!
//! # Concurrency
//!
//! Tables are immutable, so reads need no locking; the mapping is the only
//! resource a table owns and it is released on drop.

#[cfg(test)]
mod tests;

pub mod iterator;
pub mod writer;

pub use iterator::{compact, TableIterator};
pub use writer::TableWriter;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use thiserror::Error;
use tracing::trace;

use crate::bloom::{BloomError, BloomFilter};
use crate::encoding::{Decode, Encode, EncodingError};
use crate::entry::{Entry, Key};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Footer integrity magic.
pub const MAGIC: u64 = 0xDEAD_BEEF_CAFE;

/// Exact encoded footer length in bytes.
pub const FOOTER_SIZE: usize = 44;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encode/decode failure on a structural block.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Bloom filter construction failure (invalid configuration).
    #[error("bloom filter error: {0}")]
    Bloom(#[from] BloomError),

    /// Footer magic did not match — not an SSTable, or damaged.
    #[error("bad magic: expected {MAGIC:#x}, found {0:#x}")]
    BadMagic(u64),

    /// Structural damage: truncated block, out-of-range offset, or
    /// undecodable payload.
    #[error("corrupt table: {0}")]
    Corrupt(String),

    /// Writer misuse: keys not strictly ascending.
    #[error("keys must be added in strictly ascending order")]
    OutOfOrder,
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Parameters governing table layout and filter sizing.
///
/// Readers must open a table with the same filter parameters it was
/// written with, since the serialized filter stores only its bit array.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Uncompressed size at which a pending data block is cut (a lower
    /// threshold, not a hard limit).
    pub data_block_size: usize,

    /// Target bloom filter false-positive rate.
    pub filter_false_positive_rate: f64,

    /// Expected number of entries, used to size the bloom filter.
    pub expected_entry_count: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            data_block_size: 4096,
            filter_false_positive_rate: 0.01,
            expected_entry_count: 1000,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Structural blocks
// ------------------------------------------------------------------------------------------------

/// One index entry: the last key of a data block plus its extent.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// Final key stored in the block (full, uncompressed).
    pub last_key: Key,

    /// Byte offset of the compressed block within the file.
    pub offset: i64,

    /// Compressed block size in bytes.
    pub size: i32,
}

impl Encode for IndexRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.last_key.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (last_key, n) = Vec::<u8>::decode_from(buf)?;
        offset += n;
        let (block_offset, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (size, n) = i32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                last_key,
                offset: block_offset,
                size,
            },
            offset,
        ))
    }
}

/// Table-level statistics stored in the meta block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaBlock {
    /// Total entries written.
    pub entry_count: u64,

    /// Smallest key in the table.
    pub min_key: Key,

    /// Largest key in the table.
    pub max_key: Key,

    /// Creation time, nanoseconds since the UNIX epoch.
    pub timestamp: i64,
}

impl Encode for MetaBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.entry_count.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        self.timestamp.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for MetaBlock {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (entry_count, n) = u64::decode_from(buf)?;
        offset += n;
        let (min_key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (max_key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                entry_count,
                min_key,
                max_key,
                timestamp,
            },
            offset,
        ))
    }
}

/// The fixed 44-byte trailer locating every structural block.
#[derive(Debug, Clone, PartialEq)]
pub struct Footer {
    pub meta_offset: i64,
    pub meta_size: u32,
    pub index_offset: i64,
    pub index_size: u32,
    pub filter_offset: i64,
    pub filter_size: u32,
    pub magic: u64,
}

impl Encode for Footer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.meta_offset.encode_to(buf)?;
        self.meta_size.encode_to(buf)?;
        self.index_offset.encode_to(buf)?;
        self.index_size.encode_to(buf)?;
        self.filter_offset.encode_to(buf)?;
        self.filter_size.encode_to(buf)?;
        self.magic.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Footer {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (meta_offset, n) = i64::decode_from(buf)?;
        offset += n;
        let (meta_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (index_offset, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (index_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (filter_offset, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (filter_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (magic, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                meta_offset,
                meta_size,
                index_offset,
                index_size,
                filter_offset,
                filter_size,
                magic,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Block decoding
// ------------------------------------------------------------------------------------------------

/// Streaming decoder over one decompressed data block.
///
/// Reconstructs full keys by splicing each entry's suffix onto the running
/// previous key at the recorded prefix length. Entries read from disk carry
/// version 0 — the version field is persisted only in the WAL.
pub(crate) struct BlockCursor {
    data: Vec<u8>,
    pos: usize,
    prev_key: Vec<u8>,
}

impl BlockCursor {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            prev_key: Vec::new(),
        }
    }

    /// Decodes the next entry, or `None` at end of block.
    pub(crate) fn next_entry(&mut self) -> Result<Option<Entry>, SSTableError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }

        let buf = &self.data[self.pos..];
        let mut offset = 0;

        let (lcp, n) = u16::decode_from(buf)?;
        offset += n;
        let (suffix_len, n) = u16::decode_from(&buf[offset..])?;
        offset += n;

        let lcp = lcp as usize;
        let suffix_len = suffix_len as usize;
        if lcp > self.prev_key.len() {
            return Err(SSTableError::Corrupt(format!(
                "prefix length {} exceeds previous key length {}",
                lcp,
                self.prev_key.len()
            )));
        }
        if offset + suffix_len > buf.len() {
            return Err(SSTableError::Corrupt("truncated key suffix".into()));
        }

        let mut key = Vec::with_capacity(lcp + suffix_len);
        key.extend_from_slice(&self.prev_key[..lcp]);
        key.extend_from_slice(&buf[offset..offset + suffix_len]);
        offset += suffix_len;

        let (value_len, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let value_len = value_len as usize;
        if offset + value_len > buf.len() {
            return Err(SSTableError::Corrupt("truncated value".into()));
        }
        let value = buf[offset..offset + value_len].to_vec();
        offset += value_len;

        let (tombstone, n) = bool::decode_from(&buf[offset..])?;
        offset += n;

        self.pos += offset;
        self.prev_key = key.clone();

        Ok(Some(Entry {
            key,
            value,
            tombstone,
            version: 0,
        }))
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// An open, immutable SSTable.
pub struct SSTable {
    /// Read-only mapping of the whole file.
    mmap: Mmap,

    /// Decoded index block, one record per data block.
    index: Vec<IndexRecord>,

    /// Decoded meta block.
    meta: MetaBlock,

    /// Decoded bloom filter.
    filter: BloomFilter,

    /// Path of the backing file.
    path: PathBuf,
}

impl SSTable {
    /// Opens a table, verifying the footer magic and decoding the index,
    /// meta, and filter blocks.
    ///
    /// `config` must carry the same filter parameters the table was
    /// written with.
    pub fn open(path: impl AsRef<Path>, config: &TableConfig) -> Result<Self, SSTableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        // Mapping a file we never write to; all block extents are
        // bounds-checked before slicing.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FOOTER_SIZE {
            return Err(SSTableError::Corrupt(format!(
                "file is {} bytes, smaller than the footer",
                mmap.len()
            )));
        }

        let (footer, _) = Footer::decode_from(&mmap[mmap.len() - FOOTER_SIZE..])?;
        if footer.magic != MAGIC {
            return Err(SSTableError::BadMagic(footer.magic));
        }

        let index_bytes = Self::slice(&mmap, footer.index_offset, footer.index_size)?;
        let mut index = Vec::new();
        let mut offset = 0;
        while offset < index_bytes.len() {
            let (record, n) = IndexRecord::decode_from(&index_bytes[offset..])?;
            offset += n;
            index.push(record);
        }

        let meta_bytes = Self::slice(&mmap, footer.meta_offset, footer.meta_size)?;
        let (meta, _) = MetaBlock::decode_from(meta_bytes)?;

        let filter_bytes = Self::slice(&mmap, footer.filter_offset, footer.filter_size)?;
        let filter = BloomFilter::decode(
            filter_bytes,
            config.expected_entry_count,
            config.filter_false_positive_rate,
        )?;

        trace!(
            "opened SSTable {:?}: {} entries, {} blocks",
            path,
            meta.entry_count,
            index.len()
        );

        Ok(Self {
            mmap,
            index,
            meta,
            filter,
            path,
        })
    }

    /// Point lookup.
    ///
    /// Returns the stored entry (tombstones included) or `None` when the
    /// table holds no information about `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, SSTableError> {
        if self.index.is_empty() {
            return Ok(None);
        }
        if key < self.meta.min_key.as_slice() || key > self.meta.max_key.as_slice() {
            return Ok(None);
        }
        if !self.filter.contains(key) {
            return Ok(None);
        }

        // First block whose last key is >= key is the only one that can
        // contain it.
        let block_idx = self
            .index
            .partition_point(|record| record.last_key.as_slice() < key);
        if block_idx == self.index.len() {
            return Ok(None);
        }

        let mut cursor = BlockCursor::new(self.read_block(&self.index[block_idx])?);
        while let Some(entry) = cursor.next_entry()? {
            if entry.key.as_slice() == key {
                return Ok(Some(entry));
            }
            if entry.key.as_slice() > key {
                break;
            }
        }
        Ok(None)
    }

    /// Reads and decompresses one data block.
    pub(crate) fn read_block(&self, record: &IndexRecord) -> Result<Vec<u8>, SSTableError> {
        let compressed = Self::slice(&self.mmap, record.offset, record.size as u32)?;
        snap::raw::Decoder::new()
            .decompress_vec(compressed)
            .map_err(|e| SSTableError::Corrupt(format!("block decompression failed: {e}")))
    }

    /// Number of data blocks.
    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Index record for block `idx`.
    pub(crate) fn index_record(&self, idx: usize) -> &IndexRecord {
        &self.index[idx]
    }

    /// Table statistics.
    pub fn meta(&self) -> &MetaBlock {
        &self.meta
    }

    /// Total number of entries stored.
    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bounds-checked slice of the mapping.
    fn slice(mmap: &Mmap, offset: i64, size: u32) -> Result<&[u8], SSTableError> {
        let start = usize::try_from(offset)
            .map_err(|_| SSTableError::Corrupt(format!("negative block offset {offset}")))?;
        let end = start
            .checked_add(size as usize)
            .filter(|&end| end <= mmap.len())
            .ok_or_else(|| {
                SSTableError::Corrupt(format!(
                    "block [{offset}, +{size}) exceeds file of {} bytes",
                    mmap.len()
                ))
            })?;
        Ok(&mmap[start..end])
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.path)
            .field("entries", &self.meta.entry_count)
            .field("blocks", &self.index.len())
            .finish()
    }
}
