//! Write-ahead log: the durability backstop for the memtable.
//!
//! Every mutation is appended here **before** it is applied in memory, so a
//! crash between the two steps leaves on disk a superset of acknowledged
//! state that replay reconstructs.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! - **Header** — magic `b"LWAL"`, format version, and the file's
//!   generation number, followed by a CRC32 of the header bytes.
//! - **Record** — a 4-byte little-endian length prefix, the encoded
//!   [`WalRecord`], and a CRC32 computed over `len || record_bytes`.
//!
//! Record payloads are tagged: a one-byte discriminant distinguishes sets
//! from deletes, and keys are length-prefixed. Together with the
//! generation number embedded in the filename (`wal-<generation>.log`,
//! replayed oldest-first), this makes recovery unambiguous.
//!
//! # Durability
//!
//! `append` returns only after the write syscall has completed; when the
//! sync-on-append policy is enabled (the default) it additionally calls
//! `sync_all` so the record survives power loss.
//!
//! # Concurrency
//!
//! The file handle lives behind `Arc<Mutex<File>>`; appends are atomic with
//! respect to each other, and [`WalIter`] seeks to its own logical offset
//! before every read so replay tolerates concurrent appenders.

#[cfg(test)]
mod tests;

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{error, info, trace, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::entry::Key;

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Encoded header length: magic (4) + version (4) + generation (8).
const HEADER_SIZE: usize = 16;

/// Upper bound on a single framed record, guarding replay against
/// corrupted length fields.
const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record encode/decode failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Data integrity failure — checksum did not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A length prefix exceeded the record size bound.
    #[error("record size {0} exceeds limit")]
    RecordTooLarge(usize),

    /// Truncated record at the end of the file.
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// WAL header failed validation.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// A single logged mutation.
///
/// The wire form starts with a one-byte tag (`0x00` = set, `0x01` =
/// delete) so that deletions are distinguishable from writes of an empty
/// value during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Insert or update a key.
    Set {
        key: Key,
        value: Vec<u8>,
        version: u64,
    },

    /// Delete a key.
    Delete { key: Key, version: u64 },
}

impl WalRecord {
    /// The key this record mutates.
    pub fn key(&self) -> &[u8] {
        match self {
            WalRecord::Set { key, .. } => key,
            WalRecord::Delete { key, .. } => key,
        }
    }

    /// The version assigned to this mutation.
    pub fn version(&self) -> u64 {
        match self {
            WalRecord::Set { version, .. } => *version,
            WalRecord::Delete { version, .. } => *version,
        }
    }
}

impl Encode for WalRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            WalRecord::Set {
                key,
                value,
                version,
            } => {
                0u8.encode_to(buf)?;
                key.encode_to(buf)?;
                value.encode_to(buf)?;
                version.encode_to(buf)?;
            }
            WalRecord::Delete { key, version } => {
                1u8.encode_to(buf)?;
                key.encode_to(buf)?;
                version.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for WalRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u8::decode_from(buf)?;
        offset += n;
        match tag {
            0 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (version, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    WalRecord::Set {
                        key,
                        value,
                        version,
                    },
                    offset,
                ))
            }
            1 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (version, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((WalRecord::Delete { key, version }, offset))
            }
            tag => Err(EncodingError::InvalidTag {
                tag,
                type_name: "WalRecord",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Metadata written at the start of every WAL file.
#[derive(Debug)]
struct WalHeader {
    magic: [u8; 4],
    version: u32,
    generation: u64,
}

impl WalHeader {
    const MAGIC: [u8; 4] = *b"LWAL";
    const VERSION: u32 = 1;
}

impl Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.generation.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for WalHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = <[u8; 4]>::decode_from(buf)?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (generation, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                generation,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// WAL core
// ------------------------------------------------------------------------------------------------

/// An append-only, CRC-protected mutation log.
///
/// One WAL file backs one memtable generation; the generation number is
/// embedded in the filename so recovery can order files oldest-first.
#[derive(Debug)]
pub struct Wal {
    /// Shared file handle; serializes appends and replay reads.
    file: Arc<Mutex<File>>,

    /// Path of the backing file.
    path: PathBuf,

    /// Generation number parsed from (or written into) the filename.
    generation: u64,

    /// Whether `append` fsyncs after each record.
    sync_on_append: bool,
}

impl Wal {
    /// Opens (or creates) the WAL file for `generation` inside `dir`.
    pub fn open(dir: &Path, generation: u64, sync_on_append: bool) -> Result<Self, WalError> {
        let path = dir.join(Self::file_name(generation));
        Self::open_path(&path, sync_on_append)
    }

    /// Opens an existing (or new) WAL file at `path`.
    ///
    /// The generation number is parsed from the filename; a file that does
    /// not follow the `wal-<generation>.log` convention is rejected.
    pub fn open_path(path: &Path, sync_on_append: bool) -> Result<Self, WalError> {
        let generation = Self::parse_generation(path).ok_or_else(|| {
            WalError::InvalidHeader(format!("filename {path:?} is not wal-<generation>.log"))
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        if file.metadata()?.len() == 0 {
            Self::write_header(&mut file, generation)?;
            info!("created WAL {:?} (generation {})", path, generation);
        } else {
            file.seek(SeekFrom::Start(0))?;

            let mut header_bytes = [0u8; HEADER_SIZE];
            file.read_exact(&mut header_bytes)?;

            let mut checksum_bytes = [0u8; U32_SIZE];
            file.read_exact(&mut checksum_bytes)?;
            let stored = u32::from_le_bytes(checksum_bytes);

            let mut hasher = Crc32::new();
            hasher.update(&header_bytes);
            if hasher.finalize() != stored {
                return Err(WalError::InvalidHeader("header checksum mismatch".into()));
            }

            let (header, _) = encoding::decode_from_slice::<WalHeader>(&header_bytes)?;
            if header.magic != WalHeader::MAGIC {
                return Err(WalError::InvalidHeader("bad magic".into()));
            }
            if header.version != WalHeader::VERSION {
                return Err(WalError::InvalidHeader(format!(
                    "unsupported version {}",
                    header.version
                )));
            }
            if header.generation != generation {
                return Err(WalError::InvalidHeader(format!(
                    "header generation {} does not match filename generation {}",
                    header.generation, generation
                )));
            }

            trace!("opened existing WAL {:?} (generation {})", path, generation);
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
            generation,
            sync_on_append,
        })
    }

    /// Canonical filename for a generation.
    pub fn file_name(generation: u64) -> String {
        format!("wal-{generation:06}.log")
    }

    /// Parses the generation out of a `wal-<generation>.log` filename.
    pub fn parse_generation(path: &Path) -> Option<u64> {
        let name = path.file_name().and_then(OsStr::to_str)?;
        name.strip_prefix("wal-")?
            .strip_suffix(".log")?
            .parse::<u64>()
            .ok()
    }

    /// Appends one record.
    ///
    /// The record is framed as `[u32 len][record_bytes][u32 crc32]` with
    /// the CRC computed over `len || record_bytes`. Returns after the
    /// write syscall; fsyncs when the sync policy is enabled.
    pub fn append(&self, record: &WalRecord) -> Result<(), WalError> {
        trace!("appending WAL record: {:?}", record);

        let record_bytes = encoding::encode_to_vec(record)?;
        let record_len = record_bytes.len() as u32;

        let mut hasher = Crc32::new();
        hasher.update(&record_len.to_le_bytes());
        hasher.update(&record_bytes);
        let checksum = hasher.finalize();

        let mut guard = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;

        guard.write_all(&record_len.to_le_bytes())?;
        guard.write_all(&record_bytes)?;
        guard.write_all(&checksum.to_le_bytes())?;
        if self.sync_on_append {
            guard.sync_all()?;
        }

        Ok(())
    }

    /// Returns an iterator replaying every record in append order.
    pub fn replay_iter(&self) -> WalIter {
        WalIter {
            file: Arc::clone(&self.file),
            offset: (HEADER_SIZE + U32_SIZE) as u64,
        }
    }

    /// Truncates the log back to a bare header.
    pub fn truncate(&self) -> Result<(), WalError> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;

        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        Self::write_header(&mut guard, self.generation)?;

        info!("truncated WAL {:?}", self.path);
        Ok(())
    }

    /// Removes the backing file from disk, consuming the handle.
    pub fn delete(self) -> Result<(), WalError> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(&path)?;
        info!("deleted WAL {:?}", path);
        Ok(())
    }

    /// Generation number of this WAL file.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_header(file: &mut File, generation: u64) -> Result<(), WalError> {
        let header = WalHeader {
            magic: WalHeader::MAGIC,
            version: WalHeader::VERSION,
            generation,
        };
        let header_bytes = encoding::encode_to_vec(&header)?;

        let mut hasher = Crc32::new();
        hasher.update(&header_bytes);
        let checksum = hasher.finalize();

        file.write_all(&header_bytes)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        match self.file.lock() {
            Ok(guard) => {
                if let Err(e) = guard.sync_all() {
                    error!("failed to sync WAL on drop: {}", e);
                }
            }
            Err(poisoned) => {
                let file = poisoned.into_inner();
                if let Err(e) = file.sync_all() {
                    error!("failed to sync WAL (poisoned) on drop: {}", e);
                } else {
                    warn!("recovered and synced WAL after poisoned lock");
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Replay iterator
// ------------------------------------------------------------------------------------------------

/// Streaming replay over a WAL file.
///
/// Reads one framed record at a time, verifies its checksum, and yields
/// the decoded [`WalRecord`]. The iterator tracks its own offset and
/// seeks before every read, so it stays correct if records are appended
/// behind it.
pub struct WalIter {
    file: Arc<Mutex<File>>,
    offset: u64,
}

impl Iterator for WalIter {
    type Item = Result<WalRecord, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return Some(Err(WalError::Internal("mutex poisoned".into()))),
        };

        if let Err(e) = guard.seek(SeekFrom::Start(self.offset)) {
            return Some(Err(WalError::Io(e)));
        }

        let mut len_bytes = [0u8; U32_SIZE];
        match guard.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(WalError::Io(e))),
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > MAX_RECORD_SIZE {
            return Some(Err(WalError::RecordTooLarge(record_len)));
        }

        let mut record_bytes = vec![0u8; record_len];
        if let Err(e) = guard.read_exact(&mut record_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }

        let mut checksum_bytes = [0u8; U32_SIZE];
        if let Err(e) = guard.read_exact(&mut checksum_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        if let Ok(pos) = guard.stream_position() {
            self.offset = pos;
        }

        let mut hasher = Crc32::new();
        hasher.update(&len_bytes);
        hasher.update(&record_bytes);
        if hasher.finalize() != stored_checksum {
            error!("checksum mismatch for WAL record of length {}", record_len);
            return Some(Err(WalError::ChecksumMismatch));
        }

        match encoding::decode_from_slice::<WalRecord>(&record_bytes) {
            Ok((record, _)) => Some(Ok(record)),
            Err(e) => Some(Err(WalError::Encoding(e))),
        }
    }
}
