//! # LoamDB
//!
//! An embeddable, single-node key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)**. Writes land in an in-memory
//! skip list backed by a write-ahead log; full memtables are flushed into
//! immutable, block-compressed sorted tables arranged in levels and merged
//! by compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       Engine                          │
//! │  ┌──────────────┐        ┌─────────────────────────┐  │
//! │  │   Memtable    │ flush │     SSTable manager     │  │
//! │  │  (skip list)  ├──────►│  level 0: newest runs   │  │
//! │  │    + WAL      │       │  level 1: compacted     │  │
//! │  └──────┬───────┘        │  level N: oldest        │  │
//! │         │ append-first   └───────────┬─────────────┘  │
//! │  ┌──────▼───────┐        ┌───────────▼─────────────┐  │
//! │  │  wal-*.log   │        │  <level>.<seq>.sst      │  │
//! │  │  (replayed   │        │  + manifest             │  │
//! │  │   on open)   │        │  (pairwise compaction)  │  │
//! │  └──────────────┘        └─────────────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Top-level façade — open, get, set, delete, close |
//! | [`memtable`] | In-memory write buffer: skip list + WAL + size counter |
//! | [`skiplist`] | Probabilistic ordered map behind the memtable |
//! | [`wal`] | CRC-protected, generation-numbered write-ahead log |
//! | [`sstable`] | Immutable on-disk tables: writer, reader, iterator, compactor |
//! | [`manager`] | Leveled table layout, manifest, recovery, compaction driver |
//! | [`bloom`] | Per-table bloom filter for fast negative lookups |
//! | [`encoding`] | Byte-stable little-endian codec for every on-disk format |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loamdb::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! engine.set("hello", "world").unwrap();
//! assert_eq!(engine.get("hello").unwrap(), b"world");
//!
//! engine.delete("hello").unwrap();
//! assert!(engine.get("hello").is_err()); // "key does not exist"
//!
//! engine.close().unwrap();
//! ```

pub mod bloom;
pub mod encoding;
pub mod engine;
pub mod entry;
pub mod manager;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
pub mod wal;

pub use engine::{Engine, EngineConfig, EngineError};
pub use entry::{Entry, Key};
