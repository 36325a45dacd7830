//! # chainstore - Blockchain Transaction Storage Engine
//!
//! chainstore is the core transaction store of a blockchain database: a
//! disk-backed, hash-indexed, variable-length record store holding every
//! confirmed and pooled transaction. It supports in-place mutation of a
//! small metadata prefix (confirmation state, height, position, and
//! per-output spent markers) while record bodies stay immutable, over a
//! memory-mapped file that grows on demand and remains safe under
//! concurrent readers.
//!
//! ## Quick Start
//!
//! ```ignore
//! use chainstore::{Settings, TransactionStore, POOL_FORK_HEIGHT};
//!
//! let store = TransactionStore::create("txs.db", Settings::default())?;
//!
//! let offset = store.pool(&tx, 7)?;
//! store.confirm(offset, 100, 1_600_000_000, 3)?;
//!
//! let prevout = store.get_output(&point, 100)?;
//!
//! store.commit()?;
//! store.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------+
//! |        TransactionStore (engine)          |
//! |  store / confirm / unconfirm / get_output |
//! +-------------------------------------------+
//! |      HashTable (chained, on-disk)         |
//! |   find(hash) | get(offset) | link/commit  |
//! +-------------------------------------------+
//! |     bump allocation at the watermark      |
//! +-------------------------------------------+
//! |   MappedFile + View (self-growing mmap)   |
//! +-------------------------------------------+
//! ```
//!
//! Data flows top-down; views pin the mapping bottom-up so growth can
//! never move bytes under a live reader.
//!
//! ## Record Mutability
//!
//! A record is written once inside a create-then-link window. After
//! publication, exactly two regions change, both under the store's
//! metadata lock: the 11-byte metadata prefix and each output's 5-byte
//! spend slot. Everything else is immutable for the record's lifetime,
//! which is what lets readers walk bodies without locks.
//!
//! ## Durability
//!
//! `commit` publishes the allocation watermark; `flush` syncs the mapped
//! range; `close` commits, syncs, and truncates reserved headroom. After a
//! crash the store reopens at the last committed watermark - allocations
//! past it, linked or not, are invisible and their space is reused.
//!
//! ## Module Overview
//!
//! - [`memory`]: self-growing memory-mapped file and scoped views
//! - [`table`]: on-disk chained hash index and record slabs
//! - [`store`]: the transaction engine, results, states, cache, settings
//! - [`chain`]: transaction domain model and serialization
//! - [`encoding`]: compact varints and record byte cursors

pub mod chain;
pub mod encoding;
pub mod memory;
pub mod store;
pub mod table;

pub use chain::{HashDigest, Input, OutPoint, Output, Transaction, NOT_SPENT};
pub use store::{
    FileOffset, Prevout, Settings, TransactionResult, TransactionState, TransactionStore,
    POOL_FORK_HEIGHT, UNCONFIRMED_POSITION, UNVERIFIED_FORKS,
};
