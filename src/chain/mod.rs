//! # Chain Module
//!
//! The transaction domain model the store operates on: hashes, output
//! points, inputs, outputs, and transactions, with the wire serialization
//! that defines transaction identity and the record serialization that
//! defines the on-disk body layout.
//!
//! Consensus validation, script interpretation, and the full wire protocol
//! live with the surrounding chain library; this module carries only what
//! the storage engine needs to write, seek through, and reconstruct
//! records.

mod hash;
mod point;
mod transaction;

pub use hash::{bitcoin_hash, HashDigest, HASH_SIZE, NULL_HASH};
pub use point::{OutPoint, NULL_INDEX};
pub use transaction::{
    Input, Output, OutputEntry, Transaction, INDEX_SPENT_SIZE, NOT_SPENT, SPENDER_HEIGHT_SIZE,
    SPEND_SIZE, VALUE_SIZE,
};
