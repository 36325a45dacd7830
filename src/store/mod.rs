//! # Store Module
//!
//! The transaction engine and its support types: the store itself, query
//! results, the confirmation-state enum, the unspent-output cache, and
//! configuration.
//!
//! ## Sentinels
//!
//! The on-disk format reserves a handful of field values; they are part of
//! the format, not implementation details:
//!
//! - [`UNCONFIRMED_POSITION`]: a record's position while it is not in a
//!   block (stored, pooled, or invalid states)
//! - [`POOL_FORK_HEIGHT`]: passed to `get_output` to request mempool
//!   semantics instead of a chain-relative view
//! - [`UNVERIFIED_FORKS`]: the height/forks field after `unconfirm`, when
//!   the prior validation context is gone
//! - `NOT_SPENT` (in [`crate::chain`]): the spender height of an unspent
//!   output

mod cache;
mod result;
mod settings;
mod state;
mod transaction_store;

pub use result::{Prevout, TransactionResult, METADATA_SIZE};
pub use settings::Settings;
pub use state::TransactionState;
pub use transaction_store::{FileOffset, TransactionStore};

/// Position sentinel: the transaction is not in any block.
pub const UNCONFIRMED_POSITION: u16 = u16::MAX;

/// Fork height requesting pool semantics from `get_output`.
pub const POOL_FORK_HEIGHT: u64 = u64::MAX;

/// Height/forks value for a transaction whose validation context is
/// unknown, written by `unconfirm`.
pub const UNVERIFIED_FORKS: u32 = 0;
