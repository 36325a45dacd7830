//! Transaction hashing.
//!
//! Transactions are identified by the double-SHA-256 of their wire
//! serialization. The digest is stored and compared in its natural byte
//! order; display-order reversal is a presentation concern this layer does
//! not have.

use sha2::{Digest, Sha256};

pub type HashDigest = [u8; 32];

pub const HASH_SIZE: usize = 32;

pub const NULL_HASH: HashDigest = [0u8; HASH_SIZE];

/// Double-SHA-256 over arbitrary bytes.
pub fn bitcoin_hash(data: &[u8]) -> HashDigest {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);

    let mut digest = [0u8; HASH_SIZE];
    digest.copy_from_slice(&second);
    digest
}
