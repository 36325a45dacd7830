//! Output points.
//!
//! An `OutPoint` names one output of a previous transaction. The null point
//! (null hash, maximum index) is the coinbase marker: a coinbase input
//! spends nothing, so most store operations short-circuit on it.

use crate::chain::hash::{HashDigest, NULL_HASH};

/// Prev-out index marking a null (coinbase) point.
pub const NULL_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub hash: HashDigest,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: HashDigest, index: u32) -> Self {
        Self { hash, index }
    }

    pub fn null() -> Self {
        Self {
            hash: NULL_HASH,
            index: NULL_INDEX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == NULL_INDEX && self.hash == NULL_HASH
    }

    /// Rebuild a point from its record form, where the null index is
    /// narrowed to the two-byte maximum.
    pub fn from_stored(hash: HashDigest, stored_index: u16) -> Self {
        if stored_index == u16::MAX && hash == NULL_HASH {
            Self::null()
        } else {
            Self::new(hash, stored_index as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_point_round_trip() {
        let point = OutPoint::null();
        assert!(point.is_null());

        let spend = OutPoint::new([7u8; 32], 0);
        assert!(!spend.is_null());

        // A null hash with a real index is not the coinbase marker.
        let odd = OutPoint::new(NULL_HASH, 3);
        assert!(!odd.is_null());
    }
}
