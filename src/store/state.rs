//! Transaction confirmation states.
//!
//! The state byte is the third field of every record's metadata prefix.
//! `Indexed` marks a transaction confirmed along a branch that is not the
//! current best chain; `Invalid` is terminal.
//!
//! ```text
//!         store()           confirm()
//! Stored --------> Pooled ----------> Confirmed
//!                    ^                    |
//!                    +---- unconfirm() ---+
//! ```

use eyre::{eyre, Result};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Invalid = 0,
    Stored = 1,
    Pooled = 2,
    Indexed = 3,
    Confirmed = 4,
}

impl TransactionState {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::Stored),
            2 => Ok(Self::Pooled),
            3 => Ok(Self::Indexed),
            4 => Ok(Self::Confirmed),
            other => Err(eyre!("corrupt transaction state byte: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_byte_round_trip() {
        for state in [
            TransactionState::Invalid,
            TransactionState::Stored,
            TransactionState::Pooled,
            TransactionState::Indexed,
            TransactionState::Confirmed,
        ] {
            assert_eq!(TransactionState::from_u8(state as u8).unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_byte_is_rejected() {
        assert!(TransactionState::from_u8(5).is_err());
        assert!(TransactionState::from_u8(0xff).is_err());
    }
}
