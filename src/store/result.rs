//! # Transaction Query Results
//!
//! `TransactionResult` wraps a found record: the metadata prefix, read once
//! under the shared metadata lock at construction, plus scoped access to
//! the immutable body. The record layout knowledge needed to seek through
//! outputs and inputs lives here and in the engine's spend path; the two
//! must agree byte for byte.

use eyre::{eyre, Result};
use parking_lot::RwLock;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::chain::{HashDigest, OutPoint, Output, OutputEntry, Transaction, SPEND_SIZE};
use crate::store::state::TransactionState;
use crate::table::Element;

pub(crate) const HEIGHT_SIZE: usize = 4;
pub(crate) const POSITION_SIZE: usize = 2;
pub(crate) const STATE_SIZE: usize = 1;
pub(crate) const MEDIAN_TIME_PAST_SIZE: usize = 4;

/// Length of the mutable metadata prefix.
pub const METADATA_SIZE: usize =
    HEIGHT_SIZE + POSITION_SIZE + STATE_SIZE + MEDIAN_TIME_PAST_SIZE;

const SEQUENCE_SIZE: usize = 4;

/// The 11-byte metadata prefix, as laid out on disk.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct RecordMeta {
    height: U32,
    position: U16,
    state: u8,
    median_time_past: U32,
}

const _: () = assert!(std::mem::size_of::<RecordMeta>() == METADATA_SIZE);

impl RecordMeta {
    pub(crate) fn new(
        height: u32,
        position: u16,
        state: TransactionState,
        median_time_past: u32,
    ) -> Self {
        Self {
            height: U32::new(height),
            position: U16::new(position),
            state: state as u8,
            median_time_past: U32::new(median_time_past),
        }
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        Self::read_from_bytes(bytes)
            .map_err(|error| eyre!("failed to parse record metadata: {:?}", error))
    }
}

/// Previous-output metadata populated by `get_output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prevout {
    pub output: Output,
    pub height: u32,
    pub median_time_past: u32,
    pub confirmed: bool,
    pub coinbase: bool,
    pub spent: bool,
}

pub struct TransactionResult<'a> {
    element: Element,
    meta: RecordMeta,
    state: TransactionState,
    metadata_lock: &'a RwLock<()>,
}

impl<'a> TransactionResult<'a> {
    pub(crate) fn new(element: Element, metadata_lock: &'a RwLock<()>) -> Result<Self> {
        // Lock order is mapping first, metadata second, everywhere.
        let bytes = element.read(|reader| {
            let _shared = metadata_lock.read();
            reader.read_bytes(METADATA_SIZE)
        })?;
        let meta = RecordMeta::parse(&bytes)?;
        let state = TransactionState::from_u8(meta.state)?;

        Ok(Self {
            element,
            meta,
            state,
            metadata_lock,
        })
    }

    /// The record's file offset, valid for `get` and `confirm`/`unconfirm`.
    pub fn offset(&self) -> u64 {
        self.element.offset()
    }

    pub fn hash(&self) -> Result<HashDigest> {
        self.element.key()
    }

    pub fn height(&self) -> u32 {
        self.meta.height.get()
    }

    pub fn position(&self) -> u16 {
        self.meta.position.get()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn median_time_past(&self) -> u32 {
        self.meta.median_time_past.get()
    }

    /// Confirmed at position zero means the block's coinbase.
    pub fn is_coinbase(&self) -> bool {
        self.meta.position.get() == 0
    }

    /// Deserialize the full transaction body.
    pub fn transaction(&self) -> Result<Transaction> {
        self.element.read(|reader| {
            // Shared lock: the body read skims across the per-output spend
            // slots, which a concurrent confirm may be rewriting.
            let _shared = self.metadata_lock.read();
            reader.skip(METADATA_SIZE)?;
            Transaction::read_record(reader)
        })
    }

    /// The output at `index` with its current spender height, or `None`
    /// when the index is out of range.
    pub fn output(&self, index: u32) -> Result<Option<OutputEntry>> {
        self.element.read(|reader| {
            reader.skip(METADATA_SIZE)?;
            let count = reader.read_varint()?;
            if index as u64 >= count {
                return Ok(None);
            }

            for _ in 0..index {
                reader.skip(SPEND_SIZE)?;
                let script_len = reader.read_varint()? as usize;
                reader.skip(script_len)?;
            }

            let _shared = self.metadata_lock.read();
            OutputEntry::read_record(reader).map(Some)
        })
    }

    /// Every input's previous output, in input order.
    pub fn input_points(&self) -> Result<Vec<OutPoint>> {
        self.element.read(|reader| {
            reader.skip(METADATA_SIZE)?;

            let outputs = reader.read_varint()?;
            for _ in 0..outputs {
                reader.skip(SPEND_SIZE)?;
                let script_len = reader.read_varint()? as usize;
                reader.skip(script_len)?;
            }

            let inputs = reader.read_varint()?;
            let mut points = Vec::with_capacity(inputs as usize);
            for _ in 0..inputs {
                let hash = reader.read_hash()?;
                let stored_index = reader.read_u16_le()?;
                let script_len = reader.read_varint()? as usize;
                reader.skip(script_len)?;
                reader.skip(SEQUENCE_SIZE)?;
                points.push(OutPoint::from_stored(hash, stored_index));
            }

            Ok(points)
        })
    }
}
