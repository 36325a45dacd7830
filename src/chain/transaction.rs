//! # Transaction Domain Model
//!
//! Minimal transaction structures plus their two serializations:
//!
//! - **Wire form** (version, inputs, outputs, locktime with fixed-width
//!   integers) exists only to compute the transaction hash.
//! - **Record form** is the database layout: outputs first, each prefixed
//!   with its 5-byte mutable spend slot, then inputs, then locktime and
//!   version as varints. The engine seeks through this layout when marking
//!   outputs spent, so the byte arithmetic here and in the engine must
//!   agree exactly.
//!
//! ## Record Body Layout (little-endian)
//!
//! ```text
//! output_count: varint
//! per output:  [ index_spent_flag:1 ][ spender_height:4 ]   <- mutable slot
//!              [ value:8 ][ script: varint+bytes ]
//! input_count: varint
//! per input:   [ prev_hash:32 ][ prev_index:2 ]
//!              [ script: varint+bytes ][ sequence:4 ]
//! locktime: varint
//! version: varint
//! ```
//!
//! The spend slot is initialized to `(0, NOT_SPENT)` at store time and only
//! ever rewritten through the engine's metadata lock. The flag byte is
//! reserved; spentness is derived from `spender_height` alone.

use eyre::{ensure, Result};

use crate::chain::hash::{bitcoin_hash, HashDigest};
use crate::chain::point::OutPoint;
use crate::encoding::{varint_len, RecordReader, RecordWriter, MAX_VARINT_LEN};

pub const INDEX_SPENT_SIZE: usize = 1;
pub const SPENDER_HEIGHT_SIZE: usize = 4;
pub const VALUE_SIZE: usize = 8;

/// Bytes preceding each output's script: spend slot plus value.
pub const SPEND_SIZE: usize = INDEX_SPENT_SIZE + SPENDER_HEIGHT_SIZE + VALUE_SIZE;

/// Spender-height sentinel meaning the output is unspent.
pub const NOT_SPENT: u32 = u32::MAX;

const PREV_INDEX_SIZE: usize = 2;
const SEQUENCE_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub value: u64,
    pub script: Vec<u8>,
}

impl Output {
    pub fn new(value: u64, script: Vec<u8>) -> Self {
        Self { value, script }
    }

    pub fn record_size(&self) -> usize {
        SPEND_SIZE + varint_len(self.script.len() as u64) + self.script.len()
    }

    fn write_record(&self, writer: &mut RecordWriter<'_>) -> Result<()> {
        writer.write_u8(0)?;
        writer.write_u32_le(NOT_SPENT)?;
        writer.write_u64_le(self.value)?;
        writer.write_varint(self.script.len() as u64)?;
        writer.write_bytes(&self.script)
    }
}

/// One output as read back from a record: the body plus the current value
/// of its mutable spend slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEntry {
    pub spender_height: u32,
    pub output: Output,
}

impl OutputEntry {
    pub fn read_record(reader: &mut RecordReader<'_>) -> Result<Self> {
        reader.read_u8()?; // reserved flag byte
        let spender_height = reader.read_u32_le()?;
        let value = reader.read_u64_le()?;
        let script_len = reader.read_varint()? as usize;
        let script = reader.read_bytes(script_len)?;

        Ok(Self {
            spender_height,
            output: Output { value, script },
        })
    }

    /// Spent as observed at `fork_height`.
    pub fn spent(&self, fork_height: u64) -> bool {
        self.spender_height != NOT_SPENT && (self.spender_height as u64) <= fork_height
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub previous_output: OutPoint,
    pub script: Vec<u8>,
    pub sequence: u32,
}

impl Input {
    pub fn new(previous_output: OutPoint, script: Vec<u8>, sequence: u32) -> Self {
        Self {
            previous_output,
            script,
            sequence,
        }
    }

    pub fn record_size(&self) -> usize {
        crate::chain::hash::HASH_SIZE
            + PREV_INDEX_SIZE
            + varint_len(self.script.len() as u64)
            + self.script.len()
            + SEQUENCE_SIZE
    }

    fn write_record(&self, writer: &mut RecordWriter<'_>) -> Result<()> {
        // The record stores prev indexes in two bytes; the null (coinbase)
        // index maps to the two-byte maximum.
        let index = self.previous_output.index;
        let stored_index = if self.previous_output.is_null() {
            u16::MAX
        } else {
            ensure!(
                index <= u16::MAX as u32,
                "input prev index {} exceeds storable range",
                index
            );
            index as u16
        };

        writer.write_bytes(&self.previous_output.hash)?;
        writer.write_u16_le(stored_index)?;
        writer.write_varint(self.script.len() as u64)?;
        writer.write_bytes(&self.script)?;
        writer.write_u32_le(self.sequence)
    }

    fn read_record(reader: &mut RecordReader<'_>) -> Result<Self> {
        let hash = reader.read_hash()?;
        let stored_index = reader.read_u16_le()?;
        let script_len = reader.read_varint()? as usize;
        let script = reader.read_bytes(script_len)?;
        let sequence = reader.read_u32_le()?;

        Ok(Self {
            previous_output: OutPoint::from_stored(hash, stored_index),
            script,
            sequence,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub locktime: u32,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Transaction {
    pub fn new(version: u32, locktime: u32, inputs: Vec<Input>, outputs: Vec<Output>) -> Self {
        Self {
            version,
            locktime,
            inputs,
            outputs,
        }
    }

    /// Exact byte length of the record body this transaction serializes to.
    pub fn record_size(&self) -> usize {
        varint_len(self.outputs.len() as u64)
            + self.outputs.iter().map(Output::record_size).sum::<usize>()
            + varint_len(self.inputs.len() as u64)
            + self.inputs.iter().map(Input::record_size).sum::<usize>()
            + varint_len(self.locktime as u64)
            + varint_len(self.version as u64)
    }

    pub fn write_record(&self, writer: &mut RecordWriter<'_>) -> Result<()> {
        writer.write_varint(self.outputs.len() as u64)?;
        for output in &self.outputs {
            output.write_record(writer)?;
        }

        writer.write_varint(self.inputs.len() as u64)?;
        for input in &self.inputs {
            input.write_record(writer)?;
        }

        writer.write_varint(self.locktime as u64)?;
        writer.write_varint(self.version as u64)
    }

    pub fn read_record(reader: &mut RecordReader<'_>) -> Result<Self> {
        let output_count = reader.read_varint()? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(OutputEntry::read_record(reader)?.output);
        }

        let input_count = reader.read_varint()? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(Input::read_record(reader)?);
        }

        let locktime = reader.read_varint()? as u32;
        let version = reader.read_varint()? as u32;

        Ok(Self {
            version,
            locktime,
            inputs,
            outputs,
        })
    }

    fn wire_size(&self) -> usize {
        4 + varint_len(self.inputs.len() as u64)
            + self
                .inputs
                .iter()
                .map(|input| {
                    32 + 4 + varint_len(input.script.len() as u64) + input.script.len() + 4
                })
                .sum::<usize>()
            + varint_len(self.outputs.len() as u64)
            + self
                .outputs
                .iter()
                .map(|output| 8 + varint_len(output.script.len() as u64) + output.script.len())
                .sum::<usize>()
            + 4
    }

    /// Standard wire serialization, used only for hashing.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.wire_size());

        wire.extend_from_slice(&self.version.to_le_bytes());

        push_varint(&mut wire, self.inputs.len() as u64);
        for input in &self.inputs {
            wire.extend_from_slice(&input.previous_output.hash);
            wire.extend_from_slice(&input.previous_output.index.to_le_bytes());
            push_varint(&mut wire, input.script.len() as u64);
            wire.extend_from_slice(&input.script);
            wire.extend_from_slice(&input.sequence.to_le_bytes());
        }

        push_varint(&mut wire, self.outputs.len() as u64);
        for output in &self.outputs {
            wire.extend_from_slice(&output.value.to_le_bytes());
            push_varint(&mut wire, output.script.len() as u64);
            wire.extend_from_slice(&output.script);
        }

        wire.extend_from_slice(&self.locktime.to_le_bytes());
        wire
    }

    pub fn hash(&self) -> HashDigest {
        bitcoin_hash(&self.to_wire())
    }
}

fn push_varint(buf: &mut Vec<u8>, value: u64) {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let len = crate::encoding::encode_varint(value, &mut scratch);
    buf.extend_from_slice(&scratch[..len]);
}
