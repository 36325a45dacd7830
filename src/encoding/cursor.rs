//! # Record Byte Cursors
//!
//! `RecordReader` and `RecordWriter` are bounds-checked cursors over a raw
//! pointer into the mapped file. All record access goes through them rather
//! than through `&[u8]` slices because a record interleaves immutable bytes
//! with two small mutable regions (the metadata prefix and the per-output
//! spend slots): a Rust reference spanning a region another thread is
//! writing would be undefined behavior, while raw-pointer copies of disjoint
//! byte ranges are not.
//!
//! The cursors never materialize a reference into the mapping. Every read
//! copies into a stack buffer; every write copies out of one. Callers
//! serialize access to the mutable byte ranges (the engine's metadata lock)
//! and never touch unpublished allocations from two threads, which is what
//! makes the writes sound.
//!
//! Both cursors carry a lifetime tying them to the `View` that produced
//! them, so the mapping cannot be remapped out from under a live cursor.
//!
//! Position tracking mirrors a serializer protocol: `skip` advances without
//! touching bytes, `read_varint`/`write_varint` use the compact encoding
//! from [`super::varint`], and all out-of-bounds motion is an error rather
//! than a panic.

use std::marker::PhantomData;
use std::ptr;

use eyre::{ensure, Result};

use super::varint::{decode_varint, encode_varint, varint_len, MAX_VARINT_LEN};

pub struct RecordReader<'a> {
    base: *const u8,
    len: usize,
    pos: usize,
    _view: PhantomData<&'a [u8]>,
}

impl<'a> RecordReader<'a> {
    /// # Safety
    ///
    /// `base` must be valid for reads of `len` bytes for the lifetime `'a`,
    /// and any byte range read concurrently with a writer must be guarded by
    /// a common lock.
    pub(crate) unsafe fn new(base: *const u8, len: usize) -> Self {
        Self {
            base,
            len,
            pos: 0,
            _view: PhantomData,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        ensure!(
            count <= self.remaining(),
            "cursor skip of {} bytes overruns record ({} remaining)",
            count,
            self.remaining()
        );
        self.pos += count;
        Ok(())
    }

    fn copy_out(&mut self, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() <= self.remaining(),
            "cursor read of {} bytes overruns record ({} remaining)",
            buf.len(),
            self.remaining()
        );
        // SAFETY: bounds checked above; base is valid for len bytes per the
        // constructor contract.
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(self.pos), buf.as_mut_ptr(), buf.len());
        }
        self.pos += buf.len();
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.copy_out(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.copy_out(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.copy_out(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.copy_out(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_hash(&mut self) -> Result<[u8; 32]> {
        let mut buf = [0u8; 32];
        self.copy_out(&mut buf)?;
        Ok(buf)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.copy_out(&mut buf)?;
        Ok(buf)
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let peek = self.remaining().min(MAX_VARINT_LEN);
        ensure!(peek > 0, "cursor at end of record reading varint");
        // SAFETY: peek <= remaining, so the range is in bounds.
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(self.pos), buf.as_mut_ptr(), peek);
        }
        let (value, consumed) = decode_varint(&buf[..peek])?;
        self.pos += consumed;
        Ok(value)
    }
}

pub struct RecordWriter<'a> {
    base: *mut u8,
    len: usize,
    pos: usize,
    _view: PhantomData<&'a mut [u8]>,
}

impl<'a> RecordWriter<'a> {
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for the
    /// lifetime `'a`. The caller must guarantee that no other thread touches
    /// the byte ranges this writer mutates (fresh unpublished allocations,
    /// or ranges guarded by an exclusive lock).
    pub(crate) unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self {
            base,
            len,
            pos: 0,
            _view: PhantomData,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        ensure!(
            count <= self.remaining(),
            "cursor skip of {} bytes overruns record ({} remaining)",
            count,
            self.remaining()
        );
        self.pos += count;
        Ok(())
    }

    fn copy_in(&mut self, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() <= self.remaining(),
            "cursor write of {} bytes overruns record ({} remaining)",
            buf.len(),
            self.remaining()
        );
        // SAFETY: bounds checked above; exclusivity over the target range is
        // the constructor contract.
        unsafe {
            ptr::copy_nonoverlapping(buf.as_ptr(), self.base.add(self.pos), buf.len());
        }
        self.pos += buf.len();
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.copy_in(&[value])
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.copy_in(&value.to_le_bytes())
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.copy_in(&value.to_le_bytes())
    }

    pub fn write_u64_le(&mut self, value: u64) -> Result<()> {
        self.copy_in(&value.to_le_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.copy_in(bytes)
    }

    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let len = encode_varint(value, &mut buf);
        debug_assert_eq!(len, varint_len(value));
        self.copy_in(&buf[..len])
    }

    // The spend seek protocol reads counts and script lengths while walking
    // forward through bytes it will not modify.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let peek = self.remaining().min(MAX_VARINT_LEN);
        ensure!(peek > 0, "cursor at end of record reading varint");
        // SAFETY: peek <= remaining, so the range is in bounds.
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(self.pos), buf.as_mut_ptr(), peek);
        }
        let (value, consumed) = decode_varint(&buf[..peek])?;
        self.pos += consumed;
        Ok(value)
    }
}
