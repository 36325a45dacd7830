//! Record element handles.
//!
//! An `Element` names one published slab: a 32-byte key, an 8-byte chain
//! link, and a variable-length payload. The handle itself holds only the
//! slab's file offset; every read or write takes a fresh short-lived view,
//! so an `Element` may be kept across remaps safely.

use std::sync::Arc;

use eyre::Result;

use super::hash_table::SLAB_PAYLOAD_OFFSET;
use crate::chain::HashDigest;
use crate::encoding::{RecordReader, RecordWriter};
use crate::memory::MappedFile;

#[derive(Clone)]
pub struct Element {
    file: Arc<MappedFile>,
    offset: u64,
}

impl Element {
    pub(super) fn new(file: Arc<MappedFile>, offset: u64) -> Self {
        Self { file, offset }
    }

    /// Absolute file offset of the slab; the element's public identity.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn key(&self) -> Result<HashDigest> {
        let view = self.file.access()?;
        view.reader(self.offset as usize)?.read_hash()
    }

    /// Run `f` over a read cursor positioned at the payload start.
    pub fn read<T>(&self, f: impl FnOnce(&mut RecordReader<'_>) -> Result<T>) -> Result<T> {
        let view = self.file.access()?;
        let mut reader = view.reader(self.offset as usize + SLAB_PAYLOAD_OFFSET)?;
        f(&mut reader)
    }

    /// Run `f` over a write cursor positioned at the payload start.
    ///
    /// Callers mutating published bytes must hold the appropriate exclusive
    /// lock; the store's metadata lock guards both mutable record regions.
    pub fn write<T>(&self, f: impl FnOnce(&mut RecordWriter<'_>) -> Result<T>) -> Result<T> {
        let view = self.file.access()?;
        let mut writer = view.writer(self.offset as usize + SLAB_PAYLOAD_OFFSET)?;
        f(&mut writer)
    }
}
