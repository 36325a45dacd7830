//! Scoped mapping views.
//!
//! A `View` holds the shared side of the file's remap lock for its whole
//! lifetime, so the mapping base cannot move or be unmapped while the view
//! is alive. Views are meant to be short-lived: take one, read or write a
//! record, drop it. A writer needing to grow the file blocks until every
//! outstanding view drops.
//!
//! Writing through a shared view is intentional. Record creation writes to
//! freshly allocated bytes no reader can reach yet, and the two mutable
//! record regions are serialized by the engine's metadata lock; the view
//! only guarantees the bytes stay put.

use eyre::{ensure, Result};
use parking_lot::RwLockReadGuard;

use super::mapped_file::MapInner;
use crate::encoding::{RecordReader, RecordWriter};

pub struct View<'a> {
    guard: RwLockReadGuard<'a, MapInner>,
}

impl<'a> View<'a> {
    pub(super) fn new(guard: RwLockReadGuard<'a, MapInner>) -> Self {
        Self { guard }
    }

    /// Logical size of the file; the bound for every cursor.
    pub fn len(&self) -> usize {
        self.guard.logical_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A read cursor starting at `offset`, bounded by the logical size.
    pub fn reader(&self, offset: usize) -> Result<RecordReader<'_>> {
        ensure!(
            offset <= self.len(),
            "read offset {} beyond logical size {}",
            offset,
            self.len()
        );
        // SAFETY: the guard pins the mapping for the cursor's lifetime and
        // offset..len is within the mapped range.
        Ok(unsafe { RecordReader::new(self.guard.ptr.add(offset), self.len() - offset) })
    }

    /// A write cursor starting at `offset`, bounded by the logical size.
    pub fn writer(&self, offset: usize) -> Result<RecordWriter<'_>> {
        ensure!(
            offset <= self.len(),
            "write offset {} beyond logical size {}",
            offset,
            self.len()
        );
        // SAFETY: as for `reader`; exclusivity over the written ranges is
        // the caller's contract (fresh allocation or metadata lock).
        Ok(unsafe { RecordWriter::new(self.guard.ptr.add(offset), self.len() - offset) })
    }
}
