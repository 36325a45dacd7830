//! # Self-Growing Memory-Mapped File
//!
//! `MappedFile` owns a file handle and a read-write shared mapping over its
//! entire length, and grows both on demand. Readers take scoped [`View`]s
//! that pin the current mapping base; growth remaps under the exclusive
//! side of the same lock, so a live view can never observe the mapping
//! move.
//!
//! ## Size Accounting
//!
//! Two watermarks, always `logical_size <= capacity`:
//!
//! - `capacity` is the OS file length and mapping length.
//! - `logical_size` is the byte watermark of valid content. `reserve` and
//!   `resize` set it; `close` truncates the file back to it so reserved
//!   headroom never survives a clean shutdown.
//!
//! ## Growth Policy
//!
//! When a reservation exceeds capacity the file is extended to
//! `new_logical * 150 / 100` (`reserve`) or exactly `new_logical`
//! (`resize`), then remapped. Extension and remap run under the write lock
//! and, when configured, an external mutex shared with sibling files so a
//! group of mapped files grows coherently.
//!
//! ## Failure Semantics
//!
//! A failed extension is returned as an error and logged at error level;
//! writers cannot continue without space, so callers treat it as fatal. A
//! `close` failure is logged and returned, but the handle is already
//! stopped. All operations on a closed file fail cleanly.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, eyre, Result, WrapErr};
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, error};

use super::view::View;

const EXPANSION_NUMERATOR: usize = 150;
const EXPANSION_DENOMINATOR: usize = 100;

pub(crate) struct MapInner {
    file: Option<File>,
    map: Option<MmapMut>,
    pub(crate) ptr: *mut u8,
    capacity: usize,
    pub(crate) logical_size: usize,
    closed: bool,
}

// SAFETY: the raw base pointer is owned by the mapping stored alongside it
// and is only dereferenced through cursors whose byte ranges are
// synchronized by the surrounding lock discipline (remap lock here,
// allocation and metadata locks above).
unsafe impl Send for MapInner {}
unsafe impl Sync for MapInner {}

pub struct MappedFile {
    path: PathBuf,
    inner: RwLock<MapInner>,
    external: Option<Arc<Mutex<()>>>,
}

impl MappedFile {
    /// Create the file with `initial_size` bytes of zeroes and map it.
    pub fn create<P: AsRef<Path>>(path: P, initial_size: usize) -> Result<Self> {
        Self::create_internal(path.as_ref(), initial_size, None)
    }

    /// Create with a growth mutex shared across sibling mapped files.
    pub fn create_with_external_lock<P: AsRef<Path>>(
        path: P,
        initial_size: usize,
        external: Arc<Mutex<()>>,
    ) -> Result<Self> {
        Self::create_internal(path.as_ref(), initial_size, Some(external))
    }

    fn create_internal(
        path: &Path,
        initial_size: usize,
        external: Option<Arc<Mutex<()>>>,
    ) -> Result<Self> {
        ensure!(initial_size > 0, "cannot map an empty file");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        file.set_len(initial_size as u64)
            .wrap_err_with(|| format!("failed to size '{}' to {} bytes", path.display(), initial_size))?;

        Self::map_existing(path, file, initial_size, external)
    }

    /// Open and map an existing file over its whole length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_internal(path.as_ref(), None)
    }

    /// Open with a growth mutex shared across sibling mapped files.
    pub fn open_with_external_lock<P: AsRef<Path>>(
        path: P,
        external: Arc<Mutex<()>>,
    ) -> Result<Self> {
        Self::open_internal(path.as_ref(), Some(external))
    }

    fn open_internal(path: &Path, external: Option<Arc<Mutex<()>>>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len() as usize;

        ensure!(size > 0, "cannot map empty store file '{}'", path.display());

        Self::map_existing(path, file, size, external)
    }

    fn map_existing(
        path: &Path,
        file: File,
        size: usize,
        external: Option<Arc<Mutex<()>>>,
    ) -> Result<Self> {
        // SAFETY: the file is opened read-write by this process, which is
        // the database's single writer; all access to the mapping goes
        // through views that pin it against remap.
        let mut map = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        #[cfg(unix)]
        map.advise(memmap2::Advice::Random)
            .wrap_err_with(|| format!("failed to advise mapping of '{}'", path.display()))?;

        let ptr = map.as_mut_ptr();

        debug!(path = %path.display(), size, "mapped");

        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(MapInner {
                file: Some(file),
                map: Some(map),
                ptr,
                capacity: size,
                logical_size: size,
                closed: false,
            }),
            external,
        })
    }

    /// A scoped view pinning the current mapping base.
    pub fn access(&self) -> Result<View<'_>> {
        let guard = self.inner.read();
        ensure!(!guard.closed, "mapped file '{}' is closed", self.path.display());
        Ok(View::new(guard))
    }

    /// Ensure `logical_size >= new_logical` with 150% growth headroom, then
    /// return a pinning view for the writer.
    pub fn reserve(&self, new_logical: usize) -> Result<View<'_>> {
        self.reserve_with(new_logical, EXPANSION_NUMERATOR)
    }

    /// Like `reserve` but sized exactly, with no headroom.
    pub fn resize(&self, new_logical: usize) -> Result<View<'_>> {
        self.reserve_with(new_logical, EXPANSION_DENOMINATOR)
    }

    fn reserve_with(&self, new_logical: usize, expansion: usize) -> Result<View<'_>> {
        let mut guard = self.inner.write();
        ensure!(!guard.closed, "mapped file '{}' is closed", self.path.display());

        if new_logical > guard.capacity {
            let new_capacity = new_logical * expansion / EXPANSION_DENOMINATOR;

            if let Err(report) = self.grow(&mut guard, new_capacity) {
                // Writers cannot proceed without space; the caller treats
                // this as fatal.
                error!(
                    path = %self.path.display(),
                    new_capacity,
                    "resize failed, disk space may be low"
                );
                return Err(report);
            }
        }

        guard.logical_size = new_logical;

        Ok(View::new(RwLockWriteGuard::downgrade(guard)))
    }

    fn grow(&self, inner: &mut MapInner, new_capacity: usize) -> Result<()> {
        debug!(path = %self.path.display(), new_capacity, "resizing");

        // Sibling files (index and record regions of one database) remap
        // under a common mutex so neither can observe the other half-grown.
        let _coordinated = self.external.as_ref().map(|mutex| mutex.lock());

        let file = inner
            .file
            .as_ref()
            .ok_or_else(|| eyre!("mapped file '{}' has no handle", self.path.display()))?;

        file.set_len(new_capacity as u64)
            .wrap_err_with(|| {
                format!(
                    "failed to extend '{}' to {} bytes",
                    self.path.display(),
                    new_capacity
                )
            })?;

        // SAFETY: the write lock is held, so no view pins the old mapping;
        // the old map drops once the new one replaces it.
        let mut map = unsafe {
            MmapMut::map_mut(file)
                .wrap_err_with(|| format!("failed to remap '{}' after grow", self.path.display()))?
        };

        inner.ptr = map.as_mut_ptr();
        inner.map = Some(map);
        inner.capacity = new_capacity;

        Ok(())
    }

    /// Flush the mapped range to disk.
    pub fn flush(&self) -> Result<()> {
        let guard = self.inner.read();
        ensure!(!guard.closed, "mapped file '{}' is closed", self.path.display());

        guard
            .map
            .as_ref()
            .ok_or_else(|| eyre!("mapped file '{}' has no mapping", self.path.display()))?
            .flush()
            .wrap_err_with(|| format!("failed to flush '{}'", self.path.display()))
    }

    /// Sync, unmap, truncate to the logical size, and close the handle.
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.write();

        if guard.closed {
            return Ok(());
        }

        guard.closed = true;
        debug!(path = %self.path.display(), logical_size = guard.logical_size, "unmapping");

        let result = self.teardown(&mut guard);
        if let Err(report) = &result {
            error!(path = %self.path.display(), %report, "close failed");
        }
        result
    }

    fn teardown(&self, inner: &mut MapInner) -> Result<()> {
        if let Some(map) = inner.map.take() {
            map.flush()
                .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))?;
            drop(map);
        }
        inner.ptr = std::ptr::null_mut();

        if let Some(file) = inner.file.take() {
            file.set_len(inner.logical_size as u64).wrap_err_with(|| {
                format!(
                    "failed to truncate '{}' to {} bytes",
                    self.path.display(),
                    inner.logical_size
                )
            })?;
            file.sync_all()
                .wrap_err_with(|| format!("failed to fsync '{}'", self.path.display()))?;
        }

        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    pub fn logical_size(&self) -> usize {
        self.inner.read().logical_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn create_open_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let file = MappedFile::create(&path, 64).unwrap();
            let view = file.access().unwrap();
            assert_eq!(view.len(), 64);

            let mut writer = view.writer(0).unwrap();
            writer.write_u64_le(0xdead_beef).unwrap();
            drop(view);
            file.close().unwrap();
        }

        let file = MappedFile::open(&path).unwrap();
        let view = file.access().unwrap();
        let mut reader = view.reader(0).unwrap();
        assert_eq!(reader.read_u64_le().unwrap(), 0xdead_beef);
    }

    #[test]
    fn reserve_grows_with_headroom() {
        let dir = tempfile::tempdir().unwrap();
        let file = MappedFile::create(dir.path().join("store.db"), 100).unwrap();

        let view = file.reserve(200).unwrap();
        assert_eq!(view.len(), 200);
        drop(view);

        assert_eq!(file.logical_size(), 200);
        assert_eq!(file.capacity(), 300);

        // Within capacity: no growth, watermark moves.
        let view = file.reserve(250).unwrap();
        drop(view);
        assert_eq!(file.capacity(), 300);
        assert_eq!(file.logical_size(), 250);
    }

    #[test]
    fn resize_grows_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let file = MappedFile::create(dir.path().join("store.db"), 100).unwrap();

        let view = file.resize(400).unwrap();
        drop(view);
        assert_eq!(file.logical_size(), 400);
        assert_eq!(file.capacity(), 400);
    }

    #[test]
    fn close_truncates_to_logical_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let file = MappedFile::create(&path, 100).unwrap();
        drop(file.reserve(200).unwrap());
        assert_eq!(file.capacity(), 300);
        file.close().unwrap();
        // Idempotent.
        file.close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 200);
    }

    #[test]
    fn operations_fail_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let file = MappedFile::create(dir.path().join("store.db"), 64).unwrap();
        file.close().unwrap();

        assert!(file.access().is_err());
        assert!(file.reserve(128).is_err());
        assert!(file.flush().is_err());
    }

    #[test]
    fn content_survives_growth_remap() {
        let dir = tempfile::tempdir().unwrap();
        let file = MappedFile::create(dir.path().join("store.db"), 32).unwrap();

        {
            let view = file.access().unwrap();
            view.writer(0).unwrap().write_bytes(&[7u8; 32]).unwrap();
        }

        drop(file.reserve(100_000).unwrap());

        let view = file.access().unwrap();
        assert_eq!(view.reader(0).unwrap().read_bytes(32).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn concurrent_readers_during_growth() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(MappedFile::create(dir.path().join("store.db"), 64).unwrap());
        {
            let view = file.access().unwrap();
            view.writer(0).unwrap().write_u32_le(42).unwrap();
        }

        let reader_file = Arc::clone(&file);
        let reader = thread::spawn(move || {
            for _ in 0..500 {
                let view = reader_file.access().unwrap();
                assert_eq!(view.reader(0).unwrap().read_u32_le().unwrap(), 42);
            }
        });

        for step in 1..50usize {
            drop(file.reserve(64 + step * 1024).unwrap());
        }

        reader.join().unwrap();
    }
}
