//! # On-Disk Chained Hash Table
//!
//! A hash table over the mapped file, mapping 32-byte keys to
//! variable-length slab records in O(1) expected.
//!
//! ## File Layout
//!
//! ```text
//! Offset 0:              bucket_count: u32 LE
//! Offset 4:              reserved: u32
//! Offset 8:              bucket heads: bucket_count x u64 LE   (EMPTY = u64::MAX)
//! Offset 8 + 8n:         watermark: u64 LE                     (absolute end of data)
//! Offset 8 + 8n + 8:     slabs...
//! ```
//!
//! Slab: `[ key: 32 ][ next: u64 LE ][ payload... ]`. A slab's absolute
//! start offset is its public identity; payloads begin
//! [`SLAB_PAYLOAD_OFFSET`] bytes in.
//!
//! ## Publication Protocol
//!
//! Record creation is two-phase. `allocator().create(...)` bump-allocates
//! at the in-memory watermark and writes key, an empty link, and the
//! payload into bytes no reader can reach. `link` then publishes the slab:
//! under the exclusive index lock it points the slab's next link at the
//! current bucket head and stores the slab offset as the new head. A crash
//! between the phases leaves no dangling index entry.
//!
//! Duplicate keys chain off the same bucket and are prepended, so `find`
//! returns the most recent write; older entries stay reachable by offset
//! only.
//!
//! ## Durability
//!
//! The on-disk watermark field advances only at `commit`. Reopen derives
//! the allocation point from the committed field, so uncommitted slabs are
//! invisible after a crash and their space is reused.

use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::element::Element;
use crate::chain::{HashDigest, HASH_SIZE};
use crate::encoding::RecordWriter;
use crate::memory::MappedFile;

/// Bucket head / chain link sentinel: no further element.
pub const EMPTY: u64 = u64::MAX;

pub(super) const SLAB_KEY_SIZE: usize = HASH_SIZE;
pub(super) const SLAB_NEXT_SIZE: usize = 8;
/// Payload position within a slab.
pub const SLAB_PAYLOAD_OFFSET: usize = SLAB_KEY_SIZE + SLAB_NEXT_SIZE;

const BUCKETS_FIELD_SIZE: usize = 8; // u32 count plus u32 reserved, keeps heads aligned
const HEAD_SIZE: usize = 8;
const WATERMARK_SIZE: usize = 8;

pub struct HashTable {
    file: Arc<MappedFile>,
    buckets: u32,
    index_lock: RwLock<()>,
    watermark: Mutex<u64>,
}

impl HashTable {
    pub fn new(file: Arc<MappedFile>, buckets: u32) -> Self {
        assert!(buckets > 0, "hash table requires at least one bucket");

        let data_start = Self::data_start_for(buckets);
        Self {
            file,
            buckets,
            index_lock: RwLock::new(()),
            watermark: Mutex::new(data_start),
        }
    }

    fn data_start_for(buckets: u32) -> u64 {
        (BUCKETS_FIELD_SIZE + buckets as usize * HEAD_SIZE + WATERMARK_SIZE) as u64
    }

    fn data_start(&self) -> u64 {
        Self::data_start_for(self.buckets)
    }

    fn bucket_slot(&self, bucket: u64) -> usize {
        BUCKETS_FIELD_SIZE + bucket as usize * HEAD_SIZE
    }

    fn watermark_slot(&self) -> usize {
        BUCKETS_FIELD_SIZE + self.buckets as usize * HEAD_SIZE
    }

    fn bucket_index(&self, key: &HashDigest) -> u64 {
        // Keys are already uniform digests; the low eight bytes suffice.
        let prefix = u64::from_le_bytes(key[..8].try_into().unwrap()); // INVARIANT: keys are 32 bytes
        prefix % self.buckets as u64
    }

    /// Initialize empty buckets and the watermark. The file is sized
    /// exactly to the header; slabs grow it from there.
    pub fn create(&self) -> Result<()> {
        let data_start = self.data_start();

        {
            let view = self.file.resize(data_start as usize)?;
            let mut writer = view.writer(0)?;
            writer.write_u32_le(self.buckets)?;
            writer.write_u32_le(0)?;
            for _ in 0..self.buckets {
                writer.write_u64_le(EMPTY)?;
            }
            writer.write_u64_le(data_start)?;
        }

        *self.watermark.lock() = data_start;

        debug!(buckets = self.buckets, data_start, "hash table created");
        Ok(())
    }

    /// Validate the header and load the committed watermark.
    pub fn start(&self) -> Result<()> {
        let data_start = self.data_start();

        let watermark = {
            let view = self.file.access()?;

            ensure!(
                view.len() as u64 >= data_start,
                "hash table file too small: {} < {}",
                view.len(),
                data_start
            );

            let stored_buckets = view.reader(0)?.read_u32_le()?;
            ensure!(
                stored_buckets == self.buckets,
                "hash table bucket mismatch: file has {}, settings say {}",
                stored_buckets,
                self.buckets
            );

            let watermark = view.reader(self.watermark_slot())?.read_u64_le()?;
            ensure!(
                watermark >= data_start && watermark <= view.len() as u64,
                "hash table watermark {} outside valid range [{}, {}]",
                watermark,
                data_start,
                view.len()
            );
            watermark
        };

        *self.watermark.lock() = watermark;

        debug!(buckets = self.buckets, watermark, "hash table started");
        Ok(())
    }

    /// Walk the key's bucket chain; the first match shadows older entries.
    ///
    /// Links are validated against the allocation watermark, so an entry
    /// published after an unclean shutdown but never committed is treated
    /// as absent rather than followed into reclaimed space.
    pub fn find(&self, key: &HashDigest) -> Result<Option<Element>> {
        // Watermark before view: the allocator holds the watermark mutex
        // while it acquires the file's write lock, so nesting the two here
        // in the opposite order would deadlock.
        let watermark = *self.watermark.lock();

        let view = self.file.access()?;
        let _shared = self.index_lock.read();

        let mut link = view.reader(self.bucket_slot(self.bucket_index(key)))?.read_u64_le()?;

        while self.valid_link(link, watermark) {
            let mut reader = view.reader(link as usize)?;
            let slab_key = reader.read_hash()?;
            let next = reader.read_u64_le()?;

            if slab_key == *key {
                return Ok(Some(Element::new(Arc::clone(&self.file), link)));
            }
            link = next;
        }

        Ok(None)
    }

    fn valid_link(&self, link: u64, watermark: u64) -> bool {
        link != EMPTY
            && link >= self.data_start()
            && link + SLAB_PAYLOAD_OFFSET as u64 <= watermark
    }

    /// Resolve an element directly by slab offset, bounds-checked against
    /// the allocation watermark.
    pub fn get(&self, offset: u64) -> Result<Option<Element>> {
        let watermark = *self.watermark.lock();

        if offset < self.data_start() || offset + SLAB_PAYLOAD_OFFSET as u64 > watermark {
            return Ok(None);
        }

        Ok(Some(Element::new(Arc::clone(&self.file), offset)))
    }

    /// A record-creation helper: create-then-link.
    pub fn allocator(&self) -> PendingElement<'_> {
        PendingElement {
            table: self,
            key: [0u8; HASH_SIZE],
            offset: EMPTY,
        }
    }

    fn allocate(&self, total: usize) -> Result<(u64, crate::memory::View<'_>)> {
        // The allocation mutex is held across the reserve so concurrent
        // creators get disjoint slabs and the file grows monotonically.
        let mut watermark = self.watermark.lock();
        let offset = *watermark;
        let new_end = offset + total as u64;
        let view = self.file.reserve(new_end as usize)?;
        *watermark = new_end;
        Ok((offset, view))
    }

    /// Publish a created slab at its bucket head.
    pub fn link(&self, pending: PendingElement<'_>) -> Result<()> {
        ensure!(pending.offset != EMPTY, "link of an element never created");

        let view = self.file.access()?;
        let _exclusive = self.index_lock.write();

        let slot = self.bucket_slot(self.bucket_index(&pending.key));
        let head = view.reader(slot)?.read_u64_le()?;

        // Every legitimate head predates this slab. Anything else is a
        // leftover from an uncommitted run whose space has been reclaimed;
        // chaining to it would loop.
        let next = if head >= self.data_start() && head < pending.offset {
            head
        } else {
            EMPTY
        };

        view.writer(pending.offset as usize + SLAB_KEY_SIZE)?
            .write_u64_le(next)?;
        view.writer(slot)?.write_u64_le(pending.offset)?;

        Ok(())
    }

    /// Persist the in-memory watermark to the header field, committing all
    /// slabs allocated so far.
    pub fn commit(&self) -> Result<()> {
        // Watermark before view, as in `find`.
        let watermark = *self.watermark.lock();
        let view = self.file.access()?;
        view.writer(self.watermark_slot())?.write_u64_le(watermark)
    }

    /// Current end-of-data offset.
    pub fn watermark(&self) -> u64 {
        *self.watermark.lock()
    }
}

/// A slab reserved but not yet published. Dropping it without `link`
/// orphans the bytes; they are reclaimed at the next reopen from the
/// committed watermark.
pub struct PendingElement<'t> {
    table: &'t HashTable,
    key: HashDigest,
    offset: u64,
}

impl PendingElement<'_> {
    /// Bump-allocate a slab for `size` payload bytes, write the key and an
    /// empty link, then let `writer` fill the payload. Returns the slab
    /// offset.
    pub fn create(
        &mut self,
        key: HashDigest,
        size: usize,
        writer: impl FnOnce(&mut RecordWriter<'_>) -> Result<()>,
    ) -> Result<u64> {
        let total = SLAB_PAYLOAD_OFFSET + size;
        let (offset, view) = self.table.allocate(total)?;

        let mut cursor = view.writer(offset as usize)?;
        cursor.write_bytes(&key)?;
        cursor.write_u64_le(EMPTY)?;
        writer(&mut cursor)?;
        debug_assert_eq!(cursor.position(), total, "record writer size drift");

        self.key = key;
        self.offset = offset;
        Ok(offset)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_table(path: &std::path::Path, buckets: u32) -> HashTable {
        let file = Arc::new(MappedFile::open(path).unwrap());
        let table = HashTable::new(file, buckets);
        table.start().unwrap();
        table
    }

    fn create_table(path: &std::path::Path, buckets: u32) -> HashTable {
        let file = Arc::new(MappedFile::create(path, 1).unwrap());
        let table = HashTable::new(file, buckets);
        table.create().unwrap();
        table
    }

    fn store(table: &HashTable, key: HashDigest, payload: &[u8]) -> u64 {
        let mut pending = table.allocator();
        let offset = pending
            .create(key, payload.len(), |writer| writer.write_bytes(payload))
            .unwrap();
        table.link(pending).unwrap();
        offset
    }

    fn read_payload(element: &Element, len: usize) -> Vec<u8> {
        element.read(|reader| reader.read_bytes(len)).unwrap()
    }

    #[test]
    fn create_then_find_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(&dir.path().join("index.db"), 16);

        assert!(table.find(&[9u8; 32]).unwrap().is_none());
    }

    #[test]
    fn store_and_find_by_key_and_offset() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(&dir.path().join("index.db"), 16);

        let key = [3u8; 32];
        let offset = store(&table, key, b"hello world");

        let by_key = table.find(&key).unwrap().unwrap();
        assert_eq!(by_key.offset(), offset);
        assert_eq!(by_key.key().unwrap(), key);
        assert_eq!(read_payload(&by_key, 11), b"hello world");

        let by_offset = table.get(offset).unwrap().unwrap();
        assert_eq!(read_payload(&by_offset, 11), b"hello world");
    }

    #[test]
    fn get_rejects_out_of_range_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(&dir.path().join("index.db"), 4);

        assert!(table.get(0).unwrap().is_none());
        assert!(table.get(table.watermark()).unwrap().is_none());
    }

    #[test]
    fn colliding_keys_chain_in_one_bucket() {
        let dir = tempfile::tempdir().unwrap();
        // One bucket forces every key into the same chain.
        let table = create_table(&dir.path().join("index.db"), 1);

        let first = store(&table, [1u8; 32], b"first");
        let second = store(&table, [2u8; 32], b"second");
        assert_ne!(first, second);

        assert_eq!(table.find(&[1u8; 32]).unwrap().unwrap().offset(), first);
        assert_eq!(table.find(&[2u8; 32]).unwrap().unwrap().offset(), second);
        assert!(table.find(&[3u8; 32]).unwrap().is_none());
    }

    #[test]
    fn duplicate_key_shadows_older_entry() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(&dir.path().join("index.db"), 8);

        let key = [7u8; 32];
        let old = store(&table, key, b"old");
        let new = store(&table, key, b"new");

        let found = table.find(&key).unwrap().unwrap();
        assert_eq!(found.offset(), new);

        // The shadowed record stays reachable by offset.
        let shadowed = table.get(old).unwrap().unwrap();
        assert_eq!(read_payload(&shadowed, 3), b"old");
    }

    #[test]
    fn commit_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let offset;
        {
            let table = create_table(&path, 8);
            offset = store(&table, [5u8; 32], b"durable");
            table.commit().unwrap();
        }

        let table = open_table(&path, 8);
        let found = table.find(&[5u8; 32]).unwrap().unwrap();
        assert_eq!(found.offset(), offset);
        assert_eq!(read_payload(&found, 7), b"durable");
    }

    #[test]
    fn start_rejects_bucket_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        {
            let table = create_table(&path, 8);
            table.commit().unwrap();
        }

        let file = Arc::new(MappedFile::open(&path).unwrap());
        let table = HashTable::new(file, 16);
        assert!(table.start().is_err());
    }

    #[test]
    fn unlinked_slab_is_invisible_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let committed_watermark;
        {
            let table = create_table(&path, 8);
            store(&table, [1u8; 32], b"linked");
            table.commit().unwrap();
            committed_watermark = table.watermark();

            // Create without link: simulated crash mid-store.
            let mut pending = table.allocator();
            pending
                .create([2u8; 32], 6, |writer| writer.write_bytes(b"orphan"))
                .unwrap();
            drop(pending);
        }

        let table = open_table(&path, 8);
        assert!(table.find(&[2u8; 32]).unwrap().is_none());
        assert_eq!(table.watermark(), committed_watermark);

        // The orphan's space is reused by the next allocation.
        let reused = store(&table, [3u8; 32], b"reused");
        assert_eq!(reused, committed_watermark);
    }
}
