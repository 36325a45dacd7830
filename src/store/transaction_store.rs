//! # Transaction Store Engine
//!
//! The transaction-aware layer over the hash table: record creation with
//! the 11-byte metadata prefix, confirmation-state updates, per-output
//! spend marking, and fork-height-relative output lookups.
//!
//! ## Mutation Protocol
//!
//! Record bodies are written once, inside the table's create-then-link
//! window. Afterwards exactly two regions may change, both under the
//! store's metadata lock:
//!
//! - the metadata prefix (`update`: height, position, state,
//!   median_time_past)
//! - one output's spender height (`spend`/`unspend`)
//!
//! The lock is store-global. Writes are eleven bytes or four; contention
//! is not worth per-record granularity.
//!
//! ## Confirmation Flow
//!
//! `confirm` walks the transaction's inputs and writes the new height into
//! each previous output's spend slot, then rewrites the metadata prefix to
//! `Confirmed`. `unconfirm` is its inverse: every spend slot reverts to
//! the not-spent sentinel and the prefix reverts to a pooled,
//! unverified-forks state. Both return false when any referenced record is
//! missing or ineligible; nothing is rolled back, matching the
//! no-cross-record-atomicity contract.

use std::path::Path;
use std::sync::Arc;

use eyre::Result;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use zerocopy::IntoBytes;

use crate::chain::{
    HashDigest, OutPoint, Transaction, INDEX_SPENT_SIZE, NOT_SPENT, SPEND_SIZE,
};
use crate::memory::MappedFile;
use crate::store::cache::OutputCache;
use crate::store::result::{
    Prevout, RecordMeta, TransactionResult, MEDIAN_TIME_PAST_SIZE, METADATA_SIZE, POSITION_SIZE,
};
use crate::store::settings::Settings;
use crate::store::state::TransactionState;
use crate::store::{POOL_FORK_HEIGHT, UNCONFIRMED_POSITION, UNVERIFIED_FORKS};
use crate::table::HashTable;

/// Absolute file offset of a stored record; the handle `get`, `confirm`,
/// and `unconfirm` address records by.
pub type FileOffset = u64;

pub struct TransactionStore {
    file: Arc<MappedFile>,
    table: HashTable,
    cache: OutputCache,
    metadata_lock: RwLock<()>,
}

impl TransactionStore {
    /// Create the store file and initialize an empty index.
    pub fn create<P: AsRef<Path>>(path: P, settings: Settings) -> Result<Self> {
        // Sized to a single byte; the index header resize follows at once.
        let file = Arc::new(MappedFile::create(path, 1)?);
        Self::build(file, settings, true)
    }

    /// Open an existing store and ready the index.
    pub fn open<P: AsRef<Path>>(path: P, settings: Settings) -> Result<Self> {
        let file = Arc::new(MappedFile::open(path)?);
        Self::build(file, settings, false)
    }

    /// Create with a growth mutex shared across sibling database files.
    pub fn create_with_external_lock<P: AsRef<Path>>(
        path: P,
        settings: Settings,
        external: Arc<Mutex<()>>,
    ) -> Result<Self> {
        let file = Arc::new(MappedFile::create_with_external_lock(path, 1, external)?);
        Self::build(file, settings, true)
    }

    /// Open with a growth mutex shared across sibling database files.
    pub fn open_with_external_lock<P: AsRef<Path>>(
        path: P,
        settings: Settings,
        external: Arc<Mutex<()>>,
    ) -> Result<Self> {
        let file = Arc::new(MappedFile::open_with_external_lock(path, external)?);
        Self::build(file, settings, false)
    }

    fn build(file: Arc<MappedFile>, settings: Settings, create: bool) -> Result<Self> {
        let table = HashTable::new(Arc::clone(&file), settings.buckets);
        if create {
            table.create()?;
        } else {
            table.start()?;
        }

        Ok(Self {
            file,
            table,
            cache: OutputCache::new(settings.cache_capacity),
            metadata_lock: RwLock::new(()),
        })
    }

    // Startup and shutdown.
    // ------------------------------------------------------------------

    /// Publish the allocation watermark durably.
    pub fn commit(&self) -> Result<()> {
        self.table.commit()
    }

    /// Sync the mapped range to disk.
    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    /// Commit, then sync, unmap, and truncate the file to its logical
    /// size. Idempotent; further operations fail.
    pub fn close(&self) -> Result<()> {
        if self.file.is_closed() {
            return Ok(());
        }
        self.table.commit()?;
        self.file.close()
    }

    // Queries.
    // ------------------------------------------------------------------

    /// Resolve a record by its file offset.
    pub fn get(&self, offset: FileOffset) -> Result<Option<TransactionResult<'_>>> {
        match self.table.get(offset)? {
            Some(element) => TransactionResult::new(element, &self.metadata_lock).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve a record by transaction hash. The most recent store under a
    /// hash shadows older ones.
    pub fn find(&self, hash: &HashDigest) -> Result<Option<TransactionResult<'_>>> {
        match self.table.find(hash)? {
            Some(element) => TransactionResult::new(element, &self.metadata_lock).map(Some),
            None => Ok(None),
        }
    }

    /// Populate previous-output metadata for a spend check at
    /// `fork_height`. [`POOL_FORK_HEIGHT`] requests pool semantics.
    ///
    /// `None` covers every not-applicable case: null (coinbase) point,
    /// unknown hash, the genesis carve-out, an output invisible at this
    /// fork point, or an out-of-range index.
    pub fn get_output(&self, point: &OutPoint, fork_height: u64) -> Result<Option<Prevout>> {
        // A coinbase input has no previous output to populate.
        if point.is_null() {
            return Ok(None);
        }

        if let Some(prevout) = self.cache.populate(point, fork_height) {
            return Ok(Some(prevout));
        }

        let result = match self.find(&point.hash)? {
            Some(result) => result,
            None => return Ok(None),
        };

        // CONSENSUS: the genesis block's coinbase output may not be spent.
        // It was never entered into the original utxo set, and every chain
        // implementation preserves the quirk.
        let height = result.height();
        if height == 0 {
            return Ok(None);
        }

        let state = result.state();
        let for_pool = fork_height == POOL_FORK_HEIGHT;
        let relevant = (height as u64) <= fork_height;

        let confirmed = (state == TransactionState::Indexed && !for_pool)
            || (state == TransactionState::Confirmed && relevant);

        // Outside pool mode an unconfirmed-at-this-fork output is
        // invisible, even though the record exists.
        if !for_pool && !confirmed {
            return Ok(None);
        }

        let entry = match result.output(point.index)? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        Ok(Some(Prevout {
            confirmed,
            coinbase: result.is_coinbase(),
            height,
            median_time_past: result.median_time_past(),
            spent: confirmed && entry.spent(fork_height),
            output: entry.output,
        }))
    }

    // Store.
    // ------------------------------------------------------------------

    /// Serialize and link a new record. Returns its file offset.
    pub fn store(
        &self,
        tx: &Transaction,
        height: u32,
        median_time_past: u32,
        position: u16,
        state: TransactionState,
    ) -> Result<FileOffset> {
        let hash = tx.hash();
        let size = METADATA_SIZE + tx.record_size();
        let meta = RecordMeta::new(height, position, state, median_time_past);

        let mut pending = self.table.allocator();
        let offset = pending.create(hash, size, |writer| {
            writer.write_bytes(meta.as_bytes())?;
            tx.write_record(writer)
        })?;
        self.table.link(pending)?;

        if state == TransactionState::Confirmed {
            self.cache
                .add(hash, tx, height, median_time_past, position, true);
        } else if state == TransactionState::Pooled {
            self.cache
                .add(hash, tx, height, median_time_past, position, false);
        }

        debug!(offset, height, position, ?state, "transaction stored");
        Ok(offset)
    }

    /// Stage a mempool transaction: unconfirmed position, no time, pooled.
    pub fn pool(&self, tx: &Transaction, forks: u32) -> Result<FileOffset> {
        self.store(tx, forks, 0, UNCONFIRMED_POSITION, TransactionState::Pooled)
    }

    // Update.
    // ------------------------------------------------------------------

    /// Confirm the record at `offset`: spend each input's previous output
    /// at `height`, then rewrite the metadata prefix.
    pub fn confirm(
        &self,
        offset: FileOffset,
        height: u32,
        median_time_past: u32,
        position: u16,
    ) -> Result<bool> {
        assert!(
            position != UNCONFIRMED_POSITION,
            "confirm requires a block position"
        );

        let result = match self.get(offset)? {
            Some(result) => result,
            None => return Ok(false),
        };

        for point in result.input_points()? {
            if !self.spend(&point, height)? {
                return Ok(false);
            }
        }

        self.update(
            offset,
            height,
            median_time_past,
            position,
            TransactionState::Confirmed,
        )
    }

    /// Revert a confirmation: unspend each input's previous output, then
    /// return the record to the pool in an unverified state.
    pub fn unconfirm(&self, offset: FileOffset) -> Result<bool> {
        let result = match self.get(offset)? {
            Some(result) => result,
            None => return Ok(false),
        };

        for point in result.input_points()? {
            if !self.unspend(&point)? {
                return Ok(false);
            }
        }

        // The tx was verified under a now-unknown chain state.
        self.update(
            offset,
            UNVERIFIED_FORKS,
            0,
            UNCONFIRMED_POSITION,
            TransactionState::Pooled,
        )
    }

    fn unspend(&self, point: &OutPoint) -> Result<bool> {
        self.spend(point, NOT_SPENT)
    }

    /// Write `spender_height` into one output's spend slot. Null points
    /// succeed trivially so coinbase inputs need no special casing by
    /// callers.
    fn spend(&self, point: &OutPoint, spender_height: u32) -> Result<bool> {
        if point.is_null() {
            return Ok(true);
        }

        // Unspending could restore the cache entry, but it is not worth
        // reconstructing; the table path answers correctly.
        if spender_height != NOT_SPENT {
            self.cache.remove(point);
        }

        let element = match self.table.find(&point.hash)? {
            Some(element) => element,
            None => return Ok(false),
        };

        let (height, state_byte, outputs) = element.read(|reader| {
            let _shared = self.metadata_lock.read();
            let height = reader.read_u32_le()?;
            reader.skip(POSITION_SIZE)?;
            let state = reader.read_u8()?;
            reader.skip(MEDIAN_TIME_PAST_SIZE)?;
            let outputs = reader.read_varint()?;
            Ok((height, state, outputs))
        })?;

        // Only confirmed transactions at or below the spender height hold
        // spendable outputs.
        let state = TransactionState::from_u8(state_byte)?;
        if state != TransactionState::Confirmed || height > spender_height {
            return Ok(false);
        }

        if point.index as u64 >= outputs {
            return Ok(false);
        }

        element.write(|writer| {
            writer.skip(METADATA_SIZE)?;
            writer.read_varint()?;

            for _ in 0..point.index {
                writer.skip(SPEND_SIZE)?;
                let script_len = writer.read_varint()? as usize;
                writer.skip(script_len)?;
            }

            writer.skip(INDEX_SPENT_SIZE)?;

            let _exclusive = self.metadata_lock.write();
            writer.write_u32_le(spender_height)
        })?;

        Ok(true)
    }

    /// Overwrite the metadata prefix of the record at `offset`.
    fn update(
        &self,
        offset: FileOffset,
        height: u32,
        median_time_past: u32,
        position: u16,
        state: TransactionState,
    ) -> Result<bool> {
        let element = match self.table.get(offset)? {
            Some(element) => element,
            None => return Ok(false),
        };

        // The rewrite changes this record's visibility; a stale cache
        // entry would answer lookups with the old state.
        let hash = element.key()?;
        self.cache.evict(&hash);

        let meta = RecordMeta::new(height, position, state, median_time_past);
        element.write(|writer| {
            let _exclusive = self.metadata_lock.write();
            writer.write_bytes(meta.as_bytes())
        })?;

        debug!(offset, height, position, ?state, "metadata updated");
        Ok(true)
    }
}
