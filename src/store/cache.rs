//! # Unspent Output Cache
//!
//! A bounded in-memory map consulted by `get_output` before the table is
//! touched. Entries are whole transactions' unspent outputs, admitted when
//! a transaction is stored already confirmed, removed output-by-output as
//! they are spent, and evicted wholesale when a transaction's metadata is
//! rewritten (confirm/unconfirm change visibility, so a stale entry would
//! answer with the wrong confirmation state).
//!
//! The cache never holds spent outputs, never holds `Indexed`
//! transactions, and never holds genesis outputs (the consensus carve-out
//! must hold on the cache path too). A miss always falls through to the
//! table, so the cache is purely an optimization; capacity 0 disables it.
//!
//! Eviction is oldest-first by insertion, which matches the access pattern
//! (recently stored transactions are the ones spent soon after).

use std::collections::VecDeque;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::chain::{HashDigest, OutPoint, Output, Transaction};
use crate::store::result::Prevout;
use crate::store::POOL_FORK_HEIGHT;

struct CachedTx {
    height: u32,
    median_time_past: u32,
    coinbase: bool,
    confirmed: bool,
    outputs: Vec<Option<Output>>,
}

struct CacheInner {
    txs: HashMap<HashDigest, CachedTx>,
    order: VecDeque<HashDigest>,
}

pub struct OutputCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl OutputCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                txs: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// Admit a stored transaction's outputs. Genesis outputs are never
    /// cached.
    pub fn add(
        &self,
        hash: HashDigest,
        tx: &Transaction,
        height: u32,
        median_time_past: u32,
        position: u16,
        confirmed: bool,
    ) {
        if self.capacity == 0 || height == 0 {
            return;
        }

        let mut inner = self.inner.lock();

        while inner.txs.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.txs.remove(&oldest);
                }
                None => break,
            }
        }

        let entry = CachedTx {
            height,
            median_time_past,
            coinbase: position == 0,
            confirmed,
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
        };

        if inner.txs.insert(hash, entry).is_none() {
            inner.order.push_back(hash);
        }
    }

    /// Answer an output lookup if the entry is visible at `fork_height`.
    /// `None` is a miss, not a verdict; callers fall through to the table.
    pub fn populate(&self, point: &OutPoint, fork_height: u64) -> Option<Prevout> {
        let inner = self.inner.lock();
        let entry = inner.txs.get(&point.hash)?;

        let visible = if entry.confirmed {
            (entry.height as u64) <= fork_height
        } else {
            fork_height == POOL_FORK_HEIGHT
        };
        if !visible {
            return None;
        }

        let output = entry.outputs.get(point.index as usize)?.clone()?;

        Some(Prevout {
            output,
            height: entry.height,
            median_time_past: entry.median_time_past,
            confirmed: entry.confirmed,
            coinbase: entry.coinbase,
            spent: false,
        })
    }

    /// Drop one output on spend; the entry goes once all outputs are gone.
    pub fn remove(&self, point: &OutPoint) {
        let mut inner = self.inner.lock();

        let emptied = match inner.txs.get_mut(&point.hash) {
            Some(entry) => {
                if let Some(slot) = entry.outputs.get_mut(point.index as usize) {
                    *slot = None;
                }
                entry.outputs.iter().all(Option::is_none)
            }
            None => return,
        };

        if emptied {
            inner.txs.remove(&point.hash);
            inner.order.retain(|hash| hash != &point.hash);
        }
    }

    /// Drop a whole transaction; used when its metadata is rewritten.
    pub fn evict(&self, hash: &HashDigest) {
        let mut inner = self.inner.lock();
        if inner.txs.remove(hash).is_some() {
            inner.order.retain(|entry| entry != hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Input;

    fn cached_tx(value: u64) -> Transaction {
        Transaction::new(
            1,
            0,
            vec![Input::new(OutPoint::null(), vec![], 0)],
            vec![Output::new(value, vec![0x51]), Output::new(value + 1, vec![])],
        )
    }

    #[test]
    fn hit_respects_fork_height() {
        let cache = OutputCache::new(8);
        let tx = cached_tx(100);
        let hash = [1u8; 32];
        cache.add(hash, &tx, 50, 1_600_000_000, 0, true);

        let point = OutPoint::new(hash, 0);
        let hit = cache.populate(&point, 50).unwrap();
        assert_eq!(hit.height, 50);
        assert!(hit.confirmed);
        assert!(hit.coinbase);
        assert!(!hit.spent);
        assert_eq!(hit.output.value, 100);

        assert!(cache.populate(&point, 49).is_none());
        assert!(cache.populate(&point, POOL_FORK_HEIGHT).is_some());
    }

    #[test]
    fn unconfirmed_entries_only_visible_in_pool_mode() {
        let cache = OutputCache::new(8);
        let hash = [2u8; 32];
        cache.add(hash, &cached_tx(7), 3, 0, u16::MAX, false);

        let point = OutPoint::new(hash, 1);
        assert!(cache.populate(&point, 1000).is_none());

        let hit = cache.populate(&point, POOL_FORK_HEIGHT).unwrap();
        assert!(!hit.confirmed);
        assert!(!hit.coinbase);
    }

    #[test]
    fn genesis_and_disabled_cache_never_admit() {
        let disabled = OutputCache::new(0);
        disabled.add([3u8; 32], &cached_tx(1), 10, 0, 0, true);
        assert!(disabled
            .populate(&OutPoint::new([3u8; 32], 0), POOL_FORK_HEIGHT)
            .is_none());

        let cache = OutputCache::new(8);
        cache.add([4u8; 32], &cached_tx(1), 0, 0, 0, true);
        assert!(cache
            .populate(&OutPoint::new([4u8; 32], 0), POOL_FORK_HEIGHT)
            .is_none());
    }

    #[test]
    fn spent_outputs_leave_the_cache() {
        let cache = OutputCache::new(8);
        let hash = [5u8; 32];
        cache.add(hash, &cached_tx(9), 20, 0, 1, true);

        cache.remove(&OutPoint::new(hash, 0));
        assert!(cache.populate(&OutPoint::new(hash, 0), 100).is_none());
        assert!(cache.populate(&OutPoint::new(hash, 1), 100).is_some());

        cache.remove(&OutPoint::new(hash, 1));
        assert!(cache.populate(&OutPoint::new(hash, 1), 100).is_none());
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let cache = OutputCache::new(2);
        cache.add([1u8; 32], &cached_tx(1), 10, 0, 1, true);
        cache.add([2u8; 32], &cached_tx(2), 11, 0, 1, true);
        cache.add([3u8; 32], &cached_tx(3), 12, 0, 1, true);

        assert!(cache.populate(&OutPoint::new([1u8; 32], 0), 100).is_none());
        assert!(cache.populate(&OutPoint::new([2u8; 32], 0), 100).is_some());
        assert!(cache.populate(&OutPoint::new([3u8; 32], 0), 100).is_some());
    }

    #[test]
    fn evict_drops_whole_transaction() {
        let cache = OutputCache::new(8);
        let hash = [6u8; 32];
        cache.add(hash, &cached_tx(9), 20, 0, 1, true);

        cache.evict(&hash);
        assert!(cache.populate(&OutPoint::new(hash, 0), 100).is_none());
        assert!(cache.populate(&OutPoint::new(hash, 1), 100).is_none());
    }
}
