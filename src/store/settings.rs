//! Store tuning knobs.

/// Configuration for a [`TransactionStore`](super::TransactionStore).
///
/// `buckets` is fixed at creation and validated at open; changing it
/// requires rebuilding the index file. `cache_capacity` bounds the
/// unspent-output cache in transactions; zero disables the cache.
#[derive(Debug, Clone)]
pub struct Settings {
    pub buckets: u32,
    pub cache_capacity: usize,
}

impl Settings {
    pub fn with_buckets(buckets: u32) -> Self {
        Self {
            buckets,
            ..Self::default()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Prime, sized for a small deployment; mainnet-scale stores
            // configure millions.
            buckets: 65_521,
            cache_capacity: 4_096,
        }
    }
}
