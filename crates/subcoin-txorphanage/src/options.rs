use bitcoin::Weight;
use std::time::Duration;

/// Default maximum number of orphans kept in memory.
pub const DEFAULT_MAX_ORPHAN_TRANSACTIONS: usize = 100;

/// Expiration time of an orphan transaction.
pub const ORPHAN_TX_EXPIRE_TIME: Duration = Duration::from_secs(20 * 60);

/// Minimum time between sweeps for expired orphans.
pub const ORPHAN_TX_EXPIRE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Heaviest orphan that is stored, matching the standardness limit of the mempool.
pub const MAX_STANDARD_TX_WEIGHT: Weight = Weight::from_wu(400_000);

/// Configuration of the [`crate::TxOrphanage`].
#[derive(Clone, Debug)]
pub struct OrphanageOptions {
    /// Number of orphans kept by [`crate::TxOrphanage::limit_to_capacity`].
    pub max_orphans: usize,

    /// How long an orphan is kept before it is swept.
    pub expire_time: Duration,

    /// Minimum time between two sweeps.
    pub expire_interval: Duration,

    /// Orphans heavier than this are ignored.
    pub max_standard_tx_weight: Weight,
}

impl Default for OrphanageOptions {
    fn default() -> Self {
        Self {
            max_orphans: DEFAULT_MAX_ORPHAN_TRANSACTIONS,
            expire_time: ORPHAN_TX_EXPIRE_TIME,
            expire_interval: ORPHAN_TX_EXPIRE_INTERVAL,
            max_standard_tx_weight: MAX_STANDARD_TX_WEIGHT,
        }
    }
}

impl OrphanageOptions {
    /// Create new orphanage options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of orphans.
    pub fn with_max_orphans(mut self, max_orphans: usize) -> Self {
        self.max_orphans = max_orphans;
        self
    }

    /// Set the orphan expiration time.
    pub fn with_expire_time(mut self, expire_time: Duration) -> Self {
        self.expire_time = expire_time;
        self
    }

    pub(crate) fn expire_time_secs(&self) -> i64 {
        self.expire_time.as_secs() as i64
    }

    pub(crate) fn expire_interval_secs(&self) -> i64 {
        self.expire_interval.as_secs() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = OrphanageOptions::new();
        assert_eq!(options.max_orphans, 100);
        assert_eq!(options.expire_time_secs(), 1200);
        assert_eq!(options.expire_interval_secs(), 300);
        assert_eq!(options.max_standard_tx_weight.to_wu(), 400_000);

        let options = options.with_max_orphans(5).with_expire_time(Duration::from_secs(60));
        assert_eq!(options.max_orphans, 5);
        assert_eq!(options.expire_time_secs(), 60);
    }
}
