//! # Orphan Transaction Tracker
//!
//! Keeps transactions whose inputs are not known yet (failed with missing inputs) until their
//! parents show up. Orphans cannot be told apart from transactions spending non-existent
//! outputs, so the number of orphans and the time they are kept are both bounded.
//!
//! - Orphans are indexed by txid, wtxid and by every outpoint they spend.
//! - Each peer has a work set of orphans to reconsider because the peer relayed one of their
//!   parents.
//! - [`TxOrphanage::limit_orphans`] sweeps expired orphans and evicts random ones once over
//!   capacity.

mod inner;
mod options;

pub use self::options::{
    DEFAULT_MAX_ORPHAN_TRANSACTIONS, MAX_STANDARD_TX_WEIGHT, ORPHAN_TX_EXPIRE_INTERVAL,
    ORPHAN_TX_EXPIRE_TIME, OrphanageOptions,
};

use self::inner::OrphanageInner;
use bitcoin::{Block, Transaction, Txid, Wtxid};
use parking_lot::Mutex;
use std::sync::Arc;

/// Identifier of a network peer.
pub type NodeId = i64;

/// Transaction identifier, either the txid or the wtxid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenTxid {
    Txid(Txid),
    Wtxid(Wtxid),
}

/// Orphan taken from a peer's work set.
#[derive(Debug, Clone)]
pub struct OrphanTxToReconsider {
    /// The orphan transaction.
    pub tx: Arc<Transaction>,
    /// Peer that originally relayed the orphan.
    pub from_peer: NodeId,
    /// Whether the work set has more orphans queued.
    pub more: bool,
}

/// Thread-safe orphan transaction tracker.
///
/// A single mutex guards the whole state: every mutation updates the primary storage, the
/// eviction list and several indexes together. The lock is only held for in-memory
/// bookkeeping.
pub struct TxOrphanage {
    inner: Mutex<OrphanageInner>,
}

impl Default for TxOrphanage {
    fn default() -> Self {
        Self::new(OrphanageOptions::default())
    }
}

impl TxOrphanage {
    /// Create an empty orphanage.
    pub fn new(options: OrphanageOptions) -> Self {
        Self::with_rng(options, fastrand::Rng::new())
    }

    /// Create an empty orphanage evicting with the given random generator.
    pub fn with_rng(options: OrphanageOptions, rng: fastrand::Rng) -> Self {
        Self {
            inner: Mutex::new(OrphanageInner::new(options, rng)),
        }
    }

    /// Add a new orphan transaction relayed by `peer`.
    ///
    /// Returns `false` without storing anything if the transaction is already known by txid
    /// or wtxid, or if it is heavier than the standard limit.
    pub fn add_tx(&self, tx: Arc<Transaction>, peer: NodeId) -> bool {
        self.inner.lock().add_tx(tx, peer, unix_time())
    }

    /// Check if we already have an orphan transaction by txid or wtxid.
    pub fn have_tx(&self, gtxid: &GenTxid) -> bool {
        self.inner.lock().have_tx(gtxid)
    }

    /// Extract one orphan from the work set of `peer`.
    ///
    /// Orphans erased since they were queued are skipped. Returns `None` once the work set
    /// is exhausted.
    pub fn get_tx_to_reconsider(&self, peer: NodeId) -> Option<OrphanTxToReconsider> {
        self.inner.lock().get_tx_to_reconsider(peer)
    }

    /// Returns `true` if the work set of `peer` is not empty.
    pub fn have_tx_to_reconsider(&self, peer: NodeId) -> bool {
        self.inner.lock().have_tx_to_reconsider(peer)
    }

    /// Erase an orphan by txid, returns the number of erased orphans (0 or 1).
    pub fn erase_tx(&self, txid: &Txid) -> usize {
        self.inner.lock().erase_tx(txid)
    }

    /// Erase all orphans relayed by `peer` and drop its work set, e.g. after it disconnected.
    pub fn erase_for_peer(&self, peer: NodeId) -> usize {
        self.inner.lock().erase_for_peer(peer)
    }

    /// Erase all orphans included in or conflicting with a newly connected block.
    pub fn erase_for_block(&self, block: &Block) -> usize {
        self.inner.lock().erase_for_block(block)
    }

    /// Limit the orphanage to `max_orphans` entries.
    ///
    /// Returns the number of erased orphans, expired ones included.
    pub fn limit_orphans(&self, max_orphans: usize) -> usize {
        self.inner.lock().limit_orphans(max_orphans, unix_time())
    }

    /// Limit the orphanage to the configured maximum.
    pub fn limit_to_capacity(&self) -> usize {
        let mut inner = self.inner.lock();
        let max_orphans = inner.options().max_orphans;
        inner.limit_orphans(max_orphans, unix_time())
    }

    /// Add the orphans spending any output of `tx` to the work set of `peer`.
    pub fn add_children_to_work_set(&self, tx: &Transaction, peer: NodeId) {
        self.inner.lock().add_children_to_work_set(tx, peer)
    }

    /// Number of orphans.
    pub fn size(&self) -> usize {
        self.inner.lock().size()
    }
}

fn unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or_default()
}
