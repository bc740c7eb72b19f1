//! Lock-free orphan state, wrapped by [`crate::TxOrphanage`].
//!
//! Orphans live in a [`SlotMap`] arena and every index refers to them by [`OrphanId`] handle.
//! Operations that depend on the clock take the current unix time explicitly.

use crate::options::OrphanageOptions;
use crate::{GenTxid, NodeId, OrphanTxToReconsider};
use bitcoin::{Block, OutPoint, Transaction, Txid, Wtxid};
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Handle to an orphan in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OrphanId(DefaultKey);

struct OrphanTx {
    tx: Arc<Transaction>,
    txid: Txid,
    wtxid: Wtxid,
    from_peer: NodeId,
    /// Unix time in seconds after which the orphan is swept.
    time_expire: i64,
    /// Position in `orphan_list`.
    list_pos: usize,
}

pub(crate) struct OrphanageInner {
    /// Primary storage.
    orphans: SlotMap<DefaultKey, OrphanTx>,

    /// Index by transaction ID.
    by_txid: HashMap<Txid, OrphanId>,

    /// Index by witness transaction ID.
    by_wtxid: HashMap<Wtxid, OrphanId>,

    /// Orphans spending each outpoint.
    outpoint_to_orphans: HashMap<OutPoint, HashSet<OrphanId>>,

    /// Every orphan exactly once, for uniform random eviction.
    orphan_list: Vec<OrphanId>,

    /// Orphans to reconsider because the peer provided one of their parents.
    peer_work_set: HashMap<NodeId, BTreeSet<Txid>>,

    /// Unix time of the next sweep for expired orphans.
    next_sweep: i64,

    rng: fastrand::Rng,

    options: OrphanageOptions,
}

impl OrphanageInner {
    pub(crate) fn new(options: OrphanageOptions, rng: fastrand::Rng) -> Self {
        Self {
            orphans: SlotMap::new(),
            by_txid: HashMap::new(),
            by_wtxid: HashMap::new(),
            outpoint_to_orphans: HashMap::new(),
            orphan_list: Vec::new(),
            peer_work_set: HashMap::new(),
            next_sweep: 0,
            rng,
            options,
        }
    }

    pub(crate) fn options(&self) -> &OrphanageOptions {
        &self.options
    }

    pub(crate) fn add_tx(&mut self, tx: Arc<Transaction>, peer: NodeId, now: i64) -> bool {
        let txid = tx.compute_txid();
        let wtxid = tx.compute_wtxid();

        if self.by_txid.contains_key(&txid) || self.by_wtxid.contains_key(&wtxid) {
            return false;
        }

        let weight = tx.weight();
        if weight > self.options.max_standard_tx_weight {
            tracing::debug!(
                "Ignoring large orphan tx (weight: {}, txid: {txid}, wtxid: {wtxid})",
                weight.to_wu()
            );
            return false;
        }

        let id = OrphanId(self.orphans.insert(OrphanTx {
            tx: tx.clone(),
            txid,
            wtxid,
            from_peer: peer,
            time_expire: now + self.options.expire_time_secs(),
            list_pos: self.orphan_list.len(),
        }));

        self.orphan_list.push(id);
        self.by_txid.insert(txid, id);
        self.by_wtxid.insert(wtxid, id);

        for input in &tx.input {
            self.outpoint_to_orphans
                .entry(input.previous_output)
                .or_default()
                .insert(id);
        }

        self.peer_work_set.entry(peer).or_default();

        tracing::debug!(
            "Stored orphan tx {txid} from peer={peer} (mapsz {} outsz {})",
            self.orphans.len(),
            self.outpoint_to_orphans.len()
        );

        true
    }

    pub(crate) fn have_tx(&self, gtxid: &GenTxid) -> bool {
        match gtxid {
            GenTxid::Txid(txid) => self.by_txid.contains_key(txid),
            GenTxid::Wtxid(wtxid) => self.by_wtxid.contains_key(wtxid),
        }
    }

    pub(crate) fn get_tx_to_reconsider(&mut self, peer: NodeId) -> Option<OrphanTxToReconsider> {
        let work_set = self.peer_work_set.get_mut(&peer)?;

        while let Some(txid) = work_set.pop_first() {
            // The orphan may have been erased since it was queued.
            if let Some(id) = self.by_txid.get(&txid) {
                let orphan = &self.orphans[id.0];
                return Some(OrphanTxToReconsider {
                    tx: orphan.tx.clone(),
                    from_peer: orphan.from_peer,
                    more: !work_set.is_empty(),
                });
            }
        }

        None
    }

    pub(crate) fn have_tx_to_reconsider(&self, peer: NodeId) -> bool {
        self.peer_work_set
            .get(&peer)
            .is_some_and(|work_set| !work_set.is_empty())
    }

    pub(crate) fn erase_tx(&mut self, txid: &Txid) -> usize {
        let Some(id) = self.by_txid.remove(txid) else {
            return 0;
        };
        let Some(orphan) = self.orphans.remove(id.0) else {
            return 0;
        };

        for input in &orphan.tx.input {
            if let Entry::Occupied(mut entry) = self.outpoint_to_orphans.entry(input.previous_output)
            {
                entry.get_mut().remove(&id);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }

        // The last element takes the freed slot.
        let old_pos = orphan.list_pos;
        self.orphan_list.swap_remove(old_pos);
        if let Some(moved) = self.orphan_list.get(old_pos) {
            self.orphans[moved.0].list_pos = old_pos;
        }

        self.by_wtxid.remove(&orphan.wtxid);

        1
    }

    pub(crate) fn erase_for_peer(&mut self, peer: NodeId) -> usize {
        self.peer_work_set.remove(&peer);

        let from_peer: Vec<Txid> = self
            .orphans
            .values()
            .filter(|orphan| orphan.from_peer == peer)
            .map(|orphan| orphan.txid)
            .collect();

        let erased: usize = from_peer.iter().map(|txid| self.erase_tx(txid)).sum();

        if erased > 0 {
            tracing::debug!("Erased {erased} orphan tx from peer={peer}");
        }

        erased
    }

    pub(crate) fn erase_for_block(&mut self, block: &Block) -> usize {
        let mut to_erase = Vec::new();

        for tx in &block.txdata {
            let txid = tx.compute_txid();
            if self.by_txid.contains_key(&txid) {
                to_erase.push(txid);
            }

            // Orphans spending the same outputs conflict with the block.
            for input in &tx.input {
                if let Some(ids) = self.outpoint_to_orphans.get(&input.previous_output) {
                    to_erase.extend(ids.iter().map(|id| self.orphans[id.0].txid));
                }
            }
        }

        let erased: usize = to_erase.iter().map(|txid| self.erase_tx(txid)).sum();

        if erased > 0 {
            tracing::debug!(
                "Erased {erased} orphan tx included or conflicted by block {}",
                block.block_hash()
            );
        }

        erased
    }

    /// Sweeps expired orphans when due, then evicts random orphans until at most `max_orphans`
    /// remain. Returns the total number of erased orphans.
    pub(crate) fn limit_orphans(&mut self, max_orphans: usize, now: i64) -> usize {
        let mut expired: usize = 0;

        if self.next_sweep <= now {
            let expire_interval = self.options.expire_interval_secs();
            let mut min_expire = now + self.options.expire_time_secs() - expire_interval;

            let expired_txids: Vec<Txid> = self
                .orphans
                .values()
                .filter_map(|orphan| {
                    if orphan.time_expire <= now {
                        Some(orphan.txid)
                    } else {
                        min_expire = min_expire.min(orphan.time_expire);
                        None
                    }
                })
                .collect();

            expired = expired_txids.iter().map(|txid| self.erase_tx(txid)).sum();

            // Sweep again a bit after the next orphan expires, batching nearby expirations.
            self.next_sweep = min_expire + expire_interval;

            if expired > 0 {
                tracing::debug!("Erased {expired} orphan tx due to expiration");
            }
        }

        let mut evicted: usize = 0;
        while self.orphans.len() > max_orphans {
            let random_pos = self.rng.usize(..self.orphan_list.len());
            let txid = self.orphans[self.orphan_list[random_pos].0].txid;
            evicted += self.erase_tx(&txid);
        }

        if evicted > 0 {
            tracing::debug!("Orphanage overflow, removed {evicted} tx");
        }

        expired + evicted
    }

    pub(crate) fn add_children_to_work_set(&mut self, tx: &Transaction, peer: NodeId) {
        let txid = tx.compute_txid();

        let children: Vec<Txid> = (0..tx.output.len() as u32)
            .filter_map(|vout| self.outpoint_to_orphans.get(&OutPoint::new(txid, vout)))
            .flatten()
            .map(|id| self.orphans[id.0].txid)
            .collect();

        if children.is_empty() {
            return;
        }

        tracing::debug!(
            "Added {} orphan children of {txid} to the work set of peer={peer}",
            children.len()
        );

        self.peer_work_set.entry(peer).or_default().extend(children);
    }

    pub(crate) fn size(&self) -> usize {
        self.orphans.len()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.orphans.len(), self.orphan_list.len());
        assert_eq!(self.orphans.len(), self.by_txid.len());
        assert_eq!(self.orphans.len(), self.by_wtxid.len());

        for (pos, id) in self.orphan_list.iter().enumerate() {
            let orphan = &self.orphans[id.0];
            assert_eq!(orphan.list_pos, pos);
            assert_eq!(self.by_txid[&orphan.txid], *id);
            assert_eq!(self.by_wtxid[&orphan.wtxid], *id);
            for input in &orphan.tx.input {
                assert!(self.outpoint_to_orphans[&input.previous_output].contains(id));
            }
        }

        for ids in self.outpoint_to_orphans.values() {
            assert!(!ids.is_empty());
            assert!(ids.iter().all(|id| self.orphans.contains_key(id.0)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, ScriptBuf, Sequence, TxIn, TxOut, Witness};

    const NOW: i64 = 1_700_000_000;

    fn random_outpoint(rng: &mut fastrand::Rng) -> OutPoint {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        OutPoint::new(Txid::from_byte_array(bytes), rng.u32(0..4))
    }

    fn tx_spending(prevouts: &[OutPoint], num_outputs: usize) -> Arc<Transaction> {
        Arc::new(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: prevouts
                .iter()
                .map(|previous_output| TxIn {
                    previous_output: *previous_output,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: (0..num_outputs)
                .map(|i| TxOut {
                    value: Amount::from_sat(1_000 + i as u64),
                    script_pubkey: ScriptBuf::new(),
                })
                .collect(),
        })
    }

    fn orphanage() -> OrphanageInner {
        OrphanageInner::new(OrphanageOptions::default(), fastrand::Rng::with_seed(42))
    }

    #[test]
    fn test_add_and_erase_keep_indexes_consistent() {
        let mut rng = fastrand::Rng::with_seed(1);
        let mut orphanage = orphanage();

        let txs: Vec<_> = (0..50)
            .map(|_| tx_spending(&[random_outpoint(&mut rng), random_outpoint(&mut rng)], 1))
            .collect();
        for (i, tx) in txs.iter().enumerate() {
            assert!(orphanage.add_tx(tx.clone(), i as NodeId % 3, NOW));
        }
        orphanage.assert_consistent();

        for tx in txs.iter().step_by(3) {
            assert_eq!(orphanage.erase_tx(&tx.compute_txid()), 1);
            orphanage.assert_consistent();
        }
        assert_eq!(orphanage.size(), 33);

        // Erasing an absent orphan is a no-op.
        assert_eq!(orphanage.erase_tx(&txs[0].compute_txid()), 0);
        assert_eq!(orphanage.size(), 33);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut rng = fastrand::Rng::with_seed(2);
        let mut orphanage = orphanage();
        let tx = tx_spending(&[random_outpoint(&mut rng)], 1);

        assert!(orphanage.add_tx(tx.clone(), 1, NOW));
        assert!(!orphanage.add_tx(tx.clone(), 2, NOW));

        // Same txid, different witness.
        let mut malleated = (*tx).clone();
        malleated.input[0].witness = Witness::from_slice(&[vec![1u8; 10]]);
        assert_eq!(malleated.compute_txid(), tx.compute_txid());
        assert!(!orphanage.add_tx(Arc::new(malleated), 2, NOW));

        assert_eq!(orphanage.size(), 1);
        assert!(orphanage.have_tx(&GenTxid::Txid(tx.compute_txid())));
        assert!(orphanage.have_tx(&GenTxid::Wtxid(tx.compute_wtxid())));
    }

    #[test]
    fn test_large_orphan_ignored() {
        let mut rng = fastrand::Rng::with_seed(3);
        let mut orphanage = orphanage();

        let mut tx = (*tx_spending(&[random_outpoint(&mut rng)], 1)).clone();
        tx.output[0].script_pubkey = ScriptBuf::from_bytes(vec![0x6a; 100_001]);
        assert!(!orphanage.add_tx(Arc::new(tx), 1, NOW));
        assert_eq!(orphanage.size(), 0);
    }

    #[test]
    fn test_limit_orphans_exact_count() {
        let mut rng = fastrand::Rng::with_seed(4);
        let mut orphanage = orphanage();

        for _ in 0..120 {
            orphanage.add_tx(tx_spending(&[random_outpoint(&mut rng)], 1), 0, NOW);
        }
        assert_eq!(orphanage.size(), 120);

        assert_eq!(orphanage.limit_orphans(100, NOW), 20);
        assert_eq!(orphanage.size(), 100);
        orphanage.assert_consistent();

        assert_eq!(orphanage.limit_orphans(100, NOW), 0);
        assert_eq!(orphanage.limit_orphans(0, NOW), 100);
        assert_eq!(orphanage.size(), 0);
        orphanage.assert_consistent();
    }

    #[test]
    fn test_expired_orphans_swept_on_schedule() {
        let mut rng = fastrand::Rng::with_seed(5);
        let mut orphanage = orphanage();
        let expire = orphanage.options().expire_time_secs();
        let interval = orphanage.options().expire_interval_secs();

        let old = tx_spending(&[random_outpoint(&mut rng)], 1);
        orphanage.add_tx(old.clone(), 1, NOW);

        // Nothing expired yet, the next sweep is due when `old` expires.
        assert_eq!(orphanage.limit_orphans(100, NOW), 0);
        assert_eq!(orphanage.next_sweep, NOW + expire);
        assert_eq!(orphanage.limit_orphans(100, NOW + expire - 1), 0);

        let young = tx_spending(&[random_outpoint(&mut rng)], 1);
        orphanage.add_tx(young.clone(), 1, NOW + 600);

        assert_eq!(orphanage.limit_orphans(100, NOW + expire), 1);
        assert!(!orphanage.have_tx(&GenTxid::Txid(old.compute_txid())));
        assert!(orphanage.have_tx(&GenTxid::Txid(young.compute_txid())));
        assert_eq!(orphanage.next_sweep, NOW + 600 + expire + interval);

        // `young` expired, but the sweep is not due yet.
        assert_eq!(orphanage.limit_orphans(100, NOW + 600 + expire + 1), 0);
        assert_eq!(orphanage.size(), 1);

        assert_eq!(orphanage.limit_orphans(100, NOW + 600 + expire + interval), 1);
        assert_eq!(orphanage.size(), 0);
        orphanage.assert_consistent();
    }

    #[test]
    fn test_work_set() {
        let mut rng = fastrand::Rng::with_seed(6);
        let mut orphanage = orphanage();

        let parent = tx_spending(&[random_outpoint(&mut rng)], 2);
        let parent_txid = parent.compute_txid();
        let child1 = tx_spending(&[OutPoint::new(parent_txid, 0)], 1);
        let child2 = tx_spending(&[OutPoint::new(parent_txid, 1)], 1);
        let unrelated = tx_spending(&[random_outpoint(&mut rng)], 1);

        orphanage.add_tx(child1.clone(), 1, NOW);
        orphanage.add_tx(child2.clone(), 2, NOW);
        orphanage.add_tx(unrelated, 1, NOW);

        assert!(!orphanage.have_tx_to_reconsider(7));
        assert!(orphanage.get_tx_to_reconsider(7).is_none());

        orphanage.add_children_to_work_set(&parent, 7);
        assert!(orphanage.have_tx_to_reconsider(7));

        let first = orphanage.get_tx_to_reconsider(7).unwrap();
        assert!(first.more);
        let second = orphanage.get_tx_to_reconsider(7).unwrap();
        assert!(!second.more);
        assert!(orphanage.get_tx_to_reconsider(7).is_none());

        let mut got: Vec<(Txid, NodeId)> = vec![
            (first.tx.compute_txid(), first.from_peer),
            (second.tx.compute_txid(), second.from_peer),
        ];
        got.sort();
        let mut expected = vec![(child1.compute_txid(), 1), (child2.compute_txid(), 2)];
        expected.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_reconsider_skips_erased_orphans() {
        let mut rng = fastrand::Rng::with_seed(7);
        let mut orphanage = orphanage();

        let parent = tx_spending(&[random_outpoint(&mut rng)], 2);
        let parent_txid = parent.compute_txid();
        let child1 = tx_spending(&[OutPoint::new(parent_txid, 0)], 1);
        let child2 = tx_spending(&[OutPoint::new(parent_txid, 1)], 1);
        orphanage.add_tx(child1.clone(), 1, NOW);
        orphanage.add_tx(child2.clone(), 1, NOW);

        orphanage.add_children_to_work_set(&parent, 3);
        orphanage.erase_tx(&child1.compute_txid());

        let next = orphanage.get_tx_to_reconsider(3).unwrap();
        assert_eq!(next.tx.compute_txid(), child2.compute_txid());
        assert!(!orphanage.have_tx_to_reconsider(3));
    }

    #[test]
    fn test_erase_for_peer() {
        let mut rng = fastrand::Rng::with_seed(8);
        let mut orphanage = orphanage();

        let parent = tx_spending(&[random_outpoint(&mut rng)], 1);
        let from_1 = tx_spending(&[OutPoint::new(parent.compute_txid(), 0)], 1);
        let from_2 = tx_spending(&[random_outpoint(&mut rng)], 1);
        orphanage.add_tx(from_1.clone(), 1, NOW);
        orphanage.add_tx(from_2.clone(), 2, NOW);
        orphanage.add_children_to_work_set(&parent, 1);

        assert_eq!(orphanage.erase_for_peer(1), 1);
        assert!(!orphanage.have_tx(&GenTxid::Txid(from_1.compute_txid())));
        assert!(!orphanage.have_tx_to_reconsider(1));
        assert!(orphanage.have_tx(&GenTxid::Txid(from_2.compute_txid())));
        orphanage.assert_consistent();
    }
}
