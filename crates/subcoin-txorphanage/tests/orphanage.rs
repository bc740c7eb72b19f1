use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxMerkleNode, TxOut, Txid, Witness,
};
use std::sync::Arc;
use subcoin_txorphanage::{GenTxid, OrphanageOptions, TxOrphanage};

fn random_outpoint(rng: &mut fastrand::Rng) -> OutPoint {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    OutPoint::new(Txid::from_byte_array(bytes), 0)
}

fn tx_spending(prevouts: &[OutPoint], value: u64) -> Transaction {
    Transaction {
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
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

fn block_with(txdata: Vec<Transaction>) -> Block {
    Block {
        header: Header {
            version: BlockVersion::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_231_006_505,
            bits: CompactTarget::from_consensus(0x1d00ffff),
            nonce: 0,
        },
        txdata,
    }
}

fn has(orphanage: &TxOrphanage, tx: &Transaction) -> bool {
    orphanage.have_tx(&GenTxid::Txid(tx.compute_txid()))
}

#[test]
fn eviction_leaves_exact_capacity() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut rng = fastrand::Rng::with_seed(11);
    let orphanage = TxOrphanage::with_rng(OrphanageOptions::default(), fastrand::Rng::with_seed(12));

    for value in 0..250 {
        let tx = tx_spending(&[random_outpoint(&mut rng)], value);
        assert!(orphanage.add_tx(Arc::new(tx), value as i64 % 5));
    }

    assert_eq!(orphanage.limit_to_capacity(), 150);
    assert_eq!(orphanage.size(), 100);
    assert_eq!(orphanage.limit_orphans(10), 90);
    assert_eq!(orphanage.size(), 10);
}

#[test]
fn erase_for_peer_forgets_everything_about_peer() {
    let mut rng = fastrand::Rng::with_seed(21);
    let orphanage = TxOrphanage::default();

    let parent = tx_spending(&[random_outpoint(&mut rng)], 1);
    let child = tx_spending(&[OutPoint::new(parent.compute_txid(), 0)], 2);
    let other = tx_spending(&[random_outpoint(&mut rng)], 3);

    assert!(orphanage.add_tx(Arc::new(child.clone()), 1));
    assert!(orphanage.add_tx(Arc::new(other.clone()), 2));
    orphanage.add_children_to_work_set(&parent, 1);
    assert!(orphanage.have_tx_to_reconsider(1));

    assert_eq!(orphanage.erase_for_peer(1), 1);
    assert!(!has(&orphanage, &child));
    assert!(!orphanage.have_tx_to_reconsider(1));
    assert!(orphanage.get_tx_to_reconsider(1).is_none());
    assert!(has(&orphanage, &other));

    assert_eq!(orphanage.erase_for_peer(1), 0);
}

#[test]
fn erase_for_block_removes_confirmed_and_conflicting() {
    let mut rng = fastrand::Rng::with_seed(31);
    let orphanage = TxOrphanage::default();

    let shared_input = random_outpoint(&mut rng);
    let confirmed = tx_spending(&[random_outpoint(&mut rng)], 1);
    let conflicting = tx_spending(&[shared_input, random_outpoint(&mut rng)], 2);
    let untouched = tx_spending(&[random_outpoint(&mut rng)], 3);

    for tx in [&confirmed, &conflicting, &untouched] {
        assert!(orphanage.add_tx(Arc::new(tx.clone()), 7));
    }

    let double_spend = tx_spending(&[shared_input], 4);
    let block = block_with(vec![confirmed.clone(), double_spend]);

    assert_eq!(orphanage.erase_for_block(&block), 2);
    assert!(!has(&orphanage, &confirmed));
    assert!(!has(&orphanage, &conflicting));
    assert!(has(&orphanage, &untouched));
    assert_eq!(orphanage.size(), 1);
}

#[test]
fn children_resolved_in_work_set_order() {
    let mut rng = fastrand::Rng::with_seed(41);
    let orphanage = TxOrphanage::default();

    let parent = tx_spending(&[random_outpoint(&mut rng)], 1);
    let child = tx_spending(&[OutPoint::new(parent.compute_txid(), 0)], 2);
    assert!(orphanage.add_tx(Arc::new(child.clone()), 3));

    // A parent with no orphaned children queues nothing.
    orphanage.add_children_to_work_set(&child, 4);
    assert!(!orphanage.have_tx_to_reconsider(4));

    orphanage.add_children_to_work_set(&parent, 4);
    let reconsider = orphanage.get_tx_to_reconsider(4).unwrap();
    assert_eq!(reconsider.tx.compute_txid(), child.compute_txid());
    assert_eq!(reconsider.from_peer, 3);
    assert!(!reconsider.more);

    // Still an orphan until the caller erases it.
    assert!(has(&orphanage, &child));
    assert_eq!(orphanage.erase_tx(&child.compute_txid()), 1);
    assert_eq!(orphanage.erase_tx(&child.compute_txid()), 0);
}

#[test]
fn concurrent_peers() {
    let orphanage = Arc::new(TxOrphanage::default());

    let handles: Vec<_> = (0..4i64)
        .map(|peer| {
            let orphanage = orphanage.clone();
            std::thread::spawn(move || {
                let mut rng = fastrand::Rng::with_seed(peer as u64);
                for value in 0..50 {
                    let tx = tx_spending(&[random_outpoint(&mut rng)], value);
                    orphanage.add_tx(Arc::new(tx), peer);
                    orphanage.limit_orphans(100);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(orphanage.size(), 100);
    for peer in 0..4 {
        orphanage.erase_for_peer(peer);
    }
    assert_eq!(orphanage.size(), 0);
}
