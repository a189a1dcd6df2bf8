//! End-to-end scenarios for the pending-envelope pipeline.

use std::cell::RefCell;
use std::rc::Rc;

use hayashi_common::Hash256;
use hayashi_herder::{EnvelopeStatus, PendingEnvelopes};
use hayashi_overlay::{ItemType, PeerId};
use stellar_xdr::curr::{
    Limits, NodeId, PublicKey, ScpBallot, ScpEnvelope, ScpQuorumSet, ScpStatement,
    ScpStatementPledges, ScpStatementPrepare, Signature, StellarValue, StellarValueExt, TimePoint,
    Uint256, Value, VecM, WriteXdr,
};

fn make_node_id(seed: u8) -> NodeId {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    NodeId(PublicKey::PublicKeyTypeEd25519(Uint256(bytes)))
}

fn make_quorum_set(validators: Vec<NodeId>, threshold: u32) -> ScpQuorumSet {
    ScpQuorumSet {
        threshold,
        validators: validators.try_into().unwrap(),
        inner_sets: vec![].try_into().unwrap(),
    }
}

fn qset_hash(qset: &ScpQuorumSet) -> Hash256 {
    Hash256::hash_xdr(qset).unwrap()
}

fn make_value(txset: Hash256) -> Value {
    let sv = StellarValue {
        tx_set_hash: txset.into(),
        close_time: TimePoint(0),
        upgrades: VecM::default(),
        ext: StellarValueExt::Basic,
    };
    Value(sv.to_xdr(Limits::none()).unwrap().try_into().unwrap())
}

fn make_prepare(slot: u64, node_seed: u8, qset: Hash256, txset: Hash256) -> ScpEnvelope {
    ScpEnvelope {
        statement: ScpStatement {
            node_id: make_node_id(node_seed),
            slot_index: slot,
            pledges: ScpStatementPledges::Prepare(ScpStatementPrepare {
                quorum_set_hash: qset.into(),
                ballot: ScpBallot {
                    counter: 1,
                    value: make_value(txset),
                },
                prepared: None,
                prepared_prime: None,
                n_c: 0,
                n_h: 0,
            }),
        },
        signature: Signature::default(),
    }
}

fn make_pipeline() -> PendingEnvelopes {
    PendingEnvelopes::with_defaults(
        make_node_id(1),
        make_quorum_set(vec![make_node_id(1)], 1),
    )
}

/// A pipeline whose fetchers record every solicitation.
fn make_observed_pipeline() -> (PendingEnvelopes, Rc<RefCell<Vec<(ItemType, Hash256)>>>) {
    let solicited: Rc<RefCell<Vec<(ItemType, Hash256)>>> = Rc::new(RefCell::new(Vec::new()));
    let mut pending = make_pipeline();
    pending.set_available_peers(vec![PeerId::from_bytes([7; 32])]);

    let sink = Rc::clone(&solicited);
    pending.set_qset_ask_peer(Box::new(move |_, hash, item_type| {
        sink.borrow_mut().push((item_type, *hash));
    }));
    let sink = Rc::clone(&solicited);
    pending.set_txset_ask_peer(Box::new(move |_, hash, item_type| {
        sink.borrow_mut().push((item_type, *hash));
    }));
    (pending, solicited)
}

#[test]
fn test_happy_path_fetch_then_ready_then_processed() {
    let (mut pending, solicited) = make_observed_pipeline();

    let q_safe = make_quorum_set(vec![make_node_id(2)], 1);
    let q_hash = qset_hash(&q_safe);
    let t_hash = Hash256::from_bytes([42; 32]);
    let envelope = make_prepare(100, 2, q_hash, t_hash);

    // Both dependencies unknown: the envelope parks in *fetching* and both
    // items are solicited from the peer.
    assert_eq!(pending.recv_envelope(&envelope), EnvelopeStatus::Fetching);
    assert!(pending.is_fetching(&envelope));
    {
        let solicited = solicited.borrow();
        assert!(solicited.contains(&(ItemType::QuorumSet, q_hash)));
        assert!(solicited.contains(&(ItemType::TxSet, t_hash)));
    }

    // The quorum set arrives; the transaction set is still missing.
    assert!(pending.recv_qset(q_hash, q_safe));
    assert!(pending.is_fetching(&envelope));
    assert_eq!(pending.metrics().ready, 0);

    // The transaction set arrives; the envelope is promoted.
    assert!(pending.recv_txset(t_hash, vec![1, 2, 3]));
    assert!(pending.is_ready(&envelope));
    assert_eq!(pending.ready_slots(), vec![100]);
    assert_eq!(pending.metrics().fetch_duration.count(), 1);

    // The engine consumes it.
    let popped = pending.pop(100).expect("ready envelope");
    assert_eq!(popped, envelope);
    pending.envelope_processed(&popped);

    assert!(pending.is_processed(&envelope));
    assert_eq!(pending.metrics().processed, 1);
    assert_eq!(pending.metrics().ready, 0);
    assert_eq!(pending.metrics().fetching, 0);
    assert_eq!(pending.metrics().discarded, 0);
}

#[test]
fn test_unsafe_qset_cascade_discards_all_waiters() {
    let mut pending = make_pipeline();

    // 2-of-1 is structurally insane.
    let q_unsafe = make_quorum_set(vec![make_node_id(2)], 2);
    let q_hash = qset_hash(&q_unsafe);
    let t1 = Hash256::from_bytes([1; 32]);
    let t2 = Hash256::from_bytes([2; 32]);

    let e1 = make_prepare(50, 2, q_hash, t1);
    let e2 = make_prepare(50, 3, q_hash, t2);
    assert_eq!(pending.recv_envelope(&e1), EnvelopeStatus::Fetching);
    assert_eq!(pending.recv_envelope(&e2), EnvelopeStatus::Fetching);

    // The descriptor was requested, so delivery reports true, but it fails
    // validation and poisons both envelopes.
    assert!(pending.recv_qset(q_hash, q_unsafe));

    assert!(pending.is_discarded(&e1));
    assert!(pending.is_discarded(&e2));
    assert_eq!(pending.metrics().discarded, 2);
    assert_eq!(pending.metrics().fetching, 0);

    // No outstanding requests survive for the quorum set or either txset.
    assert!(!pending.is_fetching_item(&q_hash));
    assert!(!pending.is_fetching_item(&t1));
    assert!(!pending.is_fetching_item(&t2));

    // Re-receiving a poisoned envelope reports Discarded.
    assert_eq!(pending.recv_envelope(&e1), EnvelopeStatus::Discarded);
}

#[test]
fn test_dependencies_resolve_in_either_order() {
    // TxSet first, quorum set second.
    let mut pending = make_pipeline();
    let q_safe = make_quorum_set(vec![make_node_id(2)], 1);
    let q_hash = qset_hash(&q_safe);
    let t_hash = Hash256::from_bytes([5; 32]);

    let envelope = make_prepare(10, 2, q_hash, t_hash);
    assert_eq!(pending.recv_envelope(&envelope), EnvelopeStatus::Fetching);
    assert!(pending.recv_txset(t_hash, vec![1]));
    assert!(pending.is_fetching(&envelope));
    assert!(pending.recv_qset(q_hash, q_safe.clone()));
    assert!(pending.is_ready(&envelope));

    // Quorum set first, txset second.
    let mut pending = make_pipeline();
    let envelope = make_prepare(10, 2, q_hash, t_hash);
    assert_eq!(pending.recv_envelope(&envelope), EnvelopeStatus::Fetching);
    assert!(pending.recv_qset(q_hash, q_safe));
    assert!(pending.is_fetching(&envelope));
    assert!(pending.recv_txset(t_hash, vec![1]));
    assert!(pending.is_ready(&envelope));
}

#[test]
fn test_unsafe_qset_sweeps_across_slots() {
    let mut pending = make_pipeline();

    let q_unsafe = make_quorum_set(vec![make_node_id(2)], 2);
    let q_hash = qset_hash(&q_unsafe);
    let t1 = Hash256::from_bytes([1; 32]);

    // Waiters in two different slots, one with its txset already resolved.
    let e1 = make_prepare(60, 2, q_hash, t1);
    let e2 = make_prepare(61, 3, q_hash, Hash256::from_bytes([2; 32]));
    pending.recv_envelope(&e1);
    pending.recv_envelope(&e2);
    assert!(pending.recv_txset(t1, vec![9]));

    assert!(pending.recv_qset(q_hash, q_unsafe));
    assert!(pending.is_discarded(&e1));
    assert!(pending.is_discarded(&e2));
    assert_eq!(pending.metrics().ready, 0);
    assert_eq!(pending.metrics().fetching, 0);
}

#[test]
fn test_pop_across_slots_is_independent() {
    let mut pending = make_pipeline();
    let q_safe = make_quorum_set(vec![make_node_id(2), make_node_id(3)], 1);
    let q_hash = qset_hash(&q_safe);
    pending.add_qset(q_hash, q_safe);
    let t_hash = Hash256::from_bytes([8; 32]);
    pending.cache_txset(t_hash, 0, vec![1]);

    let slot_a = make_prepare(100, 2, q_hash, t_hash);
    let slot_b = make_prepare(200, 3, q_hash, t_hash);
    assert_eq!(pending.recv_envelope(&slot_a), EnvelopeStatus::Ready);
    assert_eq!(pending.recv_envelope(&slot_b), EnvelopeStatus::Ready);

    assert_eq!(pending.ready_slots(), vec![100, 200]);
    assert_eq!(pending.pop(200).unwrap(), slot_b);
    assert_eq!(pending.pop(100).unwrap(), slot_a);
}

#[test]
fn test_erase_below_cancels_inflight_fetches() {
    let mut pending = make_pipeline();
    let q_hash = Hash256::from_bytes([3; 32]);
    let t_hash = Hash256::from_bytes([4; 32]);

    let envelope = make_prepare(30, 2, q_hash, t_hash);
    assert_eq!(pending.recv_envelope(&envelope), EnvelopeStatus::Fetching);
    assert!(pending.is_fetching_item(&q_hash));
    assert!(pending.is_fetching_item(&t_hash));

    pending.erase_below(40);

    assert!(!pending.is_fetching_item(&q_hash));
    assert!(!pending.is_fetching_item(&t_hash));
    // Late deliveries for the cancelled fetches are unrequested now.
    assert!(!pending.recv_txset(t_hash, vec![1]));
    assert!(!pending.recv_qset(q_hash, make_quorum_set(vec![make_node_id(2)], 1)));
}

#[test]
fn test_peer_doesnt_have_rotates_to_next_peer() {
    let (mut pending, solicited) = make_observed_pipeline();
    pending.set_available_peers(vec![
        PeerId::from_bytes([7; 32]),
        PeerId::from_bytes([8; 32]),
    ]);

    let q_hash = Hash256::from_bytes([6; 32]);
    let envelope = make_prepare(10, 2, q_hash, Hash256::from_bytes([5; 32]));
    pending.recv_envelope(&envelope);
    let initial = solicited.borrow().len();

    pending.peer_doesnt_have(ItemType::QuorumSet, &q_hash, &PeerId::from_bytes([7; 32]));
    assert_eq!(solicited.borrow().len(), initial + 1);

    // A reply about an item nobody fetches is ignored.
    pending.peer_doesnt_have(
        ItemType::QuorumSet,
        &Hash256::from_bytes([99; 32]),
        &PeerId::from_bytes([7; 32]),
    );
    assert_eq!(solicited.borrow().len(), initial + 1);
}

#[test]
fn test_discarded_is_terminal_across_redelivery() {
    let mut pending = make_pipeline();

    let q_unsafe = make_quorum_set(vec![make_node_id(2)], 2);
    let q_hash = qset_hash(&q_unsafe);
    let envelope = make_prepare(20, 2, q_hash, Hash256::from_bytes([1; 32]));

    pending.recv_envelope(&envelope);
    assert!(pending.recv_qset(q_hash, q_unsafe.clone()));
    assert!(pending.is_discarded(&envelope));

    // Neither re-receiving the envelope nor a second descriptor delivery
    // revives it.
    assert_eq!(pending.recv_envelope(&envelope), EnvelopeStatus::Discarded);
    assert!(!pending.recv_qset(q_hash, q_unsafe));
    assert!(pending.is_discarded(&envelope));
}

#[test]
fn test_envelope_processed_without_pop_is_recorded() {
    // The engine may learn an envelope through another channel and report
    // it processed without it ever entering the ready queue.
    let mut pending = make_pipeline();
    let q_safe = make_quorum_set(vec![make_node_id(2)], 1);
    let q_hash = qset_hash(&q_safe);
    pending.add_qset(q_hash, q_safe);
    let t_hash = Hash256::from_bytes([4; 32]);
    pending.cache_txset(t_hash, 0, vec![1]);

    let envelope = make_prepare(70, 2, q_hash, t_hash);
    pending.envelope_processed(&envelope);

    assert!(pending.is_processed(&envelope));
    assert_eq!(pending.recv_envelope(&envelope), EnvelopeStatus::Processed);
}

#[test]
fn test_fetch_duration_recorded_on_promotion() {
    let mut pending = make_pipeline();
    let q_safe = make_quorum_set(vec![make_node_id(2)], 1);
    let q_hash = qset_hash(&q_safe);

    let envelope = make_prepare(80, 2, q_hash, Hash256::from_bytes([9; 32]));
    pending.recv_envelope(&envelope);
    assert_eq!(pending.metrics().fetch_duration.count(), 0);

    pending.recv_qset(q_hash, q_safe);
    pending.recv_txset(Hash256::from_bytes([9; 32]), vec![1]);

    let metrics = pending.metrics();
    assert_eq!(metrics.fetch_duration.count(), 1);
    assert!(metrics.fetch_duration.max() >= metrics.fetch_duration.mean());
}
