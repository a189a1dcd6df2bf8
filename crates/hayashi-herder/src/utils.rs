//! Helpers for working with consensus envelopes.
//!
//! Envelopes reference their dependencies by hash: every statement names the
//! quorum set its sender relied on, and ballot-carrying statements embed a
//! value whose payload names a transaction set. These helpers extract those
//! hashes and compute the envelope's own byte identity.

use hayashi_common::Hash256;
use stellar_xdr::curr::{
    Limits, NodeId, PublicKey, ReadXdr, ScpEnvelope, ScpStatement, ScpStatementPledges,
    StellarValue,
};

/// Hash of the quorum set the statement's sender relied on.
pub fn companion_quorum_set_hash(statement: &ScpStatement) -> Hash256 {
    let hash = match &statement.pledges {
        ScpStatementPledges::Nominate(nom) => &nom.quorum_set_hash,
        ScpStatementPledges::Prepare(prep) => &prep.quorum_set_hash,
        ScpStatementPledges::Confirm(conf) => &conf.quorum_set_hash,
        ScpStatementPledges::Externalize(ext) => &ext.commit_quorum_set_hash,
    };
    Hash256::from_bytes(hash.0)
}

/// Hash of the transaction set a ballot-carrying envelope commits to.
///
/// Nomination envelopes carry no ballot value and so reference no
/// transaction set. A value that fails to parse yields `None`; the envelope
/// then simply has no transaction-set dependency.
pub fn tx_set_hash(envelope: &ScpEnvelope) -> Option<Hash256> {
    let value = match &envelope.statement.pledges {
        ScpStatementPledges::Prepare(prepare) => &prepare.ballot.value,
        ScpStatementPledges::Confirm(confirm) => &confirm.ballot.value,
        ScpStatementPledges::Externalize(ext) => &ext.commit.value,
        ScpStatementPledges::Nominate(_) => return None,
    };

    StellarValue::from_xdr(&value.0, Limits::none())
        .ok()
        .map(|sv| Hash256::from_bytes(sv.tx_set_hash.0))
}

/// Stable byte identity of an envelope: SHA-256 of its XDR serialization.
pub fn envelope_hash(envelope: &ScpEnvelope) -> Hash256 {
    Hash256::hash_xdr(envelope).unwrap_or(Hash256::ZERO)
}

/// Render a node identity as a short string for log lines.
pub fn to_short_string(node_id: &NodeId) -> String {
    match &node_id.0 {
        PublicKey::PublicKeyTypeEd25519(key) => hex::encode(&key.0[..4]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stellar_xdr::curr::{
        Hash, ScpBallot, ScpNomination, ScpStatementExternalize, ScpStatementPledges, Signature,
        StellarValueExt, TimePoint, Uint256, Value, VecM, WriteXdr,
    };

    fn make_node_id(seed: u8) -> NodeId {
        NodeId(PublicKey::PublicKeyTypeEd25519(Uint256([seed; 32])))
    }

    fn make_value(tx_set_hash: Hash256) -> Value {
        let sv = StellarValue {
            tx_set_hash: tx_set_hash.into(),
            close_time: TimePoint(0),
            upgrades: VecM::default(),
            ext: StellarValueExt::Basic,
        };
        Value(sv.to_xdr(Limits::none()).unwrap().try_into().unwrap())
    }

    #[test]
    fn test_nomination_has_no_tx_set_hash() {
        let envelope = ScpEnvelope {
            statement: ScpStatement {
                node_id: make_node_id(1),
                slot_index: 1,
                pledges: ScpStatementPledges::Nominate(ScpNomination {
                    quorum_set_hash: Hash([9u8; 32]),
                    votes: vec![].try_into().unwrap(),
                    accepted: vec![].try_into().unwrap(),
                }),
            },
            signature: Signature::default(),
        };

        assert_eq!(tx_set_hash(&envelope), None);
        assert_eq!(
            companion_quorum_set_hash(&envelope.statement),
            Hash256::from_bytes([9u8; 32])
        );
    }

    #[test]
    fn test_externalize_carries_tx_set_hash() {
        let txset = Hash256::from_bytes([5u8; 32]);
        let envelope = ScpEnvelope {
            statement: ScpStatement {
                node_id: make_node_id(1),
                slot_index: 1,
                pledges: ScpStatementPledges::Externalize(ScpStatementExternalize {
                    commit: ScpBallot {
                        counter: 1,
                        value: make_value(txset),
                    },
                    n_h: 1,
                    commit_quorum_set_hash: Hash([3u8; 32]),
                }),
            },
            signature: Signature::default(),
        };

        assert_eq!(tx_set_hash(&envelope), Some(txset));
        assert_eq!(
            companion_quorum_set_hash(&envelope.statement),
            Hash256::from_bytes([3u8; 32])
        );
    }

    #[test]
    fn test_envelope_hash_is_stable() {
        let envelope = ScpEnvelope {
            statement: ScpStatement {
                node_id: make_node_id(2),
                slot_index: 7,
                pledges: ScpStatementPledges::Nominate(ScpNomination {
                    quorum_set_hash: Hash([1u8; 32]),
                    votes: vec![].try_into().unwrap(),
                    accepted: vec![].try_into().unwrap(),
                }),
            },
            signature: Signature::default(),
        };

        assert_eq!(envelope_hash(&envelope), envelope_hash(&envelope.clone()));
        assert!(!envelope_hash(&envelope).is_zero());
    }
}
