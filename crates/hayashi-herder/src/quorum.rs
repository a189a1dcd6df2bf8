//! Quorum-set structural validation and traversal.
//!
//! A quorum-set descriptor is a recursive threshold structure over node
//! identities. Insanity is a property of the content, not of the node that
//! sent it: a descriptor that fails these checks is discarded together with
//! every envelope that references it.

use std::collections::HashSet;
use stellar_xdr::curr::{NodeId, ScpQuorumSet};

/// Maximum total number of nodes allowed in a quorum set.
pub const MAXIMUM_QUORUM_NODES: usize = 1000;

/// Maximum nesting depth of inner sets.
pub const MAXIMUM_QUORUM_NESTING_LEVEL: u32 = 4;

/// Check if a quorum set is structurally sane.
///
/// Validates thresholds (at least 1, at most the fan-out), nesting depth,
/// duplicate node identities, and the total node count. With `extra_checks`,
/// additionally requires thresholds above the v-blocking size (> 50%).
pub fn is_quorum_set_sane(quorum_set: &ScpQuorumSet, extra_checks: bool) -> Result<(), String> {
    let mut checker = SanityChecker {
        extra_checks,
        known_nodes: HashSet::new(),
        count: 0,
    };
    checker.check(quorum_set, 0)?;

    if checker.count < 1 || checker.count > MAXIMUM_QUORUM_NODES {
        return Err(format!(
            "total number of nodes in a quorum set must be within 1 and {}",
            MAXIMUM_QUORUM_NODES
        ));
    }
    Ok(())
}

struct SanityChecker {
    extra_checks: bool,
    known_nodes: HashSet<NodeId>,
    count: usize,
}

impl SanityChecker {
    fn check(&mut self, quorum_set: &ScpQuorumSet, depth: u32) -> Result<(), String> {
        if depth > MAXIMUM_QUORUM_NESTING_LEVEL {
            return Err("maximum quorum nesting level exceeded".to_string());
        }
        if quorum_set.threshold < 1 {
            return Err("threshold must be greater than 0".to_string());
        }

        let total = quorum_set.validators.len() + quorum_set.inner_sets.len();
        if quorum_set.threshold as usize > total {
            return Err("threshold exceeds total number of entries".to_string());
        }

        let v_blocking_size = total.saturating_sub(quorum_set.threshold as usize) + 1;
        if self.extra_checks && (quorum_set.threshold as usize) < v_blocking_size {
            return Err("threshold is lower than the v-blocking size".to_string());
        }

        self.count = self.count.saturating_add(quorum_set.validators.len());
        for node in quorum_set.validators.iter() {
            if !self.known_nodes.insert(node.clone()) {
                return Err("duplicate node found in quorum set".to_string());
            }
        }

        for inner in quorum_set.inner_sets.iter() {
            self.check(inner, depth + 1)?;
        }
        Ok(())
    }
}

/// Visit every leaf node identity of a quorum set, inner sets included.
pub fn for_each_quorum_node<F>(quorum_set: &ScpQuorumSet, f: &mut F)
where
    F: FnMut(&NodeId),
{
    for validator in quorum_set.validators.iter() {
        f(validator);
    }
    for inner in quorum_set.inner_sets.iter() {
        for_each_quorum_node(inner, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stellar_xdr::curr::{PublicKey, Uint256};

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

    #[test]
    fn test_sane_simple_set() {
        let qset = make_quorum_set(vec![make_node_id(1), make_node_id(2)], 2);
        assert!(is_quorum_set_sane(&qset, false).is_ok());
    }

    #[test]
    fn test_threshold_above_fanout_is_insane() {
        let qset = make_quorum_set(vec![make_node_id(1)], 2);
        assert!(is_quorum_set_sane(&qset, false).is_err());
    }

    #[test]
    fn test_zero_threshold_is_insane() {
        let qset = make_quorum_set(vec![make_node_id(1)], 0);
        assert!(is_quorum_set_sane(&qset, false).is_err());
    }

    #[test]
    fn test_duplicate_node_is_insane() {
        let qset = make_quorum_set(vec![make_node_id(1), make_node_id(1)], 1);
        assert!(is_quorum_set_sane(&qset, false).is_err());
    }

    #[test]
    fn test_empty_set_is_insane() {
        let qset = ScpQuorumSet {
            threshold: 1,
            validators: vec![].try_into().unwrap(),
            inner_sets: vec![].try_into().unwrap(),
        };
        assert!(is_quorum_set_sane(&qset, false).is_err());
    }

    #[test]
    fn test_nesting_depth_bound() {
        let mut qset = make_quorum_set(vec![make_node_id(1)], 1);
        for seed in 2..8u8 {
            qset = ScpQuorumSet {
                threshold: 1,
                validators: vec![make_node_id(seed)].try_into().unwrap(),
                inner_sets: vec![qset].try_into().unwrap(),
            };
        }
        assert!(is_quorum_set_sane(&qset, false).is_err());
    }

    #[test]
    fn test_extra_checks_require_majority() {
        // 1-of-3 is structurally valid but below the v-blocking size.
        let qset = make_quorum_set(
            vec![make_node_id(1), make_node_id(2), make_node_id(3)],
            1,
        );
        assert!(is_quorum_set_sane(&qset, false).is_ok());
        assert!(is_quorum_set_sane(&qset, true).is_err());
    }

    #[test]
    fn test_for_each_visits_inner_sets() {
        let inner = make_quorum_set(vec![make_node_id(2), make_node_id(3)], 1);
        let qset = ScpQuorumSet {
            threshold: 1,
            validators: vec![make_node_id(1)].try_into().unwrap(),
            inner_sets: vec![inner].try_into().unwrap(),
        };

        let mut seen = Vec::new();
        for_each_quorum_node(&qset, &mut |n| seen.push(n.clone()));
        assert_eq!(seen.len(), 3);
    }
}
