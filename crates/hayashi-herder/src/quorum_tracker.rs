//! Transitive quorum tracking.
//!
//! The transitive quorum is the BFS closure of reachability through
//! quorum-set membership, starting from the local node. The tracker labels
//! every reachable node with its distance from the local node and with the
//! set of direct (distance-1) validators on a shortest path to it.
//!
//! The map grows incrementally through [`QuorumTracker::expand`] as
//! quorum-set descriptors become known. Expansion can discover that an
//! earlier labelling is stale (a shorter path to an already-expanded node);
//! it then rejects, and the caller must run [`QuorumTracker::rebuild`].

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use stellar_xdr::curr::{NodeId, ScpQuorumSet};

use crate::quorum::for_each_quorum_node;
use crate::{HerderError, Result};

/// Labelling of one node in the transitive quorum map.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// The node's quorum-set descriptor, once known.
    pub quorum_set: Option<Arc<ScpQuorumSet>>,
    /// Distance from the local node in the quorum graph (0 = local node).
    pub distance: usize,
    /// Direct validators (distance 1) on a shortest path to this node.
    ///
    /// At distance 1 this is the singleton of the node itself; deeper nodes
    /// carry the union of their predecessors' sets.
    pub closest_validators: BTreeSet<NodeId>,
}

impl NodeInfo {
    fn frontier(distance: usize) -> Self {
        Self {
            quorum_set: None,
            distance,
            closest_validators: BTreeSet::new(),
        }
    }
}

/// Breadth-first-labelled map of the local node's transitive quorum.
#[derive(Debug, Clone)]
pub struct QuorumTracker {
    local_node: NodeId,
    quorum: HashMap<NodeId, NodeInfo>,
}

impl QuorumTracker {
    /// Create a tracker containing only the local node at distance 0.
    pub fn new(local_node: NodeId) -> Self {
        let mut quorum = HashMap::new();
        quorum.insert(local_node.clone(), NodeInfo::frontier(0));
        Self { local_node, quorum }
    }

    /// True iff the node is known to be in the transitive quorum.
    pub fn is_node_in_transitive_quorum(&self, node_id: &NodeId) -> bool {
        self.quorum.contains_key(node_id)
    }

    /// Expand the map with a node's quorum-set descriptor.
    ///
    /// The node must already be present (it was inserted as a frontier node
    /// by an earlier expansion, or it is the local node). Re-expanding with
    /// the same descriptor is accepted and changes nothing; a different
    /// descriptor, or the discovery of a shorter path to an
    /// already-expanded node, rejects and requires a full rebuild.
    pub fn expand(&mut self, node_id: &NodeId, quorum_set: Arc<ScpQuorumSet>) -> bool {
        let (new_dist, inherited) = {
            let Some(info) = self.quorum.get_mut(node_id) else {
                return false;
            };
            if let Some(existing) = &info.quorum_set {
                return **existing == *quorum_set;
            }
            info.quorum_set = Some(Arc::clone(&quorum_set));
            (info.distance + 1, info.closest_validators.clone())
        };

        let mut ok = true;
        for_each_quorum_node(&quorum_set, &mut |leaf| {
            if !ok {
                return;
            }
            let info = self
                .quorum
                .entry(leaf.clone())
                .or_insert_with(|| NodeInfo::frontier(new_dist));

            if info.distance < new_dist {
                // A strictly shorter path is already recorded; nothing to do.
                return;
            }
            if info.distance > new_dist {
                if info.quorum_set.is_some() {
                    // Shorter path to an already-expanded node: the labels
                    // below it are stale and only a rebuild can fix them.
                    ok = false;
                    return;
                }
                info.closest_validators.clear();
                info.distance = new_dist;
            }

            if new_dist == 1 {
                info.closest_validators.insert(leaf.clone());
            } else {
                info.closest_validators.extend(inherited.iter().cloned());
            }
        });
        ok
    }

    /// Rebuild the map by BFS over a quorum-set lookup.
    ///
    /// Because BFS visits nodes in non-decreasing distance order, `expand`
    /// can never legitimately reject here; a rejection means the state is
    /// corrupt and is surfaced as [`HerderError::InvariantCorruption`].
    pub fn rebuild<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&NodeId) -> Option<Arc<ScpQuorumSet>>,
    {
        self.quorum.clear();
        self.quorum
            .insert(self.local_node.clone(), NodeInfo::frontier(0));

        let mut backlog = VecDeque::new();
        backlog.push_back(self.local_node.clone());

        while let Some(node) = backlog.pop_front() {
            let Some(info) = self.quorum.get(&node) else {
                return Err(HerderError::InvariantCorruption);
            };
            if info.quorum_set.is_some() {
                continue;
            }
            if let Some(qset) = lookup(&node) {
                for_each_quorum_node(&qset, &mut |leaf| {
                    backlog.push_back(leaf.clone());
                });
                if !self.expand(&node, qset) {
                    return Err(HerderError::InvariantCorruption);
                }
            }
        }
        Ok(())
    }

    /// The currently tracked quorum map.
    pub fn quorum_map(&self) -> &HashMap<NodeId, NodeInfo> {
        &self.quorum
    }

    /// Number of nodes in the transitive quorum map.
    pub fn tracked_node_count(&self) -> usize {
        self.quorum.len()
    }

    /// Direct validators on a shortest path to `node_id`, if tracked.
    pub fn closest_validators(&self, node_id: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.quorum.get(node_id).map(|info| &info.closest_validators)
    }

    /// Distance of `node_id` from the local node, if tracked.
    pub fn distance(&self, node_id: &NodeId) -> Option<usize> {
        self.quorum.get(node_id).map(|info| info.distance)
    }
}
