//! Item fetcher for TxSet and QuorumSet retrieval.
//!
//! When a consensus envelope references data we do not have yet, the herder
//! asks this fetcher to obtain it from peers. One [`Tracker`] exists per item
//! hash; it remembers every envelope waiting on that hash, which peers have
//! been asked, and when the fetch started.
//!
//! # Protocol
//!
//! 1. `fetch` registers the waiting envelope and, for a new hash, solicits a
//!    peer immediately through the ask-peer callback
//! 2. A peer answering "don't have" rotates the request to the next peer
//! 3. Once every peer was asked, the ask list is rebuilt with a backoff
//!    proportional to the number of rebuilds
//! 4. `recv` drains the waiters so the herder can re-run them; an item nobody
//!    waited for drains nothing, which is how unsolicited deliveries are told
//!    apart
//!
//! Fetches carry no internal timeout. The enclosing scheduler calls
//! [`ItemFetcher::process_pending`] periodically to advance retries.

use hayashi_common::{Hash256, SlotIndex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use stellar_xdr::curr::ScpEnvelope;
use tracing::{debug, trace};

use crate::PeerId;

/// Type of item being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// Transaction-set payload.
    TxSet,
    /// Quorum-set descriptor.
    QuorumSet,
}

/// Callback for asking a peer for an item.
pub type AskPeerFn = Box<dyn Fn(&PeerId, &Hash256, ItemType)>;

/// Configuration for item fetching.
#[derive(Debug, Clone)]
pub struct ItemFetcherConfig {
    /// How long to wait for a peer's reply before rotating to the next peer.
    pub fetch_reply_timeout: Duration,
    /// Cap on the rebuild counter used for the retry backoff.
    pub max_rebuild_fetch_list: u32,
}

impl Default for ItemFetcherConfig {
    fn default() -> Self {
        Self {
            fetch_reply_timeout: Duration::from_millis(1500),
            max_rebuild_fetch_list: 10,
        }
    }
}

/// Result of selecting the next peer to ask.
#[derive(Debug)]
pub enum NextPeerResult {
    /// Ask this peer for the item.
    AskPeer { peer: PeerId, timeout: Duration },
    /// Every peer has been asked; wait before rebuilding the list.
    Wait { duration: Duration },
}

/// State machine for fetching a single item from peers.
pub struct Tracker {
    item_hash: Hash256,
    config: ItemFetcherConfig,
    /// Peers asked during the current pass over the peer list.
    peers_asked: HashMap<PeerId, bool>,
    last_asked_peer: Option<PeerId>,
    /// Envelopes waiting for this item, keyed by envelope hash to dedupe.
    waiting: Vec<(Hash256, ScpEnvelope)>,
    fetch_start: Instant,
    last_ask_time: Option<Instant>,
    num_list_rebuild: u32,
    last_seen_slot_index: SlotIndex,
}

impl Tracker {
    /// Create a new tracker for the given item hash.
    pub fn new(item_hash: Hash256, config: ItemFetcherConfig) -> Self {
        Self {
            item_hash,
            config,
            peers_asked: HashMap::new(),
            last_asked_peer: None,
            waiting: Vec::new(),
            fetch_start: Instant::now(),
            last_ask_time: None,
            num_list_rebuild: 0,
            last_seen_slot_index: 0,
        }
    }

    /// Returns true if no envelopes are waiting.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Number of waiting envelopes.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Hash of the item being tracked.
    pub fn item_hash(&self) -> &Hash256 {
        &self.item_hash
    }

    /// Time elapsed since the fetch started.
    pub fn duration(&self) -> Duration {
        self.fetch_start.elapsed()
    }

    /// Highest slot index among envelopes that ever waited here.
    pub fn last_seen_slot_index(&self) -> SlotIndex {
        self.last_seen_slot_index
    }

    /// Register an envelope waiting on this item. Idempotent per envelope.
    pub fn listen(&mut self, envelope: &ScpEnvelope) {
        self.last_seen_slot_index = self
            .last_seen_slot_index
            .max(envelope.statement.slot_index);

        let env_hash = envelope_hash(envelope);
        if self.waiting.iter().any(|(h, _)| h == &env_hash) {
            return;
        }
        self.waiting.push((env_hash, envelope.clone()));
    }

    /// Stop tracking an envelope.
    pub fn discard(&mut self, envelope: &ScpEnvelope) {
        let env_hash = envelope_hash(envelope);
        self.waiting.retain(|(h, _)| h != &env_hash);
    }

    /// Drain all waiting envelopes.
    pub fn take_waiting(&mut self) -> Vec<ScpEnvelope> {
        self.waiting.drain(..).map(|(_, env)| env).collect()
    }

    /// Waiting envelopes, cloned.
    pub fn waiting_envelopes(&self) -> Vec<ScpEnvelope> {
        self.waiting.iter().map(|(_, env)| env.clone()).collect()
    }

    /// Cancel the outstanding request.
    pub fn cancel(&mut self) {
        self.last_ask_time = None;
        self.last_asked_peer = None;
        self.last_seen_slot_index = 0;
    }

    /// Drop waiters below `slot_index`, except those for `slot_to_keep`.
    ///
    /// Returns true if at least one waiter remains.
    pub fn clear_envelopes_below(&mut self, slot_index: SlotIndex, slot_to_keep: SlotIndex) -> bool {
        self.waiting.retain(|(_, env)| {
            let idx = env.statement.slot_index;
            idx >= slot_index || idx == slot_to_keep
        });
        if self.waiting.is_empty() {
            self.cancel();
            false
        } else {
            true
        }
    }

    /// Handle a "don't have" reply from a peer.
    ///
    /// Returns true when the reply came from the peer currently being
    /// awaited, meaning the request should rotate to another peer.
    pub fn doesnt_have(&mut self, peer: &PeerId) -> bool {
        if self.last_asked_peer.as_ref() == Some(peer) {
            trace!(
                peer = %peer,
                item = %self.item_hash.to_hex_abbrev(),
                "peer does not have item"
            );
            self.last_asked_peer = None;
            true
        } else {
            false
        }
    }

    fn can_ask_peer(&self, peer: &PeerId) -> bool {
        !self.peers_asked.contains_key(peer)
    }

    /// Select the next peer to ask, or the wait before rebuilding the list.
    pub fn try_next_peer(&mut self, available_peers: &[PeerId]) -> NextPeerResult {
        self.last_asked_peer = None;

        if let Some(peer) = available_peers.iter().find(|p| self.can_ask_peer(p)) {
            self.last_asked_peer = Some(*peer);
            self.peers_asked.insert(*peer, false);
            self.last_ask_time = Some(Instant::now());

            trace!(
                peer = %peer,
                item = %self.item_hash.to_hex_abbrev(),
                "asking peer for item"
            );
            NextPeerResult::AskPeer {
                peer: *peer,
                timeout: self.config.fetch_reply_timeout,
            }
        } else {
            self.num_list_rebuild += 1;
            self.peers_asked.clear();

            trace!(
                item = %self.item_hash.to_hex_abbrev(),
                rebuild = self.num_list_rebuild,
                "all peers asked, restarting fetch"
            );
            let wait = self.config.fetch_reply_timeout
                * self
                    .num_list_rebuild
                    .min(self.config.max_rebuild_fetch_list);
            NextPeerResult::Wait { duration: wait }
        }
    }

    /// Whether the current ask has outlived the reply timeout.
    pub fn is_timed_out(&self) -> bool {
        match self.last_ask_time {
            Some(ask_time) => ask_time.elapsed() >= self.config.fetch_reply_timeout,
            None => false,
        }
    }

    fn needs_ask(&self) -> bool {
        self.last_asked_peer.is_none() || self.is_timed_out()
    }
}

/// Tracks outstanding requests for remote items by content hash.
///
/// One fetcher instance exists per item type. All mutation happens on the
/// main thread; arrivals are posted back onto it by the overlay.
pub struct ItemFetcher {
    config: ItemFetcherConfig,
    item_type: ItemType,
    trackers: HashMap<Hash256, Tracker>,
    ask_peer: Option<AskPeerFn>,
    available_peers: Vec<PeerId>,
}

impl ItemFetcher {
    /// Create a new item fetcher.
    pub fn new(item_type: ItemType, config: ItemFetcherConfig) -> Self {
        Self {
            config,
            item_type,
            trackers: HashMap::new(),
            ask_peer: None,
            available_peers: Vec::new(),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(item_type: ItemType) -> Self {
        Self::new(item_type, ItemFetcherConfig::default())
    }

    /// Set the callback used to solicit an item from a peer.
    pub fn set_ask_peer(&mut self, f: AskPeerFn) {
        self.ask_peer = Some(f);
    }

    /// Update the list of peers available for soliciting.
    pub fn set_available_peers(&mut self, peers: Vec<PeerId>) {
        self.available_peers = peers;
    }

    /// Start fetching an item needed by `envelope`.
    ///
    /// Idempotently records the waiter. If no request for `item_hash` is in
    /// flight, one is initiated by soliciting a peer. Returns immediately.
    pub fn fetch(&mut self, item_hash: Hash256, envelope: &ScpEnvelope) {
        trace!(
            item_type = ?self.item_type,
            item = %item_hash.to_hex_abbrev(),
            "fetch"
        );

        if let Some(tracker) = self.trackers.get_mut(&item_hash) {
            tracker.listen(envelope);
            return;
        }

        let mut tracker = Tracker::new(item_hash, self.config.clone());
        tracker.listen(envelope);

        if let Some(ref ask_peer) = self.ask_peer {
            if let NextPeerResult::AskPeer { ref peer, .. } =
                tracker.try_next_peer(&self.available_peers)
            {
                ask_peer(peer, &item_hash, self.item_type);
            }
        }
        self.trackers.insert(item_hash, tracker);
    }

    /// Stop fetching an item for a specific envelope.
    ///
    /// If other envelopes still wait on the item, fetching continues;
    /// otherwise the outstanding request is cancelled.
    pub fn stop_fetch(&mut self, item_hash: &Hash256, envelope: &ScpEnvelope) {
        let Some(tracker) = self.trackers.get_mut(item_hash) else {
            trace!(
                item_type = ?self.item_type,
                item = %item_hash.to_hex_abbrev(),
                "stop_fetch untracked"
            );
            return;
        };

        tracker.discard(envelope);
        trace!(
            item_type = ?self.item_type,
            item = %item_hash.to_hex_abbrev(),
            remaining = tracker.len(),
            "stop_fetch"
        );
        if tracker.is_empty() {
            self.trackers.remove(item_hash);
        }
    }

    /// Called when an item arrives.
    ///
    /// Returns the envelopes that were waiting on it; an empty vector means
    /// nobody asked for the item. A second delivery of the same hash is a
    /// no-op.
    pub fn recv(&mut self, item_hash: &Hash256) -> Vec<ScpEnvelope> {
        let Some(mut tracker) = self.trackers.remove(item_hash) else {
            trace!(
                item_type = ?self.item_type,
                item = %item_hash.to_hex_abbrev(),
                "recv untracked"
            );
            return Vec::new();
        };

        debug!(
            item_type = ?self.item_type,
            item = %item_hash.to_hex_abbrev(),
            waiting = tracker.len(),
            elapsed = ?tracker.duration(),
            "item fetched"
        );
        tracker.take_waiting()
    }

    /// Handle a "don't have" reply from a peer.
    ///
    /// Excludes that peer from the current pass; if it was the peer being
    /// awaited, the item is re-solicited from the next candidate.
    pub fn doesnt_have(&mut self, item_hash: &Hash256, peer: &PeerId) {
        let Some(tracker) = self.trackers.get_mut(item_hash) else {
            return;
        };
        if !tracker.doesnt_have(peer) {
            return;
        }
        if let Some(ref ask_peer) = self.ask_peer {
            if let NextPeerResult::AskPeer { ref peer, .. } =
                tracker.try_next_peer(&self.available_peers)
            {
                ask_peer(peer, item_hash, self.item_type);
            }
        }
    }

    /// Stop fetching for slots below `slot_index`, keeping `slot_to_keep`.
    pub fn stop_fetching_below(&mut self, slot_index: SlotIndex, slot_to_keep: SlotIndex) {
        self.trackers
            .retain(|_, tracker| tracker.clear_envelopes_below(slot_index, slot_to_keep));
    }

    /// Highest slot index seen for an item, or 0 when untracked.
    ///
    /// A result of 0 is the signal that nobody asked for the item.
    pub fn last_seen_slot_index(&self, item_hash: &Hash256) -> SlotIndex {
        self.trackers
            .get(item_hash)
            .map(|t| t.last_seen_slot_index())
            .unwrap_or(0)
    }

    /// Envelopes currently waiting for an item.
    pub fn fetching_for(&self, item_hash: &Hash256) -> Vec<ScpEnvelope> {
        self.trackers
            .get(item_hash)
            .map(|t| t.waiting_envelopes())
            .unwrap_or_default()
    }

    /// Time since fetching of an item started.
    pub fn duration(&self, item_hash: &Hash256) -> Option<Duration> {
        self.trackers.get(item_hash).map(|t| t.duration())
    }

    /// Whether an item is being tracked.
    pub fn is_tracking(&self, item_hash: &Hash256) -> bool {
        self.trackers.contains_key(item_hash)
    }

    /// Number of items being tracked.
    pub fn num_trackers(&self) -> usize {
        self.trackers.len()
    }

    /// Drop all trackers.
    pub fn clear(&mut self) {
        self.trackers.clear();
    }

    /// Advance retries: re-solicit items whose current ask timed out.
    ///
    /// The enclosing scheduler calls this periodically; returns the number
    /// of solicitations sent.
    pub fn process_pending(&mut self) -> usize {
        let Some(ref ask_peer) = self.ask_peer else {
            return 0;
        };

        let mut sent = 0;
        for (hash, tracker) in self.trackers.iter_mut() {
            if tracker.is_empty() || !tracker.needs_ask() {
                continue;
            }
            if let NextPeerResult::AskPeer { ref peer, .. } =
                tracker.try_next_peer(&self.available_peers)
            {
                ask_peer(peer, hash, self.item_type);
                sent += 1;
            }
        }

        if sent > 0 {
            debug!(item_type = ?self.item_type, sent, "re-solicited pending items");
        }
        sent
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> ItemFetcherStats {
        let mut total_waiting = 0;
        let mut oldest = Duration::ZERO;
        for tracker in self.trackers.values() {
            total_waiting += tracker.len();
            oldest = oldest.max(tracker.duration());
        }
        ItemFetcherStats {
            item_type: self.item_type,
            num_trackers: self.trackers.len(),
            total_waiting_envelopes: total_waiting,
            oldest_fetch_duration: oldest,
        }
    }
}

/// Statistics about item fetching.
#[derive(Debug, Clone)]
pub struct ItemFetcherStats {
    /// Type of items being fetched.
    pub item_type: ItemType,
    /// Number of items being tracked.
    pub num_trackers: usize,
    /// Total envelopes waiting across all trackers.
    pub total_waiting_envelopes: usize,
    /// Duration of the oldest outstanding fetch.
    pub oldest_fetch_duration: Duration,
}

/// Stable byte-identity of an envelope: SHA-256 of its XDR form.
fn envelope_hash(envelope: &ScpEnvelope) -> Hash256 {
    Hash256::hash_xdr(envelope).unwrap_or(Hash256::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use stellar_xdr::curr::{
        Hash, NodeId, PublicKey, ScpNomination, ScpStatement, ScpStatementPledges, Signature,
        Uint256,
    };

    fn make_test_envelope(slot_index: u64) -> ScpEnvelope {
        ScpEnvelope {
            statement: ScpStatement {
                node_id: NodeId(PublicKey::PublicKeyTypeEd25519(Uint256([0u8; 32]))),
                slot_index,
                pledges: ScpStatementPledges::Nominate(ScpNomination {
                    quorum_set_hash: Hash([0u8; 32]),
                    votes: vec![].try_into().unwrap(),
                    accepted: vec![].try_into().unwrap(),
                }),
            },
            signature: Signature::default(),
        }
    }

    fn make_peer_id(id: u8) -> PeerId {
        PeerId::from_bytes([id; 32])
    }

    #[test]
    fn test_tracker_listen_dedupes() {
        let mut tracker = Tracker::new(Hash256::from_bytes([1; 32]), ItemFetcherConfig::default());
        let env = make_test_envelope(100);

        tracker.listen(&env);
        tracker.listen(&env);

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.last_seen_slot_index(), 100);
    }

    #[test]
    fn test_tracker_discard() {
        let mut tracker = Tracker::new(Hash256::from_bytes([1; 32]), ItemFetcherConfig::default());
        let env = make_test_envelope(100);

        tracker.listen(&env);
        tracker.discard(&env);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tracker_clear_below_keeps_slot() {
        let mut tracker = Tracker::new(Hash256::from_bytes([1; 32]), ItemFetcherConfig::default());
        tracker.listen(&make_test_envelope(100));
        tracker.listen(&make_test_envelope(200));
        tracker.listen(&make_test_envelope(300));

        // Removes 200 (< 201 and != 100), keeps 100 (kept slot) and 300.
        assert!(tracker.clear_envelopes_below(201, 100));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_tracker_peer_rotation() {
        let mut tracker = Tracker::new(Hash256::from_bytes([1; 32]), ItemFetcherConfig::default());
        let peers = vec![make_peer_id(1), make_peer_id(2)];

        match tracker.try_next_peer(&peers) {
            NextPeerResult::AskPeer { peer, .. } => assert_eq!(peer, peers[0]),
            NextPeerResult::Wait { .. } => panic!("expected a peer"),
        }
        assert!(tracker.doesnt_have(&peers[0]));
        match tracker.try_next_peer(&peers) {
            NextPeerResult::AskPeer { peer, .. } => assert_eq!(peer, peers[1]),
            NextPeerResult::Wait { .. } => panic!("expected a peer"),
        }
        // Both asked: the list rebuilds with a wait.
        assert!(tracker.doesnt_have(&peers[1]));
        assert!(matches!(
            tracker.try_next_peer(&peers),
            NextPeerResult::Wait { .. }
        ));
    }

    #[test]
    fn test_fetch_and_recv() {
        let mut fetcher = ItemFetcher::with_defaults(ItemType::TxSet);
        let hash = Hash256::from_bytes([1; 32]);
        let env = make_test_envelope(100);

        fetcher.fetch(hash, &env);
        assert!(fetcher.is_tracking(&hash));
        assert_eq!(fetcher.last_seen_slot_index(&hash), 100);

        let waiting = fetcher.recv(&hash);
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].statement.slot_index, 100);

        // Duplicate delivery is a no-op.
        assert!(fetcher.recv(&hash).is_empty());
        assert!(!fetcher.is_tracking(&hash));
    }

    #[test]
    fn test_stop_fetch_cancels_when_no_waiters_remain() {
        let mut fetcher = ItemFetcher::with_defaults(ItemType::QuorumSet);
        let hash = Hash256::from_bytes([2; 32]);
        let env_a = make_test_envelope(7);
        let env_b = make_test_envelope(8);

        fetcher.fetch(hash, &env_a);
        fetcher.fetch(hash, &env_b);
        assert_eq!(fetcher.fetching_for(&hash).len(), 2);

        fetcher.stop_fetch(&hash, &env_a);
        assert!(fetcher.is_tracking(&hash));

        fetcher.stop_fetch(&hash, &env_b);
        assert!(!fetcher.is_tracking(&hash));
    }

    #[test]
    fn test_fetch_solicits_peer_immediately() {
        let asked: Rc<RefCell<Vec<(PeerId, Hash256)>>> = Rc::new(RefCell::new(Vec::new()));
        let asked_cb = Rc::clone(&asked);

        let mut fetcher = ItemFetcher::with_defaults(ItemType::TxSet);
        fetcher.set_available_peers(vec![make_peer_id(1)]);
        fetcher.set_ask_peer(Box::new(move |peer, hash, _| {
            asked_cb.borrow_mut().push((*peer, *hash));
        }));

        let hash = Hash256::from_bytes([3; 32]);
        fetcher.fetch(hash, &make_test_envelope(5));

        let asked = asked.borrow();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0], (make_peer_id(1), hash));
    }

    #[test]
    fn test_doesnt_have_resolicits() {
        let asked: Rc<RefCell<Vec<PeerId>>> = Rc::new(RefCell::new(Vec::new()));
        let asked_cb = Rc::clone(&asked);

        let mut fetcher = ItemFetcher::with_defaults(ItemType::QuorumSet);
        fetcher.set_available_peers(vec![make_peer_id(1), make_peer_id(2)]);
        fetcher.set_ask_peer(Box::new(move |peer, _, _| {
            asked_cb.borrow_mut().push(*peer);
        }));

        let hash = Hash256::from_bytes([4; 32]);
        fetcher.fetch(hash, &make_test_envelope(5));
        fetcher.doesnt_have(&hash, &make_peer_id(1));

        assert_eq!(*asked.borrow(), vec![make_peer_id(1), make_peer_id(2)]);
    }

    #[test]
    fn test_doesnt_have_from_other_peer_ignored() {
        let asked: Rc<RefCell<Vec<PeerId>>> = Rc::new(RefCell::new(Vec::new()));
        let asked_cb = Rc::clone(&asked);

        let mut fetcher = ItemFetcher::with_defaults(ItemType::QuorumSet);
        fetcher.set_available_peers(vec![make_peer_id(1), make_peer_id(2)]);
        fetcher.set_ask_peer(Box::new(move |peer, _, _| {
            asked_cb.borrow_mut().push(*peer);
        }));

        let hash = Hash256::from_bytes([5; 32]);
        fetcher.fetch(hash, &make_test_envelope(5));
        // Peer 2 was never asked; its reply must not rotate the request.
        fetcher.doesnt_have(&hash, &make_peer_id(2));

        assert_eq!(asked.borrow().len(), 1);
    }

    #[test]
    fn test_stop_fetching_below() {
        let mut fetcher = ItemFetcher::with_defaults(ItemType::TxSet);
        let hash_old = Hash256::from_bytes([6; 32]);
        let hash_new = Hash256::from_bytes([7; 32]);

        fetcher.fetch(hash_old, &make_test_envelope(10));
        fetcher.fetch(hash_new, &make_test_envelope(50));

        fetcher.stop_fetching_below(20, 0);

        assert!(!fetcher.is_tracking(&hash_old));
        assert!(fetcher.is_tracking(&hash_new));
    }

    #[test]
    fn test_stats() {
        let mut fetcher = ItemFetcher::with_defaults(ItemType::TxSet);
        fetcher.fetch(Hash256::from_bytes([8; 32]), &make_test_envelope(1));
        fetcher.fetch(Hash256::from_bytes([9; 32]), &make_test_envelope(2));

        let stats = fetcher.stats();
        assert_eq!(stats.num_trackers, 2);
        assert_eq!(stats.total_waiting_envelopes, 2);
    }
}
