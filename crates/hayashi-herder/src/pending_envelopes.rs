//! Staging of consensus envelopes that are waiting for their dependencies.
//!
//! Envelopes arriving from peers reference a quorum-set descriptor and, for
//! ballot-carrying statements, a transaction-set payload, both by content
//! hash. An envelope may only be handed to the consensus engine once every
//! referenced item is locally available and the quorum set has passed
//! structural validation.
//!
//! Per slot the pipeline maintains four disjoint sets: *discarded*,
//! *processed*, *fetching* (with the fetch-start timestamp) and *ready* (a
//! FIFO queue). `recv` classifies an incoming envelope, starts fetches for
//! missing dependencies, and the item-delivery entry points
//! (`recv_qset` / `recv_txset`) promote waiting envelopes once their
//! dependencies resolve. A quorum set that fails validation poisons every
//! envelope referencing it, in any slot, and cancels their fetches.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use hayashi_common::{Hash256, SlotIndex};
use hayashi_overlay::{AskPeerFn, ItemFetcher, ItemFetcherConfig, ItemType, PeerId};
use stellar_xdr::curr::{NodeId, ScpEnvelope, ScpQuorumSet};
use tracing::{debug, trace};

use crate::metrics::PendingMetrics;
use crate::quorum::is_quorum_set_sane;
use crate::quorum_tracker::QuorumTracker;
use crate::utils::{companion_quorum_set_hash, envelope_hash, to_short_string, tx_set_hash};
use crate::Result;

/// Classification of a received envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStatus {
    /// All dependencies are available; the envelope is queued for the engine.
    Ready,
    /// One or more dependencies are being fetched.
    Fetching,
    /// The envelope was already consumed by the engine.
    Processed,
    /// The envelope was discarded (unsafe quorum set).
    Discarded,
    /// The envelope references a slot below the erase watermark.
    Invalid,
}

/// Envelope state for a single slot.
#[derive(Default)]
pub struct SlotEnvelopes {
    /// Envelopes we have discarded.
    discarded: HashSet<Hash256>,
    /// Envelopes the engine has consumed.
    processed: HashSet<Hash256>,
    /// Envelopes waiting on dependencies, with their fetch-start time.
    fetching: HashMap<Hash256, (ScpEnvelope, Instant)>,
    /// Fully resolved envelopes not yet handed to the engine, FIFO.
    ready: VecDeque<ScpEnvelope>,
}

impl SlotEnvelopes {
    fn ready_position(&self, env_hash: &Hash256) -> Option<usize> {
        self.ready
            .iter()
            .position(|e| &envelope_hash(e) == env_hash)
    }
}

/// Configuration for the pending-envelope pipeline.
#[derive(Debug, Clone)]
pub struct PendingEnvelopesConfig {
    /// Configuration for the transaction-set fetcher.
    pub txset_fetcher: ItemFetcherConfig,
    /// Configuration for the quorum-set fetcher.
    pub qset_fetcher: ItemFetcherConfig,
    /// Slot window used to trigger cleanup of unreferenced quorum sets.
    pub max_slots_to_remember: usize,
}

impl Default for PendingEnvelopesConfig {
    fn default() -> Self {
        Self {
            txset_fetcher: ItemFetcherConfig::default(),
            qset_fetcher: ItemFetcherConfig::default(),
            max_slots_to_remember: 12,
        }
    }
}

/// The pending-envelope staging pipeline.
pub struct PendingEnvelopes {
    config: PendingEnvelopesConfig,
    local_node: NodeId,
    local_qset: Arc<ScpQuorumSet>,
    local_qset_hash: Hash256,

    /// Per-slot envelope sets, ordered by slot.
    slots: BTreeMap<SlotIndex, SlotEnvelopes>,
    /// Quorum-set descriptors we have learned, by content hash.
    known_qsets: HashMap<Hash256, Arc<ScpQuorumSet>>,
    /// Transaction-set payloads, with the highest slot that referenced each.
    /// Slot 0 marks payloads whose referencing slot is unknown.
    txset_cache: HashMap<Hash256, (SlotIndex, Arc<Vec<u8>>)>,
    /// Last quorum-set hash each node declared, for quorum rebuilds.
    node_qset_hashes: HashMap<NodeId, Hash256>,

    txset_fetcher: ItemFetcher,
    qset_fetcher: ItemFetcher,

    quorum_tracker: QuorumTracker,
    rebuild_quorum: bool,

    /// Slots below this are Invalid; raised by `erase_below`.
    watermark: SlotIndex,

    metrics: PendingMetrics,
}

impl PendingEnvelopes {
    /// Create a pipeline for the given local node and its quorum set.
    pub fn new(
        local_node: NodeId,
        local_quorum_set: ScpQuorumSet,
        config: PendingEnvelopesConfig,
    ) -> Self {
        let local_qset = Arc::new(local_quorum_set);
        let local_qset_hash = Hash256::hash_xdr(local_qset.as_ref()).unwrap_or(Hash256::ZERO);

        let mut known_qsets = HashMap::new();
        known_qsets.insert(local_qset_hash, Arc::clone(&local_qset));

        Self {
            txset_fetcher: ItemFetcher::new(ItemType::TxSet, config.txset_fetcher.clone()),
            qset_fetcher: ItemFetcher::new(ItemType::QuorumSet, config.qset_fetcher.clone()),
            config,
            local_node: local_node.clone(),
            local_qset,
            local_qset_hash,
            slots: BTreeMap::new(),
            known_qsets,
            txset_cache: HashMap::new(),
            node_qset_hashes: HashMap::new(),
            quorum_tracker: QuorumTracker::new(local_node),
            rebuild_quorum: true,
            watermark: 0,
            metrics: PendingMetrics::default(),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(local_node: NodeId, local_quorum_set: ScpQuorumSet) -> Self {
        Self::new(local_node, local_quorum_set, PendingEnvelopesConfig::default())
    }

    /// Set the callback soliciting transaction sets from peers.
    pub fn set_txset_ask_peer(&mut self, f: AskPeerFn) {
        self.txset_fetcher.set_ask_peer(f);
    }

    /// Set the callback soliciting quorum sets from peers.
    pub fn set_qset_ask_peer(&mut self, f: AskPeerFn) {
        self.qset_fetcher.set_ask_peer(f);
    }

    /// Update the peers available to both fetchers.
    pub fn set_available_peers(&mut self, peers: Vec<PeerId>) {
        self.txset_fetcher.set_available_peers(peers.clone());
        self.qset_fetcher.set_available_peers(peers);
    }

    // --- Envelope intake ---------------------------------------------------

    /// Process a received envelope and classify it.
    ///
    /// Structural and signature validation happened upstream; this decides
    /// whether the envelope can be released to the engine, needs fetching,
    /// or is dead on arrival.
    pub fn recv_envelope(&mut self, envelope: &ScpEnvelope) -> EnvelopeStatus {
        let slot = envelope.statement.slot_index;
        if slot < self.watermark {
            trace!(
                slot,
                watermark = self.watermark,
                "envelope below watermark"
            );
            return EnvelopeStatus::Invalid;
        }

        let env_hash = envelope_hash(envelope);
        if let Some(state) = self.slots.get(&slot) {
            if state.processed.contains(&env_hash) {
                return EnvelopeStatus::Processed;
            }
            if state.discarded.contains(&env_hash) {
                return EnvelopeStatus::Discarded;
            }
        }

        // An insane descriptor already in the cache poisons this envelope
        // and every other envelope referencing it, in any slot.
        let qset_hash = companion_quorum_set_hash(&envelope.statement);
        if let Some(qset) = self.known_qsets.get(&qset_hash) {
            if is_quorum_set_sane(qset, false).is_err() {
                debug!(
                    node = %to_short_string(&envelope.statement.node_id),
                    qset = %qset_hash.to_hex_abbrev(),
                    "envelope references insane quorum set"
                );
                self.discard_envelopes_with_qset(&qset_hash);
                self.discard_envelope(envelope);
                self.update_metrics();
                return EnvelopeStatus::Discarded;
            }
        }

        self.touch_txset_cache(envelope);

        let state = self.slots.entry(slot).or_default();
        if state.fetching.contains_key(&env_hash) {
            return EnvelopeStatus::Fetching;
        }
        if state.ready_position(&env_hash).is_some() {
            return EnvelopeStatus::Ready;
        }

        let missing = self.missing_dependencies(envelope);
        let state = self.slots.entry(slot).or_default();
        if missing.is_empty() {
            state.ready.push_back(envelope.clone());
            trace!(slot, "envelope ready on arrival");
            self.update_metrics();
            return EnvelopeStatus::Ready;
        }

        state
            .fetching
            .insert(env_hash, (envelope.clone(), Instant::now()));
        for (item_type, hash) in missing {
            match item_type {
                ItemType::QuorumSet => self.qset_fetcher.fetch(hash, envelope),
                ItemType::TxSet => self.txset_fetcher.fetch(hash, envelope),
            }
        }
        trace!(slot, "envelope fetching dependencies");
        self.update_metrics();
        EnvelopeStatus::Fetching
    }

    // --- Item delivery -----------------------------------------------------

    /// Add a quorum set to the cache and wake envelopes waiting on it.
    ///
    /// An unsafe descriptor is not cached; instead every envelope
    /// referencing it is discarded.
    pub fn add_qset(&mut self, hash: Hash256, qset: ScpQuorumSet) {
        if is_quorum_set_sane(&qset, false).is_err() {
            self.discard_envelopes_with_qset(&hash);
            self.update_metrics();
            return;
        }

        trace!(qset = %hash.to_hex_abbrev(), "add quorum set");
        self.known_qsets.insert(hash, Arc::new(qset));

        let waiting = self.qset_fetcher.recv(&hash);
        for envelope in waiting {
            self.try_promote(&envelope);
        }
        self.update_metrics();
    }

    /// Handle a quorum set arriving from the overlay.
    ///
    /// Returns whether anyone was waiting on `hash`; unrequested descriptors
    /// are dropped without touching any state. A requested-but-unsafe
    /// descriptor still returns true and triggers the discard sweep.
    pub fn recv_qset(&mut self, hash: Hash256, qset: ScpQuorumSet) -> bool {
        trace!(qset = %hash.to_hex_abbrev(), "got quorum set");

        if self.qset_fetcher.last_seen_slot_index(&hash) == 0 {
            return false;
        }
        self.add_qset(hash, qset);

        // Bound the descriptor cache relative to the tracked quorum.
        let limit = self.quorum_tracker.tracked_node_count()
            * 2
            * self.config.max_slots_to_remember.max(1);
        if self.known_qsets.len() > limit {
            self.drop_unreferenced_qsets();
        }
        true
    }

    /// Add a transaction set to the cache and wake envelopes waiting on it.
    pub fn add_txset(&mut self, hash: Hash256, last_seen_slot: SlotIndex, payload: Vec<u8>) {
        trace!(txset = %hash.to_hex_abbrev(), "add transaction set");
        self.txset_cache
            .insert(hash, (last_seen_slot, Arc::new(payload)));

        let waiting = self.txset_fetcher.recv(&hash);
        for envelope in waiting {
            self.try_promote(&envelope);
        }
        self.update_metrics();
    }

    /// Handle a transaction set arriving from the overlay.
    ///
    /// Returns whether anyone was waiting on `hash`; unrequested payloads
    /// are dropped and the cache is left untouched.
    pub fn recv_txset(&mut self, hash: Hash256, payload: Vec<u8>) -> bool {
        trace!(txset = %hash.to_hex_abbrev(), "got transaction set");

        let last_seen = self.txset_fetcher.last_seen_slot_index(&hash);
        if last_seen == 0 {
            return false;
        }
        self.add_txset(hash, last_seen, payload);
        true
    }

    /// Cache a transaction set produced locally (not fetched from peers).
    pub fn cache_txset(&mut self, hash: Hash256, slot: SlotIndex, payload: Vec<u8>) {
        self.txset_cache.insert(hash, (slot, Arc::new(payload)));
    }

    /// Forward a peer's "don't have" reply to the right fetcher.
    pub fn peer_doesnt_have(&mut self, item_type: ItemType, hash: &Hash256, peer: &PeerId) {
        match item_type {
            ItemType::TxSet => self.txset_fetcher.doesnt_have(hash, peer),
            ItemType::QuorumSet => self.qset_fetcher.doesnt_have(hash, peer),
        }
    }

    // --- Engine-facing surface ---------------------------------------------

    /// Remove and return the oldest ready envelope for `slot`.
    pub fn pop(&mut self, slot: SlotIndex) -> Option<ScpEnvelope> {
        let envelope = self.slots.get_mut(&slot)?.ready.pop_front()?;
        self.update_metrics();
        Some(envelope)
    }

    /// Slots that currently have ready envelopes.
    pub fn ready_slots(&self) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .filter(|(_, state)| !state.ready.is_empty())
            .map(|(slot, _)| *slot)
            .collect()
    }

    /// Record that the engine consumed an envelope.
    ///
    /// Moves it from *ready* (or from nowhere) into *processed* and
    /// opportunistically expands the transitive quorum with the sender's
    /// quorum set; a failed expansion queues a full rebuild.
    pub fn envelope_processed(&mut self, envelope: &ScpEnvelope) {
        let slot = envelope.statement.slot_index;
        let env_hash = envelope_hash(envelope);

        let state = self.slots.entry(slot).or_default();
        if let Some(pos) = state.ready_position(&env_hash) {
            state.ready.remove(pos);
        }
        state.processed.insert(env_hash);

        let node_id = envelope.statement.node_id.clone();
        let qset_hash = companion_quorum_set_hash(&envelope.statement);
        self.node_qset_hashes.insert(node_id.clone(), qset_hash);

        match self.known_qsets.get(&qset_hash).cloned() {
            Some(qset) => {
                if !self.quorum_tracker.expand(&node_id, qset) {
                    self.rebuild_quorum = true;
                }
            }
            None => self.rebuild_quorum = true,
        }
        self.update_metrics();
    }

    // --- Slot lifecycle ----------------------------------------------------

    /// Drop all state for slots below `slot_lo` and raise the watermark.
    ///
    /// Envelopes for erased slots are forgotten outright, their fetches are
    /// cancelled, stale transaction sets are evicted (payloads whose
    /// referencing slot is unknown are kept) and quorum sets no live slot or
    /// quorum member references are dropped.
    pub fn erase_below(&mut self, slot_lo: SlotIndex) {
        self.watermark = self.watermark.max(slot_lo);
        self.slots.retain(|slot, _| *slot >= slot_lo);

        let before = self.txset_cache.len();
        self.txset_cache
            .retain(|_, (slot, _)| *slot == 0 || *slot >= slot_lo);
        let evicted = before - self.txset_cache.len();
        if evicted > 0 {
            debug!(evicted, slot_lo, "evicted transaction sets in erase_below");
        }

        self.txset_fetcher.stop_fetching_below(slot_lo, slot_lo);
        self.qset_fetcher.stop_fetching_below(slot_lo, slot_lo);

        self.drop_unreferenced_qsets();
        self.update_metrics();
    }

    /// Notification that consensus finished a slot.
    ///
    /// Outstanding dependency fetches for that slot no longer matter and
    /// are cancelled; the transitive quorum is recomputed lazily.
    pub fn slot_closed(&mut self, slot: SlotIndex) {
        self.rebuild_quorum = true;

        let drained: Vec<ScpEnvelope> = self
            .slots
            .get_mut(&slot)
            .map(|state| state.fetching.drain().map(|(_, (env, _))| env).collect())
            .unwrap_or_default();
        for envelope in &drained {
            self.stop_fetch(envelope);
        }
        if !drained.is_empty() {
            debug!(slot, dropped = drained.len(), "dropped in-flight fetches for closed slot");
        }
        self.update_metrics();
    }

    /// Drop cached quorum sets that are no longer reachable.
    ///
    /// A descriptor is retained while some fetching or ready envelope of a
    /// live slot references it, it belongs to a node in the transitive
    /// quorum, or it is the local node's own.
    pub fn drop_unreferenced_qsets(&mut self) {
        let mut referenced: HashSet<Hash256> = HashSet::new();
        referenced.insert(self.local_qset_hash);

        for state in self.slots.values() {
            for (envelope, _) in state.fetching.values() {
                referenced.insert(companion_quorum_set_hash(&envelope.statement));
            }
            for envelope in &state.ready {
                referenced.insert(companion_quorum_set_hash(&envelope.statement));
            }
        }
        for info in self.quorum_tracker.quorum_map().values() {
            if let Some(qset) = &info.quorum_set {
                referenced.insert(Hash256::hash_xdr(qset.as_ref()).unwrap_or(Hash256::ZERO));
            }
        }

        let before = self.known_qsets.len();
        self.known_qsets.retain(|hash, _| referenced.contains(hash));
        let dropped = before - self.known_qsets.len();
        if dropped > 0 {
            debug!(dropped, remaining = self.known_qsets.len(), "dropped unreferenced quorum sets");
        }
    }

    // --- Transitive quorum -------------------------------------------------

    /// Rebuild the quorum tracker from the descriptor cache.
    pub fn rebuild_quorum_tracker_state(&mut self) -> Result<()> {
        let local = self.local_node.clone();
        let local_qset = Arc::clone(&self.local_qset);
        let node_hashes = self.node_qset_hashes.clone();
        let known = self.known_qsets.clone();

        self.quorum_tracker.rebuild(move |node| {
            if *node == local {
                Some(Arc::clone(&local_qset))
            } else {
                node_hashes
                    .get(node)
                    .and_then(|hash| known.get(hash))
                    .map(Arc::clone)
            }
        })
    }

    /// Whether `node` is known to be in the local transitive quorum.
    ///
    /// Runs a pending rebuild first if one was queued.
    pub fn is_node_in_transitive_quorum(&mut self, node: &NodeId) -> Result<bool> {
        if self.rebuild_quorum {
            self.rebuild_quorum_tracker_state()?;
            self.rebuild_quorum = false;
        }
        Ok(self.quorum_tracker.is_node_in_transitive_quorum(node))
    }

    /// The currently tracked transitive quorum.
    pub fn quorum_tracker(&self) -> &QuorumTracker {
        &self.quorum_tracker
    }

    // --- Queries -----------------------------------------------------------

    /// Whether the envelope sits in its slot's *discarded* set.
    pub fn is_discarded(&self, envelope: &ScpEnvelope) -> bool {
        self.slots
            .get(&envelope.statement.slot_index)
            .is_some_and(|state| state.discarded.contains(&envelope_hash(envelope)))
    }

    /// Whether the envelope sits in its slot's *ready* queue.
    pub fn is_ready(&self, envelope: &ScpEnvelope) -> bool {
        self.slots
            .get(&envelope.statement.slot_index)
            .is_some_and(|state| state.ready_position(&envelope_hash(envelope)).is_some())
    }

    /// Whether the envelope sits in its slot's *processed* set.
    pub fn is_processed(&self, envelope: &ScpEnvelope) -> bool {
        self.slots
            .get(&envelope.statement.slot_index)
            .is_some_and(|state| state.processed.contains(&envelope_hash(envelope)))
    }

    /// Whether the envelope sits in its slot's *fetching* set.
    pub fn is_fetching(&self, envelope: &ScpEnvelope) -> bool {
        self.slots
            .get(&envelope.statement.slot_index)
            .is_some_and(|state| state.fetching.contains_key(&envelope_hash(envelope)))
    }

    /// Look up a cached quorum set.
    pub fn get_qset(&self, hash: &Hash256) -> Option<Arc<ScpQuorumSet>> {
        self.known_qsets.get(hash).cloned()
    }

    /// Look up a cached transaction set.
    pub fn get_txset(&self, hash: &Hash256) -> Option<Arc<Vec<u8>>> {
        self.txset_cache.get(hash).map(|(_, payload)| Arc::clone(payload))
    }

    /// Number of cached quorum sets.
    pub fn qset_cache_size(&self) -> usize {
        self.known_qsets.len()
    }

    /// Number of cached transaction sets.
    pub fn txset_cache_size(&self) -> usize {
        self.txset_cache.len()
    }

    /// Whether either fetcher still tracks the given hash.
    pub fn is_fetching_item(&self, hash: &Hash256) -> bool {
        self.txset_fetcher.is_tracking(hash) || self.qset_fetcher.is_tracking(hash)
    }

    /// Advance fetch retries on both fetchers.
    pub fn process_pending(&mut self) -> usize {
        self.txset_fetcher.process_pending() + self.qset_fetcher.process_pending()
    }

    /// Current pipeline metrics.
    pub fn metrics(&self) -> &PendingMetrics {
        &self.metrics
    }

    // --- Internals ---------------------------------------------------------

    /// Dependencies of `envelope` that are not yet cached.
    fn missing_dependencies(&self, envelope: &ScpEnvelope) -> Vec<(ItemType, Hash256)> {
        let mut missing = Vec::new();

        let qset_hash = companion_quorum_set_hash(&envelope.statement);
        if !self.known_qsets.contains_key(&qset_hash) {
            missing.push((ItemType::QuorumSet, qset_hash));
        }
        if let Some(txset_hash) = tx_set_hash(envelope) {
            if !self.txset_cache.contains_key(&txset_hash) {
                missing.push((ItemType::TxSet, txset_hash));
            }
        }
        missing
    }

    /// Re-run the dependency check for an envelope whose item arrived.
    ///
    /// Promotes it from *fetching* to *ready* when everything resolved;
    /// otherwise keeps (or restarts) the fetches still outstanding.
    fn try_promote(&mut self, envelope: &ScpEnvelope) {
        let slot = envelope.statement.slot_index;
        let env_hash = envelope_hash(envelope);

        let missing = self.missing_dependencies(envelope);
        if missing.is_empty() {
            let Some(state) = self.slots.get_mut(&slot) else {
                return;
            };
            if let Some((envelope, started)) = state.fetching.remove(&env_hash) {
                let elapsed = started.elapsed();
                state.ready.push_back(envelope);
                self.metrics.fetch_duration.update(elapsed);
                debug!(slot, elapsed = ?elapsed, "envelope ready after fetch");
            }
        } else {
            for (item_type, hash) in missing {
                match item_type {
                    ItemType::QuorumSet => self.qset_fetcher.fetch(hash, envelope),
                    ItemType::TxSet => self.txset_fetcher.fetch(hash, envelope),
                }
            }
        }
    }

    /// Move an envelope into its slot's *discarded* set.
    ///
    /// Removes it from *fetching* or *ready* and cancels its fetches.
    /// Idempotent: discarding an already-discarded envelope does nothing.
    fn discard_envelope(&mut self, envelope: &ScpEnvelope) {
        let slot = envelope.statement.slot_index;
        let env_hash = envelope_hash(envelope);

        let state = self.slots.entry(slot).or_default();
        if !state.discarded.insert(env_hash) {
            return;
        }
        state.fetching.remove(&env_hash);
        if let Some(pos) = state.ready_position(&env_hash) {
            state.ready.remove(pos);
        }
        self.stop_fetch(envelope);
    }

    /// Discard every envelope, in any slot, that references `qset_hash`.
    fn discard_envelopes_with_qset(&mut self, qset_hash: &Hash256) {
        debug!(qset = %qset_hash.to_hex_abbrev(), "discarding envelopes with quorum set");

        let mut to_discard = Vec::new();
        for state in self.slots.values() {
            for (envelope, _) in state.fetching.values() {
                if &companion_quorum_set_hash(&envelope.statement) == qset_hash {
                    to_discard.push(envelope.clone());
                }
            }
            for envelope in &state.ready {
                if &companion_quorum_set_hash(&envelope.statement) == qset_hash {
                    to_discard.push(envelope.clone());
                }
            }
        }
        // Envelopes still parked in the fetcher but no longer in any slot
        // (e.g. their slot was erased) also stop waiting.
        for envelope in self.qset_fetcher.fetching_for(qset_hash) {
            to_discard.push(envelope);
        }

        for envelope in to_discard {
            self.discard_envelope(&envelope);
        }
    }

    /// Cancel both fetches an envelope may hold.
    fn stop_fetch(&mut self, envelope: &ScpEnvelope) {
        let qset_hash = companion_quorum_set_hash(&envelope.statement);
        self.qset_fetcher.stop_fetch(&qset_hash, envelope);
        if let Some(txset_hash) = tx_set_hash(envelope) {
            self.txset_fetcher.stop_fetch(&txset_hash, envelope);
        }
    }

    /// Bump the high-water slot of transaction sets this envelope references.
    fn touch_txset_cache(&mut self, envelope: &ScpEnvelope) {
        let slot = envelope.statement.slot_index;
        if let Some(hash) = tx_set_hash(envelope) {
            if let Some((high_water, _)) = self.txset_cache.get_mut(&hash) {
                *high_water = (*high_water).max(slot);
            }
        }
    }

    /// Recompute the per-set gauges.
    fn update_metrics(&mut self) {
        let mut processed = 0;
        let mut discarded = 0;
        let mut fetching = 0;
        let mut ready = 0;
        for state in self.slots.values() {
            processed += state.processed.len();
            discarded += state.discarded.len();
            fetching += state.fetching.len();
            ready += state.ready.len();
        }
        self.metrics.processed = processed;
        self.metrics.discarded = discarded;
        self.metrics.fetching = fetching;
        self.metrics.ready = ready;
    }
}
