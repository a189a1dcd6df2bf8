//! Overlay-facing plumbing for the hayashi consensus pipeline.
//!
//! The peer-to-peer transport itself is an external collaborator; this crate
//! holds the piece of the overlay boundary the consensus staging machine
//! depends on: the [`ItemFetcher`], which tracks outstanding requests for
//! remote items (transaction sets and quorum sets) by content hash, dedupes
//! requests, and delivers arrivals back to the waiting envelopes.

mod item_fetcher;
mod peer;

pub use item_fetcher::{
    AskPeerFn, ItemFetcher, ItemFetcherConfig, ItemFetcherStats, ItemType, NextPeerResult, Tracker,
};
pub use peer::PeerId;
