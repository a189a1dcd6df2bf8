//! Consensus envelope staging for the hayashi ledger node.
//!
//! The consensus engine itself (nomination and ballot protocols) is an
//! external collaborator. This crate owns the machinery that sits between
//! the overlay and that engine:
//!
//! - [`PendingEnvelopes`] - the staging pipeline. Envelopes arriving from
//!   peers reference a quorum-set descriptor and possibly a transaction-set
//!   payload by hash; the pipeline fetches what is missing, discards
//!   envelopes whose quorum set turns out to be structurally unsafe, and
//!   releases fully resolved envelopes to the engine in FIFO order per slot.
//! - [`QuorumTracker`] - a breadth-first-labelled view of the local node's
//!   transitive quorum, expanded incrementally as quorum-set descriptors
//!   become known and rebuilt from scratch when an expansion conflicts.
//!
//! ## Envelope lifecycle
//!
//! Per slot, an envelope is in at most one of four sets:
//!
//! ```text
//! (unknown) --recv, unsafe qset--> discarded          (terminal)
//! (unknown) --recv, deps missing--> fetching --deps arrive--> ready
//! (unknown) --recv, deps present--> ready
//! ready --pop--> (engine) --envelope_processed--> processed   (terminal)
//! ```

mod error;
mod metrics;
mod pending_envelopes;
pub mod quorum;
mod quorum_tracker;
pub mod utils;

pub use error::HerderError;
pub use metrics::{FetchTimer, PendingMetrics};
pub use pending_envelopes::{
    EnvelopeStatus, PendingEnvelopes, PendingEnvelopesConfig, SlotEnvelopes,
};
pub use quorum_tracker::{NodeInfo, QuorumTracker};

/// Result type for herder operations.
pub type Result<T> = std::result::Result<T, HerderError>;
