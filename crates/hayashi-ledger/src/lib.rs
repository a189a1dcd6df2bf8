//! Nested ledger state for the hayashi ledger node.
//!
//! The ledger state is a copy-on-write stack of scopes over a persistent
//! root:
//!
//! - [`LedgerStateRoot`] sits at the bottom, fronting the SQLite store with
//!   bounded caches and owning the store's single write transaction
//! - [`LedgerState`] scopes stack on top of the root (or of each other) to
//!   arbitrary depth; each holds a private working set and commits or rolls
//!   back against its parent as a unit
//! - [`LedgerStateEntry`], [`ConstLedgerStateEntry`] and
//!   [`LedgerStateHeader`] are scoped borrows into a scope, released on drop
//! - [`TrustLineWrapper`] makes balance arithmetic uniform across real
//!   trustlines and the asset-issuer edge
//!
//! Transaction execution opens a scope per candidate change set, works
//! through handles, and either commits the scope into its parent or drops
//! it to roll back. Committing the bottom scope writes through the root
//! into the store.

mod compare;
mod entry;
mod error;
mod header;
mod root;
mod state;
mod trust_line;

pub use compare::is_better_offer;
pub use entry::{ConstLedgerStateEntry, LedgerStateEntry};
pub use error::{LedgerError, Result};
pub use header::LedgerStateHeader;
pub use root::{LedgerStateRoot, DEFAULT_BEST_OFFER_CACHE_SIZE, DEFAULT_ENTRY_CACHE_SIZE};
pub use state::{
    ledger_entry_key, CommittedEntries, EntryDelta, HeaderDelta, InflationWinner, LedgerState,
    LedgerStateDelta, LedgerStateParent,
};
pub use trust_line::{ConstTrustLineWrapper, TrustLineWrapper};
