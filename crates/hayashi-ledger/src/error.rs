//! Error types for ledger state operations.

use hayashi_db::DbError;
use thiserror::Error;

/// Result type for ledger state operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised by the ledger state stack.
///
/// Everything except [`LedgerError::Db`] is a contract violation: the caller
/// used the API against its stated preconditions, and the operation did not
/// happen. None are recoverable locally.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The scope was sealed by a materializing call.
    #[error("ledger state is sealed")]
    Sealed,

    /// The operation requires the scope to be sealed first.
    #[error("ledger state is not sealed")]
    NotSealed,

    /// A child scope is still attached.
    #[error("ledger state has a child")]
    HasChild,

    /// `create` on a key that already has a visible newest version.
    #[error("key already exists")]
    KeyExists,

    /// The key has no visible newest version.
    #[error("key does not exist")]
    KeyNotFound,

    /// The key is pinned by an active handle.
    #[error("key is active")]
    KeyActive,

    /// A header handle is already active.
    #[error("ledger header is active")]
    HeaderActive,

    /// A key or entry of a type the store does not persist.
    #[error("unknown ledger key type")]
    UnknownKeyType,

    /// Trustlines do not exist for the native asset.
    #[error("trustline for native asset")]
    NativeAssetTrustLine,

    /// XDR conversion failed while materializing changes.
    #[error("XDR error: {0}")]
    Xdr(#[from] stellar_xdr::curr::Error),

    /// The persistent store failed.
    ///
    /// When raised from a commit, the root has already flushed its entry
    /// cache and the write transaction has been rolled back; the containing
    /// ledger close must be treated as failed.
    #[error("database error: {0}")]
    Db(#[from] DbError),
}
