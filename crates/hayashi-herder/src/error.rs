//! Error types for herder operations.

use thiserror::Error;

/// Errors that can occur while staging envelopes or tracking the quorum.
#[derive(Debug, Error)]
pub enum HerderError {
    /// The transitive quorum map is corrupt.
    ///
    /// Raised when a BFS rebuild of the quorum tracker hits an expansion
    /// conflict, which the traversal order makes impossible on consistent
    /// state. Callers must treat this as a fatal program error.
    #[error("invalid state while rebuilding transitive quorum")]
    InvariantCorruption,
}
