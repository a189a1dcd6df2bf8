//! Error types for database operations.

use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// XDR serialization error.
    #[error("XDR error: {0}")]
    Xdr(String),

    /// Base64 decode error on a stored column.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A stored account id failed to parse.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// I/O error creating the database directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller asked for something the store cannot answer.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl From<stellar_xdr::curr::Error> for DbError {
    fn from(e: stellar_xdr::curr::Error) -> Self {
        DbError::Xdr(e.to_string())
    }
}
