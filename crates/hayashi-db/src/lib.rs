//! SQLite persistence for the hayashi ledger node.
//!
//! Four tables back the persistent ledger state, one per ledger-entry type:
//! `accounts`, `accountdata`, `offers` and `trustlines`. Each row carries
//! the columns the store needs to search on plus the full XDR-encoded entry,
//! so reads reconstruct entries bit-exactly.
//!
//! The ledger root drives writes through an explicit transaction window:
//! [`Database::begin`] when a child scope attaches, row operations while the
//! child commits, then [`Database::commit`] or [`Database::rollback`].

pub mod error;
pub mod pool;
pub mod queries;
pub mod schema;

pub use error::DbError;
pub use pool::{Database, PooledConnection};

use tracing::info;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;

impl Database {
    /// Open a database at the given path, creating it if necessary.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = r2d2_sqlite::SqliteConnectionManager::file(path);
        let pool = r2d2::Pool::builder().max_size(10).build(manager)?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager)?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        schema::initialize_schema(&conn)?;
        info!("database schema initialized");
        Ok(())
    }
}
