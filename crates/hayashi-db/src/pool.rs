//! Connection pool management.

use crate::error::DbError;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

/// Pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database connection pool.
pub struct Database {
    pub(crate) pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Get a connection from the pool.
    pub fn connection(&self) -> Result<PooledConnection, DbError> {
        self.pool.get().map_err(DbError::from)
    }

    /// Execute a function with a connection.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self.connection()?;
        f(&conn)
    }

    /// Begin a write transaction on `conn`.
    ///
    /// The ledger root holds the transaction open across its child's whole
    /// commit window, so the usual closure-scoped transaction helper does
    /// not apply; the window is driven with explicit statements instead.
    pub fn begin(conn: &Connection) -> Result<(), DbError> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    /// Commit the open write transaction on `conn`.
    pub fn commit(conn: &Connection) -> Result<(), DbError> {
        conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Roll back the open write transaction on `conn`.
    pub fn rollback(conn: &Connection) -> Result<(), DbError> {
        conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
