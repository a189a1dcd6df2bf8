//! Table schemas for the ledger-entry store.
//!
//! Every table carries the columns its queries filter or order on plus an
//! `entry` column holding the full base64-encoded XDR `LedgerEntry`, so a
//! row round-trips bit-exactly regardless of which columns the reader uses.

use crate::error::DbError;
use rusqlite::Connection;

/// SQL creating all four ledger-entry tables and their indexes.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    accountid        TEXT NOT NULL PRIMARY KEY,
    balance          INTEGER NOT NULL,
    inflationdest    TEXT,
    lastmodified     INTEGER NOT NULL,
    entry            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS accountbalances
    ON accounts (balance) WHERE balance >= 1000000000;

CREATE TABLE IF NOT EXISTS accountdata (
    accountid        TEXT NOT NULL,
    dataname         TEXT NOT NULL,
    lastmodified     INTEGER NOT NULL,
    entry            TEXT NOT NULL,
    PRIMARY KEY (accountid, dataname)
);

CREATE TABLE IF NOT EXISTS offers (
    sellerid         TEXT NOT NULL,
    offerid          INTEGER NOT NULL PRIMARY KEY,
    sellingasset     TEXT NOT NULL,
    buyingasset      TEXT NOT NULL,
    amount           INTEGER NOT NULL,
    pricen           INTEGER NOT NULL,
    priced           INTEGER NOT NULL,
    price            REAL NOT NULL,
    flags            INTEGER NOT NULL,
    lastmodified     INTEGER NOT NULL,
    entry            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS bestofferindex
    ON offers (sellingasset, buyingasset, price, offerid);
CREATE INDEX IF NOT EXISTS offerbyseller ON offers (sellerid);

CREATE TABLE IF NOT EXISTS trustlines (
    accountid        TEXT NOT NULL,
    asset            TEXT NOT NULL,
    balance          INTEGER NOT NULL,
    lastmodified     INTEGER NOT NULL,
    entry            TEXT NOT NULL,
    PRIMARY KEY (accountid, asset)
);
"#;

/// Create the tables if they do not exist yet.
pub fn initialize_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(CREATE_TABLES)?;
    Ok(())
}

/// Drop and recreate every ledger-entry table.
pub fn drop_ledger_tables(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS accounts;
        DROP TABLE IF EXISTS accountdata;
        DROP TABLE IF EXISTS offers;
        DROP TABLE IF EXISTS trustlines;
    "#,
    )?;
    initialize_schema(conn)
}
