//! Offer rows and order-book queries.
//!
//! The `bestofferindex` on `(sellingasset, buyingasset, price, offerid)`
//! serves the incremental best-offer scan: rows come back ordered by the
//! precomputed REAL price, ties by offer id, and the ledger root pages
//! through them with `LIMIT`/`OFFSET`.

use super::{decode_entry, encode_account_id, encode_entry, encode_xdr, price_double};
use crate::error::DbError;
use rusqlite::{params, Connection, OptionalExtension};
use stellar_xdr::curr::{AccountId, Asset, LedgerEntry, LedgerEntryData};

/// Insert or update an offer row.
pub fn upsert_offer(conn: &Connection, entry: &LedgerEntry) -> Result<(), DbError> {
    let LedgerEntryData::Offer(offer) = &entry.data else {
        return Err(DbError::InvalidQuery("entry is not an offer".into()));
    };

    let mut stmt = conn.prepare_cached(
        "INSERT INTO offers (sellerid, offerid, sellingasset, buyingasset, \
         amount, pricen, priced, price, flags, lastmodified, entry) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT (offerid) DO UPDATE SET \
         sellerid = excluded.sellerid, \
         sellingasset = excluded.sellingasset, \
         buyingasset = excluded.buyingasset, \
         amount = excluded.amount, \
         pricen = excluded.pricen, \
         priced = excluded.priced, \
         price = excluded.price, \
         flags = excluded.flags, \
         lastmodified = excluded.lastmodified, \
         entry = excluded.entry",
    )?;
    stmt.execute(params![
        encode_account_id(&offer.seller_id),
        offer.offer_id,
        encode_xdr(&offer.selling)?,
        encode_xdr(&offer.buying)?,
        offer.amount,
        offer.price.n,
        offer.price.d,
        price_double(&offer.price),
        offer.flags,
        entry.last_modified_ledger_seq,
        encode_entry(entry)?,
    ])?;
    Ok(())
}

/// Load a single offer row by seller and offer id.
pub fn load_offer(
    conn: &Connection,
    seller_id: &AccountId,
    offer_id: i64,
) -> Result<Option<LedgerEntry>, DbError> {
    if offer_id < 0 {
        return Ok(None);
    }
    let mut stmt =
        conn.prepare_cached("SELECT entry FROM offers WHERE sellerid = ?1 AND offerid = ?2")?;
    let encoded: Option<String> = stmt
        .query_row(params![encode_account_id(seller_id), offer_id], |row| {
            row.get(0)
        })
        .optional()?;
    encoded.map(|e| decode_entry(&e)).transpose()
}

/// Load a page of best offers for an asset pair.
///
/// Rows are ordered best-first (ascending price, then ascending offer id);
/// `offset` skips rows already seen by the caller's cache.
pub fn load_best_offers(
    conn: &Connection,
    buying: &Asset,
    selling: &Asset,
    limit: usize,
    offset: usize,
) -> Result<Vec<LedgerEntry>, DbError> {
    let mut stmt = conn.prepare_cached(
        "SELECT entry FROM offers \
         WHERE sellingasset = ?1 AND buyingasset = ?2 \
         ORDER BY price, offerid LIMIT ?3 OFFSET ?4",
    )?;
    let mut rows = stmt.query(params![
        encode_xdr(selling)?,
        encode_xdr(buying)?,
        limit as i64,
        offset as i64
    ])?;

    let mut offers = Vec::with_capacity(limit);
    while let Some(row) = rows.next()? {
        let encoded: String = row.get(0)?;
        offers.push(decode_entry(&encoded)?);
    }
    Ok(offers)
}

/// Load every offer row.
pub fn load_all_offers(conn: &Connection) -> Result<Vec<LedgerEntry>, DbError> {
    let mut stmt = conn.prepare_cached("SELECT entry FROM offers ORDER BY offerid")?;
    let mut rows = stmt.query([])?;

    let mut offers = Vec::new();
    while let Some(row) = rows.next()? {
        let encoded: String = row.get(0)?;
        offers.push(decode_entry(&encoded)?);
    }
    Ok(offers)
}

/// Load the offers where `account_id` sells and either side is `asset`.
pub fn load_offers_by_account_and_asset(
    conn: &Connection,
    account_id: &AccountId,
    asset: &Asset,
) -> Result<Vec<LedgerEntry>, DbError> {
    let asset_encoded = encode_xdr(asset)?;
    let mut stmt = conn.prepare_cached(
        "SELECT entry FROM offers WHERE sellerid = ?1 \
         AND (sellingasset = ?2 OR buyingasset = ?3)",
    )?;
    let mut rows = stmt.query(params![
        encode_account_id(account_id),
        asset_encoded,
        asset_encoded
    ])?;

    let mut offers = Vec::new();
    while let Some(row) = rows.next()? {
        let encoded: String = row.get(0)?;
        offers.push(decode_entry(&encoded)?);
    }
    Ok(offers)
}

/// Delete an offer row.
pub fn delete_offer(conn: &Connection, offer_id: i64) -> Result<(), DbError> {
    let mut stmt = conn.prepare_cached("DELETE FROM offers WHERE offerid = ?1")?;
    stmt.execute(params![offer_id])?;
    Ok(())
}

/// Count offer rows.
pub fn count_offers(conn: &Connection) -> Result<u64, DbError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM offers", [], |row| row.get(0))?;
    Ok(count as u64)
}
