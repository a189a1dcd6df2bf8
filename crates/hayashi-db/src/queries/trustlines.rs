//! Trustline rows.

use super::{decode_entry, encode_account_id, encode_entry, encode_xdr};
use crate::error::DbError;
use rusqlite::{params, Connection, OptionalExtension};
use stellar_xdr::curr::{AccountId, LedgerEntry, LedgerEntryData, TrustLineAsset};

/// Insert or update a trustline row.
pub fn upsert_trustline(conn: &Connection, entry: &LedgerEntry) -> Result<(), DbError> {
    let LedgerEntryData::Trustline(trustline) = &entry.data else {
        return Err(DbError::InvalidQuery("entry is not a trustline".into()));
    };

    let mut stmt = conn.prepare_cached(
        "INSERT INTO trustlines (accountid, asset, balance, lastmodified, entry) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (accountid, asset) DO UPDATE SET \
         balance = excluded.balance, \
         lastmodified = excluded.lastmodified, \
         entry = excluded.entry",
    )?;
    stmt.execute(params![
        encode_account_id(&trustline.account_id),
        encode_xdr(&trustline.asset)?,
        trustline.balance,
        entry.last_modified_ledger_seq,
        encode_entry(entry)?,
    ])?;
    Ok(())
}

/// Load a trustline row.
pub fn load_trustline(
    conn: &Connection,
    account_id: &AccountId,
    asset: &TrustLineAsset,
) -> Result<Option<LedgerEntry>, DbError> {
    let mut stmt =
        conn.prepare_cached("SELECT entry FROM trustlines WHERE accountid = ?1 AND asset = ?2")?;
    let encoded: Option<String> = stmt
        .query_row(
            params![encode_account_id(account_id), encode_xdr(asset)?],
            |row| row.get(0),
        )
        .optional()?;
    encoded.map(|e| decode_entry(&e)).transpose()
}

/// Delete a trustline row.
pub fn delete_trustline(
    conn: &Connection,
    account_id: &AccountId,
    asset: &TrustLineAsset,
) -> Result<(), DbError> {
    let mut stmt =
        conn.prepare_cached("DELETE FROM trustlines WHERE accountid = ?1 AND asset = ?2")?;
    stmt.execute(params![encode_account_id(account_id), encode_xdr(asset)?])?;
    Ok(())
}

/// Count trustline rows.
pub fn count_trustlines(conn: &Connection) -> Result<u64, DbError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM trustlines", [], |row| row.get(0))?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_fixtures::make_account_id;
    use crate::schema;
    use stellar_xdr::curr::{
        AlphaNum4, AssetCode4, LedgerEntryExt, TrustLineEntry, TrustLineEntryExt,
    };

    fn make_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();
        conn
    }

    fn make_usd_trustline_asset(issuer_seed: u8) -> TrustLineAsset {
        TrustLineAsset::CreditAlphanum4(AlphaNum4 {
            asset_code: AssetCode4(*b"USD\0"),
            issuer: make_account_id(issuer_seed),
        })
    }

    fn make_trustline_entry(seed: u8, asset: TrustLineAsset, balance: i64) -> LedgerEntry {
        LedgerEntry {
            last_modified_ledger_seq: 1,
            data: LedgerEntryData::Trustline(TrustLineEntry {
                account_id: make_account_id(seed),
                asset,
                balance,
                limit: i64::MAX,
                flags: 1,
                ext: TrustLineEntryExt::V0,
            }),
            ext: LedgerEntryExt::V0,
        }
    }

    #[test]
    fn test_upsert_load_delete_roundtrip() {
        let conn = make_test_db();
        let asset = make_usd_trustline_asset(9);
        let entry = make_trustline_entry(1, asset.clone(), 500);

        upsert_trustline(&conn, &entry).unwrap();
        let loaded = load_trustline(&conn, &make_account_id(1), &asset).unwrap().unwrap();
        assert_eq!(loaded, entry);

        let updated = make_trustline_entry(1, asset.clone(), 700);
        upsert_trustline(&conn, &updated).unwrap();
        assert_eq!(
            load_trustline(&conn, &make_account_id(1), &asset).unwrap().unwrap(),
            updated
        );
        assert_eq!(count_trustlines(&conn).unwrap(), 1);

        delete_trustline(&conn, &make_account_id(1), &asset).unwrap();
        assert!(load_trustline(&conn, &make_account_id(1), &asset).unwrap().is_none());
    }

    #[test]
    fn test_distinct_assets_are_distinct_rows() {
        let conn = make_test_db();
        let usd = make_usd_trustline_asset(9);
        let other = make_usd_trustline_asset(8);

        upsert_trustline(&conn, &make_trustline_entry(1, usd.clone(), 500)).unwrap();
        upsert_trustline(&conn, &make_trustline_entry(1, other.clone(), 600)).unwrap();

        assert_eq!(count_trustlines(&conn).unwrap(), 2);
        assert!(load_trustline(&conn, &make_account_id(1), &usd).unwrap().is_some());
        assert!(load_trustline(&conn, &make_account_id(1), &other).unwrap().is_some());
    }
}
