//! Account-data rows.

use super::{decode_entry, encode_account_id, encode_entry, encode_xdr};
use crate::error::DbError;
use rusqlite::{params, Connection, OptionalExtension};
use stellar_xdr::curr::{AccountId, LedgerEntry, LedgerEntryData, String64};

/// Insert or update a data row.
pub fn upsert_data(conn: &Connection, entry: &LedgerEntry) -> Result<(), DbError> {
    let LedgerEntryData::Data(data) = &entry.data else {
        return Err(DbError::InvalidQuery("entry is not a data entry".into()));
    };

    let mut stmt = conn.prepare_cached(
        "INSERT INTO accountdata (accountid, dataname, lastmodified, entry) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (accountid, dataname) DO UPDATE SET \
         lastmodified = excluded.lastmodified, \
         entry = excluded.entry",
    )?;
    stmt.execute(params![
        encode_account_id(&data.account_id),
        encode_xdr(&data.data_name)?,
        entry.last_modified_ledger_seq,
        encode_entry(entry)?,
    ])?;
    Ok(())
}

/// Load a data row.
pub fn load_data(
    conn: &Connection,
    account_id: &AccountId,
    data_name: &String64,
) -> Result<Option<LedgerEntry>, DbError> {
    let mut stmt = conn
        .prepare_cached("SELECT entry FROM accountdata WHERE accountid = ?1 AND dataname = ?2")?;
    let encoded: Option<String> = stmt
        .query_row(
            params![encode_account_id(account_id), encode_xdr(data_name)?],
            |row| row.get(0),
        )
        .optional()?;
    encoded.map(|e| decode_entry(&e)).transpose()
}

/// Delete a data row.
pub fn delete_data(
    conn: &Connection,
    account_id: &AccountId,
    data_name: &String64,
) -> Result<(), DbError> {
    let mut stmt =
        conn.prepare_cached("DELETE FROM accountdata WHERE accountid = ?1 AND dataname = ?2")?;
    stmt.execute(params![encode_account_id(account_id), encode_xdr(data_name)?])?;
    Ok(())
}

/// Count data rows.
pub fn count_data(conn: &Connection) -> Result<u64, DbError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM accountdata", [], |row| row.get(0))?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_fixtures::make_account_id;
    use crate::schema;
    use stellar_xdr::curr::{DataEntry, DataEntryExt, DataValue, LedgerEntryExt};

    fn make_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();
        conn
    }

    fn make_data_entry(seed: u8, name: &str, value: &[u8]) -> LedgerEntry {
        LedgerEntry {
            last_modified_ledger_seq: 1,
            data: LedgerEntryData::Data(DataEntry {
                account_id: make_account_id(seed),
                data_name: name.as_bytes().to_vec().try_into().unwrap(),
                data_value: DataValue(value.to_vec().try_into().unwrap()),
                ext: DataEntryExt::V0,
            }),
            ext: LedgerEntryExt::V0,
        }
    }

    fn name_of(entry: &LedgerEntry) -> String64 {
        match &entry.data {
            LedgerEntryData::Data(d) => d.data_name.clone(),
            _ => panic!("not a data entry"),
        }
    }

    #[test]
    fn test_upsert_load_delete_roundtrip() {
        let conn = make_test_db();
        let entry = make_data_entry(1, "config", b"value");
        let name = name_of(&entry);

        upsert_data(&conn, &entry).unwrap();
        let loaded = load_data(&conn, &make_account_id(1), &name).unwrap().unwrap();
        assert_eq!(loaded, entry);

        // Same name under a different account is a different row.
        assert!(load_data(&conn, &make_account_id(2), &name).unwrap().is_none());

        delete_data(&conn, &make_account_id(1), &name).unwrap();
        assert!(load_data(&conn, &make_account_id(1), &name).unwrap().is_none());
        assert_eq!(count_data(&conn).unwrap(), 0);
    }

    #[test]
    fn test_upsert_overwrites_value() {
        let conn = make_test_db();
        let entry = make_data_entry(1, "config", b"old");
        let name = name_of(&entry);

        upsert_data(&conn, &entry).unwrap();
        let updated = make_data_entry(1, "config", b"new");
        upsert_data(&conn, &updated).unwrap();

        let loaded = load_data(&conn, &make_account_id(1), &name).unwrap().unwrap();
        assert_eq!(loaded, updated);
        assert_eq!(count_data(&conn).unwrap(), 1);
    }
}
