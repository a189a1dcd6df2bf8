//! Account rows.

use super::{decode_account_id, decode_entry, encode_account_id, encode_entry};
use crate::error::DbError;
use rusqlite::{params, Connection, OptionalExtension};
use stellar_xdr::curr::{AccountId, LedgerEntry, LedgerEntryData};

/// Minimum balance for an account's vote to count towards inflation.
pub const MIN_INFLATION_VOTE_BALANCE: i64 = 1_000_000_000;

/// One inflation destination with its aggregated votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflationVotes {
    /// The destination accounts voted for.
    pub inflation_dest: AccountId,
    /// Sum of voting balances.
    pub votes: i64,
}

/// Insert or update an account row.
pub fn upsert_account(conn: &Connection, entry: &LedgerEntry) -> Result<(), DbError> {
    let LedgerEntryData::Account(account) = &entry.data else {
        return Err(DbError::InvalidQuery("entry is not an account".into()));
    };

    let account_strkey = encode_account_id(&account.account_id);
    let inflation_dest = account.inflation_dest.as_ref().map(encode_account_id);
    let encoded = encode_entry(entry)?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO accounts (accountid, balance, inflationdest, lastmodified, entry) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (accountid) DO UPDATE SET \
         balance = excluded.balance, \
         inflationdest = excluded.inflationdest, \
         lastmodified = excluded.lastmodified, \
         entry = excluded.entry",
    )?;
    stmt.execute(params![
        account_strkey,
        account.balance,
        inflation_dest,
        entry.last_modified_ledger_seq,
        encoded,
    ])?;
    Ok(())
}

/// Load an account row.
pub fn load_account(
    conn: &Connection,
    account_id: &AccountId,
) -> Result<Option<LedgerEntry>, DbError> {
    let mut stmt = conn.prepare_cached("SELECT entry FROM accounts WHERE accountid = ?1")?;
    let encoded: Option<String> = stmt
        .query_row(params![encode_account_id(account_id)], |row| row.get(0))
        .optional()?;
    encoded.map(|e| decode_entry(&e)).transpose()
}

/// Delete an account row.
pub fn delete_account(conn: &Connection, account_id: &AccountId) -> Result<(), DbError> {
    let mut stmt = conn.prepare_cached("DELETE FROM accounts WHERE accountid = ?1")?;
    stmt.execute(params![encode_account_id(account_id)])?;
    Ok(())
}

/// Count account rows.
pub fn count_accounts(conn: &Connection) -> Result<u64, DbError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Aggregate inflation votes per destination.
///
/// Only balances of at least [`MIN_INFLATION_VOTE_BALANCE`] count. Results
/// are ordered by votes descending, ties broken by descending StrKey text of
/// the destination, and truncated to `max_winners` after filtering by
/// `min_votes`.
pub fn load_inflation_winners(
    conn: &Connection,
    max_winners: usize,
    min_votes: i64,
) -> Result<Vec<InflationVotes>, DbError> {
    let mut stmt = conn.prepare_cached(
        "SELECT inflationdest, SUM(balance) AS votes FROM accounts \
         WHERE inflationdest IS NOT NULL AND balance >= ?1 \
         GROUP BY inflationdest \
         HAVING SUM(balance) >= ?2 \
         ORDER BY votes DESC, inflationdest DESC \
         LIMIT ?3",
    )?;

    let mut rows = stmt.query(params![
        MIN_INFLATION_VOTE_BALANCE,
        min_votes,
        max_winners as i64
    ])?;
    let mut winners = Vec::new();
    while let Some(row) = rows.next()? {
        let dest: String = row.get(0)?;
        let votes: i64 = row.get(1)?;
        winners.push(InflationVotes {
            inflation_dest: decode_account_id(&dest)?,
            votes,
        });
    }
    Ok(winners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_fixtures::{make_account_entry, make_account_id};
    use crate::schema;

    fn make_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_upsert_and_load_account() {
        let conn = make_test_db();
        let entry = make_account_entry(1, 5000, None);

        upsert_account(&conn, &entry).unwrap();
        let loaded = load_account(&conn, &make_account_id(1)).unwrap().unwrap();
        assert_eq!(loaded, entry);

        // Update in place.
        let updated = make_account_entry(1, 9000, Some(2));
        upsert_account(&conn, &updated).unwrap();
        let loaded = load_account(&conn, &make_account_id(1)).unwrap().unwrap();
        assert_eq!(loaded, updated);
        assert_eq!(count_accounts(&conn).unwrap(), 1);
    }

    #[test]
    fn test_load_missing_account() {
        let conn = make_test_db();
        assert!(load_account(&conn, &make_account_id(9)).unwrap().is_none());
    }

    #[test]
    fn test_delete_account() {
        let conn = make_test_db();
        upsert_account(&conn, &make_account_entry(1, 5000, None)).unwrap();
        delete_account(&conn, &make_account_id(1)).unwrap();
        assert!(load_account(&conn, &make_account_id(1)).unwrap().is_none());
    }

    #[test]
    fn test_inflation_winners_aggregate_and_threshold() {
        let conn = make_test_db();
        // Two voters for dest 10, one for dest 11, one below the vote floor.
        upsert_account(&conn, &make_account_entry(1, 2_000_000_000, Some(10))).unwrap();
        upsert_account(&conn, &make_account_entry(2, 3_000_000_000, Some(10))).unwrap();
        upsert_account(&conn, &make_account_entry(3, 4_000_000_000, Some(11))).unwrap();
        upsert_account(&conn, &make_account_entry(4, 999_999_999, Some(11))).unwrap();

        let winners = load_inflation_winners(&conn, 10, 0).unwrap();
        assert_eq!(winners.len(), 2);
        assert_eq!(winners[0].inflation_dest, make_account_id(10));
        assert_eq!(winners[0].votes, 5_000_000_000);
        assert_eq!(winners[1].votes, 4_000_000_000);

        let winners = load_inflation_winners(&conn, 10, 4_500_000_000).unwrap();
        assert_eq!(winners.len(), 1);

        let winners = load_inflation_winners(&conn, 1, 0).unwrap();
        assert_eq!(winners.len(), 1);
    }
}
