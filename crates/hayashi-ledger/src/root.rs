//! The persistent bottom of the scope stack.
//!
//! [`LedgerStateRoot`] fronts the SQLite store with two bounded caches:
//!
//! - an entry cache mapping ledger keys to their newest version, with
//!   negative entries (`None`) so repeated misses stay cheap
//! - a best-offers cache holding, per asset pair, a monotonically growing
//!   prefix of the true best-offer ordering plus an `all_loaded` flag
//!
//! The root owns the store's single write transaction. Attaching a child
//! scope opens it; the child's commit applies the working set row by row
//! and commits it; a rollback discards it. Commit failure flushes the
//! entry cache wholesale, because a partially applied write must never be
//! observable through a positive cache hit.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;

use hayashi_db::{queries, Database, PooledConnection};
use lru::LruCache;
use stellar_xdr::curr::{
    AccountId, Asset, LedgerEntry, LedgerEntryType, LedgerHeader, LedgerKey,
};
use tracing::{debug, error};

use crate::state::{
    ledger_entry_key, CommittedEntries, InflationWinner, LedgerStateParent,
};
use crate::{LedgerError, Result};

/// Default capacity of the entry cache.
pub const DEFAULT_ENTRY_CACHE_SIZE: usize = 4096;

/// Default capacity of the best-offers cache.
pub const DEFAULT_BEST_OFFER_CACHE_SIZE: usize = 64;

/// Rows fetched per incremental best-offer load.
const BEST_OFFER_BATCH_SIZE: usize = 5;

/// Cached best-offer prefix for one asset pair.
#[derive(Default)]
struct BestOffers {
    /// Prefix of the best-offer ordering, best first.
    offers: Vec<LedgerEntry>,
    /// Whether the prefix is the entire order book side.
    all_loaded: bool,
}

/// Persistent root of the ledger state stack.
pub struct LedgerStateRoot {
    conn: PooledConnection,
    header: LedgerHeader,
    entry_cache: LruCache<LedgerKey, Option<LedgerEntry>>,
    best_offers_cache: LruCache<(Asset, Asset), BestOffers>,
    has_child: bool,
}

impl LedgerStateRoot {
    /// Create a root over `db` with default cache sizes.
    pub fn new(db: &Database, header: LedgerHeader) -> Result<Self> {
        Self::with_cache_sizes(
            db,
            header,
            DEFAULT_ENTRY_CACHE_SIZE,
            DEFAULT_BEST_OFFER_CACHE_SIZE,
        )
    }

    /// Create a root with explicit cache capacities.
    pub fn with_cache_sizes(
        db: &Database,
        header: LedgerHeader,
        entry_cache_size: usize,
        best_offer_cache_size: usize,
    ) -> Result<Self> {
        let conn = db.connection().map_err(LedgerError::Db)?;
        Ok(Self {
            conn,
            header,
            entry_cache: LruCache::new(bounded(entry_cache_size)),
            best_offers_cache: LruCache::new(bounded(best_offer_cache_size)),
            has_child: false,
        })
    }

    /// Count stored entries of one type.
    pub fn count_objects(&self, entry_type: LedgerEntryType) -> Result<u64> {
        let count = match entry_type {
            LedgerEntryType::Account => queries::accounts::count_accounts(&self.conn)?,
            LedgerEntryType::Trustline => queries::trustlines::count_trustlines(&self.conn)?,
            LedgerEntryType::Offer => queries::offers::count_offers(&self.conn)?,
            LedgerEntryType::Data => queries::data::count_data(&self.conn)?,
            _ => return Err(LedgerError::UnknownKeyType),
        };
        Ok(count)
    }

    fn store_entries(&mut self, entries: &CommittedEntries) -> Result<()> {
        for (key, entry) in entries {
            match (key, entry) {
                (LedgerKey::Account(_), Some(entry)) => {
                    queries::accounts::upsert_account(&self.conn, entry)?
                }
                (LedgerKey::Account(k), None) => {
                    queries::accounts::delete_account(&self.conn, &k.account_id)?
                }
                (LedgerKey::Trustline(_), Some(entry)) => {
                    queries::trustlines::upsert_trustline(&self.conn, entry)?
                }
                (LedgerKey::Trustline(k), None) => {
                    queries::trustlines::delete_trustline(&self.conn, &k.account_id, &k.asset)?
                }
                (LedgerKey::Offer(_), Some(entry)) => {
                    queries::offers::upsert_offer(&self.conn, entry)?
                }
                (LedgerKey::Offer(k), None) => {
                    queries::offers::delete_offer(&self.conn, k.offer_id)?
                }
                (LedgerKey::Data(_), Some(entry)) => {
                    queries::data::upsert_data(&self.conn, entry)?
                }
                (LedgerKey::Data(k), None) => {
                    queries::data::delete_data(&self.conn, &k.account_id, &k.data_name)?
                }
                _ => return Err(LedgerError::UnknownKeyType),
            }
            self.entry_cache.put(key.clone(), entry.clone());
        }
        Ok(())
    }
}

impl LedgerStateParent for LedgerStateRoot {
    fn newest_version(&mut self, key: &LedgerKey) -> Result<Option<LedgerEntry>> {
        if let Some(cached) = self.entry_cache.get(key) {
            return Ok(cached.clone());
        }

        let entry = match key {
            LedgerKey::Account(k) => queries::accounts::load_account(&self.conn, &k.account_id)?,
            LedgerKey::Trustline(k) => {
                queries::trustlines::load_trustline(&self.conn, &k.account_id, &k.asset)?
            }
            LedgerKey::Offer(k) => {
                queries::offers::load_offer(&self.conn, &k.seller_id, k.offer_id)?
            }
            LedgerKey::Data(k) => {
                queries::data::load_data(&self.conn, &k.account_id, &k.data_name)?
            }
            _ => return Err(LedgerError::UnknownKeyType),
        };

        self.entry_cache.put(key.clone(), entry.clone());
        Ok(entry)
    }

    fn header(&self) -> LedgerHeader {
        self.header.clone()
    }

    fn all_offers(&mut self) -> Result<BTreeMap<LedgerKey, LedgerEntry>> {
        let mut offers = BTreeMap::new();
        for entry in queries::offers::load_all_offers(&self.conn)? {
            offers.insert(ledger_entry_key(&entry)?, entry);
        }
        Ok(offers)
    }

    fn best_offer(
        &mut self,
        buying: &Asset,
        selling: &Asset,
        exclude: BTreeSet<LedgerKey>,
    ) -> Result<Option<LedgerEntry>> {
        let cached = self
            .best_offers_cache
            .get_or_insert_mut((buying.clone(), selling.clone()), BestOffers::default);

        for offer in cached.offers.iter() {
            if !exclude.contains(&ledger_entry_key(offer)?) {
                return Ok(Some(offer.clone()));
            }
        }

        while !cached.all_loaded {
            let batch = queries::offers::load_best_offers(
                &self.conn,
                buying,
                selling,
                BEST_OFFER_BATCH_SIZE,
                cached.offers.len(),
            )?;
            if batch.len() < BEST_OFFER_BATCH_SIZE {
                cached.all_loaded = true;
            }

            let scan_from = cached.offers.len();
            cached.offers.extend(batch);
            for offer in &cached.offers[scan_from..] {
                if !exclude.contains(&ledger_entry_key(offer)?) {
                    return Ok(Some(offer.clone()));
                }
            }
        }
        Ok(None)
    }

    fn offers_by_account_and_asset(
        &mut self,
        account: &AccountId,
        asset: &Asset,
    ) -> Result<BTreeMap<LedgerKey, LedgerEntry>> {
        let mut offers = BTreeMap::new();
        for entry in
            queries::offers::load_offers_by_account_and_asset(&self.conn, account, asset)?
        {
            offers.insert(ledger_entry_key(&entry)?, entry);
        }
        Ok(offers)
    }

    fn inflation_winners(
        &mut self,
        max_winners: usize,
        min_votes: i64,
    ) -> Result<Vec<InflationWinner>> {
        let winners = queries::accounts::load_inflation_winners(&self.conn, max_winners, min_votes)?;
        Ok(winners
            .into_iter()
            .map(|votes| InflationWinner {
                account_id: votes.inflation_dest,
                votes: votes.votes,
            })
            .collect())
    }

    fn add_child(&mut self) -> Result<()> {
        if self.has_child {
            return Err(LedgerError::HasChild);
        }
        Database::begin(&self.conn).map_err(LedgerError::Db)?;
        self.has_child = true;
        Ok(())
    }

    fn commit_child(&mut self, entries: CommittedEntries, header: LedgerHeader) -> Result<()> {
        // Any committed write can invalidate a cached best-offer ordering.
        self.best_offers_cache.clear();

        let committed = self
            .store_entries(&entries)
            .and_then(|_| Database::commit(&self.conn).map_err(LedgerError::Db));
        if let Err(e) = committed {
            // Partially applied writes must not surface as cache hits.
            self.entry_cache.clear();
            return Err(e);
        }

        debug!(
            entries = entries.len(),
            ledger_seq = header.ledger_seq,
            "committed child scope to store"
        );
        self.header = header;
        self.has_child = false;
        Ok(())
    }

    fn rollback_child(&mut self) {
        if let Err(e) = Database::rollback(&self.conn) {
            error!(error = %e, "failed to roll back store transaction");
        }
        self.has_child = false;
    }
}

fn bounded(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size.max(1)).unwrap_or(NonZeroUsize::MIN)
}
