//! Nested, committable views over the ledger state.
//!
//! A [`LedgerState`] is one scope in an arbitrarily deep copy-on-write
//! stack whose bottom is the persistent [`LedgerStateRoot`]. Each scope
//! holds a private working set of created, modified and erased entries plus
//! its own copy of the ledger header. Reads fall through to the parent;
//! writes stay local until `commit` merges them one level rootward.
//!
//! The parent link is an exclusive borrow: while a child scope exists its
//! parent cannot be touched, which is exactly the discipline the stack
//! requires (one child at a time, parent frozen until the child commits or
//! rolls back). Dropping a scope without committing rolls it back.
//!
//! [`LedgerStateRoot`]: crate::LedgerStateRoot

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use hayashi_db::queries::accounts::MIN_INFLATION_VOTE_BALANCE;
use stellar_xdr::curr::{
    AccountId, Asset, LedgerEntry, LedgerEntryChange, LedgerEntryChanges, LedgerEntryData,
    LedgerHeader, LedgerKey, LedgerKeyAccount, LedgerKeyData, LedgerKeyOffer, LedgerKeyTrustLine,
    PublicKey,
};

use crate::compare::is_better_offer;
use crate::entry::{ActiveKeys, ConstLedgerStateEntry, LedgerStateEntry};
use crate::header::LedgerStateHeader;
use crate::{LedgerError, Result};

/// One account ranked by aggregate inflation votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflationWinner {
    /// The destination account.
    pub account_id: AccountId,
    /// Aggregate votes for it.
    pub votes: i64,
}

/// Old and new version of one entry, as seen by a sealed scope.
#[derive(Debug, Clone)]
pub struct EntryDelta {
    /// The scope's version; `None` when the scope erased the entry.
    pub current: Option<LedgerEntry>,
    /// The parent's version; `None` when the scope created the entry.
    pub previous: Option<LedgerEntry>,
}

/// Header transition of a sealed scope.
#[derive(Debug, Clone)]
pub struct HeaderDelta {
    /// The scope's header.
    pub current: LedgerHeader,
    /// The parent's header.
    pub previous: LedgerHeader,
}

/// Everything a sealed scope would commit, keyed by entry.
#[derive(Debug, Clone)]
pub struct LedgerStateDelta {
    /// Per-entry transitions.
    pub entries: BTreeMap<LedgerKey, EntryDelta>,
    /// Header transition.
    pub header: HeaderDelta,
}

/// A scope's working set as handed to its parent on commit.
///
/// `None` is the tombstone: the key was erased in the committing scope.
pub type CommittedEntries = BTreeMap<LedgerKey, Option<LedgerEntry>>;

/// The surface a scope requires of whatever it stacks on: another scope or
/// the persistent root.
pub trait LedgerStateParent {
    /// Newest visible version of `key`, or `None` if the key does not exist.
    fn newest_version(&mut self, key: &LedgerKey) -> Result<Option<LedgerEntry>>;

    /// Snapshot of the current ledger header.
    fn header(&self) -> LedgerHeader;

    /// All live offers, keyed by ledger key.
    fn all_offers(&mut self) -> Result<BTreeMap<LedgerKey, LedgerEntry>>;

    /// Best offer for the asset pair not in `exclude`.
    ///
    /// `exclude` travels rootward by value: each level adds the offer keys
    /// it has already accounted for, so an offer shadowed or erased in a
    /// child can never resurface from deeper levels.
    fn best_offer(
        &mut self,
        buying: &Asset,
        selling: &Asset,
        exclude: BTreeSet<LedgerKey>,
    ) -> Result<Option<LedgerEntry>>;

    /// Offers where `account` sells and either side is `asset`.
    fn offers_by_account_and_asset(
        &mut self,
        account: &AccountId,
        asset: &Asset,
    ) -> Result<BTreeMap<LedgerKey, LedgerEntry>>;

    /// Accounts ranked by aggregate inflation votes.
    fn inflation_winners(
        &mut self,
        max_winners: usize,
        min_votes: i64,
    ) -> Result<Vec<InflationWinner>>;

    /// Attach a child scope. At most one child may exist at a time.
    fn add_child(&mut self) -> Result<()>;

    /// Merge a committing child's working set and adopt its header.
    fn commit_child(&mut self, entries: CommittedEntries, header: LedgerHeader) -> Result<()>;

    /// Detach a child that rolled back, discarding its work.
    fn rollback_child(&mut self);
}

/// Derive the ledger key identifying an entry.
pub fn ledger_entry_key(entry: &LedgerEntry) -> Result<LedgerKey> {
    match &entry.data {
        LedgerEntryData::Account(account) => Ok(LedgerKey::Account(LedgerKeyAccount {
            account_id: account.account_id.clone(),
        })),
        LedgerEntryData::Trustline(trustline) => Ok(LedgerKey::Trustline(LedgerKeyTrustLine {
            account_id: trustline.account_id.clone(),
            asset: trustline.asset.clone(),
        })),
        LedgerEntryData::Offer(offer) => Ok(LedgerKey::Offer(LedgerKeyOffer {
            seller_id: offer.seller_id.clone(),
            offer_id: offer.offer_id,
        })),
        LedgerEntryData::Data(data) => Ok(LedgerKey::Data(LedgerKeyData {
            account_id: data.account_id.clone(),
            data_name: data.data_name.clone(),
        })),
        _ => Err(LedgerError::UnknownKeyType),
    }
}

/// One nested ledger scope.
pub struct LedgerState<'a> {
    parent: &'a mut dyn LedgerStateParent,
    header: Rc<RefCell<LedgerHeader>>,
    /// Working set; `None` values are tombstones.
    entries: BTreeMap<LedgerKey, Option<Rc<RefCell<LedgerEntry>>>>,
    /// Keys pinned by live handles; shared with the handles themselves.
    active: ActiveKeys,
    header_active: Rc<Cell<bool>>,
    has_child: bool,
    should_update_last_modified: bool,
    sealed: bool,
    finalized: bool,
}

impl<'a> LedgerState<'a> {
    /// Open a scope over `parent`.
    ///
    /// With `should_update_last_modified`, sealing stamps every live entry
    /// of the working set with the scope's header sequence number.
    pub fn new(parent: &'a mut dyn LedgerStateParent, should_update_last_modified: bool) -> Result<Self> {
        parent.add_child()?;
        let header = parent.header();
        Ok(Self {
            parent,
            header: Rc::new(RefCell::new(header)),
            entries: BTreeMap::new(),
            active: Rc::new(RefCell::new(BTreeSet::new())),
            header_active: Rc::new(Cell::new(false)),
            has_child: false,
            should_update_last_modified,
            sealed: false,
            finalized: false,
        })
    }

    fn check_not_sealed(&self) -> Result<()> {
        if self.sealed {
            return Err(LedgerError::Sealed);
        }
        Ok(())
    }

    fn check_no_child(&self) -> Result<()> {
        if self.has_child {
            return Err(LedgerError::HasChild);
        }
        Ok(())
    }

    fn check_not_active(&self, key: &LedgerKey) -> Result<()> {
        if self.active.borrow().contains(key) {
            return Err(LedgerError::KeyActive);
        }
        Ok(())
    }

    // --- Entry operations --------------------------------------------------

    /// Create a fresh entry and return a mutable handle to it.
    ///
    /// The key must not have a visible newest version.
    pub fn create(&mut self, entry: LedgerEntry) -> Result<LedgerStateEntry> {
        self.check_not_sealed()?;
        self.check_no_child()?;

        let key = ledger_entry_key(&entry)?;
        self.check_not_active(&key)?;
        if self.newest_version(&key)?.is_some() {
            return Err(LedgerError::KeyExists);
        }

        let current = Rc::new(RefCell::new(entry));
        self.entries.insert(key.clone(), Some(Rc::clone(&current)));
        self.active.borrow_mut().insert(key.clone());
        Ok(LedgerStateEntry::new(key, current, Rc::clone(&self.active)))
    }

    /// Load the newest version of `key` for mutation.
    ///
    /// Copies the entry into this scope's working set so later edits stay
    /// local, and returns a handle over the copy. `Ok(None)` means the key
    /// has no visible version.
    pub fn load(&mut self, key: &LedgerKey) -> Result<Option<LedgerStateEntry>> {
        self.check_not_sealed()?;
        self.check_no_child()?;
        self.check_not_active(key)?;

        let Some(newest) = self.newest_version(key)? else {
            return Ok(None);
        };

        let current = Rc::new(RefCell::new(newest));
        self.entries.insert(key.clone(), Some(Rc::clone(&current)));
        self.active.borrow_mut().insert(key.clone());
        Ok(Some(LedgerStateEntry::new(
            key.clone(),
            current,
            Rc::clone(&self.active),
        )))
    }

    /// Load the newest version of `key` read-only.
    ///
    /// Unlike [`load`], the entry is not copied into the working set; the
    /// scope commits nothing for it. Shares the per-key handle exclusivity
    /// with [`load`].
    ///
    /// [`load`]: LedgerState::load
    pub fn load_without_record(&mut self, key: &LedgerKey) -> Result<Option<ConstLedgerStateEntry>> {
        self.check_not_sealed()?;
        self.check_no_child()?;
        self.check_not_active(key)?;

        let Some(newest) = self.newest_version(key)? else {
            return Ok(None);
        };

        self.active.borrow_mut().insert(key.clone());
        Ok(Some(ConstLedgerStateEntry::new(
            key.clone(),
            newest,
            Rc::clone(&self.active),
        )))
    }

    /// Erase `key` in this scope.
    ///
    /// A key created in this very scope disappears without trace; a key
    /// that exists above leaves a tombstone that commits as a delete.
    pub fn erase(&mut self, key: &LedgerKey) -> Result<()> {
        self.check_not_sealed()?;
        self.check_no_child()?;
        self.check_not_active(key)?;

        if self.newest_version(key)?.is_none() {
            return Err(LedgerError::KeyNotFound);
        }

        if self.parent.newest_version(key)?.is_none() {
            // Created in this scope: no level above ever saw it.
            self.entries.remove(key);
        } else {
            self.entries.insert(key.clone(), None);
        }
        Ok(())
    }

    /// Borrow the scope's header for mutation.
    pub fn load_header(&mut self) -> Result<LedgerStateHeader> {
        self.check_not_sealed()?;
        self.check_no_child()?;
        if self.header_active.get() {
            return Err(LedgerError::HeaderActive);
        }

        self.header_active.set(true);
        Ok(LedgerStateHeader::new(
            Rc::clone(&self.header),
            Rc::clone(&self.header_active),
        ))
    }

    /// Mutate the header of a scope that has already been sealed.
    ///
    /// This is the one mutation sealing permits; it exists so a caller can
    /// stamp header fields that are only known after the scope's output has
    /// been materialized.
    pub fn unseal_header<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut LedgerHeader),
    {
        if !self.sealed {
            return Err(LedgerError::NotSealed);
        }
        if self.header_active.get() {
            return Err(LedgerError::HeaderActive);
        }
        f(&mut self.header.borrow_mut());
        Ok(())
    }

    // --- Commit and rollback -----------------------------------------------

    /// Seal the scope and merge its working set into the parent.
    ///
    /// On a parent failure the scope rolls back before returning the error;
    /// either way the scope is consumed.
    pub fn commit(mut self) -> Result<()> {
        self.seal_and_maybe_update_last_modified()?;

        let entries: CommittedEntries = std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(key, value)| (key, value.map(|rc| rc.borrow().clone())))
            .collect();
        let header = self.header.borrow().clone();

        self.finalized = true;
        match self.parent.commit_child(entries, header) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.parent.rollback_child();
                Err(e)
            }
        }
    }

    /// Discard the scope's work.
    pub fn rollback(mut self) {
        self.rollback_in_place();
    }

    fn rollback_in_place(&mut self) {
        self.active.borrow_mut().clear();
        self.header_active.set(false);
        self.parent.rollback_child();
        self.finalized = true;
    }

    fn seal_and_maybe_update_last_modified(&mut self) -> Result<()> {
        self.check_no_child()?;
        if self.sealed {
            return Ok(());
        }
        self.sealed = true;
        self.active.borrow_mut().clear();
        self.header_active.set(false);

        if self.should_update_last_modified {
            let ledger_seq = self.header.borrow().ledger_seq;
            for value in self.entries.values() {
                if let Some(rc) = value {
                    rc.borrow_mut().last_modified_ledger_seq = ledger_seq;
                }
            }
        }
        Ok(())
    }

    // --- Materialized outputs (these seal the scope) -----------------------

    /// The scope's changes as ledger-entry-change records.
    ///
    /// Pre-existing keys emit STATE followed by UPDATED or REMOVED; keys
    /// created here emit CREATED.
    pub fn get_changes(&mut self) -> Result<LedgerEntryChanges> {
        self.seal_and_maybe_update_last_modified()?;

        let mut changes = Vec::new();
        for (key, value) in &self.entries {
            let previous = self.parent.newest_version(key)?;
            match (previous, value) {
                (Some(previous), Some(current)) => {
                    changes.push(LedgerEntryChange::State(previous));
                    changes.push(LedgerEntryChange::Updated(current.borrow().clone()));
                }
                (Some(previous), None) => {
                    changes.push(LedgerEntryChange::State(previous));
                    changes.push(LedgerEntryChange::Removed(key.clone()));
                }
                (None, Some(current)) => {
                    changes.push(LedgerEntryChange::Created(current.borrow().clone()));
                }
                // A key created and erased in this scope never stays in the
                // working set, so this pairing cannot be observed.
                (None, None) => return Err(LedgerError::KeyNotFound),
            }
        }
        Ok(changes.try_into()?)
    }

    /// The scope's changes as old/new pairs plus the header transition.
    pub fn get_delta(&mut self) -> Result<LedgerStateDelta> {
        self.seal_and_maybe_update_last_modified()?;

        let mut entries = BTreeMap::new();
        for (key, value) in &self.entries {
            let previous = self.parent.newest_version(key)?;
            entries.insert(
                key.clone(),
                EntryDelta {
                    current: value.as_ref().map(|rc| rc.borrow().clone()),
                    previous,
                },
            );
        }
        Ok(LedgerStateDelta {
            entries,
            header: HeaderDelta {
                current: self.header.borrow().clone(),
                previous: self.parent.header(),
            },
        })
    }

    /// Live entries of the working set.
    pub fn get_live_entries(&mut self) -> Result<Vec<LedgerEntry>> {
        self.seal_and_maybe_update_last_modified()?;
        Ok(self
            .entries
            .values()
            .filter_map(|value| value.as_ref().map(|rc| rc.borrow().clone()))
            .collect())
    }

    /// Keys erased by this scope.
    pub fn get_dead_entries(&mut self) -> Result<Vec<LedgerKey>> {
        self.seal_and_maybe_update_last_modified()?;
        Ok(self
            .entries
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key.clone())
            .collect())
    }

    // --- Handle-loading conveniences ---------------------------------------

    /// Load every live offer, grouped by seller.
    pub fn load_all_offers(&mut self) -> Result<BTreeMap<AccountId, Vec<LedgerStateEntry>>> {
        self.check_not_sealed()?;
        self.check_no_child()?;

        let offers = self.all_offers()?;
        let mut by_account: BTreeMap<AccountId, Vec<LedgerStateEntry>> = BTreeMap::new();
        for key in offers.into_keys() {
            let LedgerKey::Offer(ref offer_key) = key else {
                continue;
            };
            let seller = offer_key.seller_id.clone();
            if let Some(handle) = self.load(&key)? {
                by_account.entry(seller).or_default().push(handle);
            }
        }
        Ok(by_account)
    }

    /// Load the best offer for an asset pair, if any.
    pub fn load_best_offer(
        &mut self,
        buying: &Asset,
        selling: &Asset,
    ) -> Result<Option<LedgerStateEntry>> {
        self.check_not_sealed()?;
        self.check_no_child()?;

        match self.best_offer(buying, selling, BTreeSet::new())? {
            Some(entry) => self.load(&ledger_entry_key(&entry)?),
            None => Ok(None),
        }
    }

    /// Load the offers where `account` sells and either side is `asset`.
    pub fn load_offers_by_account_and_asset(
        &mut self,
        account: &AccountId,
        asset: &Asset,
    ) -> Result<Vec<LedgerStateEntry>> {
        self.check_not_sealed()?;
        self.check_no_child()?;

        let offers = self.offers_by_account_and_asset(account, asset)?;
        let mut handles = Vec::new();
        for key in offers.into_keys() {
            if let Some(handle) = self.load(&key)? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }
}

impl LedgerStateParent for LedgerState<'_> {
    fn newest_version(&mut self, key: &LedgerKey) -> Result<Option<LedgerEntry>> {
        if let Some(value) = self.entries.get(key) {
            return Ok(value.as_ref().map(|rc| rc.borrow().clone()));
        }
        self.parent.newest_version(key)
    }

    fn header(&self) -> LedgerHeader {
        self.header.borrow().clone()
    }

    fn all_offers(&mut self) -> Result<BTreeMap<LedgerKey, LedgerEntry>> {
        let mut offers = self.parent.all_offers()?;
        for (key, value) in &self.entries {
            let Some(rc) = value else {
                offers.remove(key);
                continue;
            };
            if !matches!(key, LedgerKey::Offer(_)) {
                continue;
            }
            offers.insert(key.clone(), rc.borrow().clone());
        }
        Ok(offers)
    }

    fn best_offer(
        &mut self,
        buying: &Asset,
        selling: &Asset,
        mut exclude: BTreeSet<LedgerKey>,
    ) -> Result<Option<LedgerEntry>> {
        let mut best: Option<LedgerEntry> = None;
        for (key, value) in &self.entries {
            if !matches!(key, LedgerKey::Offer(_)) {
                continue;
            }
            // Every offer key this scope touched goes into the exclusion
            // set, so the parent cannot resurface a shadowed version.
            if !exclude.insert(key.clone()) {
                continue;
            }
            let Some(rc) = value else {
                continue;
            };
            let entry = rc.borrow();
            let LedgerEntryData::Offer(offer) = &entry.data else {
                continue;
            };
            if &offer.buying != buying || &offer.selling != selling {
                continue;
            }

            let is_better = match &best {
                None => true,
                Some(best_entry) => {
                    let LedgerEntryData::Offer(best_offer) = &best_entry.data else {
                        return Err(LedgerError::UnknownKeyType);
                    };
                    is_better_offer(offer, best_offer)
                }
            };
            if is_better {
                best = Some((*entry).clone());
            }
        }

        let parent_best = self.parent.best_offer(buying, selling, exclude)?;
        match (best, parent_best) {
            (Some(local), Some(upstream)) => {
                let local_wins = {
                    let (LedgerEntryData::Offer(l), LedgerEntryData::Offer(u)) =
                        (&local.data, &upstream.data)
                    else {
                        return Err(LedgerError::UnknownKeyType);
                    };
                    is_better_offer(l, u)
                };
                Ok(Some(if local_wins { local } else { upstream }))
            }
            (Some(local), None) => Ok(Some(local)),
            (None, upstream) => Ok(upstream),
        }
    }

    fn offers_by_account_and_asset(
        &mut self,
        account: &AccountId,
        asset: &Asset,
    ) -> Result<BTreeMap<LedgerKey, LedgerEntry>> {
        let mut offers = self.parent.offers_by_account_and_asset(account, asset)?;
        for (key, value) in &self.entries {
            if !matches!(key, LedgerKey::Offer(_)) {
                continue;
            }
            let Some(rc) = value else {
                offers.remove(key);
                continue;
            };
            let entry = rc.borrow();
            let LedgerEntryData::Offer(offer) = &entry.data else {
                continue;
            };
            if &offer.seller_id == account
                && (&offer.selling == asset || &offer.buying == asset)
            {
                offers.insert(key.clone(), (*entry).clone());
            }
        }
        Ok(offers)
    }

    fn inflation_winners(
        &mut self,
        max_winners: usize,
        min_votes: i64,
    ) -> Result<Vec<InflationWinner>> {
        // Vote deltas this scope introduces relative to its parent: the new
        // state of each changed account contributes positively, the old
        // state negatively.
        let mut delta_votes: BTreeMap<AccountId, i64> = BTreeMap::new();
        for (key, value) in &self.entries {
            if !matches!(key, LedgerKey::Account(_)) {
                continue;
            }
            if let Some(rc) = value {
                let entry = rc.borrow();
                if let LedgerEntryData::Account(account) = &entry.data {
                    if let Some(dest) = &account.inflation_dest {
                        if account.balance >= MIN_INFLATION_VOTE_BALANCE {
                            *delta_votes.entry(dest.clone()).or_insert(0) += account.balance;
                        }
                    }
                }
            }
            if let Some(previous) = self.parent.newest_version(key)? {
                if let LedgerEntryData::Account(account) = &previous.data {
                    if let Some(dest) = &account.inflation_dest {
                        if account.balance >= MIN_INFLATION_VOTE_BALANCE {
                            *delta_votes.entry(dest.clone()).or_insert(0) -= account.balance;
                        }
                    }
                }
            }
        }

        // The parent must return enough extra winners to cover every
        // destination whose total this scope changed, at a threshold low
        // enough that a vote increase here cannot hide a parent candidate.
        let num_changed = delta_votes.values().filter(|votes| **votes != 0).count();
        let max_increase = delta_votes.values().copied().max().unwrap_or(0).max(0);
        let parent_winners = self
            .parent
            .inflation_winners(max_winners + num_changed, (min_votes - max_increase).max(0))?;

        let mut total_votes: BTreeMap<AccountId, i64> = BTreeMap::new();
        for winner in parent_winners {
            total_votes.insert(winner.account_id, winner.votes);
        }
        for (account_id, delta) in delta_votes {
            if total_votes.contains_key(&account_id) || delta >= min_votes {
                *total_votes.entry(account_id).or_insert(0) += delta;
            }
        }

        let mut winners: Vec<InflationWinner> = total_votes
            .into_iter()
            .filter(|(_, votes)| *votes >= min_votes)
            .map(|(account_id, votes)| InflationWinner { account_id, votes })
            .collect();
        winners.sort_by(|lhs, rhs| {
            rhs.votes.cmp(&lhs.votes).then_with(|| {
                account_strkey(&rhs.account_id).cmp(&account_strkey(&lhs.account_id))
            })
        });
        winners.truncate(max_winners);
        Ok(winners)
    }

    fn add_child(&mut self) -> Result<()> {
        self.check_not_sealed()?;
        self.check_no_child()?;
        self.active.borrow_mut().clear();
        self.header_active.set(false);
        self.has_child = true;
        Ok(())
    }

    fn commit_child(&mut self, entries: CommittedEntries, header: LedgerHeader) -> Result<()> {
        for (key, value) in entries {
            match value {
                Some(entry) => {
                    self.entries.insert(key, Some(Rc::new(RefCell::new(entry))));
                }
                None => {
                    if self.parent.newest_version(&key)?.is_none() {
                        // The entry was born below this scope's parent; its
                        // erasure leaves nothing behind.
                        self.entries.remove(&key);
                    } else {
                        self.entries.insert(key, None);
                    }
                }
            }
        }
        *self.header.borrow_mut() = header;
        self.has_child = false;
        Ok(())
    }

    fn rollback_child(&mut self) {
        self.has_child = false;
    }
}

impl Drop for LedgerState<'_> {
    fn drop(&mut self) {
        if !self.finalized {
            self.rollback_in_place();
        }
    }
}

/// StrKey text form of an account id; the inflation tie-break orders on it.
fn account_strkey(account_id: &AccountId) -> String {
    match &account_id.0 {
        PublicKey::PublicKeyTypeEd25519(key) => {
            stellar_strkey::ed25519::PublicKey(key.0).to_string()
        }
    }
}
