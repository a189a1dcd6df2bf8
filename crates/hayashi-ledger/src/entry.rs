//! Entry handles: scoped borrows of single entries in a ledger scope.
//!
//! A handle registers its key in the scope's active-handle table on
//! creation and removes it on drop, so the scope can refuse `load`,
//! `create` and `erase` on keys that are still borrowed. The entry data
//! itself is shared with the scope's working set, which is how mutations
//! through a [`LedgerStateEntry`] become part of what the scope commits.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeSet;
use std::rc::Rc;

use stellar_xdr::curr::{LedgerEntry, LedgerKey};

/// The active-handle registry, shared between a scope and its handles.
pub(crate) type ActiveKeys = Rc<RefCell<BTreeSet<LedgerKey>>>;

/// Mutable handle over one entry of a ledger scope.
///
/// Obtained from `create` or `load`. Edits through [`current_mut`] land in
/// the scope's working set and are committed with the scope.
///
/// [`current_mut`]: LedgerStateEntry::current_mut
pub struct LedgerStateEntry {
    key: LedgerKey,
    current: Rc<RefCell<LedgerEntry>>,
    active: ActiveKeys,
}

impl LedgerStateEntry {
    pub(crate) fn new(
        key: LedgerKey,
        current: Rc<RefCell<LedgerEntry>>,
        active: ActiveKeys,
    ) -> Self {
        Self {
            key,
            current,
            active,
        }
    }

    /// The key this handle borrows.
    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    /// Read the current entry state.
    pub fn current(&self) -> Ref<'_, LedgerEntry> {
        self.current.borrow()
    }

    /// Mutate the current entry state.
    pub fn current_mut(&self) -> RefMut<'_, LedgerEntry> {
        self.current.borrow_mut()
    }

    /// Release the handle, unpinning its key.
    pub fn deactivate(self) {}
}

impl Drop for LedgerStateEntry {
    fn drop(&mut self) {
        self.active.borrow_mut().remove(&self.key);
    }
}

/// Read-only handle over the newest visible version of an entry.
///
/// Obtained from `load_without_record`. Holds a snapshot: the entry was
/// *not* copied into the scope's working set, so the scope will not commit
/// anything on its behalf. Shares the active-handle registry with mutable
/// handles, making the two mutually exclusive per key.
pub struct ConstLedgerStateEntry {
    key: LedgerKey,
    current: LedgerEntry,
    active: ActiveKeys,
}

impl ConstLedgerStateEntry {
    pub(crate) fn new(key: LedgerKey, current: LedgerEntry, active: ActiveKeys) -> Self {
        Self {
            key,
            current,
            active,
        }
    }

    /// The key this handle borrows.
    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    /// Read the entry snapshot.
    pub fn current(&self) -> &LedgerEntry {
        &self.current
    }

    /// Release the handle, unpinning its key.
    pub fn deactivate(self) {}
}

impl Drop for ConstLedgerStateEntry {
    fn drop(&mut self) {
        self.active.borrow_mut().remove(&self.key);
    }
}
