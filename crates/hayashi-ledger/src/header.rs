//! Header handle: a scoped borrow of a scope's ledger header.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use stellar_xdr::curr::LedgerHeader;

/// Mutable handle over a scope's ledger header.
///
/// At most one header handle is alive per scope; `load_header` refuses to
/// hand out a second one. Dropping the handle releases the header.
pub struct LedgerStateHeader {
    header: Rc<RefCell<LedgerHeader>>,
    active: Rc<Cell<bool>>,
}

impl LedgerStateHeader {
    pub(crate) fn new(header: Rc<RefCell<LedgerHeader>>, active: Rc<Cell<bool>>) -> Self {
        Self { header, active }
    }

    /// Read the header.
    pub fn current(&self) -> Ref<'_, LedgerHeader> {
        self.header.borrow()
    }

    /// Mutate the header.
    pub fn current_mut(&self) -> RefMut<'_, LedgerHeader> {
        self.header.borrow_mut()
    }

    /// Release the handle.
    pub fn deactivate(self) {}
}

impl Drop for LedgerStateHeader {
    fn drop(&mut self) {
        self.active.set(false);
    }
}
