//! Guarded back-pointers.
//!
//! A [`GuardedHandle`] is a non-owning pointer to an [`Instance`] that
//! goes null the moment the instance is torn down, before any of the
//! instance's own destruction runs. Parent/child back-references use
//! these instead of a bare `Weak` so that teardown order never matters:
//! a child destroyed after its parent reads `None`, never a half-dead
//! target.
//!
//! The instance keeps a registry of the cells pointing at it and nulls
//! them as the first step of its `Drop`. Handles deregister themselves
//! when dropped first. Single logical thread throughout.

use crate::object::Instance;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

// =============================================================================
// Guard Cells
// =============================================================================

/// Shared cell between one handle and the instance registry.
pub(crate) struct GuardCell {
    target: RefCell<Option<Weak<Instance>>>,
}

impl GuardCell {
    pub(crate) fn new(target: Weak<Instance>) -> Rc<Self> {
        Rc::new(Self {
            target: RefCell::new(Some(target)),
        })
    }

    /// Null the cell; called by the target's `Drop` before anything else.
    pub(crate) fn invalidate(&self) {
        self.target.replace(None);
    }
}

// =============================================================================
// Guarded Handles
// =============================================================================

/// Non-owning handle to an instance, nulled automatically on its death.
pub struct GuardedHandle {
    cell: Rc<GuardCell>,
}

impl GuardedHandle {
    /// Point a new handle at `target`.
    pub fn new(target: &Rc<Instance>) -> Self {
        // The registry stores the cell; the target nulls it in its Drop.
        let cell = GuardCell::new(Rc::downgrade(target));
        target.register_guard(cell.clone());
        Self { cell }
    }

    /// An empty handle, equivalent to one whose target already died.
    pub fn null() -> Self {
        Self {
            cell: Rc::new(GuardCell {
                target: RefCell::new(None),
            }),
        }
    }

    /// Whether the target is still alive.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.cell.target.borrow().is_some()
    }

    /// Get an owning reference to the target, or `None` if it died.
    ///
    /// The target nulls this cell as the first action of its `Drop` and
    /// everything runs on one thread, so a non-null cell means the strong
    /// count is still positive and the upgrade succeeds.
    pub fn get(&self) -> Option<Rc<Instance>> {
        self.cell.target.borrow().as_ref()?.upgrade()
    }
}

impl Drop for GuardedHandle {
    fn drop(&mut self) {
        // Deregister from a still-living target so the registry does not
        // accumulate dead cells.
        if let Some(target) = self.get() {
            target.unregister_guard(&self.cell);
        }
    }
}

impl std::fmt::Debug for GuardedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedHandle")
            .field("live", &self.is_live())
            .finish()
    }
}
