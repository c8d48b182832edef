//! Pool manager: integer handles over observer pools.
//!
//! Instances hold a [`PoolId`] instead of an `Rc<ObserverPool>`, keeping
//! the per-instance footprint at one word until someone actually
//! subscribes. Released ids go on a free list and are recycled.
//!
//! Releasing a pool that is mid-dispatch (an observer tears down its own
//! sender) retires the pool in place and defers the slot reclamation
//! until its dispatches unwind; the handle stays valid but inert in the
//! meantime.

use crate::error::LatticeResult;
use crate::observe::pool::ObserverPool;
use crate::observe::{ChangeMask, ChangeRecord, ObserverId, ObserverRef};
use lattice_core::InternedString;
use std::cell::RefCell;
use std::rc::Rc;

// =============================================================================
// Pool Handles
// =============================================================================

/// Handle to a pool owned by a [`PoolManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolId(u32);

impl PoolId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Pool Manager
// =============================================================================

/// Owner of every dynamic observer pool on this thread.
pub struct PoolManager {
    pools: RefCell<Vec<Option<Rc<ObserverPool>>>>,
    free: RefCell<Vec<u32>>,

    /// Ids released mid-dispatch, reclaimed once their pools go idle.
    deferred: RefCell<Vec<PoolId>>,
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolManager {
    pub fn new() -> Self {
        Self {
            pools: RefCell::new(Vec::new()),
            free: RefCell::new(Vec::new()),
            deferred: RefCell::new(Vec::new()),
        }
    }

    /// Allocate a fresh pool, recycling a released slot when one exists.
    pub fn acquire(&self) -> PoolId {
        let pool = Rc::new(ObserverPool::new());
        if let Some(index) = self.free.borrow_mut().pop() {
            self.pools.borrow_mut()[index as usize] = Some(pool);
            return PoolId(index);
        }
        let mut pools = self.pools.borrow_mut();
        pools.push(Some(pool));
        PoolId((pools.len() - 1) as u32)
    }

    /// Release a pool. Mid-dispatch the pool is retired in place and its
    /// slot reclaimed after its dispatches unwind.
    pub fn release(&self, id: PoolId) {
        let pool = match self.get(id) {
            Some(pool) => pool,
            None => return,
        };
        if pool.is_notifying() {
            pool.retire();
            self.deferred.borrow_mut().push(id);
        } else {
            self.reclaim(id);
        }
    }

    /// Number of live pools.
    pub fn live_pools(&self) -> usize {
        self.pools.borrow().iter().filter(|p| p.is_some()).count()
    }

    fn get(&self, id: PoolId) -> Option<Rc<ObserverPool>> {
        self.pools.borrow().get(id.index()).and_then(Clone::clone)
    }

    fn reclaim(&self, id: PoolId) {
        // The pool drops outside the borrow; registration destructors may
        // reenter the manager.
        let pool = self.pools.borrow_mut()[id.index()].take();
        if pool.is_some() {
            self.free.borrow_mut().push(id.0);
        }
        drop(pool);
    }

    /// Reclaim slots whose deferred release has become actionable.
    fn sweep_deferred(&self) {
        if self.deferred.borrow().is_empty() {
            return;
        }
        let pending = std::mem::take(&mut *self.deferred.borrow_mut());
        for id in pending {
            match self.get(id) {
                Some(pool) if pool.is_notifying() => self.deferred.borrow_mut().push(id),
                Some(_) => self.reclaim(id),
                None => {}
            }
        }
    }

    // =========================================================================
    // Forwarded Pool Operations
    // =========================================================================

    /// Subscribe an observer to a topic on a pool.
    pub fn observe(
        &self,
        id: PoolId,
        topic: InternedString,
        observer: ObserverRef,
        mask: ChangeMask,
    ) {
        if let Some(pool) = self.get(id) {
            pool.observe(topic, observer, mask);
        }
    }

    /// Unsubscribe one observer from a topic.
    pub fn unobserve(&self, id: PoolId, topic: InternedString, observer: ObserverId) {
        if let Some(pool) = self.get(id) {
            pool.unobserve(topic, observer);
        }
    }

    /// Drop every subscription on a topic.
    pub fn unobserve_topic(&self, id: PoolId, topic: InternedString) {
        if let Some(pool) = self.get(id) {
            pool.unobserve_topic(topic);
        }
    }

    /// Cheap pre-check used to skip record construction entirely.
    pub fn has_observers(&self, id: PoolId, topic: &InternedString, mask: ChangeMask) -> bool {
        self.get(id)
            .is_some_and(|pool| pool.has_observers(topic, mask))
    }

    /// Approximate heap footprint of a pool's registration tables.
    pub fn storage_bytes(&self, id: PoolId) -> usize {
        self.get(id).map_or(0, |pool| pool.storage_bytes())
    }

    /// Dispatch a change through a pool, then sweep any deferred
    /// releases that its unwinding made actionable.
    pub fn notify(&self, id: PoolId, change: &ChangeRecord) -> LatticeResult<()> {
        let pool = match self.get(id) {
            Some(pool) => pool,
            None => return Ok(()),
        };
        let result = pool.notify(change);
        if !pool.is_notifying() {
            self.sweep_deferred();
        }
        result
    }
}

// =============================================================================
// Thread-Local Default Manager
// =============================================================================

thread_local! {
    static POOLS: PoolManager = PoolManager::new();
}

/// Run a closure against this thread's pool manager.
pub fn with_pools<R>(f: impl FnOnce(&PoolManager) -> R) -> R {
    POOLS.with(f)
}

/// Like [`with_pools`], but a no-op when the thread-local storage is
/// already torn down. Used from `Drop` impls that may run at thread exit.
pub(crate) fn try_with_pools(f: impl FnOnce(&PoolManager)) {
    let _ = POOLS.try_with(f);
}

// =============================================================================
// Tests
// =============================================================================
