//! Topic-keyed observer pool with reentrancy-safe mutation.
//!
//! A pool maps topic (member name) to a list of observer registrations.
//! Dispatch iterates a snapshot of the topic list, so a callback that
//! subscribes, unsubscribes, or clears the pool never perturbs the
//! dispatch it runs inside: those mutations are queued as commands and
//! applied in FIFO order when the outermost dispatch unwinds, error or
//! not. Mutations outside any dispatch apply immediately.
//!
//! Single logical thread; reentrancy comes from callbacks, not from
//! parallelism, so a depth counter is the whole synchronization story.

use crate::error::{LatticeError, LatticeResult};
use crate::observe::{ChangeMask, ChangeRecord, ObserverId, ObserverRef, SenderScope};
use lattice_core::InternedString;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

// =============================================================================
// Registrations
// =============================================================================

#[derive(Clone)]
struct PoolEntry {
    observer: ObserverRef,
    mask: ChangeMask,
}

/// A queued structural mutation, applied when the outermost dispatch
/// unwinds.
enum MutationCommand {
    Add {
        topic: InternedString,
        observer: ObserverRef,
        mask: ChangeMask,
    },
    Remove {
        topic: InternedString,
        id: ObserverId,
    },
    RemoveTopic {
        topic: InternedString,
    },
    Clear,
}

// =============================================================================
// Observer Pool
// =============================================================================

/// Per-instance dynamic observer registry.
pub struct ObserverPool {
    topics: RefCell<FxHashMap<InternedString, SmallVec<[PoolEntry; 2]>>>,

    /// Nesting depth of in-flight dispatches.
    depth: Cell<u32>,

    /// Mutations queued while `depth > 0`.
    pending: RefCell<VecDeque<MutationCommand>>,

    /// Released while dispatching; drained and ignored from then on.
    retired: Cell<bool>,
}

impl Default for ObserverPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverPool {
    pub fn new() -> Self {
        Self {
            topics: RefCell::new(FxHashMap::default()),
            depth: Cell::new(0),
            pending: RefCell::new(VecDeque::new()),
            retired: Cell::new(false),
        }
    }

    /// Whether a dispatch through this pool is in flight.
    #[inline]
    pub fn is_notifying(&self) -> bool {
        self.depth.get() > 0
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Subscribe an observer to a topic. Re-subscribing the same observer
    /// replaces its filter mask.
    pub fn observe(&self, topic: InternedString, observer: ObserverRef, mask: ChangeMask) {
        self.submit(MutationCommand::Add {
            topic,
            observer,
            mask,
        });
    }

    /// Unsubscribe one observer from a topic.
    pub fn unobserve(&self, topic: InternedString, id: ObserverId) {
        self.submit(MutationCommand::Remove { topic, id });
    }

    /// Drop every subscription on a topic.
    pub fn unobserve_topic(&self, topic: InternedString) {
        self.submit(MutationCommand::RemoveTopic { topic });
    }

    /// Drop every subscription in the pool.
    pub fn clear(&self) {
        self.submit(MutationCommand::Clear);
    }

    /// Mark the pool released. Its registrations are dropped; subsequent
    /// dispatches through it deliver nothing.
    pub(crate) fn retire(&self) {
        self.retired.set(true);
        self.submit(MutationCommand::Clear);
    }

    /// Cheap pre-check: is any live observer on `topic` interested in the
    /// given change kinds?
    pub fn has_observers(&self, topic: &InternedString, mask: ChangeMask) -> bool {
        if self.retired.get() {
            return false;
        }
        self.topics.borrow().get(topic).is_some_and(|entries| {
            entries
                .iter()
                .any(|e| e.mask.intersects(mask) && e.observer.is_live())
        })
    }

    /// Number of registrations on a topic (live or not).
    pub fn observer_count(&self, topic: &InternedString) -> usize {
        self.topics.borrow().get(topic).map_or(0, SmallVec::len)
    }

    /// Approximate heap footprint of the registration tables.
    pub fn storage_bytes(&self) -> usize {
        let topics = self.topics.borrow();
        let spilled: usize = topics
            .values()
            .filter(|entries| entries.spilled())
            .map(|entries| entries.capacity() * std::mem::size_of::<PoolEntry>())
            .sum();
        std::mem::size_of::<Self>()
            + topics.capacity()
                * std::mem::size_of::<(InternedString, SmallVec<[PoolEntry; 2]>)>()
            + spilled
    }

    fn submit(&self, command: MutationCommand) {
        if self.depth.get() > 0 {
            self.pending.borrow_mut().push_back(command);
        } else {
            let mut dropped = Vec::new();
            self.apply(command, &mut dropped);
            // Entries dropped here may run observer destructors that
            // reenter the pool, so the borrow is already released.
        }
    }

    /// Apply one command. Removed entries are pushed onto `dropped`
    /// instead of being dropped under the topics borrow.
    fn apply(&self, command: MutationCommand, dropped: &mut Vec<PoolEntry>) {
        let mut topics = self.topics.borrow_mut();
        match command {
            MutationCommand::Add {
                topic,
                observer,
                mask,
            } => {
                let entries = topics.entry(topic).or_default();
                let id = observer.id();
                if let Some(entry) = entries.iter_mut().find(|e| e.observer.id() == id) {
                    dropped.push(std::mem::replace(entry, PoolEntry { observer, mask }));
                } else {
                    entries.push(PoolEntry { observer, mask });
                }
            }
            MutationCommand::Remove { topic, id } => {
                if let Some(entries) = topics.get_mut(&topic) {
                    if let Some(pos) = entries.iter().position(|e| e.observer.id() == id) {
                        dropped.push(entries.remove(pos));
                    }
                    if entries.is_empty() {
                        topics.remove(&topic);
                    }
                }
            }
            MutationCommand::RemoveTopic { topic } => {
                if let Some(entries) = topics.remove(&topic) {
                    dropped.extend(entries);
                }
            }
            MutationCommand::Clear => {
                for (_, entries) in topics.drain() {
                    dropped.extend(entries);
                }
            }
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Deliver a change to every interested observer on its topic.
    ///
    /// Observers run in registration order against a snapshot of the
    /// topic list. A failing observer aborts the rest of the dispatch;
    /// queued mutations are still applied before the error is returned.
    pub fn notify(self: &Rc<Self>, change: &ChangeRecord) -> LatticeResult<()> {
        if self.retired.get() {
            return Ok(());
        }
        // Declaration order matters: the guard drains queued mutations
        // after the sender slot is restored.
        let _guard = ModifyGuard::enter(self);
        let _sender = SenderScope::enter(change.object.clone());

        let snapshot: SmallVec<[PoolEntry; 4]> = match self.topics.borrow().get(&change.name) {
            None => return Ok(()),
            Some(entries) => entries.iter().cloned().collect(),
        };

        let mask = change.kind.mask();
        for entry in &snapshot {
            if !entry.mask.intersects(mask) {
                continue;
            }
            match entry.observer.upgrade() {
                None => {
                    // Dead weak registration: compact it once the
                    // dispatch unwinds.
                    self.submit(MutationCommand::Remove {
                        topic: change.name.clone(),
                        id: entry.observer.id(),
                    });
                }
                Some(observer) => {
                    if let Err(err) = observer.on_change(change) {
                        return Err(LatticeError::Observer {
                            topic: change.name.clone(),
                            source: Box::new(err),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ObserverPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverPool")
            .field("topics", &self.topics.borrow().len())
            .field("depth", &self.depth.get())
            .field("retired", &self.retired.get())
            .finish()
    }
}

// =============================================================================
// Modify Guard
// =============================================================================

/// Depth tracker for dispatches. On the outermost drop, applies queued
/// mutations in FIFO order. Runs during unwinding too, so an observer
/// error cannot leave the queue stuck.
struct ModifyGuard {
    pool: Rc<ObserverPool>,
}

impl ModifyGuard {
    fn enter(pool: &Rc<ObserverPool>) -> Self {
        pool.depth.set(pool.depth.get() + 1);
        Self { pool: pool.clone() }
    }
}

impl Drop for ModifyGuard {
    fn drop(&mut self) {
        let depth = self.pool.depth.get() - 1;
        self.pool.depth.set(depth);
        if depth > 0 {
            return;
        }
        // Removed entries collect here and drop after each borrow is
        // released: an observer destructor may reenter the pool.
        let mut dropped = Vec::new();
        loop {
            let command = self.pool.pending.borrow_mut().pop_front();
            match command {
                None => break,
                Some(command) => self.pool.apply(command, &mut dropped),
            }
        }
        drop(dropped);
    }
}

// =============================================================================
// Tests
// =============================================================================
