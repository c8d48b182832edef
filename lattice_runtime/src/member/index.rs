//! Build-once name-to-slot index.
//!
//! Maps an attribute name to its `(Member, slot)` pair with open
//! addressing. The table is sized for the exact key set when a class
//! layout is finalized and is never mutated afterwards, which is what
//! makes deletion-free open addressing valid here: there are no
//! tombstones to skip and the probe loop needs no full-table scan guard.
//!
//! # Probe sequence
//!
//! `bucket = hash & mask`, then on collision
//! `bucket = (bucket * 5 + hash + 1) & mask; hash >>= 5`.
//! The perturbation folds the upper hash bits into the early probes; once
//! the perturbation is exhausted the recurrence `b -> 5b + 1 (mod 2^k)`
//! visits every bucket, so termination needs only one empty bucket, which
//! the ≤0.75 load factor guarantees.

use crate::error::DeclarationError;
use crate::member::Member;
use lattice_core::InternedString;
use rustc_hash::FxHashSet;
use std::rc::Rc;

// =============================================================================
// Index Entry
// =============================================================================

/// One occupied bucket.
struct IndexEntry {
    name: InternedString,
    member: Rc<Member>,
    slot: u32,
}

// =============================================================================
// Member Index
// =============================================================================

/// Immutable open-addressed table from member name to `(Member, slot)`.
pub struct MemberIndex {
    /// Power-of-two bucket array, allocated exactly once.
    buckets: Box<[Option<IndexEntry>]>,

    /// Bucket mask (`capacity - 1`).
    mask: u64,

    /// Slot-ordered view of the entries, for iteration.
    order: Box<[(InternedString, Rc<Member>)]>,
}

impl MemberIndex {
    /// Build an index from an ordered member list.
    ///
    /// Slots are assigned in input order (`0, 1, 2, ...`), giving the
    /// contiguous-slot invariant by construction. Each member is linked to
    /// its name and slot; a member already linked elsewhere, a member
    /// appearing twice, or a duplicate name is a `DeclarationError`. A
    /// failed build links nothing, so its members stay usable elsewhere.
    pub fn build(
        class: &str,
        entries: Vec<(InternedString, Rc<Member>)>,
    ) -> Result<Self, DeclarationError> {
        let count = entries.len();
        let capacity = Self::capacity_for(count);
        let mut buckets: Vec<Option<IndexEntry>> = Vec::with_capacity(capacity);
        buckets.resize_with(capacity, || None);
        let mask = (capacity - 1) as u64;

        // Place every name before linking any member.
        for (slot, (name, member)) in entries.iter().enumerate() {
            let mut hash = name.cached_hash();
            let mut bucket = (hash & mask) as usize;
            loop {
                match &buckets[bucket] {
                    None => break,
                    Some(entry) if entry.name == *name => {
                        return Err(DeclarationError::DuplicateMember {
                            class: class.to_string(),
                            name: name.as_str().to_string(),
                        });
                    }
                    Some(_) => {
                        bucket = ((bucket as u64 * 5 + hash + 1) & mask) as usize;
                        hash >>= 5;
                    }
                }
            }
            buckets[bucket] = Some(IndexEntry {
                name: name.clone(),
                member: member.clone(),
                slot: slot as u32,
            });
        }

        // Every reuse is rejected before the first link, so a build that
        // fails here has not consumed any member either.
        let mut seen = FxHashSet::default();
        for (name, member) in &entries {
            if member.slot().is_some() || !seen.insert(Rc::as_ptr(member)) {
                return Err(DeclarationError::MemberReused {
                    name: name.as_str().to_string(),
                });
            }
        }
        for (slot, (name, member)) in entries.iter().enumerate() {
            member.link(name.clone(), slot as u32)?;
        }

        Ok(Self {
            buckets: buckets.into_boxed_slice(),
            mask,
            order: entries.into_boxed_slice(),
        })
    }

    /// Smallest power of two holding `count` keys at ≤0.75 load.
    fn capacity_for(count: usize) -> usize {
        let needed = (count * 4).div_ceil(3);
        needed.next_power_of_two().max(1)
    }

    /// Look up a member by name.
    ///
    /// A miss returns `None`, never an error: callers fall through to the
    /// host's generic attribute protocol.
    pub fn lookup(&self, name: &InternedString) -> Option<(&Rc<Member>, u32)> {
        let mask = self.mask;
        let mut hash = name.cached_hash();
        let mut bucket = (hash & mask) as usize;
        loop {
            match &self.buckets[bucket] {
                None => return None,
                Some(entry) if entry.name == *name => {
                    return Some((&entry.member, entry.slot));
                }
                Some(_) => {
                    bucket = ((bucket as u64 * 5 + hash + 1) & mask) as usize;
                    hash >>= 5;
                }
            }
        }
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the index is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Bucket-array capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Iterate members in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&InternedString, &Rc<Member>)> {
        self.order.iter().map(|(name, member)| (name, member))
    }
}

impl std::fmt::Debug for MemberIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberIndex")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
