//! Instances: slot storage plus the attribute access state machine.
//!
//! An instance is a fixed-size slot array sized from its class layout,
//! with every access routed through the owning member's facet modes:
//!
//! - read: strategy dispatch, default materialization on first read of an
//!   empty slot (validated and stored before it is returned)
//! - write: validate, structural-equality short-circuit, store, post-set,
//!   notify
//! - delete: strategy check, clear, notify
//!
//! All mutation goes through interior mutability and no borrow is ever
//! held across a hook or observer callback, so hooks may freely read and
//! write the same instance reentrantly.

use crate::error::{AccessError, LatticeResult};
use crate::member::{DelMode, GetMode, Member, SetMode};
use crate::object::class::ClassLayout;
use crate::object::guard::GuardCell;
use crate::observe::manager::try_with_pools;
use crate::observe::{with_pools, ChangeKind, ChangeMask, ChangeRecord, ObserverId, ObserverRef};
use crate::observe::PoolId;
use bitflags::bitflags;
use lattice_core::{InternedString, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

bitflags! {
    /// Per-instance flag word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct InstanceFlags: u16 {
        /// Change publication and post-set hooks are active.
        const NOTIFICATIONS = 1 << 0;

        /// Writes and deletes are permanently rejected.
        const FROZEN = 1 << 1;
    }
}

// =============================================================================
// Instance
// =============================================================================

/// One object: a class layout plus per-instance slot storage.
pub struct Instance {
    class: Rc<ClassLayout>,
    slots: RefCell<Box<[Option<Value>]>>,
    flags: Cell<InstanceFlags>,

    /// Dynamic observer pool handle, acquired lazily on first subscribe.
    pool: Cell<Option<PoolId>>,

    /// Guard cells pointing at this instance; nulled first during drop.
    guards: RefCell<Vec<Rc<GuardCell>>>,
}

impl Instance {
    /// Create an instance with every slot empty.
    pub fn new(class: &Rc<ClassLayout>) -> Rc<Self> {
        let slots = vec![None; class.member_count()].into_boxed_slice();
        Rc::new(Self {
            class: class.clone(),
            slots: RefCell::new(slots),
            flags: Cell::new(InstanceFlags::NOTIFICATIONS),
            pool: Cell::new(None),
            guards: RefCell::new(Vec::new()),
        })
    }

    #[inline]
    fn flag(&self, flag: InstanceFlags) -> bool {
        self.flags.get().contains(flag)
    }

    fn set_flag(&self, flag: InstanceFlags, on: bool) {
        let mut flags = self.flags.get();
        flags.set(flag, on);
        self.flags.set(flags);
    }

    /// The class layout this instance was built from.
    #[inline]
    pub fn class(&self) -> &Rc<ClassLayout> {
        &self.class
    }

    fn lookup(&self, name: &InternedString) -> LatticeResult<(Rc<Member>, u32)> {
        match self.class.lookup(name) {
            Some((member, slot)) => Ok((member.clone(), slot)),
            None => Err(AccessError::UnknownAttribute {
                class: self.class.name().clone(),
                name: name.clone(),
            }
            .into()),
        }
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read a member through its get strategy.
    pub fn get(self: &Rc<Self>, name: &InternedString) -> LatticeResult<Value> {
        let (member, slot) = self.lookup(name)?;
        match member.get_mode() {
            GetMode::Slot => match self.peek_slot(slot)? {
                Some(value) => Ok(value),
                None => self.populate_default(&member, slot),
            },
            GetMode::Event | GetMode::Signal => Err(AccessError::WriteOnly {
                class: self.class.name().clone(),
                name: name.clone(),
            }
            .into()),
            GetMode::Delegate(target) => self.get(&target.name()),
            GetMode::Property(hook) => hook(self),
            GetMode::CachedProperty(hook) => match self.peek_slot(slot)? {
                Some(value) => Ok(value),
                None => {
                    let value = hook(self)?;
                    self.store_slot(slot, value.clone())?;
                    self.publish(&member, ChangeKind::Created, None, Some(value.clone()))?;
                    Ok(value)
                }
            },
            GetMode::ObjectMethod(hook) => hook(self),
            GetMode::MemberMethod(hook) => hook(&member, self),
        }
    }

    /// Materialize the default into an empty slot: compute, validate,
    /// store, notify, return. After this the slot reads back the same
    /// value without re-running the default.
    fn populate_default(self: &Rc<Self>, member: &Rc<Member>, slot: u32) -> LatticeResult<Value> {
        let default = member.do_default(self)?;
        let validated = member.full_validate(self, None, default)?;
        self.store_slot(slot, validated.clone())?;
        self.publish(member, ChangeKind::Created, None, Some(validated.clone()))?;
        Ok(validated)
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Write a member through its set strategy.
    pub fn set(self: &Rc<Self>, name: &InternedString, value: Value) -> LatticeResult<()> {
        let (member, slot) = self.lookup(name)?;
        if self.flag(InstanceFlags::FROZEN) {
            return Err(AccessError::Frozen {
                class: self.class.name().clone(),
                name: name.clone(),
            }
            .into());
        }
        match member.set_mode() {
            SetMode::Slot => self.write_slot(&member, slot, value),
            SetMode::Constant => Err(AccessError::ConstantWrite {
                class: self.class.name().clone(),
                name: name.clone(),
            }
            .into()),
            SetMode::ReadOnly => {
                if self.slot_occupied(slot)? {
                    Err(AccessError::ReadOnlyWrite {
                        class: self.class.name().clone(),
                        name: name.clone(),
                    }
                    .into())
                } else {
                    self.write_slot(&member, slot, value)
                }
            }
            SetMode::Event => {
                // Validated fire-and-discard: full pipeline, no storage.
                let validated = member.full_validate(self, None, value)?;
                self.publish(&member, ChangeKind::Event, None, Some(validated))
            }
            SetMode::Signal => {
                // Unvalidated fire-and-discard.
                self.publish(&member, ChangeKind::Signal, None, Some(value))
            }
            SetMode::Delegate(target) => self.set(&target.name(), value),
            SetMode::Property(None) => Err(AccessError::ReadOnlyWrite {
                class: self.class.name().clone(),
                name: name.clone(),
            }
            .into()),
            SetMode::Property(Some(setter)) => {
                let validated = member.full_validate(self, None, value)?;
                setter(self, None, &validated)?;
                self.publish(&member, ChangeKind::Updated, None, Some(validated))
            }
            SetMode::ObjectMethod(setter) => {
                let validated = member.full_validate(self, None, value)?;
                setter(self, None, &validated)?;
                self.publish(&member, ChangeKind::Updated, None, Some(validated))
            }
            SetMode::MemberMethod(setter) => {
                let validated = member.full_validate(self, None, value)?;
                setter(&member, self, None, &validated)?;
                self.publish(&member, ChangeKind::Updated, None, Some(validated))
            }
        }
    }

    /// The slot write pipeline: validate, short-circuit on structural
    /// equality, store, post-set, notify.
    fn write_slot(self: &Rc<Self>, member: &Rc<Member>, slot: u32, value: Value) -> LatticeResult<()> {
        let old = self.peek_slot(slot)?;
        let validated = member.full_validate(self, old.as_ref(), value)?;

        // Structurally equal writes skip the store entirely: the slot
        // keeps the prior value's identity and no side effects fire.
        if let Some(existing) = &old {
            if *existing == validated {
                return Ok(());
            }
        }

        self.store_slot(slot, validated.clone())?;
        if self.flag(InstanceFlags::NOTIFICATIONS) {
            member.post_set(self, old.as_ref(), &validated)?;
        }
        let kind = if old.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        self.publish(member, kind, old, Some(validated))
    }

    // =========================================================================
    // Delete Path
    // =========================================================================

    /// Delete a member through its delete strategy.
    pub fn delete(self: &Rc<Self>, name: &InternedString) -> LatticeResult<()> {
        let (member, slot) = self.lookup(name)?;
        if self.flag(InstanceFlags::FROZEN) {
            return Err(AccessError::Frozen {
                class: self.class.name().clone(),
                name: name.clone(),
            }
            .into());
        }
        match member.del_mode() {
            DelMode::Slot => {
                // Deleting an already-empty slot is a no-op.
                match self.take_slot(slot)? {
                    Some(old) => self.publish(&member, ChangeKind::Deleted, Some(old), None),
                    None => Ok(()),
                }
            }
            mode => Err(AccessError::Undeletable {
                class: self.class.name().clone(),
                name: name.clone(),
                strategy: mode.mode_name(),
            }
            .into()),
        }
    }

    // =========================================================================
    // Slot Primitives
    // =========================================================================

    fn slot_range_error(&self, slot: u32, len: usize) -> AccessError {
        AccessError::SlotOutOfRange {
            class: self.class.name().clone(),
            slot,
            len,
        }
    }

    /// Read a slot without triggering defaults or hooks.
    pub fn peek_slot(&self, slot: u32) -> LatticeResult<Option<Value>> {
        let slots = self.slots.borrow();
        match slots.get(slot as usize) {
            Some(value) => Ok(value.clone()),
            None => Err(self.slot_range_error(slot, slots.len()).into()),
        }
    }

    /// Store into a slot without validation or notification.
    pub fn store_slot(&self, slot: u32, value: Value) -> LatticeResult<()> {
        let mut slots = self.slots.borrow_mut();
        let len = slots.len();
        match slots.get_mut(slot as usize) {
            Some(cell) => {
                *cell = Some(value);
                Ok(())
            }
            None => Err(self.slot_range_error(slot, len).into()),
        }
    }

    /// Clear a slot, returning its prior value.
    pub fn take_slot(&self, slot: u32) -> LatticeResult<Option<Value>> {
        let mut slots = self.slots.borrow_mut();
        let len = slots.len();
        match slots.get_mut(slot as usize) {
            Some(cell) => Ok(cell.take()),
            None => Err(self.slot_range_error(slot, len).into()),
        }
    }

    /// Whether a slot currently holds a value.
    pub fn slot_occupied(&self, slot: u32) -> LatticeResult<bool> {
        Ok(self.peek_slot(slot)?.is_some())
    }

    // =========================================================================
    // Freezing and Notification Control
    // =========================================================================

    /// Permanently forbid writes and deletes. Irreversible.
    pub fn freeze(&self) {
        self.set_flag(InstanceFlags::FROZEN, true);
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.flag(InstanceFlags::FROZEN)
    }

    /// Toggle change notification and post-set side effects. Validation
    /// and storage are unaffected.
    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.set_flag(InstanceFlags::NOTIFICATIONS, enabled);
    }

    #[inline]
    pub fn notifications_enabled(&self) -> bool {
        self.flag(InstanceFlags::NOTIFICATIONS)
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Subscribe a dynamic observer to a topic on this instance.
    pub fn observe(&self, topic: InternedString, observer: ObserverRef, mask: ChangeMask) {
        let id = match self.pool.get() {
            Some(id) => id,
            None => {
                let id = with_pools(|manager| manager.acquire());
                self.pool.set(Some(id));
                id
            }
        };
        with_pools(|manager| manager.observe(id, topic, observer, mask));
    }

    /// Unsubscribe one dynamic observer from a topic.
    pub fn unobserve(&self, topic: InternedString, observer: ObserverId) {
        if let Some(id) = self.pool.get() {
            with_pools(|manager| manager.unobserve(id, topic, observer));
        }
    }

    /// Drop every dynamic subscription on a topic.
    pub fn unobserve_topic(&self, topic: InternedString) {
        if let Some(id) = self.pool.get() {
            with_pools(|manager| manager.unobserve_topic(id, topic));
        }
    }

    /// Whether any live dynamic observer listens on `topic` for the given
    /// change kinds.
    pub fn has_observers(&self, topic: &InternedString, mask: ChangeMask) -> bool {
        self.pool
            .get()
            .is_some_and(|id| with_pools(|manager| manager.has_observers(id, topic, mask)))
    }

    /// Dispatch a change to the member's static observers, then this
    /// instance's dynamic pool. The record is only built when someone is
    /// actually listening.
    pub(crate) fn publish(
        self: &Rc<Self>,
        member: &Rc<Member>,
        kind: ChangeKind,
        old: Option<Value>,
        new: Option<Value>,
    ) -> LatticeResult<()> {
        if !self.flag(InstanceFlags::NOTIFICATIONS) {
            return Ok(());
        }
        let name = member.name();
        let mask = kind.mask();
        let has_static = member.has_observers(mask);
        let dynamic = self
            .pool
            .get()
            .filter(|id| with_pools(|manager| manager.has_observers(*id, &name, mask)));
        if !has_static && dynamic.is_none() {
            return Ok(());
        }

        let record = ChangeRecord {
            object: Rc::downgrade(self),
            name,
            kind,
            old,
            new,
        };
        if has_static {
            member.notify_static(&record)?;
        }
        if let Some(id) = dynamic {
            with_pools(|manager| manager.notify(id, &record))?;
        }
        Ok(())
    }

    // =========================================================================
    // Serialization Queries
    // =========================================================================

    /// Whether `name` participates in serialized state, per its member's
    /// get-state mode.
    pub fn should_serialize(self: &Rc<Self>, name: &InternedString) -> LatticeResult<bool> {
        let (member, _) = self.lookup(name)?;
        member.should_serialize(self)
    }

    // =========================================================================
    // Guards and Introspection
    // =========================================================================

    pub(crate) fn register_guard(&self, cell: Rc<GuardCell>) {
        self.guards.borrow_mut().push(cell);
    }

    pub(crate) fn unregister_guard(&self, cell: &Rc<GuardCell>) {
        self.guards
            .borrow_mut()
            .retain(|existing| !Rc::ptr_eq(existing, cell));
    }

    /// Approximate heap footprint: the instance header, the slot array,
    /// and the acquired observer pool's registration tables. Value
    /// payloads are excluded.
    pub fn storage_bytes(&self) -> usize {
        let pool = self
            .pool
            .get()
            .map_or(0, |id| with_pools(|manager| manager.storage_bytes(id)));
        std::mem::size_of::<Self>()
            + self.slots.borrow().len() * std::mem::size_of::<Option<Value>>()
            + pool
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // Null all guarded back-pointers before any other teardown so a
        // destructor-triggered callback never sees a half-dead instance.
        for cell in self.guards.get_mut().drain(..) {
            cell.invalidate();
        }
        if let Some(id) = self.pool.get() {
            try_with_pools(|manager| manager.release(id));
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name())
            .field("slots", &self.slots.borrow().len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{DefaultMode, GetStateMode, PostSetMode, ValidateMode};
    use crate::observe::{current_sender, observer_fn};
    use lattice_core::intern;
    use std::cell::RefCell as StdRefCell;

    fn single(member: Rc<Member>) -> Rc<Instance> {
        let name = member.name();
        let layout = ClassLayout::build("T", vec![(name, member)]).unwrap();
        Instance::new(&layout)
    }

    fn recording_observer(
        log: &Rc<StdRefCell<Vec<(ChangeKind, Option<Value>, Option<Value>)>>>,
    ) -> ObserverRef {
        let log = log.clone();
        ObserverRef::Strong(observer_fn(move |change| {
            log.borrow_mut()
                .push((change.kind, change.old.clone(), change.new.clone()));
            Ok(())
        }))
    }

    #[test]
    fn test_unknown_attribute() {
        let instance = single(Member::new("x"));
        let err = instance.get(&intern("missing")).unwrap_err();
        assert!(matches!(
            err,
            crate::error::LatticeError::Access(AccessError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let member = Member::new("x");
        member
            .set_validate_mode(ValidateMode::Int { strict: false })
            .unwrap();
        let instance = single(member);
        instance.set(&intern("x"), Value::Float(7.9)).unwrap();
        assert_eq!(instance.get(&intern("x")).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_create_then_update_notifications() {
        let member = Member::new("x");
        let instance = single(member);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        instance.observe(intern("x"), recording_observer(&log), ChangeMask::all());

        instance.set(&intern("x"), Value::Int(1)).unwrap();
        instance.set(&intern("x"), Value::Int(2)).unwrap();
        instance.delete(&intern("x")).unwrap();

        let log = log.borrow();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], (ChangeKind::Created, None, Some(Value::Int(1))));
        assert_eq!(
            log[1],
            (ChangeKind::Updated, Some(Value::Int(1)), Some(Value::Int(2)))
        );
        assert_eq!(log[2], (ChangeKind::Deleted, Some(Value::Int(2)), None));
    }

    #[test]
    fn test_equal_write_short_circuits() {
        let member = Member::new("items");
        let instance = single(member);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        instance.observe(intern("items"), recording_observer(&log), ChangeMask::all());

        let first = Value::list(vec![Value::Int(1)]);
        instance.set(&intern("items"), first.clone()).unwrap();
        assert_eq!(log.borrow().len(), 1);

        // Structurally equal but a distinct container: the write is
        // dropped and the stored container keeps its identity.
        let equal = Value::list(vec![Value::Int(1)]);
        instance.set(&intern("items"), equal).unwrap();
        assert_eq!(log.borrow().len(), 1);
        let stored = instance.get(&intern("items")).unwrap();
        assert!(stored.is(&first));
    }

    #[test]
    fn test_default_materializes_once() {
        let calls = Rc::new(Cell::new(0));
        let calls_ref = calls.clone();
        let member = Member::new("x");
        member
            .set_default_mode(DefaultMode::CallObject(Rc::new(move || {
                calls_ref.set(calls_ref.get() + 1);
                Ok(Value::Int(42))
            })))
            .unwrap();
        let instance = single(member);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        instance.observe(intern("x"), recording_observer(&log), ChangeMask::all());

        assert_eq!(instance.get(&intern("x")).unwrap(), Value::Int(42));
        assert_eq!(instance.get(&intern("x")).unwrap(), Value::Int(42));
        assert_eq!(calls.get(), 1);
        // First read published a creation.
        assert_eq!(
            log.borrow()[0],
            (ChangeKind::Created, None, Some(Value::Int(42)))
        );
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_default_is_validated_before_store() {
        let member = Member::new("x");
        member
            .set_default_mode(DefaultMode::Static(Value::Float(3.5)))
            .unwrap();
        member
            .set_validate_mode(ValidateMode::Int { strict: false })
            .unwrap();
        let instance = single(member);
        assert_eq!(instance.get(&intern("x")).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_non_optional_member_requires_write() {
        let member = Member::new("x");
        member.set_default_mode(DefaultMode::NonOptional).unwrap();
        let instance = single(member);
        let err = instance.get(&intern("x")).unwrap_err();
        assert!(matches!(
            err,
            crate::error::LatticeError::Access(AccessError::MissingValue { .. })
        ));
        instance.set(&intern("x"), Value::Int(1)).unwrap();
        assert_eq!(instance.get(&intern("x")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_frozen_rejects_writes_and_deletes() {
        let member = Member::new("x");
        let instance = single(member);
        instance.set(&intern("x"), Value::Int(1)).unwrap();
        instance.freeze();
        assert!(instance.is_frozen());

        assert!(matches!(
            instance.set(&intern("x"), Value::Int(2)).unwrap_err(),
            crate::error::LatticeError::Access(AccessError::Frozen { .. })
        ));
        assert!(matches!(
            instance.delete(&intern("x")).unwrap_err(),
            crate::error::LatticeError::Access(AccessError::Frozen { .. })
        ));
        // Reads still work.
        assert_eq!(instance.get(&intern("x")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_constant_and_read_only() {
        let constant = Member::new("c");
        constant.set_set_mode(SetMode::Constant).unwrap();
        constant.set_del_mode(DelMode::Constant).unwrap();
        constant
            .set_default_mode(DefaultMode::Static(Value::Int(9)))
            .unwrap();
        let read_only = Member::new("r");
        read_only.set_set_mode(SetMode::ReadOnly).unwrap();
        read_only.set_del_mode(DelMode::ReadOnly).unwrap();
        let layout = ClassLayout::build(
            "T",
            vec![
                (intern("c"), constant),
                (intern("r"), read_only),
            ],
        )
        .unwrap();
        let instance = Instance::new(&layout);

        assert!(matches!(
            instance.set(&intern("c"), Value::Int(1)).unwrap_err(),
            crate::error::LatticeError::Access(AccessError::ConstantWrite { .. })
        ));
        assert_eq!(instance.get(&intern("c")).unwrap(), Value::Int(9));
        assert!(matches!(
            instance.delete(&intern("c")).unwrap_err(),
            crate::error::LatticeError::Access(AccessError::Undeletable { .. })
        ));

        instance.set(&intern("r"), Value::Int(1)).unwrap();
        assert!(matches!(
            instance.set(&intern("r"), Value::Int(2)).unwrap_err(),
            crate::error::LatticeError::Access(AccessError::ReadOnlyWrite { .. })
        ));
        assert_eq!(instance.get(&intern("r")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_event_validates_and_notifies_without_storing() {
        let member = Member::new("e");
        member
            .set_validate_mode(ValidateMode::Int { strict: false })
            .unwrap();
        member.set_get_mode(GetMode::Event).unwrap();
        member.set_set_mode(SetMode::Event).unwrap();
        member.set_del_mode(DelMode::Event).unwrap();
        let instance = single(member);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        instance.observe(intern("e"), recording_observer(&log), ChangeMask::all());

        instance.set(&intern("e"), Value::Float(5.5)).unwrap();
        assert_eq!(
            log.borrow()[0],
            (ChangeKind::Event, None, Some(Value::Int(5)))
        );
        assert_eq!(instance.peek_slot(0).unwrap(), None);
        assert!(instance.set(&intern("e"), Value::str("no")).is_err());
        assert!(matches!(
            instance.get(&intern("e")).unwrap_err(),
            crate::error::LatticeError::Access(AccessError::WriteOnly { .. })
        ));
    }

    #[test]
    fn test_signal_skips_validation() {
        let member = Member::new("s");
        member
            .set_validate_mode(ValidateMode::Int { strict: true })
            .unwrap();
        member.set_get_mode(GetMode::Signal).unwrap();
        member.set_set_mode(SetMode::Signal).unwrap();
        member.set_del_mode(DelMode::Signal).unwrap();
        let instance = single(member);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        instance.observe(intern("s"), recording_observer(&log), ChangeMask::all());

        // A value the validator would reject still goes out.
        instance.set(&intern("s"), Value::str("raw")).unwrap();
        assert_eq!(
            log.borrow()[0],
            (ChangeKind::Signal, None, Some(Value::str("raw")))
        );
        assert_eq!(instance.peek_slot(0).unwrap(), None);
    }

    #[test]
    fn test_delete_empty_slot_is_silent() {
        let member = Member::new("x");
        let instance = single(member);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        instance.observe(intern("x"), recording_observer(&log), ChangeMask::all());
        instance.delete(&intern("x")).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_property_get_and_set() {
        let member = Member::new("p");
        member
            .set_get_mode(GetMode::Property(Rc::new(|instance| {
                Ok(Value::Int(instance.class().member_count() as i64))
            })))
            .unwrap();
        let written = Rc::new(StdRefCell::new(None));
        let written_ref = written.clone();
        member
            .set_set_mode(SetMode::Property(Some(Rc::new(
                move |_instance, _old, value| {
                    *written_ref.borrow_mut() = Some(value.clone());
                    Ok(())
                },
            ))))
            .unwrap();
        member.set_del_mode(DelMode::Property).unwrap();
        let instance = single(member);

        assert_eq!(instance.get(&intern("p")).unwrap(), Value::Int(1));
        instance.set(&intern("p"), Value::str("v")).unwrap();
        assert_eq!(*written.borrow(), Some(Value::str("v")));
        // Property storage never touches the slot.
        assert_eq!(instance.peek_slot(0).unwrap(), None);
    }

    #[test]
    fn test_setterless_property_rejects_writes() {
        let member = Member::new("p");
        member
            .set_get_mode(GetMode::Property(Rc::new(|_| Ok(Value::Int(1)))))
            .unwrap();
        member.set_set_mode(SetMode::Property(None)).unwrap();
        let instance = single(member);
        assert!(matches!(
            instance.set(&intern("p"), Value::Int(2)).unwrap_err(),
            crate::error::LatticeError::Access(AccessError::ReadOnlyWrite { .. })
        ));
    }

    #[test]
    fn test_cached_property_computes_once() {
        let calls = Rc::new(Cell::new(0));
        let calls_ref = calls.clone();
        let member = Member::new("p");
        member
            .set_get_mode(GetMode::CachedProperty(Rc::new(move |_| {
                calls_ref.set(calls_ref.get() + 1);
                Ok(Value::Int(10))
            })))
            .unwrap();
        let instance = single(member);
        assert_eq!(instance.get(&intern("p")).unwrap(), Value::Int(10));
        assert_eq!(instance.get(&intern("p")).unwrap(), Value::Int(10));
        assert_eq!(calls.get(), 1);
        // Deleting the cache recomputes.
        instance.delete(&intern("p")).unwrap();
        assert_eq!(instance.get(&intern("p")).unwrap(), Value::Int(10));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_delegate_routes_through_target() {
        let target = Member::new("target");
        target
            .set_validate_mode(ValidateMode::Int { strict: false })
            .unwrap();
        let alias = Member::new("alias");
        alias
            .set_get_mode(GetMode::Delegate(target.clone()))
            .unwrap();
        alias
            .set_set_mode(SetMode::Delegate(target.clone()))
            .unwrap();
        let layout = ClassLayout::build(
            "T",
            vec![(intern("target"), target), (intern("alias"), alias)],
        )
        .unwrap();
        let instance = Instance::new(&layout);

        instance.set(&intern("alias"), Value::Float(6.6)).unwrap();
        assert_eq!(instance.get(&intern("target")).unwrap(), Value::Int(6));
        assert_eq!(instance.get(&intern("alias")).unwrap(), Value::Int(6));
    }

    #[test]
    fn test_notifications_toggle() {
        let post_set_ran = Rc::new(Cell::new(false));
        let post_set_ref = post_set_ran.clone();
        let member = Member::new("x");
        member
            .set_post_set_mode(PostSetMode::ObjectMethod(Rc::new(
                move |_instance, _old, _new| {
                    post_set_ref.set(true);
                    Ok(())
                },
            )))
            .unwrap();
        let instance = single(member);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        instance.observe(intern("x"), recording_observer(&log), ChangeMask::all());

        instance.set_notifications_enabled(false);
        instance.set(&intern("x"), Value::Int(1)).unwrap();
        assert!(log.borrow().is_empty());
        assert!(!post_set_ran.get());
        // The store itself still happened.
        assert_eq!(instance.get(&intern("x")).unwrap(), Value::Int(1));

        instance.set_notifications_enabled(true);
        instance.set(&intern("x"), Value::Int(2)).unwrap();
        assert_eq!(log.borrow().len(), 1);
        assert!(post_set_ran.get());
    }

    #[test]
    fn test_post_set_runs_before_notification() {
        let order = Rc::new(StdRefCell::new(Vec::new()));
        let member = Member::new("x");
        let order_ref = order.clone();
        member
            .set_post_set_mode(PostSetMode::ObjectMethod(Rc::new(
                move |_instance, _old, _new| {
                    order_ref.borrow_mut().push("post_set");
                    Ok(())
                },
            )))
            .unwrap();
        let instance = single(member);
        let order_ref = order.clone();
        instance.observe(
            intern("x"),
            ObserverRef::Strong(observer_fn(move |_| {
                order_ref.borrow_mut().push("observer");
                Ok(())
            })),
            ChangeMask::all(),
        );

        instance.set(&intern("x"), Value::Int(1)).unwrap();
        assert_eq!(*order.borrow(), ["post_set", "observer"]);
    }

    #[test]
    fn test_observer_sees_current_sender() {
        let member = Member::new("x");
        let instance = single(member);
        let seen = Rc::new(Cell::new(false));
        let seen_ref = seen.clone();
        let weak_instance = Rc::downgrade(&instance);
        instance.observe(
            intern("x"),
            ObserverRef::Strong(observer_fn(move |change| {
                let sender = current_sender().and_then(|s| {
                    weak_instance.upgrade().map(|i| Rc::ptr_eq(&s, &i))
                });
                assert_eq!(sender, Some(true));
                assert!(change.object().is_some());
                seen_ref.set(true);
                Ok(())
            })),
            ChangeMask::all(),
        );
        instance.set(&intern("x"), Value::Int(1)).unwrap();
        assert!(seen.get());
        assert!(current_sender().is_none());
    }

    #[test]
    fn test_reentrant_write_from_observer() {
        let first = Member::new("first");
        let second = Member::new("second");
        let layout = ClassLayout::build(
            "T",
            vec![(intern("first"), first), (intern("second"), second)],
        )
        .unwrap();
        let instance = Instance::new(&layout);

        let weak = Rc::downgrade(&instance);
        instance.observe(
            intern("first"),
            ObserverRef::Strong(observer_fn(move |change| {
                if let Some(instance) = weak.upgrade() {
                    let echoed = change.new.clone().unwrap_or(Value::Null);
                    instance.set(&intern("second"), echoed)?;
                }
                Ok(())
            })),
            ChangeMask::all(),
        );

        instance.set(&intern("first"), Value::Int(5)).unwrap();
        assert_eq!(instance.get(&intern("second")).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_observer_error_surfaces_but_store_sticks() {
        let member = Member::new("x");
        let instance = single(member);
        instance.observe(
            intern("x"),
            ObserverRef::Strong(observer_fn(|change| {
                Err(crate::error::LatticeError::Access(AccessError::Frozen {
                    class: intern("T"),
                    name: change.name.clone(),
                }))
            })),
            ChangeMask::all(),
        );

        let err = instance.set(&intern("x"), Value::Int(1)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::LatticeError::Observer { .. }
        ));
        // The value was stored before dispatch began.
        assert_eq!(instance.peek_slot(0).unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_unobserve_stops_delivery() {
        let member = Member::new("x");
        let instance = single(member);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let observer = recording_observer(&log);
        let id = observer.id();
        instance.observe(intern("x"), observer, ChangeMask::all());

        instance.set(&intern("x"), Value::Int(1)).unwrap();
        instance.unobserve(intern("x"), id);
        instance.set(&intern("x"), Value::Int(2)).unwrap();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_slot_primitives_bounds_checked() {
        let instance = single(Member::new("x"));
        assert!(matches!(
            instance.peek_slot(5).unwrap_err(),
            crate::error::LatticeError::Access(AccessError::SlotOutOfRange { slot: 5, .. })
        ));
        assert!(instance.store_slot(5, Value::Null).is_err());
        assert!(instance.take_slot(5).is_err());
    }

    #[test]
    fn test_should_serialize_routes_to_member() {
        let member = Member::new("x");
        member
            .set_get_state_mode(GetStateMode::IncludeNonDefault)
            .unwrap();
        let instance = single(member);
        assert!(!instance.should_serialize(&intern("x")).unwrap());
        instance.set(&intern("x"), Value::Int(1)).unwrap();
        assert!(instance.should_serialize(&intern("x")).unwrap());
    }

    #[test]
    fn test_guarded_handle_nulls_on_drop() {
        let instance = single(Member::new("x"));
        let handle = crate::object::GuardedHandle::new(&instance);
        assert!(handle.is_live());
        let resolved = handle.get().unwrap();
        assert!(Rc::ptr_eq(&resolved, &instance));
        drop(resolved);

        drop(instance);
        assert!(!handle.is_live());
        assert!(handle.get().is_none());
    }

    #[test]
    fn test_guarded_handle_get_balances_ownership() {
        let instance = single(Member::new("x"));
        let handle = crate::object::GuardedHandle::new(&instance);
        {
            let resolved = handle.get().unwrap();
            assert_eq!(Rc::strong_count(&instance), 2);
            drop(resolved);
        }
        // Resolving never leaks a strong reference, so the instance dies
        // with its last owner and the handle observes it.
        assert_eq!(Rc::strong_count(&instance), 1);
        drop(instance);
        assert!(handle.get().is_none());
    }

    #[test]
    fn test_all_live_guarded_handles_null_on_drop() {
        let instance = single(Member::new("x"));
        let first = crate::object::GuardedHandle::new(&instance);
        let second = crate::object::GuardedHandle::new(&instance);
        let third = crate::object::GuardedHandle::new(&instance);
        // One dies early; the survivors stay registered.
        drop(third);
        assert!(first.is_live());
        assert!(second.is_live());

        drop(instance);
        assert!(!first.is_live());
        assert!(!second.is_live());
        assert!(first.get().is_none());
        assert!(second.get().is_none());
    }

    #[test]
    fn test_guarded_handle_drop_deregisters() {
        let instance = single(Member::new("x"));
        {
            let _handle = crate::object::GuardedHandle::new(&instance);
            assert_eq!(instance.guards.borrow().len(), 1);
        }
        assert_eq!(instance.guards.borrow().len(), 0);
    }

    #[test]
    fn test_storage_bytes_scales_with_slots() {
        let small = single(Member::new("x"));
        let layout = ClassLayout::build(
            "Big",
            (0..16)
                .map(|i| {
                    let name = format!("m{i}");
                    (intern(&name), Member::new(&name))
                })
                .collect(),
        )
        .unwrap();
        let big = Instance::new(&layout);
        assert!(big.storage_bytes() > small.storage_bytes());
    }

    #[test]
    fn test_storage_bytes_counts_observer_pool() {
        let instance = single(Member::new("x"));
        let before = instance.storage_bytes();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        instance.observe(intern("x"), recording_observer(&log), ChangeMask::all());
        assert!(instance.storage_bytes() > before);
    }
}
