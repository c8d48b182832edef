//! Member descriptors: per-attribute behavior programs.
//!
//! A `Member` bundles one mode per behavior facet — default, validate,
//! post-validate, get, set, post-set, delete, and get-state — plus the
//! name and slot it was registered under. Modes are tagged unions matched
//! at access time; context shapes are checked once, when the mode is
//! declared, so a malformed facet/context combination fails class
//! finalization rather than every access.
//!
//! Members also carry a static observer list, dispatched ahead of the
//! owning instance's dynamic topic pool on every published change.

pub mod access;
pub mod default;
pub mod index;
pub mod validate;

use crate::error::{DeclarationError, LatticeError, LatticeResult, ValidationError};
use crate::object::Instance;
use crate::observe::{ChangeMask, ChangeRecord, ObserverId, ObserverRef};
use lattice_core::{InternedString, Value};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub use access::{DelMode, GetMode, GetStateMode, PostSetMode, SetMode};
pub use default::DefaultMode;
pub use index::MemberIndex;
pub use validate::{PostValidateMode, ValidateMode};

/// Sentinel for a member not yet linked into a class layout.
pub const SLOT_UNASSIGNED: u32 = u32::MAX;

// =============================================================================
// Hooks
// =============================================================================

/// Custom validation-failure hook.
///
/// Installed per member to reformulate validation diagnostics. The hook
/// must fail; a hook that returns normally is itself a declaration-class
/// defect and is reported as one.
pub type ValidationErrorFn =
    Rc<dyn Fn(&Rc<Member>, &Rc<Instance>, &ValidationError) -> LatticeResult<Value>>;

// =============================================================================
// Static Observers
// =============================================================================

/// One statically-registered observer with its change filter.
#[derive(Clone)]
struct StaticObserver {
    observer: ObserverRef,
    mask: ChangeMask,
}

// =============================================================================
// Member
// =============================================================================

/// Facet modes for one member.
#[derive(Clone, Debug)]
struct Modes {
    default: DefaultMode,
    validate: ValidateMode,
    post_validate: PostValidateMode,
    get: GetMode,
    set: SetMode,
    post_set: PostSetMode,
    del: DelMode,
    get_state: GetStateMode,
}

impl Modes {
    fn plain() -> Self {
        Self {
            default: DefaultMode::NoOp,
            validate: ValidateMode::NoOp,
            post_validate: PostValidateMode::NoOp,
            get: GetMode::Slot,
            set: SetMode::Slot,
            post_set: PostSetMode::NoOp,
            del: DelMode::Slot,
            get_state: GetStateMode::Include,
        }
    }
}

/// The per-attribute behavior descriptor.
///
/// Created unlinked; `MemberIndex::build` links it to its name and slot
/// when the owning class layout is finalized. Facets are mutable until
/// then and conventionally immutable afterwards.
pub struct Member {
    name: RefCell<InternedString>,
    slot: Cell<u32>,
    modes: RefCell<Modes>,
    error_hook: RefCell<Option<ValidationErrorFn>>,
    static_observers: RefCell<SmallVec<[StaticObserver; 2]>>,
}

impl Member {
    /// Create a new plain-slot member.
    pub fn new(name: &str) -> Rc<Self> {
        Rc::new(Self {
            name: RefCell::new(lattice_core::intern(name)),
            slot: Cell::new(SLOT_UNASSIGNED),
            modes: RefCell::new(Modes::plain()),
            error_hook: RefCell::new(None),
            static_observers: RefCell::new(SmallVec::new()),
        })
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// The member's registered name.
    pub fn name(&self) -> InternedString {
        self.name.borrow().clone()
    }

    /// The member's slot, if linked to a class layout.
    pub fn slot(&self) -> Option<u32> {
        let slot = self.slot.get();
        (slot != SLOT_UNASSIGNED).then_some(slot)
    }

    /// Link this member to its name and slot at class finalization.
    pub(crate) fn link(&self, name: InternedString, slot: u32) -> Result<(), DeclarationError> {
        if self.slot.get() != SLOT_UNASSIGNED {
            return Err(DeclarationError::MemberReused {
                name: name.as_str().to_string(),
            });
        }
        *self.name.borrow_mut() = name;
        self.slot.set(slot);
        Ok(())
    }

    /// Structural clone: same facets and static observers, fresh identity,
    /// unassigned slot. Used to resolve multi-inheritance slot conflicts;
    /// clones never share slot numbers with their source.
    pub fn clone_unlinked(&self) -> Rc<Self> {
        Rc::new(Self {
            name: RefCell::new(self.name.borrow().clone()),
            slot: Cell::new(SLOT_UNASSIGNED),
            modes: RefCell::new(self.modes.borrow().clone()),
            error_hook: RefCell::new(self.error_hook.borrow().clone()),
            static_observers: RefCell::new(self.static_observers.borrow().clone()),
        })
    }

    // =========================================================================
    // Facet Configuration
    // =========================================================================

    /// Set the default facet mode.
    pub fn set_default_mode(&self, mode: DefaultMode) -> Result<(), DeclarationError> {
        mode.check_context(self)?;
        self.modes.borrow_mut().default = mode;
        Ok(())
    }

    /// Set the validate facet mode.
    pub fn set_validate_mode(&self, mode: ValidateMode) -> Result<(), DeclarationError> {
        mode.check_context(self)?;
        self.modes.borrow_mut().validate = mode;
        Ok(())
    }

    /// Set the post-validate facet mode.
    pub fn set_post_validate_mode(&self, mode: PostValidateMode) -> Result<(), DeclarationError> {
        self.modes.borrow_mut().post_validate = mode;
        Ok(())
    }

    /// Set the read strategy.
    pub fn set_get_mode(&self, mode: GetMode) -> Result<(), DeclarationError> {
        self.modes.borrow_mut().get = mode;
        Ok(())
    }

    /// Set the write strategy.
    pub fn set_set_mode(&self, mode: SetMode) -> Result<(), DeclarationError> {
        self.modes.borrow_mut().set = mode;
        Ok(())
    }

    /// Set the post-set facet mode.
    pub fn set_post_set_mode(&self, mode: PostSetMode) -> Result<(), DeclarationError> {
        self.modes.borrow_mut().post_set = mode;
        Ok(())
    }

    /// Set the delete strategy.
    pub fn set_del_mode(&self, mode: DelMode) -> Result<(), DeclarationError> {
        self.modes.borrow_mut().del = mode;
        Ok(())
    }

    /// Set the serialization decision mode.
    pub fn set_get_state_mode(&self, mode: GetStateMode) -> Result<(), DeclarationError> {
        self.modes.borrow_mut().get_state = mode;
        Ok(())
    }

    /// Install a custom validation-failure hook.
    pub fn set_validation_error_hook(&self, hook: Option<ValidationErrorFn>) {
        *self.error_hook.borrow_mut() = hook;
    }

    /// Current default mode.
    pub fn default_mode(&self) -> DefaultMode {
        self.modes.borrow().default.clone()
    }

    /// Current validate mode.
    pub fn validate_mode(&self) -> ValidateMode {
        self.modes.borrow().validate.clone()
    }

    /// Current read strategy.
    pub fn get_mode(&self) -> GetMode {
        self.modes.borrow().get.clone()
    }

    /// Current write strategy.
    pub fn set_mode(&self) -> SetMode {
        self.modes.borrow().set.clone()
    }

    /// Current delete strategy.
    pub fn del_mode(&self) -> DelMode {
        self.modes.borrow().del
    }

    /// Current serialization decision mode.
    pub fn get_state_mode(&self) -> GetStateMode {
        self.modes.borrow().get_state.clone()
    }

    // =========================================================================
    // Behavior Dispatch
    // =========================================================================

    /// Compute the default value for `instance`.
    pub fn do_default(self: &Rc<Self>, instance: &Rc<Instance>) -> LatticeResult<Value> {
        let mode = self.modes.borrow().default.clone();
        mode.run(self, instance)
    }

    /// Run only the validate facet.
    pub fn validate(
        self: &Rc<Self>,
        instance: &Rc<Instance>,
        old: Option<&Value>,
        new: Value,
    ) -> LatticeResult<Value> {
        let mode = self.modes.borrow().validate.clone();
        mode.run(self, instance, old, new)
    }

    /// Run only the post-validate facet.
    pub fn post_validate(
        self: &Rc<Self>,
        instance: &Rc<Instance>,
        old: Option<&Value>,
        validated: Value,
    ) -> LatticeResult<Value> {
        let mode = self.modes.borrow().post_validate.clone();
        mode.run(self, instance, old, validated)
    }

    /// The full validated write pipeline: validate, then post-validate.
    ///
    /// This is the single boundary typed container wrappers use to
    /// validate elements against an inner member. Validation failures are
    /// routed through the member's validation-error hook when one is
    /// installed.
    pub fn full_validate(
        self: &Rc<Self>,
        instance: &Rc<Instance>,
        old: Option<&Value>,
        new: Value,
    ) -> LatticeResult<Value> {
        let result = self
            .validate(instance, old, new)
            .and_then(|validated| self.post_validate(instance, old, validated));
        match result {
            Ok(value) => Ok(value),
            Err(LatticeError::Validation(err)) => self.raise_validation_error(instance, err),
            Err(other) => Err(other),
        }
    }

    /// Route a validation failure through the custom hook, verifying the
    /// hook actually failed.
    fn raise_validation_error(
        self: &Rc<Self>,
        instance: &Rc<Instance>,
        err: ValidationError,
    ) -> LatticeResult<Value> {
        let hook = self.error_hook.borrow().clone();
        match hook {
            None => Err(err.into()),
            Some(hook) => match hook(self, instance, &err) {
                Err(reformulated) => Err(reformulated),
                Ok(_) => Err(DeclarationError::HookReturnedNormally {
                    member: self.name().as_str().to_string(),
                }
                .into()),
            },
        }
    }

    /// Run the post-set side effect.
    pub fn post_set(
        self: &Rc<Self>,
        instance: &Rc<Instance>,
        old: Option<&Value>,
        new: &Value,
    ) -> LatticeResult<()> {
        let mode = self.modes.borrow().post_set.clone();
        mode.run(self, instance, old, new)
    }

    /// Decide whether this member participates in serialized state.
    pub fn should_serialize(self: &Rc<Self>, instance: &Rc<Instance>) -> LatticeResult<bool> {
        match self.get_state_mode() {
            GetStateMode::Include => Ok(true),
            GetStateMode::Exclude => Ok(false),
            GetStateMode::IncludeNonDefault => match self.slot() {
                Some(slot) => instance.slot_occupied(slot),
                None => Ok(false),
            },
            GetStateMode::Property => Ok(true),
            GetStateMode::ObjectMethod(hook) => hook(instance),
        }
    }

    // =========================================================================
    // Static Observers
    // =========================================================================

    /// Register a static observer with a change-kind filter.
    pub fn observe_static(&self, observer: ObserverRef, mask: ChangeMask) {
        let id = observer.id();
        let mut list = self.static_observers.borrow_mut();
        if let Some(entry) = list.iter_mut().find(|e| e.observer.id() == id) {
            entry.mask = mask;
            return;
        }
        list.push(StaticObserver { observer, mask });
    }

    /// Remove a static observer by identity.
    pub fn unobserve_static(&self, id: ObserverId) {
        self.static_observers
            .borrow_mut()
            .retain(|e| e.observer.id() != id);
    }

    /// Cheap pre-check: is any live static observer interested in the
    /// given change kinds?
    pub fn has_observers(&self, mask: ChangeMask) -> bool {
        self.static_observers
            .borrow()
            .iter()
            .any(|e| e.mask.intersects(mask) && e.observer.is_live())
    }

    /// Number of registered static observers (live or not).
    pub fn static_observer_count(&self) -> usize {
        self.static_observers.borrow().len()
    }

    /// Dispatch a change to static observers.
    ///
    /// Iterates a snapshot, so observers registered or removed by a
    /// callback do not perturb this dispatch. Dead weak observers seen
    /// here are compacted afterwards.
    pub(crate) fn notify_static(self: &Rc<Self>, change: &ChangeRecord) -> LatticeResult<()> {
        if self.static_observers.borrow().is_empty() {
            return Ok(());
        }
        let snapshot: SmallVec<[StaticObserver; 2]> =
            self.static_observers.borrow().iter().cloned().collect();
        let mut dead: SmallVec<[ObserverId; 2]> = SmallVec::new();
        let mut result = Ok(());
        for entry in &snapshot {
            if !entry.mask.intersects(change.kind.mask()) {
                continue;
            }
            match entry.observer.upgrade() {
                None => dead.push(entry.observer.id()),
                Some(observer) => {
                    if let Err(err) = observer.on_change(change) {
                        result = Err(LatticeError::Observer {
                            topic: change.name.clone(),
                            source: Box::new(err),
                        });
                        break;
                    }
                }
            }
        }
        if !dead.is_empty() {
            self.static_observers
                .borrow_mut()
                .retain(|e| !dead.contains(&e.observer.id()));
        }
        result
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name())
            .field("slot", &self.slot())
            .field("modes", &*self.modes.borrow())
            .finish()
    }
}

// =============================================================================
// Failure Construction
// =============================================================================

/// Build a validation failure carrying full diagnostic context.
pub(crate) fn validation_failure(
    member: &Rc<Member>,
    instance: &Rc<Instance>,
    expected: impl Into<String>,
    value: &Value,
) -> LatticeError {
    LatticeError::Validation(ValidationError {
        member: member.name(),
        class: instance.class().name().clone(),
        expected: expected.into(),
        got: value.kind(),
        value: value.clone(),
    })
}

// =============================================================================
// Tests
// =============================================================================
