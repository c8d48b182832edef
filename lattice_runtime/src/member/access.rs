//! Access-strategy facets: get, set, post-set, delete, and serialization.
//!
//! Each facet is its own dispatch table, independent of validation, so a
//! member composes one default mode, one validate mode, and one access
//! strategy per direction orthogonally. The state machine that consumes
//! these modes lives in `object::instance`.

use crate::error::LatticeResult;
use crate::member::Member;
use crate::object::Instance;
use lattice_core::Value;
use std::rc::Rc;

// =============================================================================
// Hook Signatures
// =============================================================================

/// Computed-property getter.
pub type GetterFn = Rc<dyn Fn(&Rc<Instance>) -> LatticeResult<Value>>;

/// Member-aware getter.
pub type MemberGetterFn = Rc<dyn Fn(&Rc<Member>, &Rc<Instance>) -> LatticeResult<Value>>;

/// Setter hook receiving the instance, old value, and validated value.
pub type SetterFn = Rc<dyn Fn(&Rc<Instance>, Option<&Value>, &Value) -> LatticeResult<()>>;

/// Member-aware setter hook.
pub type MemberSetterFn =
    Rc<dyn Fn(&Rc<Member>, &Rc<Instance>, Option<&Value>, &Value) -> LatticeResult<()>>;

/// Per-instance serialization query.
pub type StateQueryFn = Rc<dyn Fn(&Rc<Instance>) -> LatticeResult<bool>>;

// =============================================================================
// Get Mode
// =============================================================================

/// Read strategy for a member.
#[derive(Clone)]
pub enum GetMode {
    /// Plain slot storage with default-on-first-read.
    Slot,

    /// Fire-and-discard event; not readable.
    Event,

    /// Fire-and-discard signal; not readable.
    Signal,

    /// Read through another member.
    Delegate(Rc<Member>),

    /// Computed property; never stored.
    Property(GetterFn),

    /// Computed property cached in the slot after first read.
    CachedProperty(GetterFn),

    /// Host-object read hook; never stored.
    ObjectMethod(GetterFn),

    /// Member-aware read hook; never stored.
    MemberMethod(MemberGetterFn),
}

impl GetMode {
    /// Name of the mode, for diagnostics.
    pub const fn mode_name(&self) -> &'static str {
        match self {
            Self::Slot => "Slot",
            Self::Event => "Event",
            Self::Signal => "Signal",
            Self::Delegate(_) => "Delegate",
            Self::Property(_) => "Property",
            Self::CachedProperty(_) => "CachedProperty",
            Self::ObjectMethod(_) => "ObjectMethod",
            Self::MemberMethod(_) => "MemberMethod",
        }
    }
}

impl std::fmt::Debug for GetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_name())
    }
}

// =============================================================================
// Set Mode
// =============================================================================

/// Write strategy for a member.
#[derive(Clone)]
pub enum SetMode {
    /// Plain slot storage.
    Slot,

    /// Never writable; the value comes from the default on first read.
    Constant,

    /// Writable exactly once, immutable afterwards.
    ReadOnly,

    /// Validate and notify without storing.
    Event,

    /// Notify without validating or storing.
    Signal,

    /// Write through another member.
    Delegate(Rc<Member>),

    /// Property setter; `None` makes the property read-only.
    Property(Option<SetterFn>),

    /// Host-object write hook; never stored.
    ObjectMethod(SetterFn),

    /// Member-aware write hook; never stored.
    MemberMethod(MemberSetterFn),
}

impl SetMode {
    /// Name of the mode, for diagnostics.
    pub const fn mode_name(&self) -> &'static str {
        match self {
            Self::Slot => "Slot",
            Self::Constant => "Constant",
            Self::ReadOnly => "ReadOnly",
            Self::Event => "Event",
            Self::Signal => "Signal",
            Self::Delegate(_) => "Delegate",
            Self::Property(_) => "Property",
            Self::ObjectMethod(_) => "ObjectMethod",
            Self::MemberMethod(_) => "MemberMethod",
        }
    }
}

impl std::fmt::Debug for SetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_name())
    }
}

// =============================================================================
// Post-Set Mode
// =============================================================================

/// Side effect invoked after a successful, value-changing store.
#[derive(Clone)]
pub enum PostSetMode {
    /// No side effect.
    NoOp,

    /// Recurse into another member's post-set facet.
    Delegate(Rc<Member>),

    /// Host-object hook.
    ObjectMethod(SetterFn),

    /// Member-aware hook.
    MemberMethod(MemberSetterFn),
}

impl PostSetMode {
    /// Name of the mode, for diagnostics.
    pub const fn mode_name(&self) -> &'static str {
        match self {
            Self::NoOp => "NoOp",
            Self::Delegate(_) => "Delegate",
            Self::ObjectMethod(_) => "ObjectMethod",
            Self::MemberMethod(_) => "MemberMethod",
        }
    }

    pub(crate) fn run(
        &self,
        member: &Rc<Member>,
        instance: &Rc<Instance>,
        old: Option<&Value>,
        new: &Value,
    ) -> LatticeResult<()> {
        match self {
            Self::NoOp => Ok(()),
            Self::Delegate(target) => target.post_set(instance, old, new),
            Self::ObjectMethod(hook) => hook(instance, old, new),
            Self::MemberMethod(hook) => hook(member, instance, old, new),
        }
    }
}

impl std::fmt::Debug for PostSetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_name())
    }
}

// =============================================================================
// Delete Mode
// =============================================================================

/// Delete strategy for a member.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum DelMode {
    /// Clear the slot back to empty.
    Slot,

    /// Deletion forbidden: constant member.
    Constant,

    /// Deletion forbidden: read-only member.
    ReadOnly,

    /// Deletion forbidden: event member.
    Event,

    /// Deletion forbidden: signal member.
    Signal,

    /// Deletion forbidden: computed property.
    Property,
}

impl DelMode {
    /// Name of the mode, for diagnostics.
    pub const fn mode_name(self) -> &'static str {
        match self {
            Self::Slot => "Slot",
            Self::Constant => "constant",
            Self::ReadOnly => "read-only",
            Self::Event => "event",
            Self::Signal => "signal",
            Self::Property => "property",
        }
    }
}

impl std::fmt::Debug for DelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_name())
    }
}

// =============================================================================
// Get-State Mode
// =============================================================================

/// Whether a member participates in serialized state.
///
/// The serialization collaborator queries the yes/no decision per member;
/// the format itself is out of scope here.
#[derive(Clone)]
pub enum GetStateMode {
    /// Always include.
    Include,

    /// Never include.
    Exclude,

    /// Include only when the slot holds a value.
    IncludeNonDefault,

    /// Computed property: include (the serializer reads through `get`).
    Property,

    /// Ask a host hook per instance.
    ObjectMethod(StateQueryFn),
}

impl GetStateMode {
    /// Name of the mode, for diagnostics.
    pub const fn mode_name(&self) -> &'static str {
        match self {
            Self::Include => "Include",
            Self::Exclude => "Exclude",
            Self::IncludeNonDefault => "IncludeNonDefault",
            Self::Property => "Property",
            Self::ObjectMethod(_) => "ObjectMethod",
        }
    }
}

impl std::fmt::Debug for GetStateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_name())
    }
}
