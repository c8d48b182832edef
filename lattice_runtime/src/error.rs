//! Error taxonomy for the attribute runtime.
//!
//! Four failure classes with distinct recovery policies:
//!
//! - [`DeclarationError`]: malformed facet mode/context at declaration
//!   time. Fatal; the owning class cannot be finalized.
//! - [`ValidationError`]: a rejected value at read/write time. Recoverable
//!   by the caller; carries the member, owning class, and offending value.
//! - [`AccessError`]: a write to a constant/read-only/frozen target, or an
//!   internal structural inconsistency such as a slot index out of range.
//! - [`LatticeError::Observer`]: an observer callback failed during
//!   dispatch. Surfaced to the attribute-write caller after pool
//!   bookkeeping completes.

use lattice_core::{InternedString, TypeKind, Value};
use std::fmt;

// =============================================================================
// Declaration Errors
// =============================================================================

/// Error raised while declaring members or finalizing a class layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// Two members were registered under the same name.
    DuplicateMember { class: String, name: String },

    /// A member was registered into more than one layout without cloning.
    MemberReused { name: String },

    /// A facet mode was given a context of the wrong shape.
    BadContext {
        member: String,
        facet: &'static str,
        reason: String,
    },

    /// A range mode with low > high.
    InvalidRange { member: String, reason: String },

    /// An enum mode with no allowed values.
    EmptyEnum { member: String },

    /// A validation-error hook returned normally instead of failing.
    HookReturnedNormally { member: String },
}

impl fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateMember { class, name } => {
                write!(f, "duplicate member '{}' on class '{}'", name, class)
            }
            Self::MemberReused { name } => {
                write!(
                    f,
                    "member '{}' is already linked to a class layout; clone it first",
                    name
                )
            }
            Self::BadContext {
                member,
                facet,
                reason,
            } => {
                write!(
                    f,
                    "invalid {} mode context for member '{}': {}",
                    facet, member, reason
                )
            }
            Self::InvalidRange { member, reason } => {
                write!(f, "invalid range for member '{}': {}", member, reason)
            }
            Self::EmptyEnum { member } => {
                write!(f, "enum mode for member '{}' allows no values", member)
            }
            Self::HookReturnedNormally { member } => {
                write!(
                    f,
                    "validation error hook for member '{}' returned normally instead of failing",
                    member
                )
            }
        }
    }
}

impl std::error::Error for DeclarationError {}

// =============================================================================
// Validation Errors
// =============================================================================

/// A value was rejected by a member's validation pipeline.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Name of the rejecting member.
    pub member: InternedString,

    /// Name of the owning class.
    pub class: InternedString,

    /// Description of what the member accepts.
    pub expected: String,

    /// Observed kind of the rejected value.
    pub got: TypeKind,

    /// The rejected value.
    pub value: Value,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the '{}' member of a '{}' object must be {}, but a value of {} ({}) was given",
            self.member,
            self.class,
            self.expected,
            self.value.repr(),
            self.got
        )
    }
}

impl std::error::Error for ValidationError {}

// =============================================================================
// Access Errors
// =============================================================================

/// The attribute access protocol rejected an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The name is not a declared member of the class.
    UnknownAttribute {
        class: InternedString,
        name: InternedString,
    },

    /// Write or delete on a frozen instance.
    Frozen {
        class: InternedString,
        name: InternedString,
    },

    /// Write to a constant member.
    ConstantWrite {
        class: InternedString,
        name: InternedString,
    },

    /// Second write to a read-only member, or write through a setter-less
    /// property.
    ReadOnlyWrite {
        class: InternedString,
        name: InternedString,
    },

    /// Read of an event or signal member.
    WriteOnly {
        class: InternedString,
        name: InternedString,
    },

    /// Delete of a member whose access strategy forbids it.
    Undeletable {
        class: InternedString,
        name: InternedString,
        strategy: &'static str,
    },

    /// Read of a member with no default and no stored value.
    MissingValue {
        class: InternedString,
        name: InternedString,
    },

    /// Internal inconsistency: a slot index outside the instance's array.
    /// `class` is the owning class; out-of-range slots have no member name.
    SlotOutOfRange {
        class: InternedString,
        slot: u32,
        len: usize,
    },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAttribute { class, name } => {
                write!(f, "'{}' object has no member '{}'", class, name)
            }
            Self::Frozen { class, name } => {
                write!(
                    f,
                    "cannot modify '{}' on a frozen '{}' object",
                    name, class
                )
            }
            Self::ConstantWrite { class, name } => {
                write!(
                    f,
                    "cannot write to constant member '{}' of a '{}' object",
                    name, class
                )
            }
            Self::ReadOnlyWrite { class, name } => {
                write!(
                    f,
                    "cannot write to read-only member '{}' of a '{}' object",
                    name, class
                )
            }
            Self::WriteOnly { class, name } => {
                write!(
                    f,
                    "member '{}' of a '{}' object is write-only",
                    name, class
                )
            }
            Self::Undeletable {
                class,
                name,
                strategy,
            } => {
                write!(
                    f,
                    "cannot delete {} member '{}' of a '{}' object",
                    strategy, name, class
                )
            }
            Self::MissingValue { class, name } => {
                write!(
                    f,
                    "member '{}' of a '{}' object has no default and has not been set",
                    name, class
                )
            }
            Self::SlotOutOfRange { class, slot, len } => {
                write!(
                    f,
                    "slot {} out of range for a '{}' object with {} slots",
                    slot, class, len
                )
            }
        }
    }
}

impl std::error::Error for AccessError {}

// =============================================================================
// Unified Error
// =============================================================================

/// Top-level error type for all runtime operations.
#[derive(Debug)]
pub enum LatticeError {
    /// Malformed declaration; fatal to class finalization.
    Declaration(DeclarationError),

    /// Rejected value; recoverable by the caller.
    Validation(ValidationError),

    /// Contract violation in the access protocol.
    Access(AccessError),

    /// An observer callback failed while a change was being dispatched.
    Observer {
        topic: InternedString,
        source: Box<LatticeError>,
    },
}

impl fmt::Display for LatticeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declaration(e) => fmt::Display::fmt(e, f),
            Self::Validation(e) => fmt::Display::fmt(e, f),
            Self::Access(e) => fmt::Display::fmt(e, f),
            Self::Observer { topic, source } => {
                write!(f, "observer on topic '{}' failed: {}", topic, source)
            }
        }
    }
}

impl std::error::Error for LatticeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Declaration(e) => Some(e),
            Self::Validation(e) => Some(e),
            Self::Access(e) => Some(e),
            Self::Observer { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<DeclarationError> for LatticeError {
    fn from(e: DeclarationError) -> Self {
        Self::Declaration(e)
    }
}

impl From<ValidationError> for LatticeError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<AccessError> for LatticeError {
    fn from(e: AccessError) -> Self {
        Self::Access(e)
    }
}

impl LatticeError {
    /// Check whether this is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check whether this is an access violation.
    pub fn is_access(&self) -> bool {
        matches!(self, Self::Access(_))
    }
}

/// Result alias for runtime operations.
pub type LatticeResult<T> = Result<T, LatticeError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::intern;

    #[test]
    fn test_display_validation() {
        let err = ValidationError {
            member: intern("count"),
            class: intern("Widget"),
            expected: "of type 'int'".to_string(),
            got: TypeKind::Str,
            value: Value::str("x"),
        };
        let text = err.to_string();
        assert!(text.contains("'count'"));
        assert!(text.contains("'Widget'"));
        assert!(text.contains("str"));
    }

    #[test]
    fn test_observer_error_source_chain() {
        let inner = LatticeError::Access(AccessError::Frozen {
            class: intern("Widget"),
            name: intern("count"),
        });
        let outer = LatticeError::Observer {
            topic: intern("count"),
            source: Box::new(inner),
        };
        assert!(std::error::Error::source(&outer).is_some());
        assert!(outer.to_string().contains("frozen"));
    }

    #[test]
    fn test_classification() {
        let v = LatticeError::Validation(ValidationError {
            member: intern("m"),
            class: intern("C"),
            expected: "of type 'int'".into(),
            got: TypeKind::Null,
            value: Value::Null,
        });
        assert!(v.is_validation());
        assert!(!v.is_access());
    }
}
