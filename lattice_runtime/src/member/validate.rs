//! Validation facet.
//!
//! Every mode is a pure check-or-convert step from a candidate value to
//! the value actually stored. The composite modes (tuple/list/set/dict)
//! re-validate each element through an inner member and always produce a
//! fresh container: external mutation of the caller's container can never
//! bypass validation of the stored copy.

use crate::error::{LatticeError, LatticeResult};
use crate::member::{validation_failure, Member};
use crate::object::Instance;
use lattice_core::{HashedValue, TypeKind, Value, ValueError};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::Rc;

// =============================================================================
// Hook Signatures
// =============================================================================

/// Validation hook receiving the owning instance, old value, and candidate.
pub type ObjectValidateFn =
    Rc<dyn Fn(&Rc<Instance>, Option<&Value>, &Value) -> LatticeResult<Value>>;

/// Validation hook additionally receiving the member.
pub type MemberValidateFn =
    Rc<dyn Fn(&Rc<Member>, &Rc<Instance>, Option<&Value>, &Value) -> LatticeResult<Value>>;

/// Coercion function for the `Coerced` mode.
pub type CoerceFn = Rc<dyn Fn(&Value) -> Result<Value, ValueError>>;

// =============================================================================
// Validate Mode
// =============================================================================

/// How a member validates or coerces an incoming value.
#[derive(Clone)]
pub enum ValidateMode {
    /// Accept anything.
    NoOp,

    /// Accept bool; non-strict also truth-tests int and float.
    Bool { strict: bool },

    /// Accept int; non-strict also truncates finite floats.
    Int { strict: bool },

    /// Accept float; non-strict also promotes int.
    Float { strict: bool },

    /// Accept bytes; non-strict also encodes str as UTF-8.
    Bytes { strict: bool },

    /// Accept str; non-strict also decodes UTF-8 bytes.
    Str { strict: bool },

    /// Accept a tuple, revalidating each item through the inner member.
    Tuple(Option<Rc<Member>>),

    /// Accept a list, revalidating each item through the inner member.
    List(Option<Rc<Member>>),

    /// Accept a set, revalidating each element through the inner member.
    Set(Option<Rc<Member>>),

    /// Accept a dict, revalidating keys and values through inner members.
    Dict {
        key: Option<Rc<Member>>,
        value: Option<Rc<Member>>,
    },

    /// Accept exactly the given kind.
    Typed(TypeKind),

    /// Accept the given kind or null.
    OptionalTyped(TypeKind),

    /// Membership test against a fixed sequence; no coercion.
    Enum(Rc<[Value]>),

    /// Accept any callable value.
    Callable,

    /// Int bounds check; `None` means unbounded on that side.
    Range { low: Option<i64>, high: Option<i64> },

    /// Float bounds check; `None` means unbounded on that side.
    FloatRange { low: Option<f64>, high: Option<f64> },

    /// Accept the kind directly, else coerce once and accept only a
    /// result of that kind. A failing coercer is a validation failure,
    /// never propagated raw.
    Coerced { kind: TypeKind, coerce: CoerceFn },

    /// Recurse into another member's validate facet.
    Delegate(Rc<Member>),

    /// Host-object validation hook.
    ObjectMethod(ObjectValidateFn),

    /// Member-aware validation hook.
    MemberMethod(MemberValidateFn),
}

impl ValidateMode {
    /// Name of the mode, for diagnostics.
    pub const fn mode_name(&self) -> &'static str {
        match self {
            Self::NoOp => "NoOp",
            Self::Bool { .. } => "Bool",
            Self::Int { .. } => "Int",
            Self::Float { .. } => "Float",
            Self::Bytes { .. } => "Bytes",
            Self::Str { .. } => "Str",
            Self::Tuple(_) => "Tuple",
            Self::List(_) => "List",
            Self::Set(_) => "Set",
            Self::Dict { .. } => "Dict",
            Self::Typed(_) => "Typed",
            Self::OptionalTyped(_) => "OptionalTyped",
            Self::Enum(_) => "Enum",
            Self::Callable => "Callable",
            Self::Range { .. } => "Range",
            Self::FloatRange { .. } => "FloatRange",
            Self::Coerced { .. } => "Coerced",
            Self::Delegate(_) => "Delegate",
            Self::ObjectMethod(_) => "ObjectMethod",
            Self::MemberMethod(_) => "MemberMethod",
        }
    }

    /// Check the mode context at declaration time.
    pub(crate) fn check_context(&self, member: &Member) -> Result<(), crate::error::DeclarationError> {
        use crate::error::DeclarationError;
        let name = || member.name().as_str().to_string();
        match self {
            Self::Range { low, high } => {
                if let (Some(lo), Some(hi)) = (low, high) {
                    if lo > hi {
                        return Err(DeclarationError::InvalidRange {
                            member: name(),
                            reason: format!("low {} exceeds high {}", lo, hi),
                        });
                    }
                }
                Ok(())
            }
            Self::FloatRange { low, high } => {
                if low.map_or(false, |f| f.is_nan()) || high.map_or(false, |f| f.is_nan()) {
                    return Err(DeclarationError::InvalidRange {
                        member: name(),
                        reason: "bounds must not be NaN".to_string(),
                    });
                }
                if let (Some(lo), Some(hi)) = (low, high) {
                    if lo > hi {
                        return Err(DeclarationError::InvalidRange {
                            member: name(),
                            reason: format!("low {} exceeds high {}", lo, hi),
                        });
                    }
                }
                Ok(())
            }
            Self::Enum(items) => {
                if items.is_empty() {
                    return Err(DeclarationError::EmptyEnum { member: name() });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Validate `new` for `member` on `instance`.
    pub(crate) fn run(
        &self,
        member: &Rc<Member>,
        instance: &Rc<Instance>,
        old: Option<&Value>,
        new: Value,
    ) -> LatticeResult<Value> {
        let fail = |expected: &str, value: &Value| -> LatticeError {
            validation_failure(member, instance, expected, value)
        };
        match self {
            Self::NoOp => Ok(new),

            Self::Bool { strict } => match new {
                Value::Bool(_) => Ok(new),
                Value::Int(i) if !strict => Ok(Value::Bool(i != 0)),
                Value::Float(f) if !strict => Ok(Value::Bool(f != 0.0)),
                other => Err(fail("of type 'bool'", &other)),
            },

            Self::Int { strict } => match new {
                Value::Int(_) => Ok(new),
                Value::Float(f) if !strict => {
                    // Host int-conversion rule: truncation toward zero.
                    let t = f.trunc();
                    if f.is_finite() && t >= i64::MIN as f64 && t <= i64::MAX as f64 {
                        Ok(Value::Int(t as i64))
                    } else {
                        Err(fail("of type 'int'", &Value::Float(f)))
                    }
                }
                other => Err(fail("of type 'int'", &other)),
            },

            Self::Float { strict } => match new {
                Value::Float(_) => Ok(new),
                Value::Int(i) if !strict => Ok(Value::Float(i as f64)),
                other => Err(fail("of type 'float'", &other)),
            },

            Self::Bytes { strict } => match new {
                Value::Bytes(_) => Ok(new),
                Value::Str(s) if !strict => Ok(Value::bytes(s.as_bytes())),
                other => Err(fail("of type 'bytes'", &other)),
            },

            Self::Str { strict } => match new {
                Value::Str(_) => Ok(new),
                Value::Bytes(b) if !strict => match std::str::from_utf8(&b) {
                    Ok(text) => Ok(Value::str(text)),
                    Err(_) => Err(fail("of type 'str'", &Value::Bytes(b))),
                },
                other => Err(fail("of type 'str'", &other)),
            },

            Self::Tuple(inner) => match new {
                Value::Tuple(items) => {
                    let mut fresh = Vec::with_capacity(items.len());
                    for item in items.iter() {
                        fresh.push(validate_item(inner, instance, item)?);
                    }
                    Ok(Value::tuple(fresh))
                }
                other => Err(fail("of type 'tuple'", &other)),
            },

            Self::List(inner) => match new {
                Value::List(items) => {
                    let source = items.borrow();
                    let mut fresh = Vec::with_capacity(source.len());
                    for item in source.iter() {
                        fresh.push(validate_item(inner, instance, item)?);
                    }
                    drop(source);
                    Ok(Value::list(fresh))
                }
                other => Err(fail("of type 'list'", &other)),
            },

            Self::Set(inner) => match new {
                Value::Set(items) => {
                    let source = items.borrow();
                    let mut fresh = FxHashSet::default();
                    for item in source.iter() {
                        let validated = validate_item(inner, instance, item.value())?;
                        let hashed = HashedValue::new(validated.clone())
                            .map_err(|_| fail("a set of hashable values", &validated))?;
                        fresh.insert(hashed);
                    }
                    drop(source);
                    Ok(Value::Set(Rc::new(RefCell::new(fresh))))
                }
                other => Err(fail("of type 'set'", &other)),
            },

            Self::Dict { key, value } => match new {
                Value::Dict(entries) => {
                    let source = entries.borrow();
                    let mut fresh = FxHashMap::default();
                    for (k, v) in source.iter() {
                        let vk = validate_item(key, instance, k.value())?;
                        let vv = validate_item(value, instance, v)?;
                        let hashed = HashedValue::new(vk.clone())
                            .map_err(|_| fail("a dict with hashable keys", &vk))?;
                        fresh.insert(hashed, vv);
                    }
                    drop(source);
                    Ok(Value::Dict(Rc::new(RefCell::new(fresh))))
                }
                other => Err(fail("of type 'dict'", &other)),
            },

            Self::Typed(kind) => {
                if new.kind() == *kind {
                    Ok(new)
                } else {
                    Err(fail(&format!("of type '{}'", kind), &new))
                }
            }

            Self::OptionalTyped(kind) => {
                if new.is_null() || new.kind() == *kind {
                    Ok(new)
                } else {
                    Err(fail(&format!("of type '{}' or null", kind), &new))
                }
            }

            Self::Enum(items) => {
                if items.iter().any(|item| *item == new) {
                    Ok(new)
                } else {
                    Err(fail("one of the allowed enum values", &new))
                }
            }

            Self::Callable => {
                if new.kind() == TypeKind::Callable {
                    Ok(new)
                } else {
                    Err(fail("a callable", &new))
                }
            }

            Self::Range { low, high } => {
                let checked = Self::Int { strict: false }.run(member, instance, old, new)?;
                let i = checked.as_int().unwrap_or_default();
                if low.map_or(false, |lo| i < lo) || high.map_or(false, |hi| i > hi) {
                    return Err(fail(
                        &format!(
                            "an int in the range [{}, {}]",
                            bound_repr(*low),
                            bound_repr(*high)
                        ),
                        &checked,
                    ));
                }
                Ok(checked)
            }

            Self::FloatRange { low, high } => {
                let checked = Self::Float { strict: false }.run(member, instance, old, new)?;
                let f = checked.as_float().unwrap_or_default();
                if low.map_or(false, |lo| f < lo) || high.map_or(false, |hi| f > hi) {
                    return Err(fail(
                        &format!(
                            "a float in the range [{}, {}]",
                            bound_repr(*low),
                            bound_repr(*high)
                        ),
                        &checked,
                    ));
                }
                Ok(checked)
            }

            Self::Coerced { kind, coerce } => {
                if new.kind() == *kind {
                    return Ok(new);
                }
                match coerce(&new) {
                    Ok(result) if result.kind() == *kind => Ok(result),
                    // A failing or mistyped coercer is a validation
                    // failure on the original value, not a raw error.
                    _ => Err(fail(&format!("coercible to '{}'", kind), &new)),
                }
            }

            Self::Delegate(target) => target.validate(instance, old, new),

            Self::ObjectMethod(hook) => hook(instance, old, &new),

            Self::MemberMethod(hook) => hook(member, instance, old, &new),
        }
    }
}

/// Run one element through an optional inner member's full pipeline.
fn validate_item(
    inner: &Option<Rc<Member>>,
    instance: &Rc<Instance>,
    item: &Value,
) -> LatticeResult<Value> {
    match inner {
        Some(member) => member.full_validate(instance, None, item.clone()),
        None => Ok(item.clone()),
    }
}

fn bound_repr<T: std::fmt::Display>(bound: Option<T>) -> String {
    match bound {
        Some(b) => b.to_string(),
        None => "unbounded".to_string(),
    }
}

impl std::fmt::Debug for ValidateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_name())
    }
}

// =============================================================================
// Post-Validate Mode
// =============================================================================

/// Second validation stage, run only after `ValidateMode` succeeds.
#[derive(Clone)]
pub enum PostValidateMode {
    /// Accept the validated value unchanged.
    NoOp,

    /// Recurse into another member's post-validate facet.
    Delegate(Rc<Member>),

    /// Host-object hook.
    ObjectMethod(ObjectValidateFn),

    /// Member-aware hook.
    MemberMethod(MemberValidateFn),
}

impl PostValidateMode {
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
        validated: Value,
    ) -> LatticeResult<Value> {
        match self {
            Self::NoOp => Ok(validated),
            Self::Delegate(target) => target.post_validate(instance, old, validated),
            Self::ObjectMethod(hook) => hook(instance, old, &validated),
            Self::MemberMethod(hook) => hook(member, instance, old, &validated),
        }
    }
}

impl std::fmt::Debug for PostValidateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_name())
    }
}

// =============================================================================
// Tests
// =============================================================================
