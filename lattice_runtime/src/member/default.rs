//! Default-value facet.
//!
//! Computes the value stored into an empty slot on first read. Container
//! modes materialize a fresh container per instance; the mode context is
//! only ever a template, never shared storage.

use crate::error::{AccessError, DeclarationError, LatticeResult};
use crate::member::Member;
use crate::object::Instance;
use lattice_core::{HashedValue, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::Rc;

// =============================================================================
// Hook Signatures
// =============================================================================

/// Zero-argument default factory.
pub type CallObjectDefaultFn = Rc<dyn Fn() -> LatticeResult<Value>>;

/// Default factory receiving the owning instance.
pub type ObjectDefaultFn = Rc<dyn Fn(&Rc<Instance>) -> LatticeResult<Value>>;

/// Default factory receiving the member and the owning instance.
pub type MemberDefaultFn = Rc<dyn Fn(&Rc<Member>, &Rc<Instance>) -> LatticeResult<Value>>;

// =============================================================================
// Default Mode
// =============================================================================

/// How a member computes a missing value.
#[derive(Clone)]
pub enum DefaultMode {
    /// No default; an empty read yields null.
    NoOp,

    /// Share an immutable constant.
    Static(Value),

    /// Fresh list per instance, copied from an optional template.
    List(Option<Rc<[Value]>>),

    /// Fresh set per instance, copied from an optional template.
    Set(Option<Rc<[Value]>>),

    /// Fresh dict per instance, copied from an optional template.
    Dict(Option<Rc<[(Value, Value)]>>),

    /// Recurse into another member's default.
    Delegate(Rc<Member>),

    /// Invoke a zero-argument factory.
    CallObject(CallObjectDefaultFn),

    /// Invoke a factory with the owning instance.
    ObjectMethod(ObjectDefaultFn),

    /// Invoke a factory with the member and the owning instance.
    MemberMethod(MemberDefaultFn),

    /// No default exists; the member must be written before first read.
    NonOptional,
}

impl DefaultMode {
    /// Name of the mode, for diagnostics.
    pub const fn mode_name(&self) -> &'static str {
        match self {
            Self::NoOp => "NoOp",
            Self::Static(_) => "Static",
            Self::List(_) => "List",
            Self::Set(_) => "Set",
            Self::Dict(_) => "Dict",
            Self::Delegate(_) => "Delegate",
            Self::CallObject(_) => "CallObject",
            Self::ObjectMethod(_) => "ObjectMethod",
            Self::MemberMethod(_) => "MemberMethod",
            Self::NonOptional => "NonOptional",
        }
    }

    /// Check the mode context at declaration time.
    ///
    /// Set and dict templates must hold hashable elements/keys; catching
    /// that here keeps the access-time path infallible on that axis.
    pub(crate) fn check_context(&self, member: &Member) -> Result<(), DeclarationError> {
        let bad = |reason: String| DeclarationError::BadContext {
            member: member.name().as_str().to_string(),
            facet: "default",
            reason,
        };
        match self {
            Self::Set(Some(template)) => {
                for item in template.iter() {
                    if let Err(e) = HashedValue::new(item.clone()) {
                        return Err(bad(format!("set template: {}", e)));
                    }
                }
                Ok(())
            }
            Self::Dict(Some(template)) => {
                for (key, _) in template.iter() {
                    if let Err(e) = HashedValue::new(key.clone()) {
                        return Err(bad(format!("dict template key: {}", e)));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Compute the default for `member` on `instance`.
    pub(crate) fn run(
        &self,
        member: &Rc<Member>,
        instance: &Rc<Instance>,
    ) -> LatticeResult<Value> {
        match self {
            Self::NoOp => Ok(Value::Null),
            Self::Static(value) => Ok(value.clone()),
            Self::List(template) => {
                let items = template.as_deref().unwrap_or(&[]).to_vec();
                Ok(Value::list(items))
            }
            Self::Set(template) => {
                let mut set = FxHashSet::default();
                for item in template.as_deref().unwrap_or(&[]) {
                    // Hashability was checked when the mode was declared.
                    let hashed = HashedValue::new(item.clone()).map_err(|e| {
                        DeclarationError::BadContext {
                            member: member.name().as_str().to_string(),
                            facet: "default",
                            reason: e.to_string(),
                        }
                    })?;
                    set.insert(hashed);
                }
                Ok(Value::Set(Rc::new(RefCell::new(set))))
            }
            Self::Dict(template) => {
                let mut map = FxHashMap::default();
                for (key, value) in template.as_deref().unwrap_or(&[]) {
                    let hashed = HashedValue::new(key.clone()).map_err(|e| {
                        DeclarationError::BadContext {
                            member: member.name().as_str().to_string(),
                            facet: "default",
                            reason: e.to_string(),
                        }
                    })?;
                    map.insert(hashed, value.clone());
                }
                Ok(Value::Dict(Rc::new(RefCell::new(map))))
            }
            Self::Delegate(target) => target.do_default(instance),
            Self::CallObject(factory) => factory(),
            Self::ObjectMethod(factory) => factory(instance),
            Self::MemberMethod(factory) => factory(member, instance),
            Self::NonOptional => Err(AccessError::MissingValue {
                class: instance.class().name().clone(),
                name: member.name().clone(),
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for DefaultMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_name())
    }
}

// =============================================================================
// Tests
// =============================================================================
