//! Dynamically-typed runtime values.
//!
//! `Value` is the unit of attribute storage: a clone-cheap tagged union
//! over the scalar and container types the validation engine understands.
//! Heap payloads are reference counted, so cloning a `Value` never copies
//! container contents; the validation engine's copy-on-validate rule is
//! what produces fresh containers, not `Clone`.
//!
//! # Equality and identity
//!
//! `PartialEq` is structural and discriminant-strict (`Int(3)` is not equal
//! to `Float(3.0)`); callables compare by identity. `Value::is` compares
//! identity: pointer equality for heap payloads, value equality for
//! scalars. The attribute write path uses structural equality for its
//! notification short-circuit and relies on identity preservation when a
//! write is skipped.

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

// =============================================================================
// Errors
// =============================================================================

/// Error raised by value-level operations (hashing, host callables).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueError {
    /// Human-readable description.
    pub message: String,
}

impl ValueError {
    /// Create a new value error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValueError {}

// =============================================================================
// Type Kind
// =============================================================================

/// Dense type tag for a `Value`.
///
/// The validation engine's Typed/OptionalTyped/Coerced modes dispatch on
/// this tag rather than on full type objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Tuple,
    List,
    Set,
    Dict,
    Callable,
}

impl TypeKind {
    /// Get the user-facing name of this kind.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::Tuple => "tuple",
            Self::List => "list",
            Self::Set => "set",
            Self::Dict => "dict",
            Self::Callable => "callable",
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Callable
// =============================================================================

/// A host-provided callable value.
///
/// Compared by identity; two callables are equal only if they share the
/// same allocation.
#[derive(Clone)]
pub struct Callable(Rc<dyn Fn(&[Value]) -> Result<Value, ValueError>>);

impl Callable {
    /// Wrap a closure as a callable value.
    pub fn new(f: impl Fn(&[Value]) -> Result<Value, ValueError> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the callable.
    #[inline]
    pub fn call(&self, args: &[Value]) -> Result<Value, ValueError> {
        (self.0)(args)
    }

    /// Identity of the underlying allocation.
    #[inline]
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Callable {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<callable {:#x}>", self.id())
    }
}

// =============================================================================
// Value
// =============================================================================

/// Mutable list payload.
pub type ListCell = Rc<RefCell<Vec<Value>>>;
/// Mutable set payload.
pub type SetCell = Rc<RefCell<FxHashSet<HashedValue>>>;
/// Mutable dict payload.
pub type DictCell = Rc<RefCell<FxHashMap<HashedValue, Value>>>;

/// A dynamically-typed runtime value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<[Value]>),
    List(ListCell),
    Set(SetCell),
    Dict(DictCell),
    Callable(Callable),
}

impl Value {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a string value.
    pub fn str(text: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(text.as_ref()))
    }

    /// Create a bytes value.
    pub fn bytes(data: impl AsRef<[u8]>) -> Self {
        Self::Bytes(Rc::from(data.as_ref()))
    }

    /// Create a tuple value.
    pub fn tuple(items: Vec<Value>) -> Self {
        Self::Tuple(Rc::from(items))
    }

    /// Create a list value.
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    /// Create a set value. Fails if any element is unhashable.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Result<Self, ValueError> {
        let mut set = FxHashSet::default();
        for item in items {
            set.insert(HashedValue::new(item)?);
        }
        Ok(Self::Set(Rc::new(RefCell::new(set))))
    }

    /// Create a dict value. Fails if any key is unhashable.
    pub fn dict(pairs: impl IntoIterator<Item = (Value, Value)>) -> Result<Self, ValueError> {
        let mut map = FxHashMap::default();
        for (key, value) in pairs {
            map.insert(HashedValue::new(key)?, value);
        }
        Ok(Self::Dict(Rc::new(RefCell::new(map))))
    }

    /// Create a callable value.
    pub fn callable(f: impl Fn(&[Value]) -> Result<Value, ValueError> + 'static) -> Self {
        Self::Callable(Callable::new(f))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Get the type tag of this value.
    #[inline]
    pub fn kind(&self) -> TypeKind {
        match self {
            Self::Null => TypeKind::Null,
            Self::Bool(_) => TypeKind::Bool,
            Self::Int(_) => TypeKind::Int,
            Self::Float(_) => TypeKind::Float,
            Self::Str(_) => TypeKind::Str,
            Self::Bytes(_) => TypeKind::Bytes,
            Self::Tuple(_) => TypeKind::Tuple,
            Self::List(_) => TypeKind::List,
            Self::Set(_) => TypeKind::Set,
            Self::Dict(_) => TypeKind::Dict,
            Self::Callable(_) => TypeKind::Callable,
        }
    }

    /// Check if this value is null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness: null, false, zero, and empty containers are false.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::Tuple(t) => !t.is_empty(),
            Self::List(l) => !l.borrow().is_empty(),
            Self::Set(s) => !s.borrow().is_empty(),
            Self::Dict(d) => !d.borrow().is_empty(),
            Self::Callable(_) => true,
        }
    }

    /// Identity comparison: pointer equality for heap payloads, value
    /// equality for scalars.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b),
            (Self::Bytes(a), Self::Bytes(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Callable(a), Self::Callable(b)) => a == b,
            _ => false,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get as bool.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as int.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as float.
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as str.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get as bytes.
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get as tuple items.
    #[inline]
    pub fn as_tuple(&self) -> Option<&Rc<[Value]>> {
        match self {
            Self::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// Get as list cell.
    #[inline]
    pub fn as_list(&self) -> Option<&ListCell> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get as set cell.
    #[inline]
    pub fn as_set(&self) -> Option<&SetCell> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Get as dict cell.
    #[inline]
    pub fn as_dict(&self) -> Option<&DictCell> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Get as callable.
    #[inline]
    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Self::Callable(c) => Some(c),
            _ => None,
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Render the value for error messages.
    pub fn repr(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Self::Str(s) => format!("{:?}", s),
            Self::Bytes(b) => format!("b\"{}\"", b.escape_ascii()),
            Self::Tuple(t) => {
                let items: Vec<_> = t.iter().map(Value::repr).collect();
                format!("({})", items.join(", "))
            }
            Self::List(l) => {
                let items: Vec<_> = l.borrow().iter().map(Value::repr).collect();
                format!("[{}]", items.join(", "))
            }
            Self::Set(s) => {
                let items: Vec<_> = s.borrow().iter().map(|h| h.value().repr()).collect();
                format!("{{{}}}", items.join(", "))
            }
            Self::Dict(d) => {
                let items: Vec<_> = d
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.value().repr(), v.repr()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Self::Callable(c) => format!("{:?}", c),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Callable(a), Self::Callable(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

// =============================================================================
// Hashed Value
// =============================================================================

/// A `Value` guaranteed hashable at construction time.
///
/// Scalars, strings, bytes, and tuples of hashable values qualify; mutable
/// containers and callables do not (interior mutation would silently break
/// table invariants). NaN floats are rejected because they are not equal
/// to themselves.
#[derive(Debug, Clone)]
pub struct HashedValue {
    value: Value,
    hash: u64,
}

impl HashedValue {
    /// Wrap a value, computing its hash. Fails for unhashable values.
    pub fn new(value: Value) -> Result<Self, ValueError> {
        let hash = hash_value(&value)?;
        Ok(Self { value, hash })
    }

    /// Borrow the wrapped value.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Unwrap into the value.
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// The cached hash.
    #[inline]
    pub fn cached_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for HashedValue {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.value == other.value
    }
}

impl Eq for HashedValue {}

impl Hash for HashedValue {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Compute a structural hash for a hashable value.
fn hash_value(value: &Value) -> Result<u64, ValueError> {
    let mut hasher = FxHasher::default();
    hash_into(value, &mut hasher)?;
    Ok(hasher.finish())
}

fn hash_into(value: &Value, hasher: &mut FxHasher) -> Result<(), ValueError> {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(b) => {
            hasher.write_u8(1);
            hasher.write_u8(*b as u8);
        }
        Value::Int(i) => {
            hasher.write_u8(2);
            hasher.write_i64(*i);
        }
        Value::Float(f) => {
            if f.is_nan() {
                return Err(ValueError::new("NaN is not hashable"));
            }
            hasher.write_u8(3);
            // Normalize -0.0 so equal floats hash equally.
            let bits = if *f == 0.0 { 0u64 } else { f.to_bits() };
            hasher.write_u64(bits);
        }
        Value::Str(s) => {
            hasher.write_u8(4);
            hasher.write(s.as_bytes());
        }
        Value::Bytes(b) => {
            hasher.write_u8(5);
            hasher.write(b);
        }
        Value::Tuple(items) => {
            hasher.write_u8(6);
            hasher.write_usize(items.len());
            for item in items.iter() {
                hash_into(item, hasher)?;
            }
        }
        Value::List(_) | Value::Set(_) | Value::Dict(_) | Value::Callable(_) => {
            return Err(ValueError::new(format!(
                "values of type '{}' are not hashable",
                value.kind()
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Kind and equality
    // -------------------------------------------------------------------------

    #[test]
    fn test_kinds() {
        assert_eq!(Value::Null.kind(), TypeKind::Null);
        assert_eq!(Value::Bool(true).kind(), TypeKind::Bool);
        assert_eq!(Value::Int(1).kind(), TypeKind::Int);
        assert_eq!(Value::Float(1.5).kind(), TypeKind::Float);
        assert_eq!(Value::str("x").kind(), TypeKind::Str);
        assert_eq!(Value::bytes([1u8]).kind(), TypeKind::Bytes);
        assert_eq!(Value::tuple(vec![]).kind(), TypeKind::Tuple);
        assert_eq!(Value::list(vec![]).kind(), TypeKind::List);
        assert_eq!(Value::set([]).unwrap().kind(), TypeKind::Set);
        assert_eq!(Value::dict([]).unwrap().kind(), TypeKind::Dict);
        assert_eq!(Value::callable(|_| Ok(Value::Null)).kind(), TypeKind::Callable);
    }

    #[test]
    fn test_eq_discriminant_strict() {
        assert_ne!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Bool(true), Value::Int(1));
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_eq!(Value::Float(3.0), Value::Float(3.0));
    }

    #[test]
    fn test_eq_containers_structural() {
        let a = Value::list(vec![Value::Int(1), Value::str("x")]);
        let b = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(a, b);
        assert!(!a.is(&b));
        assert!(a.is(&a.clone()));
    }

    #[test]
    fn test_identity_scalars() {
        assert!(Value::Int(7).is(&Value::Int(7)));
        assert!(!Value::Int(7).is(&Value::Int(8)));
        let s = Value::str("shared");
        assert!(s.is(&s.clone()));
        assert!(!s.is(&Value::str("shared")));
    }

    // -------------------------------------------------------------------------
    // Truthiness
    // -------------------------------------------------------------------------

    #[test]
    fn test_truthy() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("a").truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::list(vec![Value::Null]).truthy());
    }

    // -------------------------------------------------------------------------
    // Hashed values
    // -------------------------------------------------------------------------

    #[test]
    fn test_hashable_scalars() {
        assert!(HashedValue::new(Value::Null).is_ok());
        assert!(HashedValue::new(Value::Int(4)).is_ok());
        assert!(HashedValue::new(Value::str("key")).is_ok());
        assert!(HashedValue::new(Value::tuple(vec![Value::Int(1), Value::str("a")])).is_ok());
    }

    #[test]
    fn test_unhashable() {
        assert!(HashedValue::new(Value::list(vec![])).is_err());
        assert!(HashedValue::new(Value::set([]).unwrap()).is_err());
        assert!(HashedValue::new(Value::dict([]).unwrap()).is_err());
        assert!(HashedValue::new(Value::Float(f64::NAN)).is_err());
        assert!(HashedValue::new(Value::tuple(vec![Value::list(vec![])])).is_err());
    }

    #[test]
    fn test_hash_consistency() {
        let a = HashedValue::new(Value::str("k")).unwrap();
        let b = HashedValue::new(Value::str("k")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cached_hash(), b.cached_hash());
    }

    #[test]
    fn test_negative_zero_hash() {
        let a = HashedValue::new(Value::Float(0.0)).unwrap();
        let b = HashedValue::new(Value::Float(-0.0)).unwrap();
        assert_eq!(a.cached_hash(), b.cached_hash());
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_and_dict_construction() {
        let set = Value::set([Value::Int(1), Value::Int(2), Value::Int(1)]).unwrap();
        assert_eq!(set.as_set().unwrap().borrow().len(), 2);

        let dict = Value::dict([(Value::str("a"), Value::Int(1))]).unwrap();
        assert_eq!(dict.as_dict().unwrap().borrow().len(), 1);

        assert!(Value::set([Value::list(vec![])]).is_err());
        assert!(Value::dict([(Value::list(vec![]), Value::Null)]).is_err());
    }

    // -------------------------------------------------------------------------
    // Callables and repr
    // -------------------------------------------------------------------------

    #[test]
    fn test_callable_identity_and_call() {
        let c = Value::callable(|args| Ok(args.first().cloned().unwrap_or(Value::Null)));
        assert_eq!(c, c.clone());
        let other = Value::callable(|_| Ok(Value::Null));
        assert_ne!(c, other);

        let result = c.as_callable().unwrap().call(&[Value::Int(9)]).unwrap();
        assert_eq!(result, Value::Int(9));
    }

    #[test]
    fn test_repr() {
        assert_eq!(Value::Null.repr(), "null");
        assert_eq!(Value::Int(5).repr(), "5");
        assert_eq!(Value::Float(3.0).repr(), "3.0");
        assert_eq!(Value::str("x").repr(), "\"x\"");
        assert_eq!(
            Value::tuple(vec![Value::Int(1), Value::Int(2)]).repr(),
            "(1, 2)"
        );
        assert_eq!(Value::list(vec![Value::Bool(true)]).repr(), "[true]");
    }
}
