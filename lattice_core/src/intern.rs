//! Global string interning.
//!
//! Attribute names are interned once and compared by pointer afterwards.
//! Each `InternedString` carries a precomputed `FxHasher` hash; the
//! name-to-slot index in the runtime crate consumes that cached hash
//! directly for its probe sequence, so hashing happens exactly once per
//! distinct name for the lifetime of the process.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

// =============================================================================
// Interned String
// =============================================================================

/// Backing storage for one interned string.
struct InternedStr {
    text: Box<str>,
    hash: u64,
}

/// An interned, immutable string with a cached hash.
///
/// Equality is pointer-fast: all `InternedString`s for the same text share
/// one allocation, so comparison is a pointer check with a content check
/// only as a fallback.
#[derive(Clone)]
pub struct InternedString(Arc<InternedStr>);

impl InternedString {
    /// Get the string contents.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// Get the precomputed hash of the string contents.
    #[inline]
    pub fn cached_hash(&self) -> u64 {
        self.0.hash
    }
}

impl PartialEq for InternedString {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.text == other.0.text
    }
}

impl Eq for InternedString {}

impl Hash for InternedString {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Global Interner
// =============================================================================

/// Process-wide interner table.
static INTERNER: OnceLock<Mutex<FxHashMap<Box<str>, InternedString>>> = OnceLock::new();

fn interner() -> &'static Mutex<FxHashMap<Box<str>, InternedString>> {
    INTERNER.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Hash string contents with `FxHasher` (deterministic, unseeded).
fn hash_str(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(text.as_bytes());
    hasher.finish()
}

/// Intern a string, returning the shared handle for its contents.
pub fn intern(text: &str) -> InternedString {
    let mut table = interner().lock();
    if let Some(existing) = table.get(text) {
        return existing.clone();
    }
    let interned = InternedString(Arc::new(InternedStr {
        text: text.into(),
        hash: hash_str(text),
    }));
    table.insert(text.into(), interned.clone());
    interned
}

// =============================================================================
// Tests
// =============================================================================
