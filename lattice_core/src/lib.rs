//! Core value model for the lattice typed-attribute runtime.
//!
//! This crate provides:
//! - The dynamically-typed `Value` representation used for attribute storage
//! - `TypeKind` tags for fast type dispatch in the validation engine
//! - `HashedValue` wrappers for set elements and dict keys
//! - A global string interner (`InternedString`) with precomputed hashes
//!
//! Everything here is a leaf dependency of `lattice_runtime`: the runtime's
//! member dispatch tables, slot storage, and observer machinery all traffic
//! in these types.

pub mod intern;
pub mod value;

pub use intern::{intern, InternedString};
pub use value::{Callable, HashedValue, TypeKind, Value, ValueError};
