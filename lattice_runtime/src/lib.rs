//! Typed-attribute object runtime.
//!
//! This crate implements a per-class attribute system in which every
//! attribute is described by a [`Member`]: a bundle of behavior modes,
//! one per facet (default, validate, post-validate, get, set, post-set,
//! delete, get-state). A [`ClassLayout`] finalizes an ordered member set
//! into a build-once open-addressed name index with contiguous slot
//! numbering, and every [`Instance`] of the class is just a slot array
//! routed through those modes.
//!
//! # Architecture
//!
//! - [`member`]: behavior descriptors, the facet mode enums, and the
//!   name-to-slot index
//! - [`object`]: class layouts, instances, and guarded back-pointers
//! - [`observe`]: change records, static and dynamic observers, and the
//!   reentrancy-safe topic pools
//! - [`error`]: the declaration/validation/access/observer taxonomy
//!
//! # Reentrancy
//!
//! Everything runs on one logical thread; hooks and observer callbacks
//! are the only source of reentrancy. No internal borrow is held across
//! a callback, and structural mutation of an observer pool during its
//! own dispatch is queued and applied when the outermost dispatch
//! unwinds, so callbacks may freely read, write, subscribe, unsubscribe,
//! and even tear down the objects they observe.
//!
//! # Example
//!
//! ```
//! use lattice_runtime::{ClassLayout, Instance, Member, ValidateMode};
//! use lattice_core::{intern, Value};
//!
//! let count = Member::new("count");
//! count.set_validate_mode(ValidateMode::Int { strict: false })?;
//! let layout = ClassLayout::build("Counter", vec![(intern("count"), count)])?;
//!
//! let counter = Instance::new(&layout);
//! counter.set(&intern("count"), Value::Int(3))?;
//! assert_eq!(counter.get(&intern("count"))?, Value::Int(3));
//! # Ok::<(), lattice_runtime::LatticeError>(())
//! ```

pub mod error;
pub mod member;
pub mod object;
pub mod observe;

pub use error::{AccessError, DeclarationError, LatticeError, LatticeResult, ValidationError};
pub use member::{
    DefaultMode, DelMode, GetMode, GetStateMode, Member, MemberIndex, PostSetMode,
    PostValidateMode, SetMode, ValidateMode,
};
pub use object::{ClassLayout, GuardedHandle, Instance};
pub use observe::{
    current_sender, observer_fn, with_pools, ChangeKind, ChangeMask, ChangeRecord, Observer,
    ObserverId, ObserverRef, PoolId, PoolManager,
};
