//! Objects: class layouts, instances, and guarded back-pointers.

pub mod class;
pub mod guard;
pub mod instance;

pub use class::ClassLayout;
pub use guard::GuardedHandle;
pub use instance::Instance;
