//! Capability system
//!
//! Capabilities are 64-bit values stored in entries of a global resource
//! tree. Every kernel object owns one original capability; derived and
//! reference capabilities to the object hang below it. Deleting a
//! capability deletes its subtree, and deleting an original destroys the
//! object.
//!
//! Key components:
//! - [`Cap`]: packed capability value
//! - [`CapEntry`]: lock-free tree node stored in a global arena
//! - [`ops`]: derive, reference and inherit primitives
//! - [`RevokeOperation`]: subtree deletion and object destruction
//! - [`CapRef`]: references held by kernel objects

pub mod arena;
pub mod cap_ref;
pub mod entry;
pub mod ops;
pub mod revocation;
pub mod value;


pub use arena::OwnedEntry;
pub use cap_ref::{CapRef, CapRefSubject};
pub use entry::CapEntry;
pub use revocation::RevokeOperation;
pub use value::{Cap, CapRequest, ObjectHandle};
