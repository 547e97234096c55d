//! MyThOS kernel core
//!
//! Capability-based resource management for a many-core kernel. Kernel
//! objects are reached through capabilities kept in a global derivation
//! tree; requests on objects are serialized by delegating monitors that
//! hand work between per-hardware-thread places instead of blocking.
//!
//! The crate is `no_std` and needs a global allocator from its host.

#![no_std]

extern crate alloc;
#[cfg(any(test, feature = "testing"))]
extern crate std;

pub mod boot;
pub mod cap;
pub mod config;
pub mod cpu;
pub mod error;
pub mod invocation;
pub mod objects;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, KernelResult};
