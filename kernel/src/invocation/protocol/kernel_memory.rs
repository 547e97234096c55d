//! Untyped memory protocol

use super::{ids, methods};
use crate::invocation::buf::message;

pub const PROTO: u8 = ids::KERNEL_MEMORY;

methods! {
    Properties,
    Create,
}

/// Payload word where factory-specific arguments of `Create` start.
pub const CREATE_ARGS_OFFSET: usize = 8;

/// Index of the factory capability in the extra capability pointers.
pub const FACTORY_CAP: usize = 0;

message! {
    /// Reply to `Properties`.
    pub struct Properties(PROTO, Methods::Properties) {
        pub total: u64,
        pub free: u64,
        pub start: u64,
    }
}

message! {
    /// Create an object in slot `dst_ptr`. The slot is resolved in the
    /// capability map at `dst_space_ptr`, or in the caller's space when
    /// that is zero.
    pub struct Create(PROTO, Methods::Create) {
        pub dst_ptr: u32,
        pub dst_depth: u8,
        pub dst_space_ptr: u32,
        pub dst_space_depth: u8,
    }
}

message! {
    /// Factory arguments for a new untyped memory object.
    pub struct UntypedMemoryCreate(PROTO, Methods::Create) {
        pub size: u64,
        pub alignment: u64,
    }
}
