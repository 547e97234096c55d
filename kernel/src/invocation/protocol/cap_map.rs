//! Capability map protocol
//!
//! Source capabilities are resolved in the caller's capability space,
//! destinations inside the invoked map.

use super::{ids, methods};
use crate::invocation::buf::message;

pub const PROTO: u8 = ids::CAPMAP;

methods! {
    Derive,
    Reference,
    Move,
    Delete,
    Revoke,
}

message! {
    pub struct Derive(PROTO, Methods::Derive) {
        pub src_ptr: u32,
        pub src_depth: u8,
        pub dst_ptr: u32,
        pub dst_depth: u8,
        pub request: u32,
    }
}

message! {
    pub struct Reference(PROTO, Methods::Reference) {
        pub src_ptr: u32,
        pub src_depth: u8,
        pub dst_ptr: u32,
        pub dst_depth: u8,
        pub request: u32,
    }
}

message! {
    pub struct Move(PROTO, Methods::Move) {
        pub src_ptr: u32,
        pub src_depth: u8,
        pub dst_ptr: u32,
        pub dst_depth: u8,
    }
}

message! {
    pub struct Delete(PROTO, Methods::Delete) {
        pub ptr: u32,
        pub depth: u8,
    }
}

message! {
    pub struct Revoke(PROTO, Methods::Revoke) {
        pub ptr: u32,
        pub depth: u8,
    }
}

message! {
    /// Factory arguments for a new map.
    pub struct CapMapCreate(ids::KERNEL_MEMORY, 1) {
        pub index_bits: u8,
        pub guard_bits: u8,
        pub guard: u32,
    }
}
