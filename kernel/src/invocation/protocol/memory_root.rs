//! Memory root protocol

use super::{ids, methods};
use crate::invocation::buf::message;

pub const PROTO: u8 = ids::MEMORY_ROOT;

methods! {
    Create,
}

message! {
    /// Create a frame for device memory at `start` in slot `dst_ptr` of
    /// the caller's capability space.
    pub struct Create(PROTO, Methods::Create) {
        pub dst_ptr: u32,
        pub dst_depth: u8,
        pub start: u64,
        pub size_bits: u8,
        pub writable: u8,
    }
}
