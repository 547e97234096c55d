//! Frame protocol

use super::{ids, methods};
use crate::invocation::buf::message;

pub const PROTO: u8 = ids::FRAME;

methods! {
    Info,
}

message! {
    /// Reply to `Info`.
    pub struct Info(PROTO, Methods::Info) {
        pub start: u64,
        pub size: u64,
        pub writable: u8,
        pub kernel: u8,
    }
}

message! {
    /// Factory arguments for a new frame of `1 << size_bits` bytes.
    pub struct FrameCreate(ids::KERNEL_MEMORY, 1) {
        pub size_bits: u8,
    }
}
