//! Interrupt control protocol

use super::{ids, methods};
use crate::invocation::buf::message;

pub const PROTO: u8 = ids::INTERRUPT_CONTROL;

methods! {
    Register,
    Unregister,
    MaskIrq,
    UnmaskIrq,
}

message! {
    /// Route interrupt `irq` to the signalable object at `sink_ptr`.
    pub struct Register(PROTO, Methods::Register) {
        pub sink_ptr: u32,
        pub sink_depth: u8,
        pub irq: u32,
    }
}

message! {
    pub struct Unregister(PROTO, Methods::Unregister) {
        pub irq: u32,
    }
}

message! {
    pub struct MaskIrq(PROTO, Methods::MaskIrq) {
        pub irq: u32,
    }
}

message! {
    pub struct UnmaskIrq(PROTO, Methods::UnmaskIrq) {
        pub irq: u32,
    }
}
