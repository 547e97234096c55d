//! Signal listener protocol

use super::{ids, methods};
use crate::invocation::buf::message;

pub const PROTO: u8 = ids::SIGNAL_LISTENER;

methods! {
    Bind,
    Reset,
}

message! {
    /// Report signals in `mask` tagged with `context`, clearing the bits in
    /// `reset_mask` on every delivery.
    pub struct Bind(PROTO, Methods::Bind) {
        pub context: u64,
        pub mask: u64,
        pub reset_mask: u64,
    }
}

message! {
    pub struct Reset(PROTO, Methods::Reset) {
        pub reset_mask: u64,
    }
}
