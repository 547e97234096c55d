//! Example object protocol

use alloc::vec::Vec;

use super::{ids, methods};
use crate::{
    error::{Error, KernelResult},
    invocation::{
        buf::{label, message},
        InvocationBuf,
    },
};

pub const PROTO: u8 = ids::EXAMPLE;

methods! {
    PrintMessage,
    Ping,
    MoveHome,
}

message! {
    /// `Ping` request and reply.
    pub struct Ping(PROTO, Methods::Ping) {
        pub value: u64,
        pub place: u64,
    }
}

message! {
    pub struct MoveHome(PROTO, Methods::MoveHome) {
        pub place: u64,
    }
}

/// Store a `PrintMessage` request.
pub fn write_print_message(buf: &mut InvocationBuf, text: &[u8]) {
    buf.label = label(PROTO, Methods::PrintMessage as u8);
    let capacity = (buf.words.len() - 1) * 8;
    let len = text.len().min(capacity);
    buf.words[0] = len as u64;
    for (i, chunk) in text[..len].chunks(8).enumerate() {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        buf.words[1 + i] = u64::from_le_bytes(word);
    }
}

pub fn read_print_message(buf: &InvocationBuf) -> KernelResult<Vec<u8>> {
    let len = buf.words[0] as usize;
    if len > (buf.words.len() - 1) * 8 {
        return Err(Error::InvalidArgument);
    }
    Ok(buf.words[1..]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .take(len)
        .collect())
}
