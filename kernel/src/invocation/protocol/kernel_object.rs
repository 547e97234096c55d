//! Protocol served by every kernel object

use alloc::string::String;

use super::{ids, methods};
use crate::invocation::{buf::label, InvocationBuf};

pub const PROTO: u8 = ids::KERNEL_OBJECT;

methods! {
    GetDebugInfo,
    DebugInfoRes,
}

/// Reply to `GetDebugInfo` with the object's name.
pub fn write_debug_info(buf: &mut InvocationBuf, name: &str) {
    buf.label = label(PROTO, Methods::DebugInfoRes as u8);
    let bytes = name.as_bytes();
    let capacity = (buf.words.len() - 1) * 8;
    let len = bytes.len().min(capacity);
    buf.words[0] = len as u64;
    for (i, chunk) in bytes[..len].chunks(8).enumerate() {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        buf.words[1 + i] = u64::from_le_bytes(word);
    }
}

/// Decode a `DebugInfoRes` reply.
pub fn read_debug_info(buf: &InvocationBuf) -> Option<String> {
    if buf.label != label(PROTO, Methods::DebugInfoRes as u8) {
        return None;
    }
    let len = buf.words[0] as usize;
    let bytes: alloc::vec::Vec<u8> = buf.words[1..]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .take(len)
        .collect();
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_info_roundtrip() {
        let mut buf = InvocationBuf::new();
        write_debug_info(&mut buf, "UntypedMemory");
        assert_eq!(read_debug_info(&buf).as_deref(), Some("UntypedMemory"));
        assert_eq!(Methods::try_from(1), Ok(Methods::DebugInfoRes));
        assert!(Methods::try_from(2).is_err());
    }
}
