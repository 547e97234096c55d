//! Invocation buffers
//!
//! The fixed-size message area shared between a caller and the kernel. A
//! message is a 16-bit label, a few extra capability pointers and a payload
//! of machine words. Replies reuse the same buffer.

use crate::{
    config::{INVOCATION_CAPS, INVOCATION_WORDS},
    error::{self, Error, KernelResult},
};

/// Address of a capability inside a capability space.
pub type CapPtr = u32;

/// Build a label from protocol and method ids.
#[inline]
pub const fn label(proto: u8, method: u8) -> u16 {
    ((proto as u16) << 8) + method as u16
}

#[derive(Clone)]
pub struct InvocationBuf {
    pub label: u16,
    pub cap_ptrs: [CapPtr; INVOCATION_CAPS],
    pub words: [u64; INVOCATION_WORDS],
    result: u8,
}

impl InvocationBuf {
    pub const fn new() -> Self {
        Self {
            label: 0,
            cap_ptrs: [0; INVOCATION_CAPS],
            words: [0; INVOCATION_WORDS],
            result: Error::Unset as u8,
        }
    }

    #[inline]
    pub fn protocol(&self) -> u8 {
        (self.label >> 8) as u8
    }

    #[inline]
    pub fn method(&self) -> u8 {
        self.label as u8
    }

    /// Store `msg` as the request and set the label accordingly.
    pub fn write<M: Message>(&mut self, msg: &M) {
        self.label = label(M::PROTO, M::METHOD);
        msg.encode(&mut self.words);
        self.result = Error::Unset as u8;
    }

    /// Decode the payload as `M`. Fails if the label does not match.
    pub fn read<M: Message>(&self) -> KernelResult<M> {
        if self.label != label(M::PROTO, M::METHOD) {
            return Err(Error::InvalidRequest);
        }
        Ok(M::decode(&self.words))
    }

    /// Decode `M` from the words starting at `offset`, ignoring the label.
    pub fn read_at<M: Message>(&self, offset: usize) -> KernelResult<M> {
        let words = self.words.get(offset..).ok_or(Error::InvalidArgument)?;
        if words.len() < M::WORDS {
            return Err(Error::InvalidArgument);
        }
        Ok(M::decode(words))
    }

    /// Encode `M` at `offset`, leaving the label untouched.
    pub fn write_at<M: Message>(&mut self, offset: usize, msg: &M) {
        msg.encode(&mut self.words[offset..]);
    }

    pub fn set_result(&mut self, result: KernelResult<()>) {
        self.result = error::result_code(result);
    }

    /// The reply status, [`Error::Unset`] until the kernel answered.
    pub fn result(&self) -> KernelResult<()> {
        error::result_from_code(self.result)
    }
}

impl Default for InvocationBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed-layout protocol message.
pub trait Message: Sized {
    const PROTO: u8;
    const METHOD: u8;
    const WORDS: usize;

    fn encode(&self, words: &mut [u64]);

    fn decode(words: &[u64]) -> Self;
}

/// Declare a message struct whose fields each occupy one payload word.
macro_rules! message {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($proto:expr, $method:expr) {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty ),*
        }

        impl $crate::invocation::buf::Message for $name {
            const PROTO: u8 = $proto;
            const METHOD: u8 = $method as u8;
            const WORDS: usize = 0 $( + { let _ = stringify!($field); 1 } )*;

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn encode(&self, words: &mut [u64]) {
                let mut i = 0;
                $(
                    words[i] = self.$field as u64;
                    i += 1;
                )*
            }

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn decode(words: &[u64]) -> Self {
                let mut i = 0;
                $(
                    let $field = words[i] as $ty;
                    i += 1;
                )*
                Self { $( $field ),* }
            }
        }
    };
}

pub(crate) use message;

#[cfg(test)]
mod tests {
    use super::*;

    message! {
        pub struct Sample(7, 3) {
            pub a: u32,
            pub b: u8,
            pub c: u64,
        }
    }

    #[test]
    fn test_label_layout() {
        assert_eq!(label(3, 4), 0x0304);
        let mut buf = InvocationBuf::new();
        buf.write(&Sample { a: 1, b: 2, c: 3 });
        assert_eq!(buf.protocol(), 7);
        assert_eq!(buf.method(), 3);
        assert_eq!(buf.words[..3], [1, 2, 3]);
    }

    #[test]
    fn test_read_checks_label() {
        let mut buf = InvocationBuf::new();
        buf.label = label(7, 4);
        assert_eq!(buf.read::<Sample>(), Err(Error::InvalidRequest));
        buf.write(&Sample { a: u32::MAX, b: 9, c: u64::MAX });
        let sample = buf.read::<Sample>().unwrap();
        assert_eq!(sample.a, u32::MAX);
        assert_eq!(sample.c, u64::MAX);
        assert_eq!(Sample::WORDS, 3);
    }

    #[test]
    fn test_offset_access_and_result() {
        let mut buf = InvocationBuf::new();
        assert_eq!(buf.result(), Err(Error::Unset));
        buf.write_at(10, &Sample { a: 5, b: 6, c: 7 });
        assert_eq!(buf.read_at::<Sample>(10).unwrap().b, 6);
        assert!(buf.read_at::<Sample>(INVOCATION_WORDS - 1).is_err());
        buf.set_result(Ok(()));
        assert_eq!(buf.result(), Ok(()));
    }
}
