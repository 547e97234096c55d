//! Invocation protocols
//!
//! Each protocol is a closed set of methods with fixed-layout messages.
//! A label is `(protocol << 8) + method`. Dispatch is a match over the
//! method enum; unknown methods yield [`Error::NotImplemented`].
//!
//! [`Error::NotImplemented`]: crate::error::Error::NotImplemented

pub mod cap_map;
pub mod example;
pub mod execution_context;
pub mod frame;
pub mod interrupt_control;
pub mod kernel_memory;
pub mod kernel_object;
pub mod memory_root;
pub mod page_map;
pub mod signal_listener;

/// Protocol identifiers
pub mod ids {
    pub const KERNEL_OBJECT: u8 = 1;
    pub const KERNEL_MEMORY: u8 = 2;
    pub const CAPMAP: u8 = 3;
    pub const FRAME: u8 = 4;
    pub const PAGEMAP: u8 = 5;
    pub const EXECUTION_CONTEXT: u8 = 6;
    pub const PORTAL: u8 = 7;
    pub const EXAMPLE: u8 = 8;
    pub const INTERRUPT_CONTROL: u8 = 9;
    pub const SIGNAL_LISTENER: u8 = 10;
    pub const MEMORY_ROOT: u8 = 11;
}

/// Declare a protocol's method enum with a fallible conversion from the
/// label's method byte.
macro_rules! methods {
    ($( $(#[$meta:meta])* $variant:ident ),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum Methods {
            $( $(#[$meta])* $variant ),*
        }

        impl TryFrom<u8> for Methods {
            type Error = $crate::error::Error;

            fn try_from(method: u8) -> Result<Self, Self::Error> {
                $(
                    if method == Methods::$variant as u8 {
                        return Ok(Methods::$variant);
                    }
                )*
                Err($crate::error::Error::NotImplemented)
            }
        }
    };
}

pub(crate) use methods;
