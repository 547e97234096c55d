//! Kernel error codes
//!
//! Every fallible kernel operation reports one of these codes. The numeric
//! values are part of the user-visible ABI: they are written into reply
//! messages, and `0` is reserved for success.

use core::fmt;

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Error {
    /// A result slot that was never written
    Unset = 1,
    /// The operation was suppressed on purpose
    Inhibit = 2,
    GenericError = 3,
    /// The capability is empty, a zombie or of the wrong shape
    InvalidCapability = 4,
    InvalidArgument = 5,
    NonCanonicalAddress = 6,
    Unaligned = 7,
    /// Memory, slots or rights are not sufficient for the request
    InsufficientResources = 8,
    /// A concurrent operation changed the entry first
    LostRace = 9,
    /// The operation may succeed if repeated
    Retry = 10,
    NoMessage = 11,
    /// The object does not implement the requested interface
    TypeMismatch = 12,
    NotImplemented = 13,
    /// The destination entry is already in use
    CapNonempty = 14,
    NotKernelmem = 15,
    /// A deletion would destroy the object it runs inside
    CyclicDependency = 16,
    PortalNotOpen = 17,
    PortalNotInvoked = 18,
    PortalNoBuffer = 19,
    PortalNoEndpoint = 20,
    /// A capability pointer did not resolve
    NoLookup = 21,
    InvalidRequest = 22,
    RequestDenied = 23,
    PagemapMissing = 24,
    PagemapNoconf = 25,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, Error>;

/// Wire value of a successful result.
pub const SUCCESS: u8 = 0;

impl Error {
    /// Numeric code of this error.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a non-zero error code.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Unset,
            2 => Self::Inhibit,
            3 => Self::GenericError,
            4 => Self::InvalidCapability,
            5 => Self::InvalidArgument,
            6 => Self::NonCanonicalAddress,
            7 => Self::Unaligned,
            8 => Self::InsufficientResources,
            9 => Self::LostRace,
            10 => Self::Retry,
            11 => Self::NoMessage,
            12 => Self::TypeMismatch,
            13 => Self::NotImplemented,
            14 => Self::CapNonempty,
            15 => Self::NotKernelmem,
            16 => Self::CyclicDependency,
            17 => Self::PortalNotOpen,
            18 => Self::PortalNotInvoked,
            19 => Self::PortalNoBuffer,
            20 => Self::PortalNoEndpoint,
            21 => Self::NoLookup,
            22 => Self::InvalidRequest,
            23 => Self::RequestDenied,
            24 => Self::PagemapMissing,
            25 => Self::PagemapNoconf,
            _ => return None,
        })
    }

    /// Errors a caller may resolve by simply trying again.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Retry | Self::LostRace)
    }
}

/// Encode a result for a reply message.
pub fn result_code(result: KernelResult<()>) -> u8 {
    match result {
        Ok(()) => SUCCESS,
        Err(e) => e.code(),
    }
}

/// Decode a reply message result code. Unknown codes become
/// [`Error::GenericError`].
pub fn result_from_code(code: u8) -> KernelResult<()> {
    match code {
        SUCCESS => Ok(()),
        c => Err(Error::from_code(c).unwrap_or(Error::GenericError)),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Unset => "result not set",
            Self::Inhibit => "inhibited",
            Self::GenericError => "generic error",
            Self::InvalidCapability => "invalid capability",
            Self::InvalidArgument => "invalid argument",
            Self::NonCanonicalAddress => "non-canonical address",
            Self::Unaligned => "unaligned",
            Self::InsufficientResources => "insufficient resources",
            Self::LostRace => "lost race",
            Self::Retry => "retry",
            Self::NoMessage => "no message",
            Self::TypeMismatch => "type mismatch",
            Self::NotImplemented => "not implemented",
            Self::CapNonempty => "capability entry not empty",
            Self::NotKernelmem => "not kernel memory",
            Self::CyclicDependency => "cyclic dependency",
            Self::PortalNotOpen => "portal not open",
            Self::PortalNotInvoked => "portal not invoked",
            Self::PortalNoBuffer => "portal has no buffer",
            Self::PortalNoEndpoint => "portal has no endpoint",
            Self::NoLookup => "capability lookup failed",
            Self::InvalidRequest => "invalid request",
            Self::RequestDenied => "request denied",
            Self::PagemapMissing => "page map missing",
            Self::PagemapNoconf => "page map not configured",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip_for_every_error() {
        for code in 1..=25u8 {
            let err = Error::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert_eq!(Error::from_code(0), None);
        assert_eq!(Error::from_code(26), None);
    }

    #[test]
    fn test_result_code() {
        assert_eq!(result_code(Ok(())), SUCCESS);
        assert_eq!(result_code(Err(Error::LostRace)), 9);
        assert_eq!(result_from_code(14), Err(Error::CapNonempty));
        assert_eq!(result_from_code(200), Err(Error::GenericError));
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Retry.is_retryable());
        assert!(Error::LostRace.is_retryable());
        assert!(!Error::InvalidCapability.is_retryable());
    }
}
