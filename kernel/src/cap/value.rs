//! Capability values
//!
//! A capability is a 64-bit word stored atomically in a [`CapEntry`]:
//!
//! ```text
//!  63            32 31  30  29 28          0
//! +----------------+---+---+---+------------+
//! |      data      | D | R | T |   handle   |
//! +----------------+---+---+---+------------+
//! ```
//!
//! `handle` names a kernel object in the object table, `D` marks a derived
//! capability, `R` a reference and `T` a transitional entry. The `data`
//! half is interpreted by the object (rights, sub-ranges, badges).
//!
//! An entry without an object is empty, or allocated when `T` is set. An
//! entry with an object is usable, or a zombie when `T` is set.
//!
//! [`CapEntry`]: super::entry::CapEntry

use alloc::sync::Arc;
use core::{fmt, num::NonZeroU32};

use crate::objects::{table, KernelObject};

/// Object-specific bits passed to `mint`.
pub type CapRequest = u32;

/// Name of a kernel object: a slot index in the object table plus the
/// generation of that slot. Zero is never a handle.
///
/// The generation changes whenever a slot is reused, so a stale capability
/// does not name the slot's next object. It wraps after
/// [`ObjectHandle::GENERATIONS`] reuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(NonZeroU32);

impl ObjectHandle {
    /// Largest encodable handle.
    pub const MAX: u32 = HANDLE_MASK as u32;
    /// Largest table index.
    pub const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;
    pub const GENERATIONS: u32 = 1 << (29 - INDEX_BITS);

    pub const fn new(raw: u32) -> Option<Self> {
        if raw > Self::MAX {
            return None;
        }
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Handle for table slot `index` in generation `generation`. Index zero
    /// is not a slot.
    pub const fn from_parts(index: u32, generation: u32) -> Option<Self> {
        if index == 0 || index > Self::MAX_INDEX || generation >= Self::GENERATIONS {
            return None;
        }
        Self::new(generation << INDEX_BITS | index)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.get() & Self::MAX_INDEX
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.get() >> INDEX_BITS
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generation() {
            0 => write!(f, "#{}", self.index()),
            generation => write!(f, "#{}.{}", self.index(), generation),
        }
    }
}

const INDEX_BITS: u32 = 20;
const HANDLE_MASK: u64 = (1 << 29) - 1;
const TRANSITION: u64 = 1 << 29;
const REFERENCE: u64 = 1 << 30;
const DERIVED: u64 = 1 << 31;
const DATA_SHIFT: u32 = 32;

/// Packed capability word
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cap(u64);

impl Cap {
    pub const EMPTY: Self = Self(0);
    pub const ALLOCATED: Self = Self(TRANSITION);

    /// Original capability to `handle` with no data.
    #[inline]
    pub const fn new(handle: ObjectHandle) -> Self {
        Self(handle.get() as u64)
    }

    #[inline]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    // -----------------------------------------------------------------------
    // Predicates
    // -----------------------------------------------------------------------

    #[inline]
    pub const fn has_object(self) -> bool {
        self.0 & HANDLE_MASK != 0
    }

    /// Names an object and is not being deleted.
    #[inline]
    pub const fn is_usable(self) -> bool {
        self.has_object() && self.0 & TRANSITION == 0
    }

    /// Names an object that is being deleted.
    #[inline]
    pub const fn is_zombie(self) -> bool {
        self.has_object() && self.0 & TRANSITION != 0
    }

    /// Reserved for an insertion in progress.
    #[inline]
    pub const fn is_allocated(self) -> bool {
        !self.has_object() && self.0 & TRANSITION != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        !self.has_object() && self.0 & TRANSITION == 0
    }

    #[inline]
    pub const fn is_derived(self) -> bool {
        self.0 & DERIVED != 0
    }

    #[inline]
    pub const fn is_reference(self) -> bool {
        self.0 & REFERENCE != 0
    }

    /// Neither derived nor a reference.
    #[inline]
    pub const fn is_original(self) -> bool {
        self.0 & (DERIVED | REFERENCE) == 0
    }

    #[inline]
    pub const fn is_derived_reference(self) -> bool {
        self.0 & (DERIVED | REFERENCE) == DERIVED | REFERENCE
    }

    // -----------------------------------------------------------------------
    // Transformations
    // -----------------------------------------------------------------------

    #[inline]
    pub const fn as_zombie(self) -> Self {
        Self(self.0 | TRANSITION)
    }

    #[inline]
    pub const fn as_derived(self) -> Self {
        Self(self.0 | DERIVED)
    }

    #[inline]
    pub const fn as_reference(self) -> Self {
        Self(self.0 | REFERENCE)
    }

    #[inline]
    pub const fn strip_reference(self) -> Self {
        Self(self.0 & !REFERENCE)
    }

    #[inline]
    pub const fn as_original(self) -> Self {
        Self(self.0 & !(DERIVED | REFERENCE))
    }

    #[inline]
    pub const fn with_data(self, data: u32) -> Self {
        Self((self.0 & 0xFFFF_FFFF) | ((data as u64) << DATA_SHIFT))
    }

    /// Same flags and data, different object.
    #[inline]
    pub const fn with_handle(self, handle: ObjectHandle) -> Self {
        Self((self.0 & !HANDLE_MASK) | handle.get() as u64)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[inline]
    pub const fn data(self) -> u32 {
        (self.0 >> DATA_SHIFT) as u32
    }

    #[inline]
    pub const fn handle(self) -> Option<ObjectHandle> {
        ObjectHandle::new((self.0 & HANDLE_MASK) as u32)
    }

    /// The object this capability names, if it is still registered.
    pub fn object(self) -> Option<Arc<dyn KernelObject>> {
        self.handle().and_then(table::get)
    }
}

impl fmt::Debug for Cap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Cap(empty)");
        }
        if self.is_allocated() {
            return write!(f, "Cap(allocated)");
        }
        write!(f, "Cap(")?;
        if self.is_zombie() {
            write!(f, "zombie ")?;
        }
        if self.is_derived() {
            write!(f, "D")?;
        }
        if self.is_reference() {
            write!(f, "R")?;
        }
        match self.handle() {
            Some(handle) => write!(f, "{} data={:#x})", handle, self.data()),
            None => write!(f, "#0 data={:#x})", self.data()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u32) -> ObjectHandle {
        ObjectHandle::new(raw).unwrap()
    }

    #[test]
    fn test_states_are_exclusive() {
        let caps = [
            Cap::EMPTY,
            Cap::ALLOCATED,
            Cap::new(handle(7)),
            Cap::new(handle(7)).as_zombie(),
        ];
        for cap in caps {
            let states = [
                cap.is_empty(),
                cap.is_allocated(),
                cap.is_usable(),
                cap.is_zombie(),
            ];
            assert_eq!(states.iter().filter(|s| **s).count(), 1, "{:?}", cap);
        }
    }

    #[test]
    fn test_kind_flags() {
        let cap = Cap::new(handle(3));
        assert!(cap.is_original());
        assert!(cap.as_derived().is_derived());
        assert!(!cap.as_derived().is_original());
        assert!(cap.as_derived().as_reference().is_derived_reference());
        assert!(!cap.as_reference().is_derived_reference());
        assert!(cap.as_reference().strip_reference().is_original());
        assert!(cap.as_derived().as_reference().as_original().is_original());
    }

    #[test]
    fn test_data_and_handle_fields() {
        let cap = Cap::new(handle(ObjectHandle::MAX))
            .as_derived()
            .with_data(0xDEAD_BEEF);
        assert_eq!(cap.data(), 0xDEAD_BEEF);
        assert_eq!(cap.handle(), Some(handle(ObjectHandle::MAX)));
        assert!(cap.is_derived());

        let moved = cap.with_handle(handle(5));
        assert_eq!(moved.handle(), Some(handle(5)));
        assert_eq!(moved.data(), 0xDEAD_BEEF);
        assert!(moved.is_derived());
    }

    #[test]
    fn test_zombie_keeps_identity() {
        let cap = Cap::new(handle(9)).as_reference().with_data(4);
        let zombie = cap.as_zombie();
        assert!(!zombie.is_usable());
        assert_eq!(zombie.handle(), cap.handle());
        assert_eq!(zombie.data(), 4);
        assert!(zombie.is_reference());
    }

    #[test]
    fn test_handle_bounds() {
        assert!(ObjectHandle::new(0).is_none());
        assert!(ObjectHandle::new(ObjectHandle::MAX + 1).is_none());
        assert!(ObjectHandle::from_parts(0, 1).is_none());
        assert!(ObjectHandle::from_parts(1, ObjectHandle::GENERATIONS).is_none());
        assert!(ObjectHandle::from_parts(ObjectHandle::MAX_INDEX + 1, 0).is_none());
    }

    #[test]
    fn test_handle_generation_is_part_of_identity() {
        let first = ObjectHandle::from_parts(12, 0).unwrap();
        let reused = ObjectHandle::from_parts(12, 1).unwrap();
        assert_ne!(first, reused);
        assert_eq!(first.index(), reused.index());
        assert_eq!(reused.generation(), 1);
        assert_ne!(Cap::new(first), Cap::new(reused));
        assert_eq!(Cap::new(reused).handle(), Some(reused));
        assert_eq!(alloc::format!("{}", reused), "#12.1");
    }
}
