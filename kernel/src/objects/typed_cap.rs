//! Typed capabilities
//!
//! A [`TypedCap`] pairs a usable capability with the interface of its
//! object it was checked against. Construction never panics: unusable
//! capabilities yield [`Error::InvalidCapability`], objects without the
//! interface [`Error::TypeMismatch`].

use alloc::sync::Arc;
use core::ops::Deref;

use super::{Castable, CapEntryRef, CapMap, Frame, FrameInfo};
use crate::{
    cap::{Cap, CapEntry},
    error::{Error, KernelResult},
    invocation::CapPtr,
};

pub struct TypedCap<T: ?Sized> {
    cap: Cap,
    obj: Arc<T>,
}

impl<T: ?Sized + Castable> TypedCap<T> {
    pub fn new(cap: Cap) -> KernelResult<Self> {
        if !cap.is_usable() {
            return Err(Error::InvalidCapability);
        }
        let obj = cap.object().ok_or(Error::InvalidCapability)?;
        let interface = obj.vcast(T::ID)?;
        let obj = T::extract(interface).ok_or(Error::TypeMismatch)?;
        Ok(Self { cap, obj })
    }

    pub fn from_entry(entry: &CapEntry) -> KernelResult<Self> {
        Self::new(entry.cap())
    }
}

impl<T: ?Sized> TypedCap<T> {
    #[inline]
    pub fn cap(&self) -> Cap {
        self.cap
    }

    pub fn obj(&self) -> &Arc<T> {
        &self.obj
    }
}

impl<T: ?Sized> Deref for TypedCap<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.obj
    }
}

impl TypedCap<CapMap> {
    pub fn lookup(&self, ptr: CapPtr, depth: u8, writable: bool) -> KernelResult<CapEntryRef> {
        self.obj.lookup(self.cap, ptr, depth, writable)
    }
}

impl TypedCap<dyn Frame> {
    pub fn frame_info(&self) -> FrameInfo {
        self.obj.frame_info(self.cap)
    }
}
