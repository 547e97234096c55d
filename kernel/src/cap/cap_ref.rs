//! Kernel-held references
//!
//! A [`CapRef`] lets a kernel object keep a capability to another object,
//! for example an interrupt line pointing at the listener it notifies. The
//! reference occupies a real entry in the capability tree, linked behind
//! the source capability, so revoking the source reaches it and the owner
//! is told through [`CapRefSubject::unbind`].

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU64, Ordering};

use super::{
    arena::{self, OwnedEntry},
    entry::CapEntry,
    ops,
    value::{Cap, ObjectHandle},
};
use crate::{
    error::{Error, KernelResult},
    objects::{table, Deleter, KernelObject, Range},
};

/// Owner of a [`CapRef`], notified when the reference is set or dropped.
pub trait CapRefSubject: Send + Sync {
    fn bind(&self, _slot: usize, _cap: Cap) {}

    fn unbind(&self, slot: usize, cap: Cap);
}

struct CapRefObject {
    entry: OwnedEntry,
    orig: AtomicU64,
    subject: Weak<dyn CapRefSubject>,
    slot: usize,
}

impl CapRefObject {
    fn orig(&self) -> Cap {
        Cap::from_u64(self.orig.load(Ordering::Acquire))
    }

    fn unbind(&self) {
        let old = Cap::from_u64(self.orig.swap(Cap::EMPTY.to_u64(), Ordering::AcqRel));
        if old.is_empty() {
            return;
        }
        if let Some(subject) = self.subject.upgrade() {
            subject.unbind(self.slot, old);
        }
    }
}

impl KernelObject for CapRefObject {
    fn name(&self) -> &'static str {
        "CapRef"
    }

    fn address_range(&self, entry: &CapEntry, _cap: Cap) -> Range {
        let orig = self.orig();
        match orig.object() {
            Some(obj) => obj.address_range(entry, orig),
            None => Range::new(0, 0),
        }
    }

    fn delete_cap(&self, _entry: &'static CapEntry, _cap: Cap, _del: &dyn Deleter) -> KernelResult<()> {
        self.unbind();
        Ok(())
    }
}

/// A kernel object's reference to some capability.
pub struct CapRef {
    obj: Arc<CapRefObject>,
    handle: ObjectHandle,
}

impl CapRef {
    pub fn new(subject: Weak<dyn CapRefSubject>, slot: usize) -> KernelResult<Self> {
        let entry = arena::alloc()?;
        let (handle, obj) = table::insert_with(|_| {
            Ok(Arc::new(CapRefObject {
                entry,
                orig: AtomicU64::new(0),
                subject,
                slot,
            }))
        })?;
        Ok(Self { obj, handle })
    }

    /// Point this reference at `src_cap`, replacing any previous target.
    pub fn set(&self, src: &CapEntry, src_cap: Cap) -> KernelResult<()> {
        if !src_cap.is_usable() {
            return Err(Error::InvalidCapability);
        }
        self.reset();
        let dst_cap = src_cap.as_reference().with_handle(self.handle);
        let obj = &self.obj;
        let result = ops::set_reference(
            || obj.orig.store(src_cap.to_u64(), Ordering::Release),
            &obj.entry,
            dst_cap,
            src,
            src_cap,
        );
        match result {
            Ok(()) => {
                if let Some(subject) = obj.subject.upgrade() {
                    subject.bind(obj.slot, src_cap);
                }
                Ok(())
            }
            Err(e) => {
                obj.orig.store(Cap::EMPTY.to_u64(), Ordering::Release);
                Err(e)
            }
        }
    }

    pub fn reset(&self) {
        let obj = &self.obj;
        ops::reset_reference(|| obj.unbind(), &obj.entry);
    }

    /// The referenced capability, if the reference is still in place.
    pub fn get(&self) -> Option<Cap> {
        if !self.is_usable() {
            return None;
        }
        let orig = self.obj.orig();
        orig.is_usable().then_some(orig)
    }

    pub fn is_usable(&self) -> bool {
        self.obj.entry.cap().is_usable()
    }

    pub fn entry(&self) -> &'static CapEntry {
        self.obj.entry.get()
    }
}

impl Drop for CapRef {
    fn drop(&mut self) {
        self.reset();
        table::remove(self.handle);
    }
}
