//! Capability entries
//!
//! A [`CapEntry`] holds one capability and its position in the resource
//! tree. The tree is a circular doubly linked list in depth-first order: the
//! children of a capability are the entries following it for which
//! [`is_parent_of`](super::ops::is_parent_of) holds.
//!
//! Locking is per entry and lives in the low bits of the links. The lock
//! bit in `next` protects the outgoing link and thereby the successor's
//! `prev`. `prev` additionally carries the revocation state of the entry
//! itself, which survives relinking.

use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use super::{arena, value::Cap};
use crate::{
    cpu::Backoff,
    error::{Error, KernelResult},
};

// ---------------------------------------------------------------------------
// Link encoding
// ---------------------------------------------------------------------------

const LOCKED: u64 = 1 << 0;
const REVOKING: u64 = 1 << 1;
const DELETED: u64 = 1 << 2;
const FLAG_MASK: u64 = LOCKED | REVOKING | DELETED;
const LINK_SHIFT: u32 = 3;
const UNLINKED: u64 = 0;

#[inline]
fn link_of(entry: &CapEntry) -> u64 {
    (entry.id as u64 + 1) << LINK_SHIFT
}

#[inline]
fn entry_of(link: u64) -> Option<&'static CapEntry> {
    match link >> LINK_SHIFT {
        0 => None,
        n => Some(arena::entry((n - 1) as u32)),
    }
}

/// One node of the capability tree
pub struct CapEntry {
    id: u32,
    cap: AtomicU64,
    prev: AtomicU64,
    next: AtomicU64,
}

impl CapEntry {
    pub(crate) const fn new(id: u32) -> Self {
        Self {
            id,
            cap: AtomicU64::new(0),
            prev: AtomicU64::new(UNLINKED),
            next: AtomicU64::new(UNLINKED),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn cap(&self) -> Cap {
        Cap::from_u64(self.cap.load(Ordering::Acquire))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Make this entry the root of a tree, linked only to itself.
    pub fn init_root(&self, cap: Cap) {
        debug_assert!(self.is_unlinked());
        let link = link_of(self);
        self.prev.store(link, Ordering::Relaxed);
        self.next.store(link, Ordering::Relaxed);
        self.cap.store(cap.to_u64(), Ordering::Release);
    }

    /// Reserve an empty entry for an insertion.
    pub fn acquire(&self) -> KernelResult<()> {
        if self.try_acquire() {
            Ok(())
        } else {
            Err(Error::CapNonempty)
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.cap
            .compare_exchange(
                Cap::EMPTY.to_u64(),
                Cap::ALLOCATED.to_u64(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish the capability of an allocated entry.
    pub fn commit(&self, cap: Cap) {
        debug_assert!(self.cap().is_allocated());
        self.cap.store(cap.to_u64(), Ordering::Release);
    }

    /// Return an unlinked entry to the empty state.
    pub fn reset(&self) {
        debug_assert!(self.is_unlinked() || self.cap().is_allocated());
        self.prev.store(UNLINKED, Ordering::Relaxed);
        self.next.store(UNLINKED, Ordering::Relaxed);
        self.cap.store(Cap::EMPTY.to_u64(), Ordering::Release);
    }

    /// Turn a usable capability into a zombie. Returns `true` if the entry
    /// holds a zombie afterwards, whoever killed it.
    pub fn kill(&self) -> bool {
        let mut current = self.cap.load(Ordering::Acquire);
        loop {
            let cap = Cap::from_u64(current);
            if cap.is_zombie() {
                return true;
            }
            if !cap.is_usable() {
                return false;
            }
            match self.cap.compare_exchange_weak(
                current,
                cap.as_zombie().to_u64(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tree mutation
    // -----------------------------------------------------------------------

    /// Link the allocated entry `other` directly behind this one.
    ///
    /// Fails with [`Error::LostRace`] if this entry no longer holds
    /// `this_cap`, is not usable or is being revoked once locked.
    pub fn insert_after(&self, this_cap: Cap, other: &CapEntry) -> KernelResult<()> {
        debug_assert!(other.cap().is_allocated());
        self.lock();
        let cap = self.cap();
        if cap != this_cap || !cap.is_usable() || self.is_revoking() {
            self.unlock();
            return Err(Error::LostRace);
        }
        let next_link = self.next.load(Ordering::Acquire) & !FLAG_MASK;
        let next = self.next_of_link(next_link);
        other.prev.store(link_of(self), Ordering::Relaxed);
        other.next.store(next_link, Ordering::Relaxed);
        next.set_prev_link(link_of(other));
        self.next.store(link_of(other), Ordering::Release);
        Ok(())
    }

    /// Move this capability into the allocated entry `other`, leaving this
    /// entry empty. `other` is reset on failure.
    pub fn move_to(&self, other: &CapEntry) -> KernelResult<()> {
        debug_assert!(other.cap().is_allocated());
        if self.lock_prev().is_err() {
            other.reset();
            return Err(Error::GenericError);
        }
        if core::ptr::eq(self.prev_entry_locked(), self) {
            self.unlock_prev();
            other.reset();
            return Err(Error::InvalidCapability);
        }
        self.lock();
        let cap = self.cap();
        if self.is_revoking() || !cap.is_usable() {
            self.unlock();
            self.unlock_prev();
            other.reset();
            return Err(Error::InvalidCapability);
        }

        let prev = self.prev_entry_locked();
        let next_link = self.next.load(Ordering::Acquire) & !FLAG_MASK;
        let next = self.next_of_link(next_link);
        other.prev.store(link_of(prev), Ordering::Relaxed);
        other.next.store(next_link, Ordering::Relaxed);
        next.set_prev_link(link_of(other));
        other.commit(cap);
        self.cap.store(Cap::EMPTY.to_u64(), Ordering::Release);
        self.prev.store(UNLINKED, Ordering::Relaxed);
        self.next.store(UNLINKED, Ordering::Release);
        // Publishing the new successor also releases the predecessor's lock.
        prev.next.store(link_of(other), Ordering::Release);
        Ok(())
    }

    /// Remove this entry from the tree.
    ///
    /// The caller holds both the predecessor's lock and this entry's lock;
    /// both are released.
    pub fn unlink(&self) {
        debug_assert!(self.is_locked());
        let prev = self.prev_entry_locked();
        let next_link = self.next.load(Ordering::Acquire) & !FLAG_MASK;
        let next = self.next_of_link(next_link);
        next.set_prev_link(link_of(prev));
        self.prev.store(UNLINKED, Ordering::Relaxed);
        self.next.store(UNLINKED, Ordering::Release);
        prev.next.store(next_link, Ordering::Release);
    }

    fn set_prev_link(&self, link: u64) {
        let mut current = self.prev.load(Ordering::Acquire);
        loop {
            let new = link | (current & FLAG_MASK);
            match self.prev.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn next_of_link(&self, link: u64) -> &'static CapEntry {
        match entry_of(link) {
            Some(e) => e,
            None => panic!("capability entry {} is not linked", self.id),
        }
    }

    fn prev_entry_locked(&self) -> &'static CapEntry {
        match self.prev_entry() {
            Some(e) => e,
            None => panic!("capability entry {} lost its predecessor", self.id),
        }
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    pub fn try_lock(&self) -> bool {
        self.next.fetch_or(LOCKED, Ordering::AcqRel) & LOCKED == 0
    }

    pub fn lock(&self) {
        let mut backoff = Backoff::new();
        while !self.try_lock() {
            backoff.spin();
        }
    }

    pub fn unlock(&self) {
        self.next.fetch_and(!LOCKED, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.next.load(Ordering::Acquire) & LOCKED != 0
    }

    /// Lock the predecessor.
    ///
    /// Fails with [`Error::GenericError`] if this entry is not linked and
    /// with [`Error::Retry`] if the predecessor is busy or changed while
    /// locking.
    pub fn try_lock_prev(&self) -> KernelResult<()> {
        let link = self.prev.load(Ordering::Acquire) & !FLAG_MASK;
        let prev = entry_of(link).ok_or(Error::GenericError)?;
        if !prev.try_lock() {
            return Err(Error::Retry);
        }
        if self.prev.load(Ordering::Acquire) & !FLAG_MASK != link {
            prev.unlock();
            return Err(Error::Retry);
        }
        Ok(())
    }

    pub fn lock_prev(&self) -> KernelResult<()> {
        let mut backoff = Backoff::new();
        loop {
            match self.try_lock_prev() {
                Err(Error::Retry) => backoff.spin(),
                result => return result,
            }
        }
    }

    pub fn unlock_prev(&self) {
        self.prev_entry_locked().unlock();
    }

    // -----------------------------------------------------------------------
    // Navigation and state
    // -----------------------------------------------------------------------

    /// Successor in the tree.
    ///
    /// # Panics
    ///
    /// Panics if the entry is not linked.
    pub fn next_entry(&self) -> &'static CapEntry {
        self.next_of_link(self.next.load(Ordering::Acquire) & !FLAG_MASK)
    }

    pub fn prev_entry(&self) -> Option<&'static CapEntry> {
        entry_of(self.prev.load(Ordering::Acquire) & !FLAG_MASK)
    }

    pub fn is_linked(&self) -> bool {
        self.prev.load(Ordering::Acquire) & !FLAG_MASK != UNLINKED
    }

    pub fn is_unlinked(&self) -> bool {
        !self.is_linked()
    }

    pub fn set_revoking(&self) {
        self.prev.fetch_or(REVOKING, Ordering::AcqRel);
    }

    pub fn finish_revoke(&self) {
        self.prev.fetch_and(!REVOKING, Ordering::AcqRel);
    }

    pub fn is_revoking(&self) -> bool {
        self.prev.load(Ordering::Acquire) & REVOKING != 0
    }

    pub fn set_deleted(&self) {
        self.prev.fetch_or(DELETED, Ordering::AcqRel);
    }

    pub fn is_deleted(&self) -> bool {
        self.prev.load(Ordering::Acquire) & DELETED != 0
    }
}

impl fmt::Debug for CapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prev = self.prev.load(Ordering::Relaxed);
        let next = self.next.load(Ordering::Relaxed);
        f.debug_struct("CapEntry")
            .field("id", &self.id)
            .field("cap", &self.cap())
            .field("prev", &((prev >> LINK_SHIFT) as i64 - 1))
            .field("next", &((next >> LINK_SHIFT) as i64 - 1))
            .field("locked", &(next & LOCKED != 0))
            .field("revoking", &(prev & REVOKING != 0))
            .finish()
    }
}
