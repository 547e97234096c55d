//! Capability tree operations
//!
//! The mutation primitives used by every object. None of them retries on a
//! lost race: the target entry is returned to empty and the error is
//! propagated to the invocation layer.

use super::{entry::CapEntry, value::Cap, CapRequest};
use crate::error::{Error, KernelResult};

/// Whether `other` lies in the subtree of `parent`.
///
/// Decided by range containment. A strictly larger range owns the smaller
/// one unless the parent is a reference. For equal ranges the flag algebra
/// decides: originals own the derived and reference capabilities of their
/// object but not another original, derived capabilities own only derived
/// references, references own nothing.
pub fn is_parent_of(parent_entry: &CapEntry, parent: Cap, other_entry: &CapEntry, other: Cap) -> bool {
    let (parent_obj, other_obj) = match (parent.object(), other.object()) {
        (Some(p), Some(o)) => (p, o),
        _ => return false,
    };
    let parent_range = parent_obj.address_range(parent_entry, parent);
    let other_range = other_obj.address_range(other_entry, other);
    if !parent_range.contains(&other_range) {
        return false;
    }
    if parent_range.strictly_contains(&other_range) {
        return !parent.is_reference();
    }
    if parent.is_reference() {
        false
    } else if parent.is_derived() {
        other.is_derived_reference()
    } else {
        other.is_reference() || other.is_derived()
    }
}

/// Link the allocated `target_entry` behind `parent_entry` and publish
/// `target_cap` in it. The target is reset on failure.
///
/// A reference parent only has siblings, so the target becomes a child of
/// whatever owns the reference.
pub fn inherit(
    parent_entry: &CapEntry,
    parent_cap: Cap,
    target_entry: &CapEntry,
    target_cap: Cap,
) -> KernelResult<()> {
    debug_assert!(target_entry.cap().is_allocated());
    if !parent_cap.is_reference()
        && !target_cap.is_reference()
        && !is_parent_of(parent_entry, parent_cap, target_entry, target_cap)
    {
        target_entry.reset();
        return Err(Error::InvalidCapability);
    }
    match parent_entry.insert_after(parent_cap, target_entry) {
        Ok(()) => {
            target_entry.commit(target_cap);
            log::trace!(target: "cap", "inherit {:?} -> {:?}", parent_cap, target_cap);
            Ok(())
        }
        Err(e) => {
            target_entry.reset();
            Err(e)
        }
    }
}

/// Create a narrowed child capability of `parent_cap` in `target_entry`.
///
/// Derived capabilities cannot be derived again. Deriving from a reference
/// yields a plain derived capability owned by the reference's parent.
pub fn derive(
    parent_entry: &CapEntry,
    parent_cap: Cap,
    target_entry: &CapEntry,
    request: CapRequest,
) -> KernelResult<()> {
    if !parent_cap.is_usable() || parent_cap.is_derived() {
        return Err(Error::InvalidCapability);
    }
    let obj = parent_cap.object().ok_or(Error::InvalidCapability)?;
    let minted = obj.mint(parent_entry, parent_cap, request, true)?;
    target_entry.acquire().map_err(|_| Error::LostRace)?;
    inherit(parent_entry, parent_cap, target_entry, minted.strip_reference().as_derived())
}

/// Create a non-owning alias of `parent_cap` in `target_entry`.
pub fn reference(
    parent_entry: &CapEntry,
    parent_cap: Cap,
    target_entry: &CapEntry,
    request: CapRequest,
) -> KernelResult<()> {
    if !parent_cap.is_usable() {
        return Err(Error::InvalidCapability);
    }
    let obj = parent_cap.object().ok_or(Error::InvalidCapability)?;
    let minted = obj.mint(parent_entry, parent_cap, request, false)?;
    target_entry.acquire().map_err(|_| Error::LostRace)?;
    inherit(parent_entry, parent_cap, target_entry, minted.as_reference())
}

/// Install the reference capability `dst_cap` in `dst`, linked behind
/// `src`. `bind` runs after the entry is reserved and before it is linked.
pub fn set_reference<F>(bind: F, dst: &CapEntry, dst_cap: Cap, src: &CapEntry, src_cap: Cap) -> KernelResult<()>
where
    F: FnOnce(),
{
    debug_assert!(dst_cap.is_reference());
    dst.acquire().map_err(|_| Error::LostRace)?;
    bind();
    inherit(src, src_cap, dst, dst_cap)
}

/// Remove whatever reference `dst` holds. `unbind` runs once the entry is
/// unlinked and before it is reset. Does nothing if a concurrent deletion
/// got there first.
pub fn reset_reference<F>(unbind: F, dst: &CapEntry)
where
    F: FnOnce(),
{
    if !dst.kill() {
        return;
    }
    if dst.lock_prev().is_err() {
        return;
    }
    dst.lock();
    if !dst.kill() || dst.cap().is_empty() {
        dst.unlock();
        dst.unlock_prev();
        return;
    }
    dst.unlink();
    unbind();
    dst.reset();
}
