//! Capability entry arena
//!
//! Entries link to each other by arena index, never by pointer. Chunks are
//! allocated on demand and never released, so an index handed out once
//! stays dereferenceable for the lifetime of the kernel.

use alloc::{boxed::Box, vec::Vec};
use core::{
    ops::Deref,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use spin::Mutex;

use super::entry::CapEntry;
use crate::{
    config::{CAP_ARENA_CHUNK, CAP_ARENA_MAX_CHUNKS},
    error::{Error, KernelResult},
};

#[allow(clippy::declare_interior_mutable_const)]
static CHUNKS: [AtomicPtr<CapEntry>; CAP_ARENA_MAX_CHUNKS] = {
    const INIT: AtomicPtr<CapEntry> = AtomicPtr::new(ptr::null_mut());
    [INIT; CAP_ARENA_MAX_CHUNKS]
};

struct ArenaState {
    free: Vec<u32>,
    chunks: usize,
}

static ARENA: Mutex<ArenaState> = Mutex::new(ArenaState {
    free: Vec::new(),
    chunks: 0,
});

fn grow(state: &mut ArenaState) -> KernelResult<()> {
    if state.chunks == CAP_ARENA_MAX_CHUNKS {
        return Err(Error::InsufficientResources);
    }
    let base = (state.chunks * CAP_ARENA_CHUNK) as u32;
    let chunk: Box<[CapEntry]> = (0..CAP_ARENA_CHUNK as u32)
        .map(|i| CapEntry::new(base + i))
        .collect();
    let first = Box::leak(chunk).as_mut_ptr();
    CHUNKS[state.chunks].store(first, Ordering::Release);
    state.chunks += 1;
    state.free.extend((base..base + CAP_ARENA_CHUNK as u32).rev());
    Ok(())
}

/// Entry with arena index `id`.
pub(crate) fn entry(id: u32) -> &'static CapEntry {
    let id = id as usize;
    let chunk = CHUNKS[id / CAP_ARENA_CHUNK].load(Ordering::Acquire);
    assert!(!chunk.is_null(), "capability entry {} not allocated", id);
    // SAFETY: chunks are leaked boxes of exactly `CAP_ARENA_CHUNK` entries
    // that are never freed, and the offset is within the chunk.
    unsafe { &*chunk.add(id % CAP_ARENA_CHUNK) }
}

/// Reserve an empty entry.
pub fn alloc() -> KernelResult<OwnedEntry> {
    let mut state = ARENA.lock();
    if state.free.is_empty() {
        grow(&mut state)?;
    }
    match state.free.pop() {
        Some(id) => Ok(OwnedEntry(entry(id))),
        None => Err(Error::InsufficientResources),
    }
}

/// Reserve `count` entries.
pub fn alloc_many(count: usize) -> KernelResult<Vec<OwnedEntry>> {
    let mut entries = Vec::new();
    entries
        .try_reserve_exact(count)
        .map_err(|_| Error::InsufficientResources)?;
    for _ in 0..count {
        entries.push(alloc()?);
    }
    Ok(entries)
}

/// An entry owned by a kernel object, returned to the arena on drop.
pub struct OwnedEntry(&'static CapEntry);

impl OwnedEntry {
    #[inline]
    pub fn get(&self) -> &'static CapEntry {
        self.0
    }
}

impl Deref for OwnedEntry {
    type Target = CapEntry;

    fn deref(&self) -> &CapEntry {
        self.0
    }
}

impl Drop for OwnedEntry {
    fn drop(&mut self) {
        if self.0.is_linked() {
            log::warn!(
                target: "cap",
                "entry {} dropped while linked ({:?}), leaking it",
                self.0.id(),
                self.0.cap()
            );
            return;
        }
        self.0.reset();
        ARENA.lock().free.push(self.0.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_recycled() {
        let a = alloc().unwrap();
        let id = a.id();
        assert!(a.cap().is_empty());
        drop(a);
        let many = alloc_many(4).unwrap();
        assert!(many.iter().all(|e| e.cap().is_empty()));
        assert!(core::ptr::eq(entry(id), entry(id)));
    }

    #[test]
    fn test_ids_resolve_to_same_entry() {
        let a = alloc().unwrap();
        assert!(core::ptr::eq(entry(a.id()), a.get()));
    }
}
