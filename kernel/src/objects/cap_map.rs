//! Capability maps
//!
//! A capability map is a table of capability entries addressed by guarded
//! pointers. A lookup consumes the guard bits and then the index bits from
//! the top of the remaining pointer; if bits are left over, the selected
//! entry must hold another map and resolution continues there.

use alloc::{sync::Arc, vec::Vec};
use core::mem::size_of;

use bitflags::bitflags;

use super::{
    create_object, invoke_kernel_object, table, Allocator, Deleter, Factory, Interface,
    InterfaceId, KernelObject, MemoryChunk, Range, ResultSink, TypedCap,
};
use crate::{
    cap::{arena, ops, Cap, CapEntry, CapRequest, ObjectHandle, OwnedEntry},
    config::MAX_CAPMAP_INDEX_BITS,
    error::{Error, KernelResult},
    invocation::{
        protocol::{cap_map as proto, kernel_memory::CREATE_ARGS_OFFSET},
        CapPtr, Invocation, InvocationBuf,
    },
    sync::{monitor::NestedMonitorDelegating, OwnedTasklet, Tasklet},
};

bitflags! {
    /// Rights carried in the data half of a map capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapMapRights: u32 {
        /// Entries may be modified through this capability.
        const WRITABLE = 1 << 0;
    }
}

pub struct CapMap {
    handle: ObjectHandle,
    chunk: MemoryChunk,
    mem: Arc<dyn Allocator>,
    index_bits: u8,
    guard_bits: u8,
    guard: u32,
    slots: Vec<OwnedEntry>,
    monitor: NestedMonitorDelegating,
    delete_tasklet: OwnedTasklet,
}

fn bits(value: u32, shift: u32, width: u32) -> u32 {
    ((value as u64 >> shift) & ((1u64 << width) - 1)) as u32
}

impl CapMap {
    /// Bytes of kernel memory a map with `index_bits` occupies.
    pub const fn memory_size(index_bits: u8) -> usize {
        64 + (size_of::<CapEntry>() << index_bits)
    }

    /// Create a map in `dst`, taking memory from `mem`.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        index_bits: u8,
        guard_bits: u8,
        guard: u32,
    ) -> KernelResult<Arc<Self>> {
        if index_bits == 0
            || index_bits as u32 > MAX_CAPMAP_INDEX_BITS
            || index_bits as u32 + guard_bits as u32 > 32
            || (guard_bits < 32 && guard as u64 >= 1u64 << guard_bits)
        {
            dst.reset();
            return Err(Error::InvalidArgument);
        }
        let owner = mem.clone();
        create_object(
            dst,
            mem_entry,
            mem_cap,
            mem,
            Self::memory_size(index_bits),
            64,
            CapMapRights::WRITABLE.bits(),
            move |handle, chunk| {
                Ok(Self {
                    handle,
                    chunk,
                    mem: owner,
                    index_bits,
                    guard_bits,
                    guard,
                    slots: arena::alloc_many(1 << index_bits)?,
                    monitor: NestedMonitorDelegating::new(),
                    delete_tasklet: OwnedTasklet::new(),
                })
            },
        )
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Entry at `index`, without any rights check.
    pub fn slot(&self, index: usize) -> Option<&'static CapEntry> {
        self.slots.get(index).map(OwnedEntry::get)
    }

    /// Resolve the `depth` low bits of `ptr` starting at this map.
    pub fn lookup(
        self: &Arc<Self>,
        cap: Cap,
        ptr: CapPtr,
        depth: u8,
        writable: bool,
    ) -> KernelResult<CapEntryRef> {
        let rights = CapMapRights::from_bits_truncate(cap.data());
        if writable && !rights.contains(CapMapRights::WRITABLE) {
            return Err(Error::NoLookup);
        }
        let depth = depth as u32;
        let guard_bits = self.guard_bits as u32;
        let index_bits = self.index_bits as u32;
        if depth > 32 || depth < guard_bits + index_bits {
            return Err(Error::InvalidCapability);
        }
        let remaining = depth - guard_bits;
        if bits(ptr, remaining, guard_bits) != self.guard {
            return Err(Error::InvalidCapability);
        }
        let remaining = remaining - index_bits;
        let index = bits(ptr, remaining, index_bits) as usize;
        let entry = self.slots[index].get();
        if remaining == 0 {
            return Ok(CapEntryRef::new(entry, self.clone()));
        }
        let next = TypedCap::<CapMap>::from_entry(entry)?;
        next.lookup(ptr, remaining as u8, writable)
    }

    // -----------------------------------------------------------------------
    // Invocations
    // -----------------------------------------------------------------------

    fn dispatch(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        match proto::Methods::try_from(msg.method())? {
            proto::Methods::Derive => self.invoke_derive(cap, msg),
            proto::Methods::Reference => self.invoke_reference(cap, msg),
            proto::Methods::Move => self.invoke_move(cap, msg),
            proto::Methods::Delete => self.invoke_delete(t, cap, msg, true),
            proto::Methods::Revoke => self.invoke_delete(t, cap, msg, false),
        }
    }

    fn invoke_derive(self: &Arc<Self>, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        let data = msg.message().read::<proto::Derive>()?;
        let src = msg.lookup_entry(data.src_ptr, data.src_depth, false)?;
        let dst = self.lookup(cap, data.dst_ptr, data.dst_depth, true)?;
        ops::derive(src.entry(), src.entry().cap(), dst.entry(), data.request)
    }

    fn invoke_reference(self: &Arc<Self>, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        let data = msg.message().read::<proto::Reference>()?;
        let src = msg.lookup_entry(data.src_ptr, data.src_depth, false)?;
        let dst = self.lookup(cap, data.dst_ptr, data.dst_depth, true)?;
        ops::reference(src.entry(), src.entry().cap(), dst.entry(), data.request)
    }

    fn invoke_move(self: &Arc<Self>, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        let data = msg.message().read::<proto::Move>()?;
        let src = msg.lookup_entry(data.src_ptr, data.src_depth, true)?;
        let dst = self.lookup(cap, data.dst_ptr, data.dst_depth, true)?;
        dst.entry().acquire()?;
        src.entry().move_to(dst.entry())
    }

    fn invoke_delete(
        self: &Arc<Self>,
        t: &'static Tasklet,
        cap: Cap,
        msg: &Arc<dyn Invocation>,
        delete: bool,
    ) -> KernelResult<()> {
        let (ptr, depth) = if delete {
            let data = msg.message().read::<proto::Delete>()?;
            (data.ptr, data.depth)
        } else {
            let data = msg.message().read::<proto::Revoke>()?;
            (data.ptr, data.depth)
        };
        let entry = self.lookup(cap, ptr, depth, true)?.entry();
        msg.clone().deletion_response(t, entry, delete);
        Err(Error::Inhibit)
    }

    pub fn acquire_entry_ref(&self) {
        self.monitor.acquire_ref();
    }

    pub fn release_entry_ref(&self) {
        self.monitor.release_ref();
    }
}

impl KernelObject for CapMap {
    fn name(&self) -> &'static str {
        "CapMap"
    }

    fn address_range(&self, _entry: &CapEntry, _cap: Cap) -> Range {
        self.chunk.range()
    }

    fn mint(&self, _entry: &CapEntry, cap: Cap, request: CapRequest, _derive: bool) -> KernelResult<Cap> {
        let rights = CapMapRights::from_bits_truncate(cap.data())
            & CapMapRights::from_bits_truncate(request);
        Ok(cap.with_data(rights.bits()))
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            for slot in &self.slots {
                del.delete_entry(slot.get())?;
            }
            del.delete_object(self.handle);
        }
        Ok(())
    }

    fn delete_object(self: Arc<Self>, t: &'static Tasklet, sink: Arc<dyn ResultSink>) {
        let map = self.clone();
        self.monitor.do_delete(self.delete_tasklet.get(), move |_| {
            let mem = map.mem.clone();
            let chunk = map.chunk;
            drop(map);
            mem.free_async(t, sink, chunk);
        });
    }

    /// Deletions hand the reply over to the revoke operation and leave the
    /// monitor right away.
    fn invoke(self: Arc<Self>, t: &'static Tasklet, cap: Cap, msg: Arc<dyn Invocation>) {
        let map = self.clone();
        self.monitor.request(t, move |t| {
            let result = if msg.protocol() == proto::PROTO {
                map.dispatch(t, cap, &msg)
            } else {
                invoke_kernel_object(map.name(), &msg)
            };
            match result {
                Err(Error::Inhibit) => {}
                result => msg.reply_response(t, result),
            }
            map.monitor.request_done();
        });
    }

    fn vcast(self: Arc<Self>, id: InterfaceId) -> KernelResult<Interface> {
        match id {
            InterfaceId::CapMap => Ok(Interface::CapMap(self)),
            _ => Err(Error::TypeMismatch),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry references
// ---------------------------------------------------------------------------

/// An entry found by a lookup. Keeps the containing map from being
/// destroyed while the entry is in use.
pub struct CapEntryRef {
    entry: &'static CapEntry,
    map: Option<Arc<CapMap>>,
}

impl CapEntryRef {
    fn new(entry: &'static CapEntry, map: Arc<CapMap>) -> Self {
        map.acquire_entry_ref();
        Self {
            entry,
            map: Some(map),
        }
    }

    /// Reference an entry that is not inside any map.
    pub fn unowned(entry: &'static CapEntry) -> Self {
        Self { entry, map: None }
    }

    #[inline]
    pub fn entry(&self) -> &'static CapEntry {
        self.entry
    }
}

impl Drop for CapEntryRef {
    fn drop(&mut self) {
        if let Some(map) = self.map.take() {
            map.release_entry_ref();
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct CapMapFactory {
    handle: ObjectHandle,
}

impl CapMapFactory {
    pub fn new() -> KernelResult<(ObjectHandle, Arc<Self>)> {
        table::insert_with(|handle| Ok(Arc::new(Self { handle })))
    }
}

impl KernelObject for CapMapFactory {
    fn name(&self) -> &'static str {
        "CapMapFactory"
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, _del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            log::warn!(target: "capmap", "factory {} outlives its capability", self.handle);
        }
        Ok(())
    }

    fn vcast(self: Arc<Self>, id: InterfaceId) -> KernelResult<Interface> {
        match id {
            InterfaceId::Factory => Ok(Interface::Factory(self)),
            _ => Err(Error::TypeMismatch),
        }
    }
}

impl Factory for CapMapFactory {
    fn factory(
        &self,
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        msg: &InvocationBuf,
    ) -> KernelResult<()> {
        let args = msg.read_at::<proto::CapMapCreate>(CREATE_ARGS_OFFSET)?;
        CapMap::create(
            dst,
            mem_entry,
            mem_cap,
            mem,
            args.index_bits,
            args.guard_bits,
            args.guard,
        )
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boot::{self, slots},
        config::BootConfig,
        invocation::{label, protocol::kernel_object},
        sync::Place,
        testing,
    };

    #[test]
    fn test_invocation_waits_for_busy_monitor() {
        testing::init();
        let kernel = boot::boot(&BootConfig::default()).unwrap();
        let map = kernel.cspace().clone();
        let hold = OwnedTasklet::new();
        map.monitor.request(hold.get(), |_| {});
        assert!(map.monitor.is_busy());

        let inv = kernel.invocation();
        inv.buf().label = label(kernel_object::PROTO, kernel_object::Methods::GetDebugInfo as u8);
        inv.invoke(slots::CSPACE).unwrap();
        Place::current().process_tasks();
        assert!(!inv.is_done());

        map.monitor.request_done();
        testing::run_until(|| inv.is_done());
        assert_eq!(inv.result(), Ok(()));
        assert!(!map.monitor.is_busy());
    }
}
