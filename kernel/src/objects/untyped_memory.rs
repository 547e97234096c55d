//! Untyped memory
//!
//! Kernel memory that has not been turned into objects yet. Every object is
//! created by invoking an untyped memory capability together with the
//! capability of a factory; the new object's original capability becomes a
//! child of the memory capability. Allocation is first fit over the
//! object's range.

use alloc::{
    alloc::{alloc, Layout},
    sync::Arc,
};
use core::ptr::NonNull;

use linked_list_allocator::Heap;
use spin::Mutex;

use super::{
    create_object, invoke_kernel_object, table, Allocator, CapMap, Deleter, Factory, Interface,
    InterfaceId, KernelObject, MemoryChunk, Range, ResultSink, TypedCap,
};
use crate::{
    cap::{Cap, CapEntry, ObjectHandle},
    config::{CAPTR_BITS, UNTYPED_ALIGN},
    error::{Error, KernelResult},
    invocation::{
        protocol::kernel_memory::{self as proto, CREATE_ARGS_OFFSET, FACTORY_CAP},
        Invocation, InvocationBuf,
    },
    sync::{monitor::NestedMonitorDelegating, OwnedTasklet, Tasklet},
};

pub struct UntypedMemory {
    handle: ObjectHandle,
    range: Range,
    heap: Mutex<Heap>,
    /// Where our own memory came from. `None` for boot memory.
    parent: Option<(Arc<dyn Allocator>, MemoryChunk)>,
    monitor: NestedMonitorDelegating,
    delete_tasklet: OwnedTasklet,
}

fn layout(len: usize, align: usize) -> KernelResult<Layout> {
    Layout::from_size_align(len.max(1), align.max(1)).map_err(|_| Error::InvalidArgument)
}

impl UntypedMemory {
    fn build(
        handle: ObjectHandle,
        chunk: MemoryChunk,
        parent: Option<(Arc<dyn Allocator>, MemoryChunk)>,
    ) -> Self {
        // SAFETY: `chunk` is memory nobody else uses, either fresh from the
        // global allocator or handed out exclusively by the parent heap.
        let heap = unsafe { Heap::new(chunk.start as *mut u8, chunk.len) };
        Self {
            handle,
            range: chunk.range(),
            heap: Mutex::new(heap),
            parent,
            monitor: NestedMonitorDelegating::new(),
            delete_tasklet: OwnedTasklet::new(),
        }
    }

    /// Take `size` bytes from the global allocator as boot memory.
    ///
    /// The memory is never returned.
    pub fn new_root(size: usize) -> KernelResult<(ObjectHandle, Arc<Self>)> {
        if size == 0 || size % UNTYPED_ALIGN != 0 {
            return Err(Error::Unaligned);
        }
        let layout = layout(size, UNTYPED_ALIGN)?;
        // SAFETY: the layout has a non-zero size.
        let start = unsafe { alloc(layout) };
        if start.is_null() {
            return Err(Error::InsufficientResources);
        }
        let chunk = MemoryChunk {
            start: start as usize,
            len: size,
            align: UNTYPED_ALIGN,
        };
        log::info!(target: "um", "boot memory {:?}", chunk.range());
        table::insert_with(|handle| Ok(Arc::new(Self::build(handle, chunk, None))))
    }

    /// Create an untyped memory object of `size` bytes out of `mem`.
    pub fn create(
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        size: usize,
        alignment: usize,
    ) -> KernelResult<Arc<Self>> {
        if alignment < UNTYPED_ALIGN
            || !alignment.is_power_of_two()
            || size == 0
            || size % alignment != 0
        {
            dst.reset();
            return Err(Error::Unaligned);
        }
        let owner = mem.clone();
        create_object(dst, mem_entry, mem_cap, mem, size, alignment, 0, |handle, chunk| {
            Ok(Self::build(handle, chunk, Some((owner, chunk))))
        })
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn free_bytes(&self) -> usize {
        self.heap.lock().free()
    }

    // -----------------------------------------------------------------------
    // Invocations
    // -----------------------------------------------------------------------

    fn dispatch(self: &Arc<Self>, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        match proto::Methods::try_from(msg.method())? {
            proto::Methods::Properties => {
                let props = proto::Properties {
                    total: self.range.size() as u64,
                    free: self.free_bytes() as u64,
                    start: self.range.start as u64,
                };
                msg.message().write(&props);
                Ok(())
            }
            proto::Methods::Create => self.invoke_create(cap, msg),
        }
    }

    fn invoke_create(self: &Arc<Self>, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        let (args, factory_ptr) = {
            let buf = msg.message();
            (buf.read::<proto::Create>()?, buf.cap_ptrs[FACTORY_CAP])
        };
        let factory_ref = msg.lookup_entry(factory_ptr, CAPTR_BITS as u8, false)?;
        let factory = TypedCap::<dyn Factory>::from_entry(factory_ref.entry())?;

        let dst = if args.dst_space_ptr == 0 {
            msg.lookup_entry(args.dst_ptr, args.dst_depth, true)?
        } else {
            let space_ref = msg.lookup_entry(args.dst_space_ptr, args.dst_space_depth, false)?;
            let space = TypedCap::<CapMap>::from_entry(space_ref.entry())?;
            space.lookup(args.dst_ptr, args.dst_depth, true)?
        };
        dst.entry().acquire().map_err(|_| Error::LostRace)?;

        let mem: Arc<dyn Allocator> = self.clone();
        let mem_entry = msg.cap_entry();
        let buf = msg.message().clone();
        factory.factory(dst.entry(), mem_entry, cap, &mem, &buf)
    }
}

impl Allocator for UntypedMemory {
    fn alloc(&self, len: usize, align: usize) -> KernelResult<MemoryChunk> {
        let layout = layout(len, align)?;
        let ptr = self
            .heap
            .lock()
            .allocate_first_fit(layout)
            .map_err(|_| Error::InsufficientResources)?;
        self.monitor.acquire_ref();
        Ok(MemoryChunk {
            start: ptr.as_ptr() as usize,
            len,
            align,
        })
    }

    fn free(&self, chunk: MemoryChunk) {
        debug_assert!(self.range.contains(&chunk.range()));
        let (Ok(layout), Some(ptr)) = (
            layout(chunk.len, chunk.align),
            NonNull::new(chunk.start as *mut u8),
        ) else {
            panic!("freeing foreign chunk {:?}", chunk);
        };
        // SAFETY: the chunk was returned by `alloc` on this heap with the
        // same layout and is freed exactly once.
        unsafe { self.heap.lock().deallocate(ptr, layout) };
        self.monitor.release_ref();
    }

    fn free_async(self: Arc<Self>, t: &'static Tasklet, sink: Arc<dyn ResultSink>, chunk: MemoryChunk) {
        let um = self.clone();
        self.monitor.request(t, move |t| {
            um.free(chunk);
            um.monitor.request_done();
            sink.response(t, Ok(()));
        });
    }
}

impl KernelObject for UntypedMemory {
    fn name(&self) -> &'static str {
        "UntypedMemory"
    }

    fn address_range(&self, _entry: &CapEntry, _cap: Cap) -> Range {
        self.range
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            del.delete_object(self.handle);
        }
        Ok(())
    }

    /// Runs once every chunk handed out has been freed again.
    fn delete_object(self: Arc<Self>, t: &'static Tasklet, sink: Arc<dyn ResultSink>) {
        let um = self.clone();
        self.monitor.do_delete(self.delete_tasklet.get(), move |_| {
            let parent = um.parent.clone();
            drop(um);
            match parent {
                Some((mem, chunk)) => mem.free_async(t, sink, chunk),
                None => sink.response(t, Ok(())),
            }
        });
    }

    fn invoke(self: Arc<Self>, t: &'static Tasklet, cap: Cap, msg: Arc<dyn Invocation>) {
        let um = self.clone();
        self.monitor.request(t, move |t| {
            let result = if msg.protocol() == proto::PROTO {
                um.dispatch(cap, &msg)
            } else {
                invoke_kernel_object(um.name(), &msg)
            };
            match result {
                Err(Error::Inhibit) => {}
                result => msg.reply_response(t, result),
            }
            um.monitor.request_done();
        });
    }

    fn vcast(self: Arc<Self>, id: InterfaceId) -> KernelResult<Interface> {
        match id {
            InterfaceId::Allocator => Ok(Interface::Allocator(self)),
            _ => Err(Error::TypeMismatch),
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct UntypedMemoryFactory {
    handle: ObjectHandle,
}

impl UntypedMemoryFactory {
    pub fn new() -> KernelResult<(ObjectHandle, Arc<Self>)> {
        table::insert_with(|handle| Ok(Arc::new(Self { handle })))
    }
}

impl KernelObject for UntypedMemoryFactory {
    fn name(&self) -> &'static str {
        "UntypedMemoryFactory"
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, _del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            log::warn!(target: "um", "factory {} outlives its capability", self.handle);
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

impl Factory for UntypedMemoryFactory {
    fn factory(
        &self,
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        msg: &InvocationBuf,
    ) -> KernelResult<()> {
        let args = msg.read_at::<proto::UntypedMemoryCreate>(CREATE_ARGS_OFFSET)?;
        UntypedMemory::create(
            dst,
            mem_entry,
            mem_cap,
            mem,
            args.size as usize,
            args.alignment as usize,
        )
        .map(|_| ())
    }
}
