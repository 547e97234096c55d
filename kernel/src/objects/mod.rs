//! Kernel objects
//!
//! Everything a capability can name implements [`KernelObject`]. Objects
//! are registered in the global object table and referenced from
//! capabilities by handle. Interfaces beyond the base trait are reached
//! through a fallible capability-style cast, [`KernelObject::vcast`].

use alloc::sync::Arc;
use core::fmt;

use crate::{
    cap::{ops, Cap, CapEntry, CapRequest, ObjectHandle},
    error::{Error, KernelResult},
    invocation::{protocol::kernel_object, Invocation, InvocationBuf},
    sync::Tasklet,
};

pub mod cap_map;
pub mod example;
pub mod interrupt_control;
pub mod memory_region;
pub mod memory_root;
pub mod signal_listener;
pub mod table;
pub mod typed_cap;
pub mod untyped_memory;

pub use cap_map::{CapEntryRef, CapMap, CapMapFactory};
pub use typed_cap::TypedCap;

// ---------------------------------------------------------------------------
// Address ranges
// ---------------------------------------------------------------------------

/// Half-open range of addresses covered by a capability.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub const fn new(start: usize, size: usize) -> Self {
        Self {
            start,
            end: start.saturating_add(size),
        }
    }

    pub const fn size(&self) -> usize {
        self.end - self.start
    }

    pub const fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Contains `other` and is larger than it.
    pub const fn strictly_contains(&self, other: &Range) -> bool {
        self.contains(other) && self.size() > other.size()
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Object contract
// ---------------------------------------------------------------------------

/// Receives the outcome of an asynchronous operation.
pub trait ResultSink: Send + Sync {
    fn response(&self, t: &'static Tasklet, result: KernelResult<()>);
}

/// Collects the side effects of deleting capabilities.
pub trait Deleter {
    /// Schedule the object for destruction once the synchronous phase of the
    /// deletion is complete.
    fn delete_object(&self, handle: ObjectHandle);

    /// Delete a capability entry owned by an object that is being deleted.
    fn delete_entry(&self, entry: &'static CapEntry) -> KernelResult<()>;
}

/// Interfaces reachable through [`KernelObject::vcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceId {
    CapMap,
    Factory,
    Frame,
    Allocator,
    Signalable,
}

pub enum Interface {
    CapMap(Arc<CapMap>),
    Factory(Arc<dyn Factory>),
    Frame(Arc<dyn Frame>),
    Allocator(Arc<dyn Allocator>),
    Signalable(Arc<dyn Signalable>),
}

/// Types that [`TypedCap`] can extract from an [`Interface`].
pub trait Castable {
    const ID: InterfaceId;

    fn extract(interface: Interface) -> Option<Arc<Self>>;
}

pub trait KernelObject: Send + Sync + 'static {
    /// Short type name for debug output.
    fn name(&self) -> &'static str;

    /// Addresses covered by `cap`. Children of a capability cover a subset
    /// of their parent's range.
    fn address_range(&self, _entry: &CapEntry, _cap: Cap) -> Range {
        Range::new(self as *const Self as *const u8 as usize, 1)
    }

    /// Compute the capability for a derivation or reference of `cap`.
    ///
    /// Must never return a capability with more rights or a wider range
    /// than `cap`.
    fn mint(&self, _entry: &CapEntry, cap: Cap, request: CapRequest, _derive: bool) -> KernelResult<Cap> {
        if request == 0 {
            Ok(cap)
        } else {
            Err(Error::NotImplemented)
        }
    }

    /// Called once for every capability to this object that is deleted.
    /// Only the original capability may schedule the object itself.
    fn delete_cap(&self, entry: &'static CapEntry, cap: Cap, del: &dyn Deleter) -> KernelResult<()>;

    /// Release the object's resources after all its capabilities are gone.
    fn delete_object(self: Arc<Self>, t: &'static Tasklet, sink: Arc<dyn ResultSink>) {
        sink.response(t, Ok(()));
    }

    /// Handle a user invocation of `cap`.
    fn invoke(self: Arc<Self>, t: &'static Tasklet, _cap: Cap, msg: Arc<dyn Invocation>) {
        let result = invoke_kernel_object(self.name(), &msg);
        msg.reply_response(t, result);
    }

    fn vcast(self: Arc<Self>, _id: InterfaceId) -> KernelResult<Interface> {
        Err(Error::TypeMismatch)
    }
}

/// Serve the protocol every object speaks.
pub fn invoke_kernel_object(name: &str, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
    if msg.protocol() != kernel_object::PROTO {
        return Err(Error::NotImplemented);
    }
    match kernel_object::Methods::try_from(msg.method())? {
        kernel_object::Methods::GetDebugInfo => {
            kernel_object::write_debug_info(&mut msg.message(), name);
            Ok(())
        }
        kernel_object::Methods::DebugInfoRes => Err(Error::NotImplemented),
    }
}

// ---------------------------------------------------------------------------
// Secondary interfaces
// ---------------------------------------------------------------------------

/// A block of memory handed out by an [`Allocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryChunk {
    pub start: usize,
    pub len: usize,
    pub align: usize,
}

impl MemoryChunk {
    pub const fn range(&self) -> Range {
        Range::new(self.start, self.len)
    }
}

/// Source of kernel memory for new objects.
pub trait Allocator: Send + Sync {
    fn alloc(&self, len: usize, align: usize) -> KernelResult<MemoryChunk>;

    fn free(&self, chunk: MemoryChunk);

    /// Free `chunk` inside the allocator's monitor and report to `sink`.
    fn free_async(
        self: Arc<Self>,
        t: &'static Tasklet,
        sink: Arc<dyn ResultSink>,
        chunk: MemoryChunk,
    );
}

/// Creates objects of one type out of untyped memory.
pub trait Factory: Send + Sync {
    fn factory(
        &self,
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        msg: &InvocationBuf,
    ) -> KernelResult<()>;
}

/// Frame geometry reported through the frame protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub start: usize,
    pub size: usize,
    pub writable: bool,
    pub kernel: bool,
}

pub trait Frame: Send + Sync {
    fn frame_info(&self, cap: Cap) -> FrameInfo;
}

/// Something that can be notified with a bit pattern, like an interrupt.
pub trait Signalable: Send + Sync {
    fn signal(&self, value: u64);
}

macro_rules! castable {
    ($ty:ty, $variant:ident) => {
        impl Castable for $ty {
            const ID: InterfaceId = InterfaceId::$variant;

            fn extract(interface: Interface) -> Option<Arc<Self>> {
                match interface {
                    Interface::$variant(obj) => Some(obj),
                    _ => None,
                }
            }
        }
    };
}

castable!(CapMap, CapMap);
castable!(dyn Factory, Factory);
castable!(dyn Frame, Frame);
castable!(dyn Allocator, Allocator);
castable!(dyn Signalable, Signalable);

// ---------------------------------------------------------------------------
// Object creation
// ---------------------------------------------------------------------------

/// Carve an object out of untyped memory and link its original capability
/// below the memory capability.
///
/// `build` receives the object's handle and memory. On failure nothing is
/// left behind: the memory is returned and `dst` reset.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create_object<T, F>(
    dst: &'static CapEntry,
    mem_entry: &'static CapEntry,
    mem_cap: Cap,
    mem: &Arc<dyn Allocator>,
    len: usize,
    align: usize,
    cap_data: u32,
    build: F,
) -> KernelResult<Arc<T>>
where
    T: KernelObject,
    F: FnOnce(ObjectHandle, MemoryChunk) -> KernelResult<T>,
{
    let chunk = match mem.alloc(len, align) {
        Ok(chunk) => chunk,
        Err(e) => {
            dst.reset();
            return Err(e);
        }
    };
    let (handle, obj) = match table::insert_with(|handle| build(handle, chunk).map(Arc::new)) {
        Ok(created) => created,
        Err(e) => {
            mem.free(chunk);
            dst.reset();
            return Err(e);
        }
    };
    let cap = Cap::new(handle).with_data(cap_data);
    if let Err(e) = ops::inherit(mem_entry, mem_cap, dst, cap) {
        table::remove(handle);
        mem.free(chunk);
        return Err(e);
    }
    log::debug!(target: "um", "created {} {} at {:?}", obj.name(), handle, chunk.range());
    Ok(obj)
}
