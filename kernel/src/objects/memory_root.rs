//! The root of the resource tree
//!
//! Every memory resource descends from the memory root's capability, which
//! covers the whole address space. Boot hands out references to it; they
//! can create frames for device memory. The root itself is never deleted.

use alloc::sync::Arc;

use super::{
    invoke_kernel_object, memory_region::{FrameData, FrameFlags, MemoryRegion},
    table, Deleter, KernelObject, Range,
};
use crate::{
    cap::{arena, ops, Cap, CapEntry, CapRequest, ObjectHandle, OwnedEntry},
    error::{Error, KernelResult},
    invocation::{protocol::memory_root as proto, Invocation},
    sync::Tasklet,
};

pub struct MemoryRoot {
    handle: ObjectHandle,
    root: OwnedEntry,
}

impl MemoryRoot {
    pub fn new() -> KernelResult<Arc<Self>> {
        let root = arena::alloc()?;
        let (handle, obj) = table::insert_with(|handle| Ok(Arc::new(Self { handle, root })))?;
        obj.root.init_root(Cap::new(handle));
        Ok(obj)
    }

    /// Entry holding the root capability. Boot memory is linked below it.
    pub fn root_entry(&self) -> &'static CapEntry {
        self.root.get()
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// The frame's original is linked below the root entry, not below the
    /// invoked capability, which is usually a reference.
    fn create_device_frame(&self, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        let args = msg.message().read::<proto::Create>()?;
        let dst = msg.lookup_entry(args.dst_ptr, args.dst_depth, true)?;
        dst.entry().acquire().map_err(|_| Error::LostRace)?;
        let (handle, _frame) = match MemoryRegion::new_device(args.start as usize, args.size_bits) {
            Ok(created) => created,
            Err(e) => {
                dst.entry().reset();
                return Err(e);
            }
        };
        let flags = if args.writable != 0 {
            FrameFlags::WRITABLE
        } else {
            FrameFlags::empty()
        };
        let frame_cap = Cap::new(handle).with_data(FrameData::whole(flags).encode());
        let root = self.root_entry();
        ops::inherit(root, root.cap(), dst.entry(), frame_cap).inspect_err(|_| {
            table::remove(handle);
        })
    }
}

impl KernelObject for MemoryRoot {
    fn name(&self) -> &'static str {
        "MemoryRoot"
    }

    fn address_range(&self, _entry: &CapEntry, _cap: Cap) -> Range {
        Range {
            start: 0,
            end: usize::MAX,
        }
    }

    /// Only references to the root are handed out.
    fn mint(&self, _entry: &CapEntry, cap: Cap, _request: CapRequest, derive: bool) -> KernelResult<Cap> {
        if derive {
            return Err(Error::InvalidCapability);
        }
        Ok(cap)
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, _del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            return Err(Error::RequestDenied);
        }
        Ok(())
    }

    fn invoke(self: Arc<Self>, t: &'static Tasklet, _cap: Cap, msg: Arc<dyn Invocation>) {
        let result = if msg.protocol() == proto::PROTO {
            proto::Methods::try_from(msg.method()).and_then(|method| match method {
                proto::Methods::Create => self.create_device_frame(&msg),
            })
        } else {
            invoke_kernel_object(self.name(), &msg)
        };
        msg.reply_response(t, result);
    }
}
