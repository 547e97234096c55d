//! Memory regions (frames)
//!
//! A frame is a naturally sized block of memory that can be mapped into an
//! address space. Capabilities to a frame carry [`FrameData`]: access flags
//! and, for narrowed capabilities, the sub-region they cover.

use alloc::sync::Arc;

use bitflags::bitflags;

use super::{
    create_object, invoke_kernel_object, table, Allocator, Deleter, Factory, Frame, FrameInfo,
    Interface, InterfaceId, KernelObject, MemoryChunk, Range, ResultSink,
};
use crate::{
    cap::{Cap, CapEntry, CapRequest, ObjectHandle},
    config::{FRAME_MAX_SIZE_BITS, FRAME_MIN_SIZE, FRAME_MIN_SIZE_BITS},
    error::{Error, KernelResult},
    invocation::{
        protocol::{
            frame as proto,
            kernel_memory::CREATE_ARGS_OFFSET,
        },
        Invocation, InvocationBuf,
    },
    sync::Tasklet,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u32 {
        const WRITABLE = 1 << 0;
        /// Usable for kernel mappings.
        const KERNEL = 1 << 1;
    }
}

/// Capability data of a frame capability. Also the request format for
/// minting.
///
/// Bits 0..2 hold [`FrameFlags`], bits 2..7 the size exponent of the
/// covered sub-region and bits 7..32 its offset from the frame start in
/// units of [`FRAME_MIN_SIZE`]. A size exponent of zero means the whole
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameData {
    pub flags: FrameFlags,
    pub size_bits: u8,
    pub offset: u32,
}

impl FrameData {
    const SIZE_SHIFT: u32 = 2;
    const SIZE_MASK: u32 = 0x1f;
    const OFFSET_SHIFT: u32 = 7;

    pub const fn whole(flags: FrameFlags) -> Self {
        Self {
            flags,
            size_bits: 0,
            offset: 0,
        }
    }

    /// Sub-region of `1 << size_bits` bytes at byte offset `offset`.
    pub const fn sub_region(flags: FrameFlags, offset: usize, size_bits: u8) -> Self {
        Self {
            flags,
            size_bits,
            offset: (offset / FRAME_MIN_SIZE) as u32,
        }
    }

    pub fn decode(data: u32) -> Self {
        Self {
            flags: FrameFlags::from_bits_truncate(data),
            size_bits: ((data >> Self::SIZE_SHIFT) & Self::SIZE_MASK) as u8,
            offset: data >> Self::OFFSET_SHIFT,
        }
    }

    pub fn encode(self) -> u32 {
        self.flags.bits()
            | ((self.size_bits as u32 & Self::SIZE_MASK) << Self::SIZE_SHIFT)
            | (self.offset << Self::OFFSET_SHIFT)
    }

    /// The request that mints this data.
    pub fn request(self) -> CapRequest {
        self.encode()
    }

    /// Addresses covered within a frame at `start` of `size` bytes.
    pub fn range(&self, start: usize, size: usize) -> Range {
        if self.size_bits == 0 {
            Range::new(start, size)
        } else {
            Range::new(
                start + self.offset as usize * FRAME_MIN_SIZE,
                1 << self.size_bits,
            )
        }
    }
}

fn check_size_bits(size_bits: u8) -> KernelResult<()> {
    if (FRAME_MIN_SIZE_BITS..=FRAME_MAX_SIZE_BITS).contains(&(size_bits as u32)) {
        Ok(())
    } else {
        Err(Error::InvalidArgument)
    }
}

pub struct MemoryRegion {
    handle: ObjectHandle,
    start: usize,
    size: usize,
    /// Untyped memory the frame was taken from. `None` for device memory.
    backing: Option<(Arc<dyn Allocator>, MemoryChunk)>,
}

impl MemoryRegion {
    /// Create a frame of `1 << size_bits` bytes out of `mem`.
    pub fn create(
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        size_bits: u8,
    ) -> KernelResult<Arc<Self>> {
        if let Err(e) = check_size_bits(size_bits) {
            dst.reset();
            return Err(e);
        }
        let size = 1usize << size_bits;
        let owner = mem.clone();
        let data = FrameData::whole(FrameFlags::WRITABLE | FrameFlags::KERNEL);
        create_object(
            dst,
            mem_entry,
            mem_cap,
            mem,
            size,
            FRAME_MIN_SIZE,
            data.encode(),
            |handle, chunk| {
                Ok(Self {
                    handle,
                    start: chunk.start,
                    size,
                    backing: Some((owner, chunk)),
                })
            },
        )
    }

    /// Describe device memory that is not managed by any allocator.
    pub(crate) fn new_device(start: usize, size_bits: u8) -> KernelResult<(ObjectHandle, Arc<Self>)> {
        check_size_bits(size_bits)?;
        if start % FRAME_MIN_SIZE != 0 {
            return Err(Error::Unaligned);
        }
        table::insert_with(|handle| {
            Ok(Arc::new(Self {
                handle,
                start,
                size: 1 << size_bits,
                backing: None,
            }))
        })
    }

    fn range_of(&self, cap: Cap) -> Range {
        FrameData::decode(cap.data()).range(self.start, self.size)
    }

    /// Narrow `cap` to the sub-region and rights in `request`.
    ///
    /// The result never covers more than `cap` or carries rights `cap`
    /// lacks.
    fn sub_region(&self, cap: Cap, request: CapRequest) -> KernelResult<Cap> {
        let cur = FrameData::decode(cap.data());
        let req = FrameData::decode(request);
        let flags = cur.flags & req.flags;
        if req.size_bits == 0 {
            return Ok(cap.with_data(FrameData { flags, ..cur }.encode()));
        }
        check_size_bits(req.size_bits)?;
        let want = req.range(self.start, self.size);
        if !self.range_of(cap).contains(&want) {
            return Err(Error::InsufficientResources);
        }
        if (want.start - self.start) % want.size() != 0 {
            return Err(Error::Unaligned);
        }
        Ok(cap.with_data(FrameData { flags, ..req }.encode()))
    }
}

impl Frame for MemoryRegion {
    fn frame_info(&self, cap: Cap) -> FrameInfo {
        let data = FrameData::decode(cap.data());
        let range = self.range_of(cap);
        FrameInfo {
            start: range.start,
            size: range.size(),
            writable: data.flags.contains(FrameFlags::WRITABLE),
            kernel: data.flags.contains(FrameFlags::KERNEL),
        }
    }
}

impl KernelObject for MemoryRegion {
    fn name(&self) -> &'static str {
        "MemoryRegion"
    }

    fn address_range(&self, _entry: &CapEntry, cap: Cap) -> Range {
        self.range_of(cap)
    }

    fn mint(&self, _entry: &CapEntry, cap: Cap, request: CapRequest, _derive: bool) -> KernelResult<Cap> {
        self.sub_region(cap, request)
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            del.delete_object(self.handle);
        }
        Ok(())
    }

    fn delete_object(self: Arc<Self>, t: &'static Tasklet, sink: Arc<dyn ResultSink>) {
        match &self.backing {
            Some((mem, chunk)) => mem.clone().free_async(t, sink, *chunk),
            None => sink.response(t, Ok(())),
        }
    }

    fn invoke(self: Arc<Self>, t: &'static Tasklet, cap: Cap, msg: Arc<dyn Invocation>) {
        let result = if msg.protocol() == proto::PROTO {
            proto::Methods::try_from(msg.method()).map(|method| match method {
                proto::Methods::Info => {
                    let info = self.frame_info(cap);
                    msg.message().write(&proto::Info {
                        start: info.start as u64,
                        size: info.size as u64,
                        writable: info.writable as u8,
                        kernel: info.kernel as u8,
                    });
                }
            })
        } else {
            invoke_kernel_object(self.name(), &msg)
        };
        msg.reply_response(t, result);
    }

    fn vcast(self: Arc<Self>, id: InterfaceId) -> KernelResult<Interface> {
        match id {
            InterfaceId::Frame => Ok(Interface::Frame(self)),
            _ => Err(Error::TypeMismatch),
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct MemoryRegionFactory {
    handle: ObjectHandle,
}

impl MemoryRegionFactory {
    pub fn new() -> KernelResult<(ObjectHandle, Arc<Self>)> {
        table::insert_with(|handle| Ok(Arc::new(Self { handle })))
    }
}

impl KernelObject for MemoryRegionFactory {
    fn name(&self) -> &'static str {
        "MemoryRegionFactory"
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

impl Factory for MemoryRegionFactory {
    fn factory(
        &self,
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        msg: &InvocationBuf,
    ) -> KernelResult<()> {
        let args = msg.read_at::<proto::FrameCreate>(CREATE_ARGS_OFFSET)?;
        MemoryRegion::create(dst, mem_entry, mem_cap, mem, args.size_bits).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_data_layout() {
        let data = FrameData::sub_region(FrameFlags::WRITABLE, 3 * FRAME_MIN_SIZE, 13);
        let raw = data.encode();
        assert_eq!(raw & 0b11, 1);
        assert_eq!((raw >> 2) & 0x1f, 13);
        assert_eq!(raw >> 7, 3);
        assert_eq!(FrameData::decode(raw), data);
        assert_eq!(FrameData::decode(0), FrameData::whole(FrameFlags::empty()));
    }

    #[test]
    fn test_range_of_whole_and_sub_region() {
        let whole = FrameData::whole(FrameFlags::all());
        assert_eq!(whole.range(0x10000, 0x4000), Range::new(0x10000, 0x4000));
        let sub = FrameData::sub_region(FrameFlags::all(), 0x2000, 12);
        assert_eq!(sub.range(0x10000, 0x4000), Range::new(0x12000, 0x1000));
    }
}
