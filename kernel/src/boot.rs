//! Initial capability space
//!
//! Builds the objects that exist before any user code runs and places
//! capabilities to them in fixed slots of the root capability map:
//! the root untyped memory, the map itself, a reference to the memory
//! root, the interrupt controller and one factory per object type.

use alloc::sync::Arc;

use crate::{
    cap::{arena, ops, Cap, CapEntry, OwnedEntry},
    config::BootConfig,
    error::{Error, KernelResult},
    invocation::{CapPtr, KernelInvocation},
    objects::{
        cap_map::CapMapRights, example::ExampleFactory, interrupt_control::InterruptControl,
        memory_region::MemoryRegionFactory, memory_root::MemoryRoot,
        signal_listener::SignalListenerFactory,
        untyped_memory::{UntypedMemory, UntypedMemoryFactory},
        Allocator, CapMap, CapMapFactory,
    },
};

/// Slots of the root capability map.
pub mod slots {
    use crate::invocation::CapPtr;

    pub const CSPACE: CapPtr = 1;
    pub const MEMORY_ROOT: CapPtr = 2;
    pub const UNTYPED_MEMORY: CapPtr = 3;
    pub const CAPMAP_FACTORY: CapPtr = 4;
    pub const UNTYPED_MEMORY_FACTORY: CapPtr = 5;
    pub const FRAME_FACTORY: CapPtr = 6;
    pub const EXAMPLE_FACTORY: CapPtr = 7;
    pub const SIGNAL_LISTENER_FACTORY: CapPtr = 8;
    pub const INTERRUPT_CONTROL: CapPtr = 9;

    /// First slot not used by boot.
    pub const FREE: CapPtr = 10;
}

/// Handles to the boot objects.
pub struct Kernel {
    config: BootConfig,
    memory_root: Arc<MemoryRoot>,
    root_memory: Arc<UntypedMemory>,
    cspace: Arc<CapMap>,
    interrupts: Arc<InterruptControl>,
    cspace_entry: OwnedEntry,
}

impl Kernel {
    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    pub fn memory_root(&self) -> &Arc<MemoryRoot> {
        &self.memory_root
    }

    pub fn root_memory(&self) -> &Arc<UntypedMemory> {
        &self.root_memory
    }

    pub fn cspace(&self) -> &Arc<CapMap> {
        &self.cspace
    }

    pub fn interrupts(&self) -> &Arc<InterruptControl> {
        &self.interrupts
    }

    /// Entry holding the original capability of the root map.
    pub fn cspace_entry(&self) -> &'static CapEntry {
        self.cspace_entry.get()
    }

    /// Pointer to `slot` of the root map.
    pub fn slot_ptr(&self, slot: CapPtr) -> CapPtr {
        let index_bits = self.config.root_capmap_bits;
        (self.config.root_capmap_guard << index_bits) | slot
    }

    /// Entry at `slot` of the root map.
    pub fn slot(&self, slot: CapPtr) -> Option<&'static CapEntry> {
        self.cspace.slot(slot as usize)
    }

    /// A fresh invocation context resolving pointers in the root map.
    ///
    /// Deletions started through it refuse to destroy the root map.
    pub fn invocation(&self) -> Arc<KernelInvocation> {
        KernelInvocation::new(self.cspace_entry(), Some(self.cspace.handle()))
    }
}

fn slot_of(cspace: &CapMap, slot: CapPtr) -> KernelResult<&'static CapEntry> {
    cspace.slot(slot as usize).ok_or(Error::InvalidArgument)
}

/// Install the original capability of an already registered object.
fn install(parent: &CapEntry, dst: &'static CapEntry, cap: Cap) -> KernelResult<()> {
    dst.acquire()?;
    ops::inherit(parent, parent.cap(), dst, cap)
}

/// Create the boot objects described by `config`.
pub fn boot(config: &BootConfig) -> KernelResult<Kernel> {
    if config.root_depth() != crate::config::CAPTR_BITS || config.root_capmap_bits < 4 {
        return Err(Error::InvalidArgument);
    }
    let memory_root = MemoryRoot::new()?;
    let root_entry = memory_root.root_entry();

    let (um_handle, root_memory) = UntypedMemory::new_root(config.root_memory_size)?;
    let um_entry = arena::alloc()?;
    install(root_entry, um_entry.get(), Cap::new(um_handle))?;

    let cspace_entry = arena::alloc()?;
    cspace_entry.acquire()?;
    let mem: Arc<dyn Allocator> = root_memory.clone();
    let cspace = CapMap::create(
        cspace_entry.get(),
        um_entry.get(),
        um_entry.cap(),
        &mem,
        config.root_capmap_bits as u8,
        config.root_capmap_guard_bits as u8,
        config.root_capmap_guard,
    )?;

    let um_slot = slot_of(&cspace, slots::UNTYPED_MEMORY)?;
    um_slot.acquire()?;
    um_entry.move_to(um_slot)?;

    ops::reference(
        cspace_entry.get(),
        cspace_entry.cap(),
        slot_of(&cspace, slots::CSPACE)?,
        CapMapRights::all().bits(),
    )?;
    ops::reference(
        root_entry,
        root_entry.cap(),
        slot_of(&cspace, slots::MEMORY_ROOT)?,
        0,
    )?;

    let (handle, _) = CapMapFactory::new()?;
    install(root_entry, slot_of(&cspace, slots::CAPMAP_FACTORY)?, Cap::new(handle))?;
    let (handle, _) = UntypedMemoryFactory::new()?;
    install(root_entry, slot_of(&cspace, slots::UNTYPED_MEMORY_FACTORY)?, Cap::new(handle))?;
    let (handle, _) = MemoryRegionFactory::new()?;
    install(root_entry, slot_of(&cspace, slots::FRAME_FACTORY)?, Cap::new(handle))?;
    let (handle, _) = ExampleFactory::new()?;
    install(root_entry, slot_of(&cspace, slots::EXAMPLE_FACTORY)?, Cap::new(handle))?;
    let (handle, _) = SignalListenerFactory::new()?;
    install(root_entry, slot_of(&cspace, slots::SIGNAL_LISTENER_FACTORY)?, Cap::new(handle))?;
    let (handle, interrupts) = InterruptControl::new()?;
    install(root_entry, slot_of(&cspace, slots::INTERRUPT_CONTROL)?, Cap::new(handle))?;

    log::info!(
        target: "boot",
        "root cspace {} with {} slots, {} KiB untyped memory",
        cspace.handle(),
        cspace.slot_count(),
        config.root_memory_size >> 10
    );
    Ok(Kernel {
        config: *config,
        memory_root,
        root_memory,
        cspace,
        interrupts,
        cspace_entry,
    })
}
