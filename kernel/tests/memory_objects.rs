//! Untyped memory, frames and capability maps driven through invocations

mod common;

use common::*;
use mythos_kernel::{
    boot::slots,
    cap::CapEntry,
    invocation::{
        label,
        protocol::{cap_map::CapMapCreate, frame, kernel_memory, kernel_object, memory_root},
    },
    objects::{
        memory_region::{FrameData, FrameFlags},
        CapMap, Frame, TypedCap,
    },
    Error,
};

const UM: u32 = slots::FREE;
const FRAME: u32 = slots::FREE + 1;
const COPY: u32 = slots::FREE + 2;
const SUB: u32 = slots::FREE + 3;

fn entry(kernel: &mythos_kernel::boot::Kernel, slot: u32) -> &'static CapEntry {
    kernel.slot(slot).unwrap()
}

fn frame_info(entry: &CapEntry) -> mythos_kernel::objects::FrameInfo {
    TypedCap::<dyn Frame>::from_entry(entry).unwrap().frame_info()
}

fn untyped(size: u64) -> kernel_memory::UntypedMemoryCreate {
    kernel_memory::UntypedMemoryCreate {
        size,
        alignment: 4096,
    }
}

#[test]
fn test_read_only_reference_of_new_frame() {
    let kernel = kernel();
    let inv = kernel.invocation();

    create(&inv, slots::UNTYPED_MEMORY, slots::UNTYPED_MEMORY_FACTORY, UM, &untyped(1 << 20)).unwrap();
    create(&inv, UM, slots::FRAME_FACTORY, FRAME, &frame::FrameCreate { size_bits: 12 }).unwrap();
    let read_only = FrameData::whole(FrameFlags::empty()).request();
    reference(&inv, slots::CSPACE, FRAME, COPY, read_only).unwrap();

    let original = frame_info(entry(&kernel, FRAME));
    let copy = frame_info(entry(&kernel, COPY));
    assert!(original.writable);
    assert!(!copy.writable);
    assert_eq!((copy.start, copy.size), (original.start, original.size));
    assert_eq!(original.size, 4096);
    assert!(entry(&kernel, COPY).cap().is_reference());

    // The frame protocol reports the same.
    inv.buf().label = label(frame::PROTO, frame::Methods::Info as u8);
    call(&inv, COPY).unwrap();
    let info = inv.buf().read::<frame::Info>().unwrap();
    assert_eq!(info.start as usize, original.start);
    assert_eq!(info.writable, 0);
}

#[test]
fn test_frame_narrowing_round_trip() {
    let kernel = kernel();
    let inv = kernel.invocation();
    create(&inv, slots::UNTYPED_MEMORY, slots::FRAME_FACTORY, FRAME, &frame::FrameCreate { size_bits: 14 }).unwrap();
    let whole = frame_info(entry(&kernel, FRAME));

    let rw = FrameData::sub_region(FrameFlags::WRITABLE, 0x1000, 12).request();
    derive(&inv, slots::CSPACE, FRAME, COPY, rw).unwrap();
    let derived = frame_info(entry(&kernel, COPY));
    assert_eq!((derived.start, derived.size), (whole.start + 0x1000, 0x1000));
    assert!(derived.writable);
    assert!(!derived.kernel);

    // A derived capability cannot be derived again, so the second step is a
    // reference.
    let ro = FrameData::sub_region(FrameFlags::empty(), 0x1000, 12).request();
    assert_eq!(derive(&inv, slots::CSPACE, COPY, SUB, ro), Err(Error::InvalidCapability));
    reference(&inv, slots::CSPACE, COPY, SUB, ro).unwrap();
    let narrowed = frame_info(entry(&kernel, SUB));
    assert_eq!((narrowed.start, narrowed.size), (derived.start, derived.size));
    assert!(!narrowed.writable);

    let widened = FrameData::sub_region(FrameFlags::WRITABLE, 0, 15).request();
    assert_eq!(
        derive(&inv, slots::CSPACE, FRAME, SUB + 1, widened),
        Err(Error::InsufficientResources)
    );
    let misaligned = FrameData::sub_region(FrameFlags::WRITABLE, 0x1000, 13).request();
    assert_eq!(
        derive(&inv, slots::CSPACE, FRAME, SUB + 1, misaligned),
        Err(Error::Unaligned)
    );
    assert!(entry(&kernel, SUB + 1).cap().is_empty());
}

#[test]
fn test_deleting_frame_returns_memory() {
    let kernel = kernel();
    let inv = kernel.invocation();
    create(&inv, slots::UNTYPED_MEMORY, slots::UNTYPED_MEMORY_FACTORY, UM, &untyped(1 << 20)).unwrap();

    let before = inv_properties(&inv, UM);
    assert_eq!(before.total, 1 << 20);
    assert_eq!(before.free, 1 << 20);

    create(&inv, UM, slots::FRAME_FACTORY, FRAME, &frame::FrameCreate { size_bits: 16 }).unwrap();
    reference(&inv, slots::CSPACE, FRAME, COPY, 0).unwrap();
    assert_eq!(inv_properties(&inv, UM).free, before.free - (1 << 16));

    delete(&inv, slots::CSPACE, FRAME).unwrap();
    assert!(entry(&kernel, FRAME).cap().is_empty());
    assert!(entry(&kernel, COPY).cap().is_empty());
    assert_eq!(inv_properties(&inv, UM).free, before.free);
}

fn inv_properties(
    inv: &std::sync::Arc<mythos_kernel::invocation::KernelInvocation>,
    um: u32,
) -> kernel_memory::Properties {
    inv.buf().label = label(kernel_memory::PROTO, kernel_memory::Methods::Properties as u8);
    call(inv, um).unwrap();
    inv.buf().read::<kernel_memory::Properties>().unwrap()
}

#[test]
fn test_invalid_untyped_requests() {
    let kernel = kernel();
    let inv = kernel.invocation();

    let unaligned = kernel_memory::UntypedMemoryCreate {
        size: 6000,
        alignment: 4096,
    };
    assert_eq!(
        create(&inv, slots::UNTYPED_MEMORY, slots::UNTYPED_MEMORY_FACTORY, UM, &unaligned),
        Err(Error::Unaligned)
    );
    assert!(entry(&kernel, UM).cap().is_empty());

    assert_eq!(
        create(&inv, slots::UNTYPED_MEMORY, slots::UNTYPED_MEMORY_FACTORY, UM, &untyped(1 << 30)),
        Err(Error::InsufficientResources)
    );
    assert!(entry(&kernel, UM).cap().is_empty());

    // The factory pointer must name a factory.
    assert_eq!(
        create(&inv, slots::UNTYPED_MEMORY, slots::CSPACE, UM, &untyped(4096)),
        Err(Error::TypeMismatch)
    );

    // Occupied destination.
    assert_eq!(
        create(&inv, slots::UNTYPED_MEMORY, slots::UNTYPED_MEMORY_FACTORY, slots::CSPACE, &untyped(4096)),
        Err(Error::LostRace)
    );
}

#[test]
fn test_revoking_untyped_memory_destroys_objects() {
    let kernel = kernel();
    let inv = kernel.invocation();
    let free = kernel.root_memory().free_bytes();
    create(&inv, slots::UNTYPED_MEMORY, slots::UNTYPED_MEMORY_FACTORY, UM, &untyped(1 << 18)).unwrap();
    create(&inv, UM, slots::FRAME_FACTORY, FRAME, &frame::FrameCreate { size_bits: 12 }).unwrap();
    create(&inv, UM, slots::CAPMAP_FACTORY, SUB, &CapMapCreate { index_bits: 3, guard_bits: 0, guard: 0 }).unwrap();

    revoke(&inv, slots::CSPACE, UM).unwrap();
    assert!(entry(&kernel, UM).cap().is_usable());
    assert!(entry(&kernel, FRAME).cap().is_empty());
    assert!(entry(&kernel, SUB).cap().is_empty());
    assert_eq!(inv_properties(&inv, UM).free, 1 << 18);

    delete(&inv, slots::CSPACE, UM).unwrap();
    assert!(entry(&kernel, UM).cap().is_empty());
    assert_eq!(kernel.root_memory().free_bytes(), free);
}

#[test]
fn test_nested_capability_maps() {
    let kernel = kernel();
    let inv = kernel.invocation();
    let outer = CapMapCreate {
        index_bits: 4,
        guard_bits: 0,
        guard: 0,
    };
    create(&inv, slots::UNTYPED_MEMORY, slots::CAPMAP_FACTORY, SUB, &outer).unwrap();

    // Create the inner map in slot 2 of the outer one.
    let inner = CapMapCreate {
        index_bits: 4,
        guard_bits: 2,
        guard: 1,
    };
    create_in(&inv, slots::UNTYPED_MEMORY, slots::CAPMAP_FACTORY, SUB, DEPTH, 2, 4, &inner).unwrap();

    let outer_map = TypedCap::<CapMap>::from_entry(entry(&kernel, SUB)).unwrap();
    let inner_entry = outer_map.slot(2).unwrap();
    let inner_map = TypedCap::<CapMap>::from_entry(inner_entry).unwrap();
    assert_eq!(inner_map.slot_count(), 16);

    let ptr = (2 << 6) | (1 << 4) | 7;
    let found = outer_map.lookup(ptr, 10, false).unwrap();
    assert!(core::ptr::eq(found.entry(), inner_map.slot(7).unwrap()));

    let wrong_guard = (2 << 6) | (3 << 4) | 7;
    assert_eq!(
        outer_map.lookup(wrong_guard, 10, false).err(),
        Some(Error::InvalidCapability)
    );
    assert_eq!(outer_map.lookup(ptr, 3, false).err(), Some(Error::InvalidCapability));
    drop(found);

    // Deleting the outer map's original takes the inner map with it.
    delete(&inv, slots::CSPACE, SUB).unwrap();
    assert!(entry(&kernel, SUB).cap().is_empty());
    assert!(inner_entry.cap().is_empty());
    assert_eq!(std::sync::Arc::strong_count(inner_map.obj()), 1);
    assert_eq!(std::sync::Arc::strong_count(outer_map.obj()), 1);
}

#[test]
fn test_read_only_map_denies_writes() {
    let kernel = kernel();
    let inv = kernel.invocation();
    reference(&inv, slots::CSPACE, slots::CSPACE, SUB, 0).unwrap();

    assert_eq!(
        derive(&inv, SUB, slots::MEMORY_ROOT, COPY, 0),
        Err(Error::NoLookup)
    );
    assert!(entry(&kernel, COPY).cap().is_empty());
    assert_eq!(
        derive(&inv, slots::CSPACE, slots::MEMORY_ROOT, COPY, 0),
        Err(Error::InvalidCapability)
    );
}

#[test]
fn test_move_between_slots() {
    let kernel = kernel();
    let inv = kernel.invocation();
    create(&inv, slots::UNTYPED_MEMORY, slots::FRAME_FACTORY, FRAME, &frame::FrameCreate { size_bits: 12 }).unwrap();
    let cap = entry(&kernel, FRAME).cap();

    inv.buf().write(&mythos_kernel::invocation::protocol::cap_map::Move {
        src_ptr: FRAME,
        src_depth: DEPTH,
        dst_ptr: COPY,
        dst_depth: DEPTH,
    });
    call(&inv, slots::CSPACE).unwrap();
    assert!(entry(&kernel, FRAME).cap().is_empty());
    assert_eq!(entry(&kernel, COPY).cap(), cap);
}

#[test]
fn test_device_frame_from_memory_root() {
    let kernel = kernel();
    let inv = kernel.invocation();
    inv.buf().write(&memory_root::Create {
        dst_ptr: FRAME,
        dst_depth: DEPTH,
        start: 0xfee0_0000,
        size_bits: 12,
        writable: 1,
    });
    call(&inv, slots::MEMORY_ROOT).unwrap();
    let info = frame_info(entry(&kernel, FRAME));
    assert_eq!((info.start, info.size), (0xfee0_0000, 4096));
    assert!(info.writable);
    assert!(!info.kernel);

    inv.buf().write(&memory_root::Create {
        dst_ptr: COPY,
        dst_depth: DEPTH,
        start: 0xfee0_0100,
        size_bits: 12,
        writable: 0,
    });
    assert_eq!(call(&inv, slots::MEMORY_ROOT), Err(Error::Unaligned));
    assert!(entry(&kernel, COPY).cap().is_empty());

    delete(&inv, slots::CSPACE, FRAME).unwrap();
}

#[test]
fn test_every_object_answers_debug_info() {
    let kernel = kernel();
    let inv = kernel.invocation();
    for (slot, name) in [
        (slots::UNTYPED_MEMORY, "UntypedMemory"),
        (slots::CSPACE, "CapMap"),
        (slots::CAPMAP_FACTORY, "CapMapFactory"),
        (slots::INTERRUPT_CONTROL, "InterruptControl"),
        (slots::MEMORY_ROOT, "MemoryRoot"),
    ] {
        inv.buf().label = label(kernel_object::PROTO, kernel_object::Methods::GetDebugInfo as u8);
        call(&inv, slot).unwrap();
        assert_eq!(kernel_object::read_debug_info(&inv.buf()).as_deref(), Some(name));
    }

    inv.buf().label = label(kernel_object::PROTO, 0x7f);
    assert_eq!(call(&inv, slots::UNTYPED_MEMORY), Err(Error::NotImplemented));
    assert_eq!(call(&inv, 0x55), Err(Error::InvalidCapability));
}

fn device_frame(inv: &std::sync::Arc<mythos_kernel::invocation::KernelInvocation>, dst: u32) {
    inv.buf().write(&memory_root::Create {
        dst_ptr: dst,
        dst_depth: DEPTH,
        start: 0xfee0_0000,
        size_bits: 12,
        writable: 1,
    });
    call(inv, slots::MEMORY_ROOT).unwrap();
}

#[test]
fn test_frames_over_same_device_memory_are_independent() {
    let kernel = kernel();
    let inv = kernel.invocation();
    device_frame(&inv, FRAME);
    device_frame(&inv, COPY);

    delete(&inv, slots::CSPACE, COPY).unwrap();
    assert!(entry(&kernel, COPY).cap().is_empty());
    assert!(entry(&kernel, FRAME).cap().is_usable());
    assert_eq!(frame_info(entry(&kernel, FRAME)).start, 0xfee0_0000);

    delete(&inv, slots::CSPACE, FRAME).unwrap();
    assert!(entry(&kernel, FRAME).cap().is_empty());
}

#[test]
fn test_deleting_memory_root_slot_removes_only_the_reference() {
    let kernel = kernel();
    let inv = kernel.invocation();
    assert!(entry(&kernel, slots::MEMORY_ROOT).cap().is_reference());

    delete(&inv, slots::CSPACE, slots::MEMORY_ROOT).unwrap();
    assert!(entry(&kernel, slots::MEMORY_ROOT).cap().is_empty());
    for slot in [
        slots::CSPACE,
        slots::UNTYPED_MEMORY,
        slots::CAPMAP_FACTORY,
        slots::FRAME_FACTORY,
        slots::INTERRUPT_CONTROL,
    ] {
        assert!(entry(&kernel, slot).cap().is_usable(), "slot {}", slot);
    }
    create(&inv, slots::UNTYPED_MEMORY, slots::FRAME_FACTORY, FRAME, &frame::FrameCreate { size_bits: 12 }).unwrap();
}

#[test]
fn test_deleting_memory_of_own_cspace_is_cyclic() {
    let kernel = kernel();
    let inv = kernel.invocation();

    assert_eq!(
        delete(&inv, slots::CSPACE, slots::UNTYPED_MEMORY),
        Err(Error::CyclicDependency)
    );
    assert!(inv.is_done());
    let cspace = kernel.cspace_entry().cap();
    assert_eq!(cspace.handle(), Some(kernel.cspace().handle()));
    assert!(mythos_kernel::objects::table::get(kernel.cspace().handle()).is_some());
}

#[test]
fn test_revoking_memory_of_own_cspace_is_cyclic() {
    let kernel = kernel();
    let inv = kernel.invocation();

    assert_eq!(
        revoke(&inv, slots::CSPACE, slots::UNTYPED_MEMORY),
        Err(Error::CyclicDependency)
    );
    assert!(!entry(&kernel, slots::UNTYPED_MEMORY).is_revoking());
    assert!(mythos_kernel::objects::table::get(kernel.cspace().handle()).is_some());
}
