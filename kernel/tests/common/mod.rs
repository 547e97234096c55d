//! Shared helpers for host integration tests

#![allow(dead_code)]

use std::sync::Arc;

use mythos_kernel::{
    boot::{self, Kernel},
    config::{BootConfig, CAPTR_BITS},
    invocation::{
        protocol::{
            cap_map,
            kernel_memory::{self, CREATE_ARGS_OFFSET, FACTORY_CAP},
        },
        CapPtr, KernelInvocation, Message,
    },
    testing, KernelResult,
};

pub const DEPTH: u8 = CAPTR_BITS as u8;

pub fn kernel() -> Kernel {
    testing::init();
    boot::boot(&BootConfig::default()).unwrap()
}

/// Invoke `ptr` and drive the local place until the reply arrives.
pub fn call(inv: &Arc<KernelInvocation>, ptr: CapPtr) -> KernelResult<()> {
    inv.invoke(ptr)?;
    testing::run_until(|| inv.is_done());
    inv.result()
}

/// Create an object from the untyped memory at `mem` into `dst` of the
/// caller's space.
pub fn create<M: Message>(
    inv: &Arc<KernelInvocation>,
    mem: CapPtr,
    factory: CapPtr,
    dst: CapPtr,
    args: &M,
) -> KernelResult<()> {
    create_in(inv, mem, factory, 0, 0, dst, DEPTH, args)
}

#[allow(clippy::too_many_arguments)]
pub fn create_in<M: Message>(
    inv: &Arc<KernelInvocation>,
    mem: CapPtr,
    factory: CapPtr,
    space: CapPtr,
    space_depth: u8,
    dst: CapPtr,
    dst_depth: u8,
    args: &M,
) -> KernelResult<()> {
    {
        let mut buf = inv.buf();
        buf.write(&kernel_memory::Create {
            dst_ptr: dst,
            dst_depth,
            dst_space_ptr: space,
            dst_space_depth: space_depth,
        });
        buf.cap_ptrs[FACTORY_CAP] = factory;
        buf.write_at(CREATE_ARGS_OFFSET, args);
    }
    call(inv, mem)
}

/// Factory arguments for objects without parameters.
pub struct NoArgs;

impl Message for NoArgs {
    const PROTO: u8 = kernel_memory::PROTO;
    const METHOD: u8 = kernel_memory::Methods::Create as u8;
    const WORDS: usize = 0;

    fn encode(&self, _words: &mut [u64]) {}

    fn decode(_words: &[u64]) -> Self {
        NoArgs
    }
}

pub fn derive(inv: &Arc<KernelInvocation>, space: CapPtr, src: CapPtr, dst: CapPtr, request: u32) -> KernelResult<()> {
    inv.buf().write(&cap_map::Derive {
        src_ptr: src,
        src_depth: DEPTH,
        dst_ptr: dst,
        dst_depth: DEPTH,
        request,
    });
    call(inv, space)
}

pub fn reference(inv: &Arc<KernelInvocation>, space: CapPtr, src: CapPtr, dst: CapPtr, request: u32) -> KernelResult<()> {
    inv.buf().write(&cap_map::Reference {
        src_ptr: src,
        src_depth: DEPTH,
        dst_ptr: dst,
        dst_depth: DEPTH,
        request,
    });
    call(inv, space)
}

pub fn delete(inv: &Arc<KernelInvocation>, space: CapPtr, ptr: CapPtr) -> KernelResult<()> {
    inv.buf().write(&cap_map::Delete { ptr, depth: DEPTH });
    call(inv, space)
}

pub fn revoke(inv: &Arc<KernelInvocation>, space: CapPtr, ptr: CapPtr) -> KernelResult<()> {
    inv.buf().write(&cap_map::Revoke { ptr, depth: DEPTH });
    call(inv, space)
}
