//! Page map protocol
//!
//! Only the message layer lives here. Page tables are provided by the
//! architecture layer, which implements [`PageMapProtocol`].

use alloc::sync::Arc;

use super::{ids, methods};
use crate::{
    cap::Cap,
    error::{Error, KernelResult},
    invocation::{buf::message, Invocation},
    sync::Tasklet,
};

pub const PROTO: u8 = ids::PAGEMAP;

methods! {
    Map,
    Remap,
    Protect,
    Unmap,
    InstallMap,
    RemoveMap,
    Result,
}

message! {
    pub struct Map(PROTO, Methods::Map) {
        pub vaddr: u64,
        pub size: u64,
        pub flags: u32,
        pub frame_ptr: u32,
        pub frame_offset: u64,
    }
}

message! {
    pub struct Remap(PROTO, Methods::Remap) {
        pub src_vaddr: u64,
        pub dst_vaddr: u64,
        pub size: u64,
        pub src_map_ptr: u32,
    }
}

message! {
    pub struct Protect(PROTO, Methods::Protect) {
        pub vaddr: u64,
        pub size: u64,
        pub flags: u32,
    }
}

message! {
    pub struct Unmap(PROTO, Methods::Unmap) {
        pub vaddr: u64,
        pub size: u64,
    }
}

message! {
    pub struct InstallMap(PROTO, Methods::InstallMap) {
        pub pagemap_ptr: u32,
        pub vaddr: u64,
        pub level: u8,
        pub flags: u32,
    }
}

message! {
    pub struct RemoveMap(PROTO, Methods::RemoveMap) {
        pub vaddr: u64,
        pub level: u8,
    }
}

message! {
    /// Reply describing the range actually affected.
    pub struct MapResult(PROTO, Methods::Result) {
        pub vaddr: u64,
        pub size: u64,
        pub level: u8,
    }
}

pub type Handler<T> = fn(&Arc<T>, &'static Tasklet, Cap, &Arc<dyn Invocation>) -> KernelResult<()>;

pub trait PageMapProtocol: Sized {
    fn invoke_map(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_remap(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_protect(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_unmap(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_install_map(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_remove_map(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
}

pub fn dispatch_request<T: PageMapProtocol>(
    obj: &Arc<T>,
    t: &'static Tasklet,
    cap: Cap,
    msg: &Arc<dyn Invocation>,
) -> KernelResult<()> {
    let handler: Handler<T> = match Methods::try_from(msg.method())? {
        Methods::Map => T::invoke_map,
        Methods::Remap => T::invoke_remap,
        Methods::Protect => T::invoke_protect,
        Methods::Unmap => T::invoke_unmap,
        Methods::InstallMap => T::invoke_install_map,
        Methods::RemoveMap => T::invoke_remove_map,
        Methods::Result => return Err(Error::NotImplemented),
    };
    handler(obj, t, cap, msg)
}
