//! Execution context protocol
//!
//! Message layer only; the scheduler implements
//! [`ExecutionContextProtocol`].

use alloc::sync::Arc;

use super::{ids, methods};
use crate::{
    cap::Cap,
    error::KernelResult,
    invocation::{buf::message, Invocation},
    sync::Tasklet,
};

pub const PROTO: u8 = ids::EXECUTION_CONTEXT;

methods! {
    Configure,
    ReadRegisters,
    WriteRegisters,
    SetFsGs,
    Resume,
    Suspend,
    SetPriority,
}

message! {
    /// Capability pointers of zero leave the respective binding unchanged.
    pub struct Configure(PROTO, Methods::Configure) {
        pub page_map_ptr: u32,
        pub cap_map_ptr: u32,
        pub sched_ptr: u32,
        pub ib_ptr: u32,
        pub ib_offset: u64,
    }
}

message! {
    pub struct ReadRegisters(PROTO, Methods::ReadRegisters) {
        pub suspend: u8,
    }
}

message! {
    pub struct WriteRegisters(PROTO, Methods::WriteRegisters) {
        pub resume: u8,
        pub ip: u64,
        pub sp: u64,
        pub arg0: u64,
        pub arg1: u64,
        pub arg2: u64,
    }
}

message! {
    pub struct SetFsGs(PROTO, Methods::SetFsGs) {
        pub fs: u64,
        pub gs: u64,
    }
}

message! {
    pub struct SetPriority(PROTO, Methods::SetPriority) {
        pub priority: u8,
    }
}

pub type Handler<T> = fn(&Arc<T>, &'static Tasklet, Cap, &Arc<dyn Invocation>) -> KernelResult<()>;

pub trait ExecutionContextProtocol: Sized {
    fn invoke_configure(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_read_registers(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_write_registers(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_set_fs_gs(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_resume(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_suspend(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
    fn invoke_set_priority(self: &Arc<Self>, t: &'static Tasklet, cap: Cap, msg: &Arc<dyn Invocation>) -> KernelResult<()>;
}

pub fn dispatch_request<T: ExecutionContextProtocol>(
    obj: &Arc<T>,
    t: &'static Tasklet,
    cap: Cap,
    msg: &Arc<dyn Invocation>,
) -> KernelResult<()> {
    let handler: Handler<T> = match Methods::try_from(msg.method())? {
        Methods::Configure => T::invoke_configure,
        Methods::ReadRegisters => T::invoke_read_registers,
        Methods::WriteRegisters => T::invoke_write_registers,
        Methods::SetFsGs => T::invoke_set_fs_gs,
        Methods::Resume => T::invoke_resume,
        Methods::Suspend => T::invoke_suspend,
        Methods::SetPriority => T::invoke_set_priority,
    };
    handler(obj, t, cap, msg)
}
