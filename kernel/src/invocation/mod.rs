//! Invocations
//!
//! An invocation is a user request addressed to a capability. The kernel
//! resolves the capability, hands the request to the object and eventually
//! replies through the same [`Invocation`]. Replies may come from another
//! place and long after `invoke` returned.

use alloc::sync::Arc;

use spin::MutexGuard;

use crate::{
    cap::{Cap, CapEntry},
    error::KernelResult,
    objects::CapEntryRef,
    sync::Tasklet,
};

pub mod buf;
mod kernel_invocation;
pub mod protocol;

pub use buf::{label, CapPtr, InvocationBuf, Message};
pub use kernel_invocation::KernelInvocation;

pub trait Invocation: Send + Sync {
    fn label(&self) -> u16 {
        self.message().label
    }

    fn protocol(&self) -> u8 {
        (self.label() >> 8) as u8
    }

    fn method(&self) -> u8 {
        self.label() as u8
    }

    fn message(&self) -> MutexGuard<'_, InvocationBuf>;

    /// Entry of the invoked capability.
    fn cap_entry(&self) -> &'static CapEntry;

    /// The invoked capability as it was when the invocation started.
    fn cap(&self) -> Cap;

    /// Resolve a capability pointer in the caller's capability space.
    fn lookup_entry(&self, ptr: CapPtr, depth: u8, writable: bool) -> KernelResult<CapEntryRef>;

    /// Complete the invocation.
    fn reply_response(&self, t: &'static Tasklet, result: KernelResult<()>);

    /// Complete the invocation by deleting (`delete`) or revoking `entry`.
    /// The reply is sent when the operation has finished.
    fn deletion_response(self: Arc<Self>, t: &'static Tasklet, entry: &'static CapEntry, delete: bool);
}
