//! Kernel-side invocation state
//!
//! One [`KernelInvocation`] exists per calling thread of execution. It owns
//! the message buffer, the tasklet that carries the request through the
//! kernel and the revoke operation used by deleting invocations.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, MutexGuard};

use super::{buf::CapPtr, Invocation, InvocationBuf};
use crate::{
    cap::{Cap, CapEntry, ObjectHandle, RevokeOperation},
    config::CAPTR_BITS,
    error::{Error, KernelResult},
    objects::{CapEntryRef, CapMap, ResultSink, TypedCap},
    sync::{OwnedTasklet, Tasklet},
};

struct Target {
    entry: &'static CapEntry,
    cap: Cap,
    /// Pins the map holding `entry`. Released before a deletion starts,
    /// which may have to destroy that map.
    entry_ref: Option<CapEntryRef>,
}

pub struct KernelInvocation {
    cspace: &'static CapEntry,
    guarded: Option<ObjectHandle>,
    buf: Mutex<InvocationBuf>,
    target: Mutex<Option<Target>>,
    busy: AtomicBool,
    revoke: Arc<RevokeOperation>,
    tasklet: OwnedTasklet,
}

impl KernelInvocation {
    /// `cspace` holds the capability map user pointers are resolved in.
    /// Deleting `guarded` from within an invocation fails with
    /// [`Error::CyclicDependency`].
    pub fn new(cspace: &'static CapEntry, guarded: Option<ObjectHandle>) -> Arc<Self> {
        Arc::new(Self {
            cspace,
            guarded,
            buf: Mutex::new(InvocationBuf::new()),
            target: Mutex::new(None),
            busy: AtomicBool::new(false),
            revoke: RevokeOperation::new(),
            tasklet: OwnedTasklet::new(),
        })
    }

    pub fn buf(&self) -> MutexGuard<'_, InvocationBuf> {
        self.buf.lock()
    }

    /// Send the current message to the capability at `ptr`.
    ///
    /// Returns once the request has been handed to the object. Completion
    /// is reported through [`KernelInvocation::is_done`] and the result in
    /// the message buffer.
    pub fn invoke(self: &Arc<Self>, ptr: CapPtr) -> KernelResult<()> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Retry);
        }
        self.buf.lock().set_result(Err(Error::Unset));

        let entry_ref = match self.lookup_entry(ptr, CAPTR_BITS as u8, false) {
            Ok(entry_ref) => entry_ref,
            Err(e) => {
                self.finish(Err(e));
                return Err(e);
            }
        };
        let entry = entry_ref.entry();
        let cap = entry.cap();
        let obj = match cap.is_usable().then(|| cap.object()).flatten() {
            Some(obj) => obj,
            None => {
                self.finish(Err(Error::InvalidCapability));
                return Err(Error::InvalidCapability);
            }
        };
        *self.target.lock() = Some(Target {
            entry,
            cap,
            entry_ref: Some(entry_ref),
        });
        log::trace!(
            target: "invocation",
            "invoke {} {:#06x} on {:?}",
            obj.name(),
            self.label(),
            cap
        );
        let msg: Arc<dyn Invocation> = self.clone();
        obj.invoke(self.tasklet.get(), cap, msg);
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }

    /// Result of the last completed invocation.
    pub fn result(&self) -> KernelResult<()> {
        self.buf.lock().result()
    }

    fn finish(&self, result: KernelResult<()>) {
        self.buf.lock().set_result(result);
        self.target.lock().take();
        self.busy.store(false, Ordering::Release);
    }
}

impl Invocation for KernelInvocation {
    fn message(&self) -> MutexGuard<'_, InvocationBuf> {
        self.buf.lock()
    }

    fn cap_entry(&self) -> &'static CapEntry {
        match &*self.target.lock() {
            Some(target) => target.entry,
            None => panic!("invocation has no target"),
        }
    }

    fn cap(&self) -> Cap {
        self.target
            .lock()
            .as_ref()
            .map_or(Cap::EMPTY, |target| target.cap)
    }

    fn lookup_entry(&self, ptr: CapPtr, depth: u8, writable: bool) -> KernelResult<CapEntryRef> {
        let cspace = TypedCap::<CapMap>::new(self.cspace.cap())?;
        cspace.lookup(ptr, depth, writable)
    }

    fn reply_response(&self, _t: &'static Tasklet, result: KernelResult<()>) {
        log::trace!(target: "invocation", "reply {:?}", result);
        self.finish(result);
    }

    fn deletion_response(self: Arc<Self>, t: &'static Tasklet, entry: &'static CapEntry, delete: bool) {
        let pinned = self.target.lock().as_mut().and_then(|target| target.entry_ref.take());
        drop(pinned);
        let sink: Arc<dyn ResultSink> = self.clone();
        let revoke = self.revoke.clone();
        if delete {
            revoke.delete_cap(t, sink, entry, self.guarded);
        } else {
            revoke.revoke_cap(t, sink, entry, self.guarded);
        }
    }
}

impl ResultSink for KernelInvocation {
    fn response(&self, t: &'static Tasklet, result: KernelResult<()>) {
        self.reply_response(t, result);
    }
}
