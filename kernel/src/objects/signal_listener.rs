//! Signal listeners
//!
//! A listener accumulates signal bits, for example from interrupt lines.
//! Once bound it emits a notification tagged with the bound context
//! whenever a pending bit falls into its mask. State changes run in a
//! delegating mutex because signals arrive from any place.

use alloc::{collections::VecDeque, sync::Arc};

use super::{
    create_object, invoke_kernel_object, table, Allocator, Deleter, Factory, Interface,
    InterfaceId, KernelObject, MemoryChunk, Range, ResultSink, Signalable,
};
use crate::{
    cap::{Cap, CapEntry, ObjectHandle},
    error::{Error, KernelResult},
    invocation::{protocol::signal_listener as proto, Invocation, InvocationBuf},
    sync::{monitor::DelegatingCell, Tasklet},
};

/// Signal bits reported to the bound context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub context: u64,
    pub bits: u64,
}

#[derive(Default)]
struct ListenerState {
    bound: bool,
    context: u64,
    mask: u64,
    reset_mask: u64,
    pending: u64,
    notifications: VecDeque<Notification>,
}

impl ListenerState {
    fn deliver(&mut self) {
        if !self.bound {
            return;
        }
        let bits = self.pending & self.mask;
        if bits == 0 {
            return;
        }
        self.notifications.push_back(Notification {
            context: self.context,
            bits,
        });
        self.pending &= !self.reset_mask;
    }
}

pub struct SignalListener {
    handle: ObjectHandle,
    chunk: MemoryChunk,
    mem: Arc<dyn Allocator>,
    state: DelegatingCell<ListenerState>,
}

impl SignalListener {
    const SIZE: usize = 64;

    pub fn create(
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
    ) -> KernelResult<Arc<Self>> {
        let owner = mem.clone();
        create_object(dst, mem_entry, mem_cap, mem, Self::SIZE, Self::SIZE, 0, |handle, chunk| {
            Ok(Self {
                handle,
                chunk,
                mem: owner,
                state: DelegatingCell::new(ListenerState::default()),
            })
        })
    }

    pub fn bind(&self, context: u64, mask: u64, reset_mask: u64) {
        self.state.with(move |s| {
            s.bound = true;
            s.context = context;
            s.mask = mask;
            s.reset_mask = reset_mask;
            s.deliver();
        });
    }

    /// Clear the pending bits in `reset_mask`.
    pub fn reset(&self, reset_mask: u64) {
        self.state.with(move |s| s.pending &= !reset_mask);
    }

    pub fn pending(&self) -> u64 {
        self.state.with(|s| s.pending)
    }

    /// Oldest notification not yet taken.
    pub fn take_notification(&self) -> Option<Notification> {
        self.state.with(|s| s.notifications.pop_front())
    }

    fn serve(&self, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        if msg.protocol() != proto::PROTO {
            return invoke_kernel_object(self.name(), msg);
        }
        match proto::Methods::try_from(msg.method())? {
            proto::Methods::Bind => {
                let args = msg.message().read::<proto::Bind>()?;
                self.bind(args.context, args.mask, args.reset_mask);
            }
            proto::Methods::Reset => {
                let args = msg.message().read::<proto::Reset>()?;
                self.reset(args.reset_mask);
            }
        }
        Ok(())
    }
}

impl Signalable for SignalListener {
    fn signal(&self, value: u64) {
        log::trace!(target: "signal", "{} <- {:#x}", self.handle, value);
        self.state.with(move |s| {
            s.pending |= value;
            s.deliver();
        });
    }
}

impl KernelObject for SignalListener {
    fn name(&self) -> &'static str {
        "SignalListener"
    }

    fn address_range(&self, _entry: &CapEntry, _cap: Cap) -> Range {
        self.chunk.range()
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            del.delete_object(self.handle);
        }
        Ok(())
    }

    fn delete_object(self: Arc<Self>, t: &'static Tasklet, sink: Arc<dyn ResultSink>) {
        self.mem.clone().free_async(t, sink, self.chunk);
    }

    fn invoke(self: Arc<Self>, t: &'static Tasklet, _cap: Cap, msg: Arc<dyn Invocation>) {
        let result = self.serve(&msg);
        msg.reply_response(t, result);
    }

    fn vcast(self: Arc<Self>, id: InterfaceId) -> KernelResult<Interface> {
        match id {
            InterfaceId::Signalable => Ok(Interface::Signalable(self)),
            _ => Err(Error::TypeMismatch),
        }
    }
}

pub struct SignalListenerFactory {
    handle: ObjectHandle,
}

impl SignalListenerFactory {
    pub fn new() -> KernelResult<(ObjectHandle, Arc<Self>)> {
        table::insert_with(|handle| Ok(Arc::new(Self { handle })))
    }
}

impl KernelObject for SignalListenerFactory {
    fn name(&self) -> &'static str {
        "SignalListenerFactory"
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, _del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            log::warn!(target: "signal", "factory {} outlives its capability", self.handle);
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

impl Factory for SignalListenerFactory {
    fn factory(
        &self,
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        _msg: &InvocationBuf,
    ) -> KernelResult<()> {
        SignalListener::create(dst, mem_entry, mem_cap, mem).map(|_| ())
    }
}
