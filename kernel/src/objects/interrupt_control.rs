//! Interrupt routing
//!
//! An interrupt controller object keeps, per interrupt line, a kernel-held
//! reference to the signalable object that handles the line. Revoking the
//! handler's capability removes the route and masks the line.

use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Once;

use super::{
    invoke_kernel_object, table, Deleter, KernelObject, Signalable, TypedCap,
};
use crate::{
    cap::{Cap, CapEntry, CapRef, CapRefSubject, ObjectHandle},
    config::{CAPTR_BITS, NUM_IRQS},
    error::{Error, KernelResult},
    invocation::{protocol::interrupt_control as proto, Invocation},
    sync::Tasklet,
};

pub struct InterruptControl {
    handle: ObjectHandle,
    me: Weak<InterruptControl>,
    lines: Vec<Once<CapRef>>,
    masked: Vec<AtomicBool>,
}

impl InterruptControl {
    pub fn new() -> KernelResult<(ObjectHandle, Arc<Self>)> {
        table::insert_with(|handle| {
            Ok(Arc::new_cyclic(|me| Self {
                handle,
                me: me.clone(),
                lines: (0..NUM_IRQS).map(|_| Once::new()).collect(),
                masked: (0..NUM_IRQS).map(|_| AtomicBool::new(true)).collect(),
            }))
        })
    }

    fn line(&self, irq: usize) -> KernelResult<&CapRef> {
        let once = self.lines.get(irq).ok_or(Error::InvalidArgument)?;
        once.try_call_once(|| {
            let subject: Weak<dyn CapRefSubject> = self.me.clone();
            CapRef::new(subject, irq)
        })
    }

    /// Route `irq` to the signalable object in `sink`.
    pub fn register(&self, irq: usize, sink: &'static CapEntry) -> KernelResult<()> {
        let line = self.line(irq)?;
        if line.is_usable() {
            return Err(Error::RequestDenied);
        }
        let sink_cap = TypedCap::<dyn Signalable>::from_entry(sink)?.cap();
        line.set(sink, sink_cap)?;
        log::debug!(target: "irq", "irq {} -> {:?}", irq, sink_cap);
        self.masked[irq].store(false, Ordering::Release);
        Ok(())
    }

    pub fn unregister(&self, irq: usize) -> KernelResult<()> {
        self.line(irq)?.reset();
        Ok(())
    }

    pub fn mask(&self, irq: usize) -> KernelResult<()> {
        let masked = self.masked.get(irq).ok_or(Error::InvalidArgument)?;
        masked.store(true, Ordering::Release);
        Ok(())
    }

    pub fn unmask(&self, irq: usize) -> KernelResult<()> {
        let masked = self.masked.get(irq).ok_or(Error::InvalidArgument)?;
        masked.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_masked(&self, irq: usize) -> bool {
        self.masked
            .get(irq)
            .map_or(true, |masked| masked.load(Ordering::Acquire))
    }

    /// Deliver interrupt `irq`. The line stays masked until the handler
    /// unmasks it. Returns whether a handler was signalled.
    pub fn handle_interrupt(&self, irq: usize) -> bool {
        let Some(cap) = self.lines.get(irq).and_then(Once::get).and_then(CapRef::get) else {
            log::warn!(target: "irq", "spurious irq {}", irq);
            return false;
        };
        if self.masked[irq].swap(true, Ordering::AcqRel) {
            return false;
        }
        match TypedCap::<dyn Signalable>::new(cap) {
            Ok(sink) => {
                sink.signal(1u64 << (irq % 64));
                true
            }
            Err(e) => {
                log::warn!(target: "irq", "irq {} sink unusable: {}", irq, e);
                false
            }
        }
    }

    fn serve(&self, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        if msg.protocol() != proto::PROTO {
            return invoke_kernel_object(self.name(), msg);
        }
        match proto::Methods::try_from(msg.method())? {
            proto::Methods::Register => {
                let args = msg.message().read::<proto::Register>()?;
                let depth = if args.sink_depth == 0 { CAPTR_BITS as u8 } else { args.sink_depth };
                let sink = msg.lookup_entry(args.sink_ptr, depth, false)?;
                self.register(args.irq as usize, sink.entry())
            }
            proto::Methods::Unregister => {
                let args = msg.message().read::<proto::Unregister>()?;
                self.unregister(args.irq as usize)
            }
            proto::Methods::MaskIrq => {
                let args = msg.message().read::<proto::MaskIrq>()?;
                self.mask(args.irq as usize)
            }
            proto::Methods::UnmaskIrq => {
                let args = msg.message().read::<proto::UnmaskIrq>()?;
                self.unmask(args.irq as usize)
            }
        }
    }
}

impl CapRefSubject for InterruptControl {
    fn unbind(&self, slot: usize, _cap: Cap) {
        log::debug!(target: "irq", "irq {} lost its handler", slot);
        self.masked[slot].store(true, Ordering::Release);
    }
}

impl KernelObject for InterruptControl {
    fn name(&self) -> &'static str {
        "InterruptControl"
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, _del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            log::warn!(target: "irq", "interrupt controller {} outlives its capability", self.handle);
        }
        Ok(())
    }

    fn invoke(self: Arc<Self>, t: &'static Tasklet, _cap: Cap, msg: Arc<dyn Invocation>) {
        let result = self.serve(&msg);
        msg.reply_response(t, result);
    }
}
