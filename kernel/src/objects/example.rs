//! Example object
//!
//! A minimal object with a home place. All its invocations execute on the
//! home place, which can be moved at run time.

use alloc::{string::String, sync::Arc};

use spin::Mutex;

use super::{
    create_object, invoke_kernel_object, table, Allocator, Deleter, Factory, Interface,
    InterfaceId, KernelObject, MemoryChunk, Range, ResultSink,
};
use crate::{
    cap::{Cap, CapEntry, ObjectHandle},
    config::MAX_PLACES,
    error::{Error, KernelResult},
    invocation::{protocol::example as proto, Invocation, InvocationBuf},
    sync::{monitor::SimpleMonitorHome, OwnedTasklet, Place, Tasklet},
};

pub struct ExampleHome {
    handle: ObjectHandle,
    chunk: MemoryChunk,
    mem: Arc<dyn Allocator>,
    monitor: SimpleMonitorHome,
    last_message: Mutex<Option<String>>,
    delete_tasklet: OwnedTasklet,
}

impl ExampleHome {
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
                monitor: SimpleMonitorHome::new(Place::current()),
                last_message: Mutex::new(None),
                delete_tasklet: OwnedTasklet::new(),
            })
        })
    }

    pub fn home(&self) -> &'static Place {
        self.monitor.home()
    }

    /// Text of the most recent `PrintMessage`.
    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().clone()
    }

    fn serve(&self, msg: &Arc<dyn Invocation>) -> KernelResult<()> {
        if msg.protocol() != proto::PROTO {
            return invoke_kernel_object(self.name(), msg);
        }
        match proto::Methods::try_from(msg.method())? {
            proto::Methods::PrintMessage => {
                let bytes = proto::read_print_message(&msg.message())?;
                let text = String::from_utf8_lossy(&bytes).into_owned();
                log::info!(target: "example", "{}: {}", self.handle, text);
                *self.last_message.lock() = Some(text);
                Ok(())
            }
            proto::Methods::Ping => {
                let mut buf = msg.message();
                let ping = buf.read::<proto::Ping>()?;
                buf.write(&proto::Ping {
                    value: ping.value,
                    place: Place::current().id() as u64,
                });
                Ok(())
            }
            proto::Methods::MoveHome => {
                let target = msg.message().read::<proto::MoveHome>()?.place as usize;
                if target >= MAX_PLACES {
                    return Err(Error::InvalidArgument);
                }
                log::debug!(target: "example", "{} moves to place {}", self.handle, target);
                self.monitor.set_home(Place::get(target));
                Ok(())
            }
        }
    }
}

impl KernelObject for ExampleHome {
    fn name(&self) -> &'static str {
        "ExampleHome"
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
        let obj = self.clone();
        self.monitor.do_delete(self.delete_tasklet.get(), move |_| {
            let (mem, chunk) = (obj.mem.clone(), obj.chunk);
            drop(obj);
            mem.free_async(t, sink, chunk);
        });
    }

    fn invoke(self: Arc<Self>, t: &'static Tasklet, _cap: Cap, msg: Arc<dyn Invocation>) {
        let obj = self.clone();
        self.monitor.request(t, move |t| {
            let result = obj.serve(&msg);
            msg.reply_response(t, result);
            obj.monitor.request_done();
        });
    }
}

pub struct ExampleFactory {
    handle: ObjectHandle,
}

impl ExampleFactory {
    pub fn new() -> KernelResult<(ObjectHandle, Arc<Self>)> {
        table::insert_with(|handle| Ok(Arc::new(Self { handle })))
    }
}

impl KernelObject for ExampleFactory {
    fn name(&self) -> &'static str {
        "ExampleFactory"
    }

    fn delete_cap(&self, _entry: &'static CapEntry, cap: Cap, _del: &dyn Deleter) -> KernelResult<()> {
        if cap.is_original() {
            log::warn!(target: "example", "factory {} outlives its capability", self.handle);
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

impl Factory for ExampleFactory {
    fn factory(
        &self,
        dst: &'static CapEntry,
        mem_entry: &'static CapEntry,
        mem_cap: Cap,
        mem: &Arc<dyn Allocator>,
        _msg: &InvocationBuf,
    ) -> KernelResult<()> {
        ExampleHome::create(dst, mem_entry, mem_cap, mem).map(|_| ())
    }
}
