//! Places
//!
//! A place is the kernel's view of one hardware thread: a tasklet queue that
//! only the owning thread drains, plus a way to wake that thread when work
//! arrives from elsewhere. Kernel objects never take locks across places;
//! they send tasklets to the place that currently owns them instead.
//!
//! The owning thread must drain its queue with [`Place::process_tasks`]
//! before returning from every kernel entry.

use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Once;

use super::{tasklet::Tasklet, tasklet_queue::TaskletQueue};
use crate::{config::MAX_PLACES, cpu::hwthread_id};

/// How a tasklet addressed to the local place is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Defer until the current kernel entry drains its queue.
    Async,
    /// Run immediately on the caller's stack.
    MayInline,
}

static WAKEUP_HOOK: Once<fn(usize)> = Once::new();

/// Install the function that interrupts a sleeping hardware thread.
pub fn register_wakeup_hook(hook: fn(usize)) {
    WAKEUP_HOOK.call_once(|| hook);
}

lazy_static! {
    static ref PLACES: Vec<Place> = (0..MAX_PLACES).map(Place::new).collect();
}

pub struct Place {
    id: usize,
    queue: TaskletQueue,
}

impl Place {
    fn new(id: usize) -> Self {
        Self {
            id,
            queue: TaskletQueue::new(),
        }
    }

    /// Place of hardware thread `id`.
    pub fn get(id: usize) -> &'static Place {
        &PLACES[id]
    }

    /// Place of the calling hardware thread.
    pub fn current() -> &'static Place {
        Self::get(hwthread_id())
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_local(&self) -> bool {
        self.id == hwthread_id()
    }

    /// Mark the start of a kernel entry.
    ///
    /// Returns `false` if tasklets were already waiting, which the exit path
    /// picks up anyway.
    pub fn enter_kernel(&self) -> bool {
        debug_assert!(self.is_local());
        self.queue.try_acquire()
    }

    /// Run `t` here, inline or deferred, when called on this place, and
    /// send it otherwise.
    pub fn run(&self, t: &'static Tasklet, mode: Mode) {
        if self.is_local() {
            self.run_local(t, mode);
        } else {
            self.push_shared(t);
        }
    }

    pub fn run_local(&self, t: &'static Tasklet, mode: Mode) {
        debug_assert!(self.is_local());
        match mode {
            Mode::Async => self.queue.push_private(t),
            Mode::MayInline => t.run(),
        }
    }

    /// Queue a tasklet from any hardware thread.
    pub fn push_shared(&self, t: &'static Tasklet) {
        #[cfg(feature = "trace-delegation")]
        log::trace!(target: "monitor", "place {}: push {:?}", self.id, t);
        if self.queue.push(t) {
            self.wakeup();
        }
    }

    fn wakeup(&self) {
        match WAKEUP_HOOK.get() {
            Some(hook) => hook(self.id),
            None => log::trace!(target: "monitor", "place {} has work", self.id),
        }
    }

    /// Drain all pending tasklets, including those queued while draining.
    pub fn process_tasks(&self) {
        debug_assert!(self.is_local());
        loop {
            while let Some(t) = self.queue.pull() {
                t.run();
            }
            if self.queue.try_release() {
                break;
            }
        }
    }

    /// Tasklets are waiting to run here.
    pub fn has_work(&self) -> bool {
        !self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{sync::tasklet::OwnedTasklet, testing};

    #[test]
    fn test_inline_runs_immediately() {
        testing::init();
        static HITS: AtomicU32 = AtomicU32::new(0);
        let t = OwnedTasklet::new();
        t.get().set(|_| {
            HITS.fetch_add(1, Ordering::SeqCst);
        });
        Place::current().run(t.get(), Mode::MayInline);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_waits_for_drain() {
        testing::init();
        static HITS: AtomicU32 = AtomicU32::new(0);
        let here = Place::current();
        here.enter_kernel();
        let t = OwnedTasklet::new();
        t.get().set(|_| {
            HITS.fetch_add(1, Ordering::SeqCst);
        });
        here.run(t.get(), Mode::Async);
        assert_eq!(HITS.load(Ordering::SeqCst), 0);
        here.process_tasks();
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        assert!(!here.has_work());
    }

    #[test]
    fn test_remote_push_runs_on_target() {
        testing::init();
        static RAN_ON: AtomicU32 = AtomicU32::new(u32::MAX);
        let t = OwnedTasklet::new();
        t.get().set(|_| {
            RAN_ON.store(Place::current().id() as u32, Ordering::SeqCst);
        });
        let (tx, rx) = std::sync::mpsc::channel();
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
        let target = std::thread::spawn(move || {
            testing::init();
            tx.send(Place::current().id()).unwrap();
            go_rx.recv().unwrap();
            Place::current().process_tasks();
        });
        let target_id = rx.recv().unwrap();
        Place::get(target_id).run(t.get(), Mode::MayInline);
        assert_eq!(RAN_ON.load(Ordering::SeqCst), u32::MAX);
        go_tx.send(()).unwrap();
        target.join().unwrap();
        assert_eq!(RAN_ON.load(Ordering::SeqCst), target_id as u32);
    }
}
