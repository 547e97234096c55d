//! Nested delegating monitor
//!
//! Serializes requests on an object without blocking: the first requester
//! becomes the monitor's home and executes requests one after another on
//! its own place. Later requesters only queue their tasklet. A request may
//! leave the home place to wait for other objects and return through
//! [`NestedMonitorDelegating::response`].

use core::sync::atomic::{AtomicUsize, Ordering};

use super::DeletionMonitor;
use crate::sync::{
    place::{Mode, Place},
    tasklet::Tasklet,
    tasklet_queue::TaskletQueue,
};

const NO_HOME: usize = 0;

pub struct NestedMonitorDelegating {
    queue: TaskletQueue,
    /// Place id plus one of the place executing requests.
    home: AtomicUsize,
    deletion: DeletionMonitor,
}

impl NestedMonitorDelegating {
    pub const fn new() -> Self {
        Self {
            queue: TaskletQueue::new(),
            home: AtomicUsize::new(NO_HOME),
            deletion: DeletionMonitor::new(),
        }
    }

    /// Queue request `f`. It runs immediately if the monitor was idle.
    pub fn request<F>(&self, t: &'static Tasklet, f: F)
    where
        F: FnOnce(&'static Tasklet) + Send + 'static,
    {
        t.set(f);
        if self.queue.push(t) {
            self.deletion.acquire_ref();
            let here = Place::current();
            self.home.store(here.id() + 1, Ordering::Release);
            if let Some(next) = self.queue.pull() {
                here.run_local(next, Mode::MayInline);
            }
        }
    }

    /// Finish the current request and start the next one, if any.
    ///
    /// Must be called on the home place.
    pub fn request_done(&self) {
        let home = self.home_place();
        loop {
            if let Some(next) = self.queue.pull() {
                home.run_local(next, Mode::Async);
                return;
            }
            self.home.store(NO_HOME, Ordering::Release);
            if self.queue.try_release() {
                self.deletion.release_ref();
                return;
            }
            self.home.store(home.id() + 1, Ordering::Release);
        }
    }

    /// Continue the current request on the home place.
    pub fn response<F>(&self, t: &'static Tasklet, f: F)
    where
        F: FnOnce(&'static Tasklet) + Send + 'static,
    {
        t.set(f);
        self.home_place().run(t, Mode::MayInline);
    }

    pub fn response_done(&self) {}

    fn home_place(&self) -> &'static Place {
        match self.home.load(Ordering::Acquire) {
            NO_HOME => panic!("monitor has no active request"),
            id => Place::get(id - 1),
        }
    }

    /// A request is executing or queued.
    pub fn is_busy(&self) -> bool {
        self.queue.is_locked()
    }

    pub fn acquire_ref(&self) {
        self.deletion.acquire_ref();
    }

    pub fn release_ref(&self) {
        self.deletion.release_ref();
    }

    pub fn do_delete<F>(&self, t: &'static Tasklet, f: F)
    where
        F: FnOnce(&'static Tasklet) + Send + 'static,
    {
        self.deletion.do_delete(t, f);
    }
}

impl Default for NestedMonitorDelegating {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use alloc::{sync::Arc, vec::Vec};
    use core::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::{sync::tasklet::OwnedTasklet, testing};

    struct Counter {
        monitor: NestedMonitorDelegating,
        log: StdMutex<Vec<u32>>,
    }

    #[test]
    fn test_idle_request_runs_inline() {
        testing::init();
        let c = Arc::new(Counter {
            monitor: NestedMonitorDelegating::new(),
            log: StdMutex::new(Vec::new()),
        });
        let t = OwnedTasklet::new();
        let c2 = c.clone();
        c.monitor.request(t.get(), move |_| {
            c2.log.lock().unwrap().push(1);
            c2.monitor.request_done();
        });
        assert_eq!(*c.log.lock().unwrap(), [1]);
        assert!(!c.monitor.is_busy());
    }

    #[test]
    fn test_requests_are_serialized() {
        testing::init();
        let here = Place::current();
        here.enter_kernel();
        let c = Arc::new(Counter {
            monitor: NestedMonitorDelegating::new(),
            log: StdMutex::new(Vec::new()),
        });
        let first = OwnedTasklet::new();
        let second = OwnedTasklet::new();
        let hop = OwnedTasklet::new();
        let reply = OwnedTasklet::new();

        // The first request leaves the monitor and comes back later.
        let c1 = c.clone();
        let (hop_t, reply_t) = (hop.get(), reply.get());
        c.monitor.request(first.get(), move |_| {
            c1.log.lock().unwrap().push(1);
            hop_t.set(move |_| {
                let c1b = c1.clone();
                c1.monitor.response(reply_t, move |_| {
                    c1b.log.lock().unwrap().push(2);
                    c1b.monitor.request_done();
                });
            });
            Place::current().run_local(hop_t, Mode::Async);
        });
        assert!(c.monitor.is_busy());

        let c2 = c.clone();
        c.monitor.request(second.get(), move |_| {
            c2.log.lock().unwrap().push(3);
            c2.monitor.request_done();
        });
        assert_eq!(*c.log.lock().unwrap(), [1]);

        here.process_tasks();
        assert_eq!(*c.log.lock().unwrap(), [1, 2, 3]);
        assert!(!c.monitor.is_busy());
    }

    #[test]
    fn test_deletion_deferred_until_idle() {
        testing::init();
        static DELETED: AtomicBool = AtomicBool::new(false);
        let here = Place::current();
        here.enter_kernel();
        let m = Arc::new(NestedMonitorDelegating::new());
        let req = OwnedTasklet::new();
        let del = OwnedTasklet::new();

        let m2 = m.clone();
        let del_t = del.get();
        m.request(req.get(), move |_| {
            m2.do_delete(del_t, |_| DELETED.store(true, Ordering::SeqCst));
            here.process_tasks();
            assert!(!DELETED.load(Ordering::SeqCst));
            m2.request_done();
        });
        here.process_tasks();
        assert!(DELETED.load(Ordering::SeqCst));
    }
}
