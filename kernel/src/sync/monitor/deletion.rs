//! Deferred deletion
//!
//! Objects that are reachable from in-flight monitor requests count those
//! requests. Deleting such an object queues a tasklet that only runs once
//! the count has dropped to zero.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::{place::Place, tasklet::Tasklet};

const NO_TASK: usize = 0;

pub struct DeletionMonitor {
    refs: AtomicUsize,
    delete_task: AtomicUsize,
}

impl DeletionMonitor {
    pub const fn new() -> Self {
        Self {
            refs: AtomicUsize::new(0),
            delete_task: AtomicUsize::new(NO_TASK),
        }
    }

    pub fn acquire_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a reference. The last one out starts a pending deletion.
    pub fn release_ref(&self) {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "deletion monitor reference underflow");
        if previous == 1 {
            self.dispatch();
        }
    }

    fn dispatch(&self) {
        let task = self.delete_task.swap(NO_TASK, Ordering::AcqRel);
        if task != NO_TASK {
            // SAFETY: only `do_delete` stores into `delete_task`, and it
            // stores the address of a `'static` tasklet.
            let t = unsafe { Tasklet::from_addr(task) };
            Place::current().push_shared(t);
        }
    }

    /// Run `f` on `t` as soon as no references are outstanding.
    pub fn do_delete<F>(&self, t: &'static Tasklet, f: F)
    where
        F: FnOnce(&'static Tasklet) + Send + 'static,
    {
        t.set(f);
        self.acquire_ref();
        let previous = self.delete_task.swap(t.addr(), Ordering::AcqRel);
        assert_eq!(previous, NO_TASK, "object deleted twice");
        self.release_ref();
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl Default for DeletionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
