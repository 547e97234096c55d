//! Delegating mutex
//!
//! Callers enqueue their critical section instead of spinning on a lock.
//! Whoever finds the queue empty becomes the owner and executes queued
//! sections on behalf of the others. After [`HANDOVER_COUNT`] sections the
//! owner hands the role to the waiter of the next section, which bounds the
//! time any caller spends working for others.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    config::HANDOVER_COUNT,
    cpu::pause,
    sync::{tasklet::Tasklet, tasklet_queue::TaskletQueue},
};

pub struct MutexDelegating {
    queue: TaskletQueue,
}

struct Frame<F, R> {
    f: Option<F>,
    result: Option<R>,
    done: AtomicBool,
}

struct FramePtr<F, R>(*mut Frame<F, R>);

impl<F, R> Clone for FramePtr<F, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F, R> Copy for FramePtr<F, R> {}

// SAFETY: the frame is only accessed by whichever thread runs the section,
// and the waiter does not read it until `done` is published.
unsafe impl<F: Send, R: Send> Send for FramePtr<F, R> {}

impl MutexDelegating {
    pub const fn new() -> Self {
        Self {
            queue: TaskletQueue::new(),
        }
    }

    /// Execute `f` with mutual exclusion against all other sections of this
    /// mutex. Returns once `f` has completed, possibly on another thread.
    pub fn atomic<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let mut frame = Frame {
            f: Some(f),
            result: None,
            done: AtomicBool::new(false),
        };
        let frame_ptr = FramePtr(&mut frame as *mut Frame<F, R>);
        let t = Tasklet::new();
        // SAFETY: `t` and `frame` stay on this stack frame until `done` is
        // set, which is the last thing the section does.
        unsafe {
            t.set_scoped(move || {
                let ptr = frame_ptr;
                let frame = ptr.0;
                let f = (*frame).f.take();
                if let Some(f) = f {
                    (*frame).result = Some(f());
                }
                (*frame).done.store(true, Ordering::Release);
            });
        }

        // SAFETY: see above.
        if unsafe { self.queue.push_raw(&t) } {
            self.process();
        } else {
            self.wait(&t, &frame_ptr);
        }

        // SAFETY: `done` was observed, so no other thread touches the frame.
        match unsafe { (*frame_ptr.0).result.take() } {
            Some(r) => r,
            None => panic!("delegated section completed without a result"),
        }
    }

    fn wait<F, R>(&self, t: &Tasklet, frame: &FramePtr<F, R>) {
        loop {
            // SAFETY: `done` is atomic and the frame outlives this loop.
            if unsafe { (*frame.0).done.load(Ordering::Acquire) } {
                return;
            }
            if t.is_handover() {
                t.run();
                self.process();
                return;
            }
            pause();
        }
    }

    fn process(&self) {
        let mut budget = HANDOVER_COUNT;
        loop {
            match self.queue.pull() {
                Some(t) if budget == 0 => {
                    t.set_handover();
                    return;
                }
                Some(t) => {
                    budget -= 1;
                    t.run();
                }
                None => {
                    if self.queue.try_release() {
                        return;
                    }
                }
            }
        }
    }
}

impl Default for MutexDelegating {
    fn default() -> Self {
        Self::new()
    }
}

/// Data guarded by a [`MutexDelegating`].
pub struct DelegatingCell<T> {
    mutex: MutexDelegating,
    value: UnsafeCell<T>,
}

// SAFETY: `value` is only accessed inside sections of `mutex`, which never
// overlap.
unsafe impl<T: Send> Sync for DelegatingCell<T> {}

impl<T: Send> DelegatingCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            mutex: MutexDelegating::new(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn with<R: Send>(&self, f: impl FnOnce(&mut T) -> R + Send) -> R {
        let value = ValuePtr(self.value.get());
        self.mutex.atomic(move || {
            let value = value;
            // SAFETY: sections of the mutex are mutually exclusive.
            f(unsafe { &mut *value.0 })
        })
    }
}

struct ValuePtr<T>(*mut T);

// SAFETY: the pointee is `Send` and accessed under the mutex only.
unsafe impl<T: Send> Send for ValuePtr<T> {}
