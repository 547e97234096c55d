//! Lock-Free Tasklet Queue
//!
//! A multi-producer, single-consumer queue of [`Tasklet`]s that doubles as
//! an ownership token. Producers push with a single atomic exchange on the
//! shared tail. The consumer that drains the queue owns it until it manages
//! to release it, and a producer learns from [`TaskletQueue::push`] whether
//! it found the queue unowned and must therefore start a consumer.
//!
//! The shared tail holds either a marker or the most recently pushed
//! tasklet. Each tasklet links to its predecessor, so the shared chain runs
//! newest to oldest and ends in `FREE` (unowned) or `LOCKED` (owned).
//! When the consumer grabs the chain it reverses it onto a private stack so
//! tasklets run in push order.

use core::sync::atomic::{AtomicUsize, Ordering};

use super::tasklet::{Tasklet, FREE, INCOMPLETE, INIT, LOCKED, MAX_MARKER};
use crate::cpu::pause;

// ---------------------------------------------------------------------------
// Tasklet Queue
// ---------------------------------------------------------------------------

/// Queue of pending tasklets with an embedded owner lock.
pub struct TaskletQueue {
    /// Most recent tasklet or a marker. Written by any producer.
    shared: AtomicUsize,
    /// Stack of tasklets already taken from the shared chain, oldest on top.
    /// Only touched by the current owner.
    private: AtomicUsize,
}

impl TaskletQueue {
    pub const fn new() -> Self {
        Self {
            shared: AtomicUsize::new(FREE),
            private: AtomicUsize::new(FREE),
        }
    }

    /// Append a tasklet.
    ///
    /// Returns `true` if the queue was empty and unowned, in which case the
    /// caller is responsible for getting it processed.
    pub fn push(&self, t: &'static Tasklet) -> bool {
        // SAFETY: the tasklet is `'static`.
        unsafe { self.push_raw(t) }
    }

    /// Append a tasklet that lives on the caller's stack.
    ///
    /// # Safety
    ///
    /// The caller must keep `t` alive until it has been pulled and run.
    pub(crate) unsafe fn push_raw(&self, t: &Tasklet) -> bool {
        t.link().store(INCOMPLETE, Ordering::Relaxed);
        let old = self.shared.swap(t.addr(), Ordering::AcqRel);
        t.link().store(old, Ordering::Release);
        old == FREE
    }

    /// Push a tasklet onto the owner's private stack. It runs before any
    /// tasklet still in the shared chain.
    ///
    /// Must only be called by the current owner.
    pub fn push_private(&self, t: &'static Tasklet) {
        let top = self.private.load(Ordering::Relaxed);
        t.link().store(top, Ordering::Relaxed);
        self.private.store(t.addr(), Ordering::Relaxed);
    }

    /// Take the next tasklet, acquiring ownership of the queue.
    ///
    /// Returns `None` if nothing is pending. The queue is owned after this
    /// call either way and must be released with [`TaskletQueue::try_release`].
    pub fn pull(&self) -> Option<&'static Tasklet> {
        if let Some(t) = self.pop_private() {
            return Some(t);
        }

        let newest = self.shared.swap(LOCKED, Ordering::AcqRel);
        if newest == FREE || newest == LOCKED {
            return None;
        }

        let mut cur = newest;
        loop {
            // SAFETY: every non-marker value in the chain is a tasklet pushed
            // by `push_raw` whose owner keeps it alive until it has run.
            let t = unsafe { Tasklet::from_addr(cur) };
            let mut next = t.link().load(Ordering::Acquire);
            while next == INCOMPLETE {
                pause();
                next = t.link().load(Ordering::Acquire);
            }
            if next <= MAX_MARKER {
                t.link().store(INIT, Ordering::Release);
                return Some(t);
            }
            self.push_private(t);
            cur = next;
        }
    }

    fn pop_private(&self) -> Option<&'static Tasklet> {
        let top = self.private.load(Ordering::Relaxed);
        if top == FREE {
            return None;
        }
        // SAFETY: the private stack only holds tasklets moved off the chain.
        let t = unsafe { Tasklet::from_addr(top) };
        self.private
            .store(t.link().load(Ordering::Relaxed), Ordering::Relaxed);
        t.link().store(INIT, Ordering::Release);
        Some(t)
    }

    /// Take ownership of an empty, unowned queue.
    pub fn try_acquire(&self) -> bool {
        self.shared
            .compare_exchange(FREE, LOCKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Give up ownership. Fails while tasklets are still pending.
    pub fn try_release(&self) -> bool {
        if self.private.load(Ordering::Relaxed) != FREE {
            return false;
        }
        self.shared
            .compare_exchange(LOCKED, FREE, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Owned by a consumer or holding pending tasklets.
    pub fn is_locked(&self) -> bool {
        self.shared.load(Ordering::Acquire) != FREE
    }

    /// Nothing pending in either list.
    pub fn is_empty(&self) -> bool {
        self.private.load(Ordering::Relaxed) == FREE
            && matches!(self.shared.load(Ordering::Acquire), FREE | LOCKED)
    }
}

impl Default for TaskletQueue {
    fn default() -> Self {
        Self::new()
    }
}
