//! Tasklets
//!
//! A tasklet is a cache-line sized work item: a link word used by
//! [`TaskletQueue`](super::tasklet_queue::TaskletQueue), a handler and an
//! inline payload holding the closure the handler runs. Tasklets never
//! allocate when they are scheduled, so they can be queued from any context.
//!
//! When a tasklet is not linked into a queue its link word carries one of
//! the state markers below.

use alloc::{boxed::Box, vec::Vec};
use core::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    mem::{align_of, size_of, MaybeUninit},
    ops::Deref,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

use spin::Mutex;

use crate::config::{TASKLET_PAYLOAD, TASKLET_SIZE};

// ---------------------------------------------------------------------------
// Link word markers
// ---------------------------------------------------------------------------

/// Queue tail: empty and unowned.
pub(crate) const FREE: usize = 0;
/// Queue link: the producer has not finished publishing the successor.
pub(crate) const INCOMPLETE: usize = 1;
/// Queue tail: empty but owned by a consumer.
pub(crate) const LOCKED: usize = 2;
/// Tasklet state: idle, may be set and queued.
pub(crate) const UNUSED: usize = 3;
/// Tasklet state: removed from a queue, about to run.
pub(crate) const INIT: usize = 4;
/// Tasklet state: removed from a queue and handed back to its waiter.
pub(crate) const INIT_HANDOVER: usize = 5;

/// Highest value that is a marker rather than a tasklet address.
pub(crate) const MAX_MARKER: usize = INIT_HANDOVER;

/// What a handler does with the closure in the payload.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Run,
    Discard,
}

type Handler = unsafe fn(*const Tasklet, Action);

#[repr(C, align(16))]
struct Payload([MaybeUninit<u8>; TASKLET_PAYLOAD]);

/// A unit of delegated work.
#[repr(C, align(64))]
pub struct Tasklet {
    next: AtomicUsize,
    handler: UnsafeCell<Option<Handler>>,
    payload: UnsafeCell<Payload>,
}

const _: () = assert!(size_of::<Tasklet>() == TASKLET_SIZE);

// SAFETY: the handler and payload cells are only written by the party that
// owns the tasklet while it is idle and only read by the single place that
// pulled it from a queue. The link word is atomic.
unsafe impl Sync for Tasklet {}
// SAFETY: see above; closures stored via `set` are required to be `Send`.
unsafe impl Send for Tasklet {}

struct AssertFits<F>(PhantomData<F>);

impl<F> AssertFits<F> {
    const OK: () = assert!(
        size_of::<F>() <= TASKLET_PAYLOAD && align_of::<F>() <= 16,
        "closure does not fit into a tasklet payload"
    );
}

unsafe fn call_with_tasklet<F: FnOnce(&'static Tasklet)>(t: *const Tasklet, action: Action) {
    // SAFETY: `set` only installs this handler on a `&'static Tasklet`.
    let t: &'static Tasklet = unsafe { &*t };
    // SAFETY: `set` wrote an `F` into the payload and the handler slot was
    // cleared by the caller, so the value is read exactly once.
    let f = unsafe { ptr::read(t.payload.get() as *const F) };
    if action == Action::Run {
        f(t)
    }
}

unsafe fn call_scoped<F: FnOnce()>(t: *const Tasklet, action: Action) {
    // SAFETY: `set_scoped` wrote an `F` into the payload and its caller keeps
    // the tasklet alive until the closure has completed.
    let f = unsafe { ptr::read((*t).payload.get() as *const F) };
    if action == Action::Run {
        f()
    }
}

impl Tasklet {
    pub const fn new() -> Self {
        Self {
            next: AtomicUsize::new(UNUSED),
            handler: UnsafeCell::new(None),
            payload: UnsafeCell::new(Payload([MaybeUninit::uninit(); TASKLET_PAYLOAD])),
        }
    }

    /// Install the closure this tasklet runs next.
    ///
    /// The tasklet must be idle: not queued and not running. A closure that
    /// was installed earlier and never ran is dropped. Closures larger than
    /// the payload are rejected at compile time.
    pub fn set<F>(&'static self, f: F)
    where
        F: FnOnce(&'static Tasklet) + Send + 'static,
    {
        #[allow(clippy::let_unit_value)]
        let () = AssertFits::<F>::OK;
        debug_assert!(self.is_idle(), "tasklet set while queued");
        self.discard();
        // SAFETY: the tasklet is idle, so nobody else reads the cells. The
        // payload is 16-byte aligned and large enough for `F`.
        unsafe {
            ptr::write(self.payload.get() as *mut F, f);
            *self.handler.get() = Some(call_with_tasklet::<F>);
        }
    }

    /// Install a closure that borrows from the caller's stack.
    ///
    /// # Safety
    ///
    /// The caller must keep the tasklet and everything `f` borrows alive
    /// until `f` has run to completion.
    pub unsafe fn set_scoped<F: FnOnce()>(&self, f: F) {
        #[allow(clippy::let_unit_value)]
        let () = AssertFits::<F>::OK;
        self.discard();
        // SAFETY: as in `set`; lifetimes are the caller's obligation.
        unsafe {
            ptr::write(self.payload.get() as *mut F, f);
            *self.handler.get() = Some(call_scoped::<F>);
        }
    }

    /// Execute the installed closure.
    ///
    /// The tasklet is marked idle before the closure starts, so the closure
    /// may set and queue the same tasklet again.
    pub fn run(&self) {
        // SAFETY: only the place that pulled this tasklet (or its owner, for
        // inline execution) calls `run`, so access to the cell is exclusive.
        let handler = unsafe { (*self.handler.get()).take() };
        let handler = match handler {
            Some(h) => h,
            None => panic!("tasklet {:p} run without a handler", self),
        };
        self.next.store(UNUSED, Ordering::Release);
        // SAFETY: the handler matches the closure type stored in the payload.
        unsafe { handler(self, Action::Run) }
    }

    /// Drop the installed closure without running it.
    fn discard(&self) {
        // SAFETY: callers own the idle tasklet, so access to the cells is
        // exclusive.
        if let Some(handler) = unsafe { (*self.handler.get()).take() } {
            // SAFETY: the handler matches the closure type in the payload.
            unsafe { handler(self, Action::Discard) }
        }
    }

    /// Pass a pulled tasklet back to the thread waiting on it.
    pub(crate) fn set_handover(&self) {
        self.next.store(INIT_HANDOVER, Ordering::Release);
    }

    pub(crate) fn is_handover(&self) -> bool {
        self.next.load(Ordering::Acquire) == INIT_HANDOVER
    }

    /// Not linked into any queue.
    pub fn is_idle(&self) -> bool {
        matches!(self.next.load(Ordering::Acquire), UNUSED | INIT)
    }

    #[inline]
    pub(crate) fn link(&self) -> &AtomicUsize {
        &self.next
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// # Safety
    ///
    /// `addr` must have been produced by [`Tasklet::addr`] on a tasklet that
    /// is still alive.
    #[inline]
    pub(crate) unsafe fn from_addr(addr: usize) -> &'static Tasklet {
        debug_assert!(addr > MAX_MARKER);
        // SAFETY: guaranteed by the caller.
        unsafe { &*(addr as *const Tasklet) }
    }
}

impl Default for Tasklet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tasklet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tasklet")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tasklet pool
// ---------------------------------------------------------------------------

static POOL: Mutex<Vec<&'static Tasklet>> = Mutex::new(Vec::new());

/// A tasklet with a `'static` address that returns to a global pool when
/// dropped.
///
/// Queues hold tasklets by address, so tasklets owned by kernel objects
/// must not move. The owner drops the handle only after the last scheduled
/// run has started.
pub struct OwnedTasklet(&'static Tasklet);

impl OwnedTasklet {
    pub fn new() -> Self {
        if let Some(t) = POOL.lock().pop() {
            return Self(t);
        }
        Self(Box::leak(Box::new(Tasklet::new())))
    }

    #[inline]
    pub fn get(&self) -> &'static Tasklet {
        self.0
    }
}

impl Default for OwnedTasklet {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for OwnedTasklet {
    type Target = Tasklet;

    fn deref(&self) -> &Tasklet {
        self.0
    }
}

impl Drop for OwnedTasklet {
    fn drop(&mut self) {
        if !self.0.is_idle() {
            log::warn!(target: "monitor", "leaking queued tasklet {:p}", self.0);
            return;
        }
        self.0.discard();
        POOL.lock().push(self.0);
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicU32;

    use super::*;

    #[test]
    fn test_tasklet_is_one_cache_line() {
        assert_eq!(size_of::<Tasklet>(), 64);
        assert_eq!(align_of::<Tasklet>(), 64);
    }

    #[test]
    fn test_run_invokes_closure_once() {
        static HITS: AtomicU32 = AtomicU32::new(0);
        let t = OwnedTasklet::new();
        t.get().set(|_| {
            HITS.fetch_add(1, Ordering::SeqCst);
        });
        t.run();
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        assert!(t.is_idle());
    }

    #[test]
    fn test_closure_may_requeue_itself() {
        static HITS: AtomicU32 = AtomicU32::new(0);
        let t = OwnedTasklet::new();
        t.get().set(|t| {
            HITS.fetch_add(1, Ordering::SeqCst);
            t.set(|_| {
                HITS.fetch_add(10, Ordering::SeqCst);
            });
        });
        t.run();
        t.run();
        assert_eq!(HITS.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_scoped_closure_borrows_stack() {
        let counter = AtomicU32::new(0);
        let t = Tasklet::new();
        // SAFETY: `t` and `counter` outlive the call to `run`.
        unsafe {
            t.set_scoped(|| {
                counter.fetch_add(3, Ordering::SeqCst);
            })
        };
        t.run();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unrun_closure_is_dropped() {
        let captured = alloc::sync::Arc::new(7u32);
        let t = OwnedTasklet::new();
        let c = captured.clone();
        t.get().set(move |_| assert_eq!(*c, 7));
        assert_eq!(alloc::sync::Arc::strong_count(&captured), 2);
        drop(t);
        assert_eq!(alloc::sync::Arc::strong_count(&captured), 1);
    }

    #[test]
    fn test_replaced_closure_is_dropped() {
        let first = alloc::sync::Arc::new(());
        let t = OwnedTasklet::new();
        let c = first.clone();
        t.get().set(move |_| drop(c));
        t.get().set(|_| {});
        assert_eq!(alloc::sync::Arc::strong_count(&first), 1);
        t.run();
    }

    #[test]
    #[should_panic]
    fn test_run_without_handler_panics() {
        Tasklet::new().run();
    }
}
