//! Capability revocation
//!
//! Deleting a capability deletes its whole subtree. The traversal is
//! synchronous and runs under the revoke operation's monitor: it repeatedly
//! descends from the root to a leaf, notifies the leaf's object and unlinks
//! the leaf. Objects whose original capability disappears are collected and
//! destroyed afterwards, one at a time, because their destruction may have
//! to wait for other monitors.

use alloc::{
    collections::VecDeque,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::{entry::CapEntry, ops::is_parent_of, value::Cap, ObjectHandle};
use crate::{
    cpu::pause,
    error::{Error, KernelResult},
    objects::{table, Deleter, ResultSink},
    sync::{monitor::NestedMonitorDelegating, Tasklet},
};

/// Reusable state machine for one revoke or delete at a time.
pub struct RevokeOperation {
    me: Weak<RevokeOperation>,
    monitor: NestedMonitorDelegating,
    busy: AtomicBool,
    delete_queue: Mutex<VecDeque<ObjectHandle>>,
    pending: Mutex<Vec<&'static CapEntry>>,
    result: Mutex<KernelResult<()>>,
    sink: Mutex<Option<Arc<dyn ResultSink>>>,
    guarded: Mutex<Option<ObjectHandle>>,
}

impl RevokeOperation {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            monitor: NestedMonitorDelegating::new(),
            busy: AtomicBool::new(false),
            delete_queue: Mutex::new(VecDeque::new()),
            pending: Mutex::new(Vec::new()),
            result: Mutex::new(Ok(())),
            sink: Mutex::new(None),
            guarded: Mutex::new(None),
        })
    }

    /// Delete every capability below `entry`, keeping `entry` itself.
    ///
    /// Fails with [`Error::CyclicDependency`] instead of deleting the
    /// `guarded` object, which the caller is executing inside of.
    pub fn revoke_cap(
        self: Arc<Self>,
        t: &'static Tasklet,
        sink: Arc<dyn ResultSink>,
        entry: &'static CapEntry,
        guarded: Option<ObjectHandle>,
    ) {
        let op = self.clone();
        self.monitor
            .request(t, move |t| op.start(t, sink, entry, guarded, false));
    }

    /// Delete `entry` and everything below it.
    pub fn delete_cap(
        self: Arc<Self>,
        t: &'static Tasklet,
        sink: Arc<dyn ResultSink>,
        entry: &'static CapEntry,
        guarded: Option<ObjectHandle>,
    ) {
        let op = self.clone();
        self.monitor
            .request(t, move |t| op.start(t, sink, entry, guarded, true));
    }

    fn start(
        self: Arc<Self>,
        t: &'static Tasklet,
        sink: Arc<dyn ResultSink>,
        entry: &'static CapEntry,
        guarded: Option<ObjectHandle>,
        delete: bool,
    ) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            sink.response(t, Err(Error::Retry));
            self.monitor.request_done();
            return;
        }
        *self.sink.lock() = Some(sink);
        *self.guarded.lock() = guarded;

        let mut result = if delete {
            self.delete(entry)
        } else {
            self.revoke(entry)
        };
        let drained = self.drain_pending();
        if result.is_ok() {
            result = drained;
        }
        if let Err(e) = result {
            log::debug!(target: "cap", "deletion of entry {} stopped: {}", entry.id(), e);
        }
        *self.result.lock() = result;
        self.delete_objects(t);
    }

    fn revoke(&self, entry: &'static CapEntry) -> KernelResult<()> {
        entry.lock();
        let cap = entry.cap();
        if !cap.is_usable() {
            entry.unlock();
            return Err(Error::LostRace);
        }
        entry.set_revoking();
        entry.unlock();
        self.delete_subtree(entry, cap)
    }

    fn delete(&self, entry: &'static CapEntry) -> KernelResult<()> {
        let cap = entry.cap();
        if !entry.kill() {
            return Err(Error::LostRace);
        }
        self.delete_subtree(entry, cap)
    }

    /// Delete entries killed by objects during the synchronous phase. Keeps
    /// going after a failure and reports the first one.
    fn drain_pending(&self) -> KernelResult<()> {
        let mut result = Ok(());
        loop {
            let entry = match self.pending.lock().pop() {
                Some(entry) => entry,
                None => return result,
            };
            let cap = entry.cap();
            if !cap.is_zombie() {
                continue;
            }
            if let Err(e) = self.delete_subtree(entry, cap) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
    }

    fn is_guarded(&self, cap: Cap) -> bool {
        let guarded = *self.guarded.lock();
        guarded.is_some() && cap.handle() == guarded
    }

    /// Lock the root and its predecessor. Returns `false` if the root is
    /// gone, no longer holds `root_cap` or is a tree root without children.
    fn start_traversal(&self, root: &CapEntry, root_cap: Cap) -> bool {
        if root.lock_prev().is_err() {
            return false;
        }
        if root.prev_entry().is_some_and(|prev| core::ptr::eq(prev, root)) {
            // Linked only to itself: the lock just taken is the root's own.
            root.unlock_prev();
            root.finish_revoke();
            return false;
        }
        root.lock();
        if root.cap().as_zombie() != root_cap.as_zombie() {
            root.unlock();
            root.unlock_prev();
            return false;
        }
        true
    }

    /// Descend from the locked `root` to an entry without children.
    ///
    /// Returns the leaf with both its own and its predecessor's lock held.
    /// Every entry passed on the way down is killed.
    fn find_locked_leaf(&self, root: &'static CapEntry) -> &'static CapEntry {
        let mut leaf = root;
        loop {
            let leaf_cap = leaf.cap();
            let next = leaf.next_entry();
            let mut next_cap = next.cap();
            while next_cap.is_allocated() {
                pause();
                next_cap = next.cap();
            }
            if core::ptr::eq(next, root) || !is_parent_of(leaf, leaf_cap, next, next_cap) {
                return leaf;
            }
            leaf.unlock_prev();
            next.kill();
            next.lock();
            leaf = next;
        }
    }

    fn delete_subtree(&self, root: &'static CapEntry, root_cap: Cap) -> KernelResult<()> {
        loop {
            if !self.start_traversal(root, root_cap) {
                return Ok(());
            }
            let leaf = self.find_locked_leaf(root);
            let leaf_cap = leaf.cap();
            let is_root = core::ptr::eq(leaf, root);

            if is_root && !leaf_cap.is_zombie() {
                root.finish_revoke();
                root.unlock();
                root.unlock_prev();
                return Ok(());
            }
            if self.is_guarded(leaf_cap) {
                leaf.unlock();
                leaf.unlock_prev();
                if !root_cap.is_zombie() {
                    root.finish_revoke();
                }
                return Err(Error::CyclicDependency);
            }

            let notified = match leaf_cap.object() {
                Some(obj) => obj.delete_cap(leaf, leaf_cap, self),
                None => Ok(()),
            };
            if let Err(e) = notified {
                leaf.unlock();
                leaf.unlock_prev();
                return Err(e);
            }
            log::trace!(target: "cap", "unlink entry {} {:?}", leaf.id(), leaf_cap);
            leaf.unlink();
            leaf.reset();
            if is_root {
                return Ok(());
            }
        }
    }

    fn delete_objects(self: Arc<Self>, t: &'static Tasklet) {
        loop {
            let handle = match self.delete_queue.lock().pop_front() {
                Some(handle) => handle,
                None => break,
            };
            if let Some(obj) = table::remove(handle) {
                log::debug!(target: "cap", "destroying {} {}", obj.name(), handle);
                let sink: Arc<dyn ResultSink> = self.clone();
                obj.delete_object(t, sink);
                return;
            }
        }
        self.finish(t);
    }

    fn finish(&self, t: &'static Tasklet) {
        let result = core::mem::replace(&mut *self.result.lock(), Ok(()));
        let sink = self.sink.lock().take();
        *self.guarded.lock() = None;
        self.busy.store(false, Ordering::Release);
        if let Some(sink) = sink {
            sink.response(t, result);
        }
        self.monitor.request_done();
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Deleter for RevokeOperation {
    fn delete_object(&self, handle: ObjectHandle) {
        self.delete_queue.lock().push_back(handle);
    }

    fn delete_entry(&self, entry: &'static CapEntry) -> KernelResult<()> {
        if entry.is_deleted() {
            return Ok(());
        }
        if entry.try_acquire() {
            entry.set_deleted();
            return Ok(());
        }
        if entry.kill() {
            self.pending.lock().push(entry);
        }
        Ok(())
    }
}

impl ResultSink for RevokeOperation {
    fn response(&self, t: &'static Tasklet, result: KernelResult<()>) {
        if let Err(e) = result {
            log::warn!(target: "cap", "object destruction failed: {}", e);
            let mut stored = self.result.lock();
            if stored.is_ok() {
                *stored = Err(e);
            }
        }
        let op = match self.me.upgrade() {
            Some(op) => op,
            None => return,
        };
        self.monitor
            .response(t, move |t| op.delete_objects(t));
    }
}
