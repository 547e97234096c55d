//! Hosted test support
//!
//! Unit tests run on ordinary threads. Each thread that touches the kernel
//! gets its own place id, returned to a free list when the thread exits.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{config::MAX_PLACES, cpu, sync::place::Place};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
static FREE_IDS: Mutex<Vec<usize>> = Mutex::new(Vec::new());

struct ThreadPlace(usize);

impl ThreadPlace {
    fn acquire() -> Self {
        if let Some(id) = FREE_IDS.lock().ok().and_then(|mut free| free.pop()) {
            return Self(id);
        }
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        assert!(id < MAX_PLACES, "too many concurrent test threads");
        Self(id)
    }
}

impl Drop for ThreadPlace {
    fn drop(&mut self) {
        if let Ok(mut free) = FREE_IDS.lock() {
            free.push(self.0);
        }
    }
}

std::thread_local! {
    static PLACE_ID: ThreadPlace = ThreadPlace::acquire();
}

fn thread_place_id() -> usize {
    PLACE_ID.with(|p| p.0)
}

/// Bind hardware thread ids to test threads.
pub fn init() {
    cpu::register_hwthread_id_source(thread_place_id);
}

/// Drain the local place until `done` holds.
pub fn run_until(mut done: impl FnMut() -> bool) {
    let here = Place::current();
    while !done() {
        here.process_tasks();
        cpu::pause();
    }
    here.process_tasks();
}
