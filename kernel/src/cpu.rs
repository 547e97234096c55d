//! Hardware thread identity and spin helpers
//!
//! The kernel never asks the architecture directly which hardware thread it
//! runs on. Boot code (or a hosted test harness) registers an id source once;
//! everything else goes through [`hwthread_id`].

use spin::Once;

use crate::config::{BACKOFF_MAX_SPINS, BACKOFF_MIN_SPINS, MAX_PLACES};

static HWTHREAD_ID_SOURCE: Once<fn() -> usize> = Once::new();

/// Install the function that reports the current hardware thread.
///
/// Only the first registration takes effect.
pub fn register_hwthread_id_source(source: fn() -> usize) {
    HWTHREAD_ID_SOURCE.call_once(|| source);
}

/// Id of the hardware thread executing the caller.
///
/// Falls back to thread 0 before a source has been registered, which is the
/// situation on the boot processor during early initialization.
#[inline]
pub fn hwthread_id() -> usize {
    let id = match HWTHREAD_ID_SOURCE.get() {
        Some(source) => source(),
        None => 0,
    };
    assert!(id < MAX_PLACES, "hardware thread id {} out of range", id);
    id
}

/// Spin-wait hint.
#[inline(always)]
pub fn pause() {
    core::hint::spin_loop();
}

/// Exponential backoff for contended atomic loops
///
/// Each call to [`Backoff::spin`] waits twice as long as the previous one
/// until the step reaches its ceiling. There is no attempt limit: the callers
/// are lock-free retry loops that must eventually succeed.
#[derive(Debug, Clone)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub const fn new() -> Self {
        Self {
            step: BACKOFF_MIN_SPINS,
        }
    }

    pub fn spin(&mut self) {
        for _ in 0..self.step {
            pause();
        }
        if self.step < BACKOFF_MAX_SPINS {
            self.step <<= 1;
        }
    }

    pub fn reset(&mut self) {
        self.step = BACKOFF_MIN_SPINS;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
