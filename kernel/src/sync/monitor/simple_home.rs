//! Home-place monitor
//!
//! All requests on the object execute on one fixed place, which serializes
//! them through that place's tasklet queue. The home can be moved.

use core::sync::atomic::{AtomicUsize, Ordering};

use super::DeletionMonitor;
use crate::sync::{
    place::{Mode, Place},
    tasklet::Tasklet,
};

pub struct SimpleMonitorHome {
    home: AtomicUsize,
    deletion: DeletionMonitor,
}

impl SimpleMonitorHome {
    pub fn new(home: &Place) -> Self {
        Self {
            home: AtomicUsize::new(home.id()),
            deletion: DeletionMonitor::new(),
        }
    }

    pub fn home(&self) -> &'static Place {
        Place::get(self.home.load(Ordering::Acquire))
    }

    /// Move future requests to `place`.
    pub fn set_home(&self, place: &Place) {
        self.home.store(place.id(), Ordering::Release);
    }

    pub fn request<F>(&self, t: &'static Tasklet, f: F)
    where
        F: FnOnce(&'static Tasklet) + Send + 'static,
    {
        self.deletion.acquire_ref();
        t.set(f);
        self.home().run(t, Mode::MayInline);
    }

    pub fn request_done(&self) {
        self.deletion.release_ref();
    }

    pub fn do_delete<F>(&self, t: &'static Tasklet, f: F)
    where
        F: FnOnce(&'static Tasklet) + Send + 'static,
    {
        self.deletion.do_delete(t, f);
    }
}
