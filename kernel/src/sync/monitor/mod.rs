//! Monitors
//!
//! Synchronization wrappers for kernel objects. None of them blocks a
//! hardware thread on a lock owned by another: work is delegated as
//! tasklets to whoever currently holds the object.

mod deletion;
mod mutex;
mod nested;
mod simple_home;

pub use deletion::DeletionMonitor;
pub use mutex::{DelegatingCell, MutexDelegating};
pub use nested::NestedMonitorDelegating;
pub use simple_home::SimpleMonitorHome;
