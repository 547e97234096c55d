//! Delegation-based synchronization
//!
//! Tasklets, per-thread places and the monitors built on them.

pub mod monitor;
pub mod place;
pub mod tasklet;
pub mod tasklet_queue;

pub use place::{Mode, Place};
pub use tasklet::{OwnedTasklet, Tasklet};
pub use tasklet_queue::TaskletQueue;
