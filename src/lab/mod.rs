//! Deterministic lab scheduler.
//!
//! The lab scheduler is the default [`Scheduler`](crate::runtime::Scheduler)
//! behind a [`TestCase`](crate::oracle::TestCase):
//!
//! - Single-threaded, FIFO scheduling (same program, same interleaving)
//! - Panics caught per poll and converted to failures
//! - Detached failures delivered to the hook as they happen
//! - Bounded step budget and stall detection instead of hangs

pub mod config;
pub mod runtime;

pub use config::LabConfig;
pub use runtime::LabScheduler;
