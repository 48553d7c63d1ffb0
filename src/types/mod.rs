//! Core types shared by the scheduler boundary and the oracle.
//!
//! - [`id`]: Identifier types (`RegionId`, `TaskId`)
//! - [`cancel`]: Cancellation reason and kind types

pub mod cancel;
pub mod id;

pub use cancel::{CancelKind, CancelReason};
pub use id::{RegionId, TaskId};
