//! Ordercheck: a deterministic ordering and failure oracle for async tests.
//!
//! # Overview
//!
//! Ordercheck lets a test assert that the side effects of an asynchronous
//! computation happen in a declared order, that dead code paths stay dead,
//! that the scenario completes exactly once, and that every failure it
//! produces (the one terminating the run and any escaping detached tasks)
//! matches what the test declared.
//!
//! # Core Guarantees
//!
//! - **Unforgeable ordering**: each `expect` is a single atomic increment-and-compare
//! - **Single completion**: `finish` latches once; a second call always fails
//! - **Sticky failures**: the first harness failure is recorded even if the code under test swallows the unwind
//! - **Real-time arrival matching**: detached-task failures are matched positionally as they happen
//! - **Reconciliation on every exit path**: classification runs even when the scheduler itself panics
//!
//! # Module Structure
//!
//! - [`oracle`]: Sequencer, recorder, classifier and the `TestCase` driver
//! - [`runtime`]: Scheduler boundary and the `Cx` task handle
//! - [`lab`]: Deterministic single-threaded scheduler
//! - [`config`]: Harness configuration and environment overrides
//! - [`error`]: The `Failure` type
//! - [`types`]: Identifiers and cancellation reasons
//! - [`test_utils`]: Logging setup and failure predicates for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod error;
pub mod lab;
pub mod oracle;
pub mod runtime;
pub mod test_utils;
pub mod types;

// Re-exports for convenient access to core types
pub use config::{CancellationFilter, ConfigError, HarnessConfig};
pub use error::{Failure, FailureKind, Result};
pub use lab::{LabConfig, LabScheduler};
pub use oracle::{Expectations, TestCase};
pub use runtime::{yield_now, CancelHandle, Cx, Scheduler, TaskHandle};
pub use types::{CancelKind, CancelReason, RegionId, TaskId};
