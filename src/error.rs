//! Failure type and failure-handling strategy for the oracle.
//!
//! Every problem the harness observes or produces is a [`Failure`]:
//!
//! - Failures are typed by [`FailureKind`] and carry a message plus an
//!   optional causing failure, forming a chain
//! - Raising a failure unwinds with the `Failure` itself as the panic payload,
//!   so a test runner reports it even when intermediate code is careless
//! - Caught panic payloads are converted back with [`Failure::from_panic`]
//! - Errors returned by tasks are converted with [`Failure::from_error`],
//!   which preserves their `source()` chain
//!
//! # Failure Kinds
//!
//! - **Sequencing**: wrong declared step, double finish, unfinished reset
//! - **Unreachable**: a code path declared dead was executed
//! - **Classification**: observed failures did not match the expectations
//! - **Cancellation**: voluntary unwind during teardown, filtered before
//!   classification
//! - **Scheduler**: step limit exceeded or no runnable task left

use core::fmt;
use std::any::Any;
use std::sync::Arc;

use crate::types::{CancelReason, RegionId, TaskId};

/// The kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    // === Raised by the harness ===
    /// Raised through the harness assertion primitive.
    Assertion,
    /// A step was declared out of order or completion was misused.
    Sequence,
    /// A code path declared unreachable was executed.
    Unreachable,
    /// Observed failures did not match the declared expectations.
    Classification,

    // === Produced by the computation ===
    /// A task panicked with a non-`Failure` payload.
    Panic,
    /// A task returned an error value.
    Error,
    /// A task unwound because cancellation was requested.
    Cancelled,

    // === Produced by the scheduler ===
    /// The scheduler exceeded its configured step limit.
    StepLimit,
    /// A task awaited by the run is pending and nothing is runnable.
    Stalled,
}

impl FailureKind {
    /// Returns true for voluntary cancellation.
    #[must_use]
    pub const fn is_cancellation(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true for failures that end a run regardless of expectations.
    #[must_use]
    pub const fn is_scheduler_fatal(self) -> bool {
        matches!(self, Self::StepLimit | Self::Stalled)
    }

    /// Returns true for failures the harness itself raised.
    #[must_use]
    pub const fn is_harness(self) -> bool {
        matches!(
            self,
            Self::Assertion | Self::Sequence | Self::Unreachable | Self::Classification
        )
    }
}

/// Where a failure originated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureContext {
    /// The task that produced the failure.
    pub task_id: Option<TaskId>,
    /// The scenario region the failure is attributed to.
    pub region_id: Option<RegionId>,
    /// Why the task was cancelled, for cancellation failures.
    pub cancel_reason: Option<CancelReason>,
}

/// A failure observed or raised by the harness.
#[derive(Debug, Clone)]
pub struct Failure {
    kind: FailureKind,
    message: String,
    cause: Option<Arc<Failure>>,
    context: FailureContext,
}

impl Failure {
    /// Creates a new failure with the given kind and message.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            context: FailureContext::default(),
        }
    }

    /// Creates an assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, message)
    }

    /// Creates a sequencing failure.
    #[must_use]
    pub fn sequence(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Sequence, message)
    }

    /// Creates an unreachable-path failure.
    #[must_use]
    pub fn unreachable() -> Self {
        Self::new(FailureKind::Unreachable, "should not be reached")
    }

    /// Creates a classification failure.
    #[must_use]
    pub fn classification(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Classification, message)
    }

    /// Creates a voluntary-cancellation failure from a structured reason.
    #[must_use]
    pub fn cancelled(reason: CancelReason) -> Self {
        let mut failure = Self::new(FailureKind::Cancelled, format!("cancelled: {reason}"));
        failure.context.cancel_reason = Some(reason);
        failure
    }

    /// Converts a caught panic payload into a failure.
    ///
    /// A `Failure` payload is returned unchanged; string payloads become
    /// [`FailureKind::Panic`] with that message.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<Self>() {
            Ok(failure) => *failure,
            Err(payload) => Self::new(FailureKind::Panic, payload_to_string(&*payload)),
        }
    }

    /// Converts an error and its `source()` chain into a failure chain.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(failure) = err.downcast_ref::<Self>() {
            return failure.clone();
        }
        Self {
            kind: FailureKind::Error,
            message: err.to_string(),
            cause: err.source().map(|source| Arc::new(Self::from_error(source))),
            context: FailureContext::default(),
        }
    }

    /// Attaches a causing failure.
    #[must_use]
    pub fn with_cause(mut self, cause: Self) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attributes the failure to a task, unless already attributed.
    #[must_use]
    pub fn with_task(mut self, task: TaskId) -> Self {
        self.context.task_id.get_or_insert(task);
        self
    }

    /// Attributes the failure to a scenario region, unless already attributed.
    #[must_use]
    pub fn in_region(mut self, region: RegionId) -> Self {
        self.context.region_id.get_or_insert(region);
        self
    }

    /// Returns the failure kind.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the causing failure, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// Returns the origin context.
    #[must_use]
    pub const fn context(&self) -> &FailureContext {
        &self.context
    }

    /// Returns the task that produced the failure.
    #[must_use]
    pub const fn task_id(&self) -> Option<TaskId> {
        self.context.task_id
    }

    /// Returns the region the failure is attributed to.
    #[must_use]
    pub const fn region_id(&self) -> Option<RegionId> {
        self.context.region_id
    }

    /// Returns the cancellation reason for cancellation failures.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        self.context.cancel_reason.as_ref()
    }

    /// Returns true if this failure represents voluntary cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.kind.is_cancellation()
    }

    /// Iterates over this failure and its causes, outermost first.
    #[must_use]
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// Renders the failure and its cause chain, one line per link.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        for cause in self.chain().skip(1) {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
        }
        out
    }

    /// Unwinds with this failure as the panic payload.
    ///
    /// The default panic hook cannot print a [`Failure`] payload; harness
    /// paths write the [`report`](Self::report) out before calling this.
    pub fn raise(self) -> ! {
        std::panic::panic_any(self)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(task) = self.context.task_id {
            write!(f, " (in {task})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as _)
    }
}

impl From<CancelReason> for Failure {
    fn from(reason: CancelReason) -> Self {
        Self::cancelled(reason)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(FailureKind::Error, message)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::new(FailureKind::Error, message)
    }
}

/// Iterator over a failure and its cause chain.
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    next: Option<&'a Failure>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Failure;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause();
        Some(current)
    }
}

fn payload_to_string(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// A specialized Result type for oracle operations.
pub type Result<T> = core::result::Result<T, Failure>;
