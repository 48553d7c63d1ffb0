//! Scheduler boundary.
//!
//! The oracle never runs futures itself. It hands a [`Computation`] to a
//! [`Scheduler`], together with a [`RunContext`] carrying the failure hook,
//! and blocks until the scheduler reports the top-level outcome.
//!
//! - [`cx`]: The `Cx` handle given to the computation, plus task handles
//! - [`waker`]: Deduplicating ready queue and task wakers
//! - [`yield_now`]: Cooperative yield point
//!
//! # Failure routing
//!
//! | Task kind | Where its failure goes |
//! |-----------|------------------------|
//! | Root | returned from [`Scheduler::block_on`] |
//! | Structured child | its [`TaskHandle`]; the run's outcome if never joined |
//! | Detached | the [`FailureHook`] in [`RunContext`], as it happens |

pub mod cx;
pub mod waker;
pub mod yield_now;

pub use cx::{CancelHandle, Cx, TaskHandle};
pub use waker::ReadyQueue;
pub use yield_now::{yield_now, YieldNow};

use crate::error::Failure;
use crate::types::{CancelReason, RegionId, TaskId};
use futures_lite::future::BoxedLocal;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Type-erased task future; resolves to the failure the task ended with.
pub type TaskFuture = BoxedLocal<Option<Failure>>;

/// The root computation of a scenario, started with its own `Cx`.
pub type Computation = Box<dyn FnOnce(Cx) -> TaskFuture>;

/// Callback observing failures that escape detached tasks.
pub type FailureHook = Arc<dyn Fn(Failure) + Send + Sync>;

/// The "run to completion" primitive.
pub trait Scheduler {
    /// Runs `root` to completion, blocking the caller.
    ///
    /// Returns the failure that terminated the root task (or escaped an
    /// unjoined structured child). Detached-task failures are delivered to
    /// `ctx`'s hook instead and never appear here.
    fn block_on(&self, root: Computation, ctx: RunContext) -> Result<(), Failure>;
}

/// Per-run configuration handed to a [`Scheduler`].
#[derive(Clone)]
pub struct RunContext {
    region: RegionId,
    hook: FailureHook,
}

impl RunContext {
    /// Creates a run context for the given scenario region.
    #[must_use]
    pub fn new(region: RegionId, hook: FailureHook) -> Self {
        Self { region, hook }
    }

    /// Returns the scenario region every task of this run belongs to.
    #[must_use]
    pub const fn region(&self) -> RegionId {
        self.region
    }

    /// Delivers a detached-task failure to the hook.
    pub fn report(&self, failure: Failure) {
        (self.hook)(failure);
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// How a task relates to the task that spawned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// The scenario's top-level computation.
    Root,
    /// A child whose completion the run waits for.
    Structured,
    /// A background task nobody awaits.
    Detached,
}

/// Receives the failure of a structured child on behalf of its handle.
pub trait JoinSlot {
    /// Stores the failure and wakes the joiner.
    fn fail(&self, failure: Failure);

    /// Returns true once the joiner has taken the result.
    fn is_observed(&self) -> bool;
}

/// Everything a scheduler needs to start a task.
pub struct TaskSpec {
    /// Identifier allocated by the spawner.
    pub id: TaskId,
    /// The spawning task; `None` for the root.
    pub parent: Option<TaskId>,
    /// Relationship to the parent.
    pub kind: TaskKind,
    /// The task body.
    pub future: TaskFuture,
    /// Where a structured child's failure is delivered.
    pub join: Option<Rc<dyn JoinSlot>>,
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Scheduler-side operations available to a running task through its `Cx`.
pub trait Spawner {
    /// The scenario region.
    fn region(&self) -> RegionId;

    /// Registers and schedules a new task.
    fn spawn_task(&self, spec: TaskSpec);

    /// Requests cancellation of `task` and its live descendants.
    fn cancel_task(&self, task: TaskId, reason: CancelReason);

    /// Returns the pending cancellation request for `task`, if any.
    fn cancel_reason(&self, task: TaskId) -> Option<CancelReason>;
}

/// Maps the output of a root or detached task to the failure it ended with.
pub trait Termination {
    /// Returns the failure, or `None` for a clean exit.
    fn into_failure(self) -> Option<Failure>;
}

impl Termination for () {
    fn into_failure(self) -> Option<Failure> {
        None
    }
}

impl<E: Into<Failure>> Termination for Result<(), E> {
    fn into_failure(self) -> Option<Failure> {
        self.err().map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use parking_lot::Mutex;

    #[test]
    fn termination_of_results() {
        assert!(().into_failure().is_none());
        assert!(Ok::<(), Failure>(()).into_failure().is_none());

        let failure = Err::<(), _>("bad input").into_failure().expect("failure");
        assert_eq!(failure.kind(), FailureKind::Error);
        assert_eq!(failure.message(), "bad input");

        let failure = Err::<(), _>(CancelReason::shutdown())
            .into_failure()
            .expect("failure");
        assert!(failure.is_cancelled());
    }

    #[test]
    fn run_context_reports_to_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = RunContext::new(
            RegionId::new_for_test(1),
            Arc::new(move |failure: Failure| sink.lock().push(failure.message().to_string())),
        );

        ctx.report(Failure::assertion("first"));
        ctx.report(Failure::assertion("second"));

        assert_eq!(*seen.lock(), vec!["first", "second"]);
        assert_eq!(ctx.region(), RegionId::new_for_test(1));
    }
}
