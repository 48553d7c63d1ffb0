//! The capability handle given to every task of a scenario.
//!
//! `Cx` is how a computation spawns structured children and detached
//! background tasks, and how it observes cancellation. It is tied to the
//! scheduler that created it and is deliberately `!Send`: a scenario's tasks
//! live on the scheduler's thread.
//!
//! # Example
//!
//! ```ignore
//! case.run(Expectations::none(), move |cx| async move {
//!     let child = cx.spawn(|_| async { 21 * 2 });
//!     cx.spawn_detached(|cx| async move { cx.checkpoint() });
//!     assert_eq!(child.join().await.unwrap(), 42);
//! });
//! ```

use super::{JoinSlot, Spawner, TaskFuture, TaskKind, TaskSpec, Termination};
use crate::error::Failure;
use crate::types::{CancelReason, RegionId, TaskId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Handle to the running task and its scheduler.
#[derive(Clone)]
pub struct Cx {
    spawner: Rc<dyn Spawner>,
    task: TaskId,
}

impl Cx {
    /// Creates a handle for `task` (scheduler use).
    #[must_use]
    pub fn new(spawner: Rc<dyn Spawner>, task: TaskId) -> Self {
        Self { spawner, task }
    }

    /// Returns the current task ID.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Returns the scenario region.
    #[must_use]
    pub fn region_id(&self) -> RegionId {
        self.spawner.region()
    }

    /// Spawns a structured child.
    ///
    /// The run does not finish until the child does. A failure of the child
    /// is delivered through the returned handle; if nobody joins it, the
    /// failure becomes the outcome of the run.
    pub fn spawn<F, Fut>(&self, f: F) -> TaskHandle<Fut::Output>
    where
        F: FnOnce(Self) -> Fut + 'static,
        Fut: Future + 'static,
        Fut::Output: 'static,
    {
        let id = TaskId::next();
        let child = self.child(id);
        let state = Rc::new(JoinState::new());
        let slot = Rc::clone(&state);
        let future: TaskFuture = Box::pin(async move {
            let value = f(child).await;
            slot.complete(Ok(value));
            None
        });
        let join: Rc<dyn JoinSlot> = state.clone();
        self.spawner.spawn_task(TaskSpec {
            id,
            parent: Some(self.task),
            kind: TaskKind::Structured,
            future,
            join: Some(join),
        });
        TaskHandle {
            task_id: id,
            state,
            spawner: Rc::clone(&self.spawner),
        }
    }

    /// Spawns a detached background task.
    ///
    /// Nobody awaits it; a panic or error escaping it goes to the run's
    /// failure hook at the moment it happens.
    pub fn spawn_detached<F, Fut>(&self, f: F) -> CancelHandle
    where
        F: FnOnce(Self) -> Fut + 'static,
        Fut: Future + 'static,
        Fut::Output: Termination,
    {
        let id = TaskId::next();
        let child = self.child(id);
        let future: TaskFuture = Box::pin(async move { f(child).await.into_failure() });
        self.spawner.spawn_task(TaskSpec {
            id,
            parent: Some(self.task),
            kind: TaskKind::Detached,
            future,
            join: None,
        });
        CancelHandle {
            task_id: id,
            spawner: Rc::clone(&self.spawner),
        }
    }

    /// Requests cancellation of the current task and its descendants.
    pub fn cancel(&self, reason: CancelReason) {
        self.spawner.cancel_task(self.task, reason);
    }

    /// Returns true once cancellation of this task has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.spawner.cancel_reason(self.task).is_some()
    }

    /// Checks for a pending cancellation request.
    ///
    /// Returns a voluntary-cancellation failure attributed to this task and
    /// region once cancellation has been requested, so a task can unwind
    /// with `cx.checkpoint()?`.
    pub fn checkpoint(&self) -> Result<(), Failure> {
        match self.spawner.cancel_reason(self.task) {
            None => Ok(()),
            Some(reason) => Err(Failure::cancelled(reason)
                .with_task(self.task)
                .in_region(self.region_id())),
        }
    }

    fn child(&self, task: TaskId) -> Self {
        Self {
            spawner: Rc::clone(&self.spawner),
            task,
        }
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task", &self.task)
            .field("region", &self.spawner.region())
            .finish()
    }
}

struct JoinState<T> {
    result: RefCell<Option<Result<T, Failure>>>,
    finished: Cell<bool>,
    observed: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl<T> JoinState<T> {
    fn new() -> Self {
        Self {
            result: RefCell::new(None),
            finished: Cell::new(false),
            observed: Cell::new(false),
            waker: RefCell::new(None),
        }
    }

    fn complete(&self, result: Result<T, Failure>) {
        *self.result.borrow_mut() = Some(result);
        self.finished.set(true);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

impl<T> JoinSlot for JoinState<T> {
    fn fail(&self, failure: Failure) {
        self.complete(Err(failure));
    }

    fn is_observed(&self) -> bool {
        self.observed.get()
    }
}

/// Handle to a structured child, used to await its result.
pub struct TaskHandle<T> {
    task_id: TaskId,
    state: Rc<JoinState<T>>,
    spawner: Rc<dyn Spawner>,
}

impl<T> TaskHandle<T> {
    /// Returns the task ID of the child.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns true once the child has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.finished.get()
    }

    /// Requests cancellation of the child and its descendants.
    pub fn cancel(&self) {
        self.spawner
            .cancel_task(self.task_id, CancelReason::user("cancelled through task handle"));
    }

    /// Waits for the child and returns its value or the failure it ended with.
    ///
    /// Taking the failure here marks it as handled; it no longer decides
    /// the outcome of the run.
    pub async fn join(self) -> Result<T, Failure> {
        futures_lite::future::poll_fn(|cx| self.poll_join(cx)).await
    }

    fn poll_join(&self, cx: &mut Context<'_>) -> Poll<Result<T, Failure>> {
        if let Some(result) = self.state.result.borrow_mut().take() {
            self.state.observed.set(true);
            return Poll::Ready(result);
        }
        *self.state.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("finished", &self.state.finished.get())
            .finish()
    }
}

/// Handle to a detached task, usable only to cancel it.
#[derive(Clone)]
pub struct CancelHandle {
    task_id: TaskId,
    spawner: Rc<dyn Spawner>,
}

impl CancelHandle {
    /// Returns the task ID of the detached task.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Requests cancellation of the task and its descendants.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::user("cancelled through handle"));
    }

    /// Requests cancellation with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.spawner.cancel_task(self.task_id, reason);
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("task_id", &self.task_id)
            .finish()
    }
}
