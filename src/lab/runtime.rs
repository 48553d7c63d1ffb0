//! Lab scheduler for deterministic execution.
//!
//! A run proceeds in three phases:
//!
//! 1. **Drive**: poll ready tasks in FIFO order until the root and every
//!    structured child have completed (or the root failed). When nothing is
//!    ready but a waker is still held elsewhere, park until it fires, up to
//!    [`LabConfig::idle_timeout`]
//! 2. **Drain**: optionally keep polling runnable detached tasks until the
//!    ready queue is empty
//! 3. **Shutdown**: drop whatever is still pending; each dropped detached
//!    task is reported to the hook as a shutdown cancellation

use super::config::LabConfig;
use crate::error::{Failure, FailureKind};
use crate::runtime::{
    Computation, Cx, JoinSlot, ReadyQueue, RunContext, Scheduler, Spawner, TaskFuture, TaskKind,
    TaskSpec,
};
use crate::types::{CancelReason, RegionId, TaskId};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

/// The deterministic lab scheduler.
#[derive(Debug, Clone, Default)]
pub struct LabScheduler {
    config: LabConfig,
}

impl LabScheduler {
    /// Creates a lab scheduler with the given configuration.
    #[must_use]
    pub const fn new(config: LabConfig) -> Self {
        Self { config }
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub const fn config(&self) -> &LabConfig {
        &self.config
    }
}

impl Scheduler for LabScheduler {
    fn block_on(&self, root: Computation, ctx: RunContext) -> Result<(), Failure> {
        let shared = Rc::new(Shared::new(ctx.region()));
        let root_id = TaskId::next();
        let spawner: Rc<dyn Spawner> = shared.clone();
        let future = root(Cx::new(spawner, root_id));
        shared.spawn_task(TaskSpec {
            id: root_id,
            parent: None,
            kind: TaskKind::Root,
            future,
            join: None,
        });

        let mut run = LabRun {
            config: &self.config,
            shared,
            ctx,
            tasks: BTreeMap::new(),
            steps: 0,
            root_failure: None,
            unjoined: Vec::new(),
        };
        let result = run.run(root_id);
        tracing::debug!(
            region = %run.ctx.region(),
            steps = run.steps,
            ok = result.is_ok(),
            "lab run finished"
        );
        result
    }
}

struct TaskMeta {
    parent: Option<TaskId>,
    cancel: Option<CancelReason>,
}

/// State reachable from every `Cx` of a run.
struct Shared {
    region: RegionId,
    ready: Arc<ReadyQueue>,
    inbox: RefCell<Vec<TaskSpec>>,
    live: RefCell<BTreeMap<TaskId, TaskMeta>>,
}

impl Shared {
    fn new(region: RegionId) -> Self {
        Self {
            region,
            ready: Arc::new(ReadyQueue::new()),
            inbox: RefCell::new(Vec::new()),
            live: RefCell::new(BTreeMap::new()),
        }
    }
}

impl Spawner for Shared {
    fn region(&self) -> RegionId {
        self.region
    }

    fn spawn_task(&self, spec: TaskSpec) {
        {
            let mut live = self.live.borrow_mut();
            let inherited = spec
                .parent
                .and_then(|parent| live.get(&parent))
                .and_then(|meta| meta.cancel.as_ref())
                .map(|_| CancelReason::parent_cancelled());
            live.insert(
                spec.id,
                TaskMeta {
                    parent: spec.parent,
                    cancel: inherited,
                },
            );
        }
        self.ready.push(spec.id);
        self.inbox.borrow_mut().push(spec);
    }

    fn cancel_task(&self, task: TaskId, reason: CancelReason) {
        let mut live = self.live.borrow_mut();
        let mut pending = vec![(task, reason)];
        while let Some((id, reason)) = pending.pop() {
            let changed = match live.get_mut(&id) {
                None => false,
                Some(meta) => match meta.cancel.as_mut() {
                    Some(existing) => existing.strengthen(&reason),
                    None => {
                        meta.cancel = Some(reason);
                        true
                    }
                },
            };
            if !changed {
                continue;
            }
            tracing::trace!(task = %id, "cancel requested");
            self.ready.push(id);
            pending.extend(
                live.iter()
                    .filter(|(_, meta)| meta.parent == Some(id))
                    .map(|(child, _)| (*child, CancelReason::parent_cancelled())),
            );
        }
    }

    fn cancel_reason(&self, task: TaskId) -> Option<CancelReason> {
        self.live
            .borrow()
            .get(&task)
            .and_then(|meta| meta.cancel.clone())
    }
}

struct Slot {
    kind: TaskKind,
    future: TaskFuture,
    join: Option<Rc<dyn JoinSlot>>,
}

struct LabRun<'a> {
    config: &'a LabConfig,
    shared: Rc<Shared>,
    ctx: RunContext,
    tasks: BTreeMap<TaskId, Slot>,
    steps: u64,
    root_failure: Option<Failure>,
    unjoined: Vec<(Rc<dyn JoinSlot>, Failure)>,
}

impl LabRun<'_> {
    fn run(&mut self, root: TaskId) -> Result<(), Failure> {
        let driven = self.drive(root);
        self.shutdown();
        driven?;

        if let Some(failure) = self.root_failure.take() {
            return Err(failure);
        }
        match self.unjoined.iter().find(|(slot, _)| !slot.is_observed()) {
            Some((_, failure)) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    fn drive(&mut self, root: TaskId) -> Result<(), Failure> {
        loop {
            self.admit();
            if !self.tasks.contains_key(&root)
                && (self.root_failure.is_some() || !self.has_structured())
            {
                break;
            }
            let Some(task) = self.next_ready() else {
                return Err(self.stalled());
            };
            self.poll(task)?;
        }

        if self.root_failure.is_none() && self.config.drain_detached {
            loop {
                self.admit();
                let Some(task) = self.shared.ready.pop() else {
                    break;
                };
                self.poll(task)?;
            }
        }
        Ok(())
    }

    fn next_ready(&self) -> Option<TaskId> {
        let ready = &self.shared.ready;
        if let Some(task) = ready.pop() {
            return Some(task);
        }
        tracing::trace!(live_wakers = ready.live_wakers(), "ready queue empty");
        if ready.wait_ready(self.config.idle_timeout) {
            ready.pop()
        } else {
            None
        }
    }

    fn admit(&mut self) {
        let spawned = std::mem::take(&mut *self.shared.inbox.borrow_mut());
        for spec in spawned {
            tracing::trace!(task = %spec.id, kind = ?spec.kind, "task spawned");
            self.tasks.insert(
                spec.id,
                Slot {
                    kind: spec.kind,
                    future: spec.future,
                    join: spec.join,
                },
            );
        }
    }

    fn has_structured(&self) -> bool {
        self.tasks
            .values()
            .any(|slot| slot.kind == TaskKind::Structured)
    }

    fn poll(&mut self, task: TaskId) -> Result<(), Failure> {
        // Stale wake for a task that already completed.
        let Some(slot) = self.tasks.get_mut(&task) else {
            return Ok(());
        };
        if let Some(max) = self.config.max_steps {
            if self.steps >= max {
                return Err(Failure::new(
                    FailureKind::StepLimit,
                    format!("lab step limit of {max} polls exceeded"),
                ));
            }
        }
        self.steps += 1;

        let waker = self.shared.ready.waker_for(task);
        let mut cx = Context::from_waker(&waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| slot.future.as_mut().poll(&mut cx)));
        let outcome = match polled {
            Ok(Poll::Pending) => return Ok(()),
            Ok(Poll::Ready(outcome)) => outcome,
            Err(payload) => Some(Failure::from_panic(payload)),
        };
        if let Some(slot) = self.tasks.remove(&task) {
            self.complete(task, slot, outcome);
        }
        Ok(())
    }

    fn complete(&mut self, task: TaskId, slot: Slot, outcome: Option<Failure>) {
        self.shared.live.borrow_mut().remove(&task);
        let Some(failure) = outcome else {
            tracing::trace!(task = %task, "task completed");
            return;
        };
        let region = self.ctx.region();
        match slot.kind {
            TaskKind::Root => self.root_failure = Some(failure),
            TaskKind::Structured => {
                let failure = failure.with_task(task).in_region(region);
                if let Some(join) = slot.join {
                    join.fail(failure.clone());
                    self.unjoined.push((join, failure));
                }
            }
            TaskKind::Detached => {
                let failure = failure.with_task(task).in_region(region);
                tracing::debug!(task = %task, failure = %failure, "detached task failed");
                self.ctx.report(failure);
            }
        }
    }

    fn shutdown(&mut self) {
        self.admit();
        self.shared.ready.clear();
        self.shared.live.borrow_mut().clear();
        let remaining = std::mem::take(&mut self.tasks);
        let region = self.ctx.region();
        for (task, slot) in remaining {
            let kind = slot.kind;
            drop(slot);
            if kind == TaskKind::Detached {
                tracing::trace!(task = %task, "detached task cancelled at shutdown");
                self.ctx.report(
                    Failure::cancelled(CancelReason::shutdown())
                        .with_task(task)
                        .in_region(region),
                );
            }
        }
        self.shared.inbox.borrow_mut().clear();
    }

    fn stalled(&self) -> Failure {
        let pending: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, slot)| slot.kind != TaskKind::Detached)
            .map(|(id, _)| id.to_string())
            .collect();
        Failure::new(
            FailureKind::Stalled,
            format!(
                "no runnable task while [{}] still pending",
                pending.join(", ")
            ),
        )
    }
}

#[cfg(test)]
#[allow(dependency_on_unit_never_type_fallback)]
mod tests {
    use super::*;
    use crate::runtime::{yield_now, Termination};
    use crate::types::CancelKind;
    use parking_lot::Mutex;
    use std::future::Future;
    use std::task::Waker;
    use std::thread;
    use std::time::Duration;

    fn run_lab<F, Fut>(config: LabConfig, f: F) -> (Result<(), Failure>, Vec<Failure>)
    where
        F: FnOnce(Cx) -> Fut + 'static,
        Fut: Future + 'static,
        Fut::Output: Termination,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = RunContext::new(
            RegionId::next(),
            Arc::new(move |failure: Failure| sink.lock().push(failure)),
        );
        let root: Computation = Box::new(move |cx: Cx| -> TaskFuture {
            Box::pin(async move { f(cx).await.into_failure() })
        });
        let result = LabScheduler::new(config).block_on(root, ctx);
        let seen = seen.lock().clone();
        (result, seen)
    }

    #[test]
    fn root_success_and_failure() {
        let (result, seen) = run_lab(LabConfig::default(), |_| async {});
        assert!(result.is_ok());
        assert!(seen.is_empty());

        let (result, _) = run_lab(LabConfig::default(), |_| async { panic!("boom") });
        let failure = result.expect_err("root panicked");
        assert_eq!(failure.kind(), FailureKind::Panic);
        assert_eq!(failure.message(), "boom");

        let (result, _) = run_lab(LabConfig::default(), |_| async { Err::<(), _>("bad") });
        assert_eq!(result.expect_err("root errored").message(), "bad");
    }

    #[test]
    fn detached_failures_arrive_in_order() {
        let (result, seen) = run_lab(LabConfig::default(), |cx| async move {
            cx.spawn_detached(|_| async { panic!("f1") });
            cx.spawn_detached(|_| async { Err::<(), _>("f2") });
            yield_now().await;
        });
        assert!(result.is_ok());
        let messages: Vec<_> = seen.iter().map(Failure::message).collect();
        assert_eq!(messages, vec!["f1", "f2"]);
        assert!(seen.iter().all(|f| f.task_id().is_some()));
    }

    #[test]
    fn detached_tasks_drain_after_root() {
        let (result, seen) = run_lab(LabConfig::default(), |cx| async move {
            cx.spawn_detached(|_| async { panic!("late") });
        });
        assert!(result.is_ok());
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message(), "late");
    }

    #[test]
    fn undrained_detached_tasks_are_cancelled_at_shutdown() {
        let config = LabConfig::default().drain_detached(false);
        let (result, seen) = run_lab(config, |cx| async move {
            cx.spawn_detached(|_| async { panic!("never runs") });
        });
        assert!(result.is_ok());
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_cancelled());
        assert!(seen[0].cancel_reason().expect("reason").is_shutdown());
        assert!(seen[0].region_id().is_some());
    }

    #[test]
    fn pending_detached_task_is_cancelled_at_shutdown() {
        let (result, seen) = run_lab(LabConfig::default(), |cx| async move {
            cx.spawn_detached(|_| futures_lite::future::pending::<()>());
        });
        assert!(result.is_ok());
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_cancelled());
    }

    #[test]
    fn structured_failure_propagates_unless_joined() {
        let (result, _) = run_lab(LabConfig::default(), |cx| async move {
            let _ = cx.spawn(|_| async { panic!("child") });
        });
        let failure = result.expect_err("unjoined child failure");
        assert_eq!(failure.message(), "child");
        assert!(failure.task_id().is_some());

        let (result, _) = run_lab(LabConfig::default(), |cx| async move {
            let handle = cx.spawn(|_| async { panic!("child") });
            let failure = handle.join().await.expect_err("child failed");
            assert_eq!(failure.message(), "child");
        });
        assert!(result.is_ok());
    }

    #[test]
    fn structured_child_value_is_joined() {
        let (result, _) = run_lab(LabConfig::default(), |cx| async move {
            let handle = cx.spawn(|_| async {
                yield_now().await;
                40 + 2
            });
            assert_eq!(handle.join().await.expect("value"), 42);
        });
        assert!(result.is_ok());
    }

    #[test]
    fn step_limit_aborts_run() {
        let config = LabConfig::default().max_steps(50);
        let (result, _) = run_lab(config, |_| async {
            loop {
                yield_now().await;
            }
        });
        assert_eq!(result.expect_err("limit").kind(), FailureKind::StepLimit);
    }

    #[test]
    fn stall_is_detected() {
        let (result, _) = run_lab(LabConfig::default(), |_| futures_lite::future::pending::<()>());
        let failure = result.expect_err("stalled");
        assert_eq!(failure.kind(), FailureKind::Stalled);
    }

    /// Completes once another thread flips `done`, waking through the
    /// stored waker.
    #[derive(Default)]
    struct Signal {
        done: bool,
        waker: Option<Waker>,
    }

    fn wait_for(signal: Arc<Mutex<Signal>>) -> impl Future<Output = ()> {
        std::future::poll_fn(move |cx| {
            let mut signal = signal.lock();
            if signal.done {
                Poll::Ready(())
            } else {
                signal.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        })
    }

    #[test]
    fn wake_from_another_thread_resumes_the_root() {
        let signal = Arc::new(Mutex::new(Signal::default()));
        let remote = Arc::clone(&signal);
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut signal = remote.lock();
            signal.done = true;
            if let Some(waker) = signal.waker.take() {
                waker.wake();
            }
        });

        let (result, seen) = run_lab(LabConfig::default(), move |_| wait_for(signal));
        worker.join().expect("worker panicked");
        assert!(result.is_ok(), "{result:?}");
        assert!(seen.is_empty());
    }

    #[test]
    fn held_but_silent_waker_stalls_after_idle_timeout() {
        let signal = Arc::new(Mutex::new(Signal::default()));
        let held = Arc::clone(&signal);
        let config = LabConfig::default().idle_timeout(Duration::from_millis(20));
        let (result, _) = run_lab(config, move |_| wait_for(signal));
        let failure = result.expect_err("stalled");
        assert_eq!(failure.kind(), FailureKind::Stalled);
        // The waker outlived the run; the wait still ended.
        assert!(held.lock().waker.is_some());
    }

    #[test]
    fn cancellation_cascades_to_descendants() {
        let observed = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&observed);
        let (result, seen) = run_lab(LabConfig::default(), move |cx| async move {
            let parent = cx.spawn_detached(move |cx| async move {
                cx.spawn_detached(move |cx| async move {
                    loop {
                        if let Err(failure) = cx.checkpoint() {
                            record
                                .borrow_mut()
                                .push(failure.cancel_reason().map(CancelReason::kind));
                            return Err::<(), _>(failure);
                        }
                        yield_now().await;
                    }
                });
                futures_lite::future::pending::<()>().await;
            });
            yield_now().await;
            parent.cancel();
            yield_now().await;
            yield_now().await;
        });
        assert!(result.is_ok());
        assert_eq!(*observed.borrow(), vec![Some(CancelKind::ParentCancelled)]);
        assert!(seen.iter().all(Failure::is_cancelled));
    }
}
