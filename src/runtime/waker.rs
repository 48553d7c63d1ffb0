//! Ready queue with deduplicated wakes.
//!
//! Wakers must be `Send + Sync`, so the queue is shared through an `Arc`
//! even though the lab scheduler drains it from a single thread. A waker
//! may fire from any thread; the scheduler parks on the queue while any
//! waker is still alive.

use crate::types::TaskId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};
use std::time::{Duration, Instant};

/// FIFO of tasks that are ready to be polled.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    ready: Mutex<VecDeque<TaskId>>,
    woken: Condvar,
    live_wakers: AtomicUsize,
}

impl ReadyQueue {
    /// Creates an empty ready queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a waker that schedules `task` on this queue.
    #[must_use]
    pub fn waker_for(self: &Arc<Self>, task: TaskId) -> Waker {
        self.live_wakers.fetch_add(1, Ordering::AcqRel);
        Waker::from(Arc::new(TaskWaker {
            queue: Arc::clone(self),
            task,
        }))
    }

    /// Marks `task` ready; a task already queued is not queued twice.
    pub fn push(&self, task: TaskId) {
        let mut ready = self.ready.lock();
        if !ready.contains(&task) {
            ready.push_back(task);
        }
        drop(ready);
        self.woken.notify_all();
    }

    /// Takes the next ready task.
    pub fn pop(&self) -> Option<TaskId> {
        self.ready.lock().pop_front()
    }

    /// Returns true if no task is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready.lock().is_empty()
    }

    /// Drops every queued entry.
    pub fn clear(&self) {
        self.ready.lock().clear();
    }

    /// Number of wakers of this queue that have not been dropped yet.
    #[must_use]
    pub fn live_wakers(&self) -> usize {
        self.live_wakers.load(Ordering::Acquire)
    }

    /// Blocks until a task is ready.
    ///
    /// Returns false without waiting further once no live waker is left
    /// that could make a task ready, or when `timeout` elapses first.
    /// `None` waits as long as a waker is alive.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut ready = self.ready.lock();
        while ready.is_empty() {
            if self.live_wakers() == 0 {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if self.woken.wait_until(&mut ready, deadline).timed_out() {
                        return !ready.is_empty();
                    }
                }
                None => self.woken.wait(&mut ready),
            }
        }
        true
    }

    fn release_waker(&self) {
        // Decrement under the lock so a waiter cannot miss the notification.
        let ready = self.ready.lock();
        self.live_wakers.fetch_sub(1, Ordering::AcqRel);
        drop(ready);
        self.woken.notify_all();
    }
}

/// A waker for a specific task.
struct TaskWaker {
    queue: Arc<ReadyQueue>,
    task: TaskId,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.queue.push(self.task);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.push(self.task);
    }
}

impl Drop for TaskWaker {
    fn drop(&mut self) {
        self.queue.release_waker();
    }
}
