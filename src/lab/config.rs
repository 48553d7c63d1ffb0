//! Configuration for the lab scheduler.
//!
//! The lab configuration controls how a run ends:
//! - Maximum number of polls before the run is aborted
//! - Whether runnable detached tasks get to finish once the root is done
//! - How long to wait for a wake from outside the scheduler before the run
//!   is declared stalled

use std::time::Duration;

/// Default maximum number of polls per run.
pub const DEFAULT_MAX_STEPS: u64 = 100_000;

/// Default time to wait for an outstanding waker to fire.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the lab scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabConfig {
    /// Maximum number of polls before forced termination.
    pub max_steps: Option<u64>,
    /// Whether runnable detached tasks are drained after the root finishes.
    ///
    /// Detached tasks still pending after the drain are cancelled.
    pub drain_detached: bool,
    /// How long the scheduler parks on an empty ready queue while wakers
    /// are still held elsewhere, e.g. by another thread.
    ///
    /// With no live waker the run is stalled immediately. `None` waits
    /// until a wake arrives or the last waker is dropped.
    pub idle_timeout: Option<Duration>,
}

impl LabConfig {
    /// Creates the default lab configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_steps: Some(DEFAULT_MAX_STEPS),
            drain_detached: true,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    /// Sets the maximum number of steps.
    #[must_use]
    pub const fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Disables the step limit.
    #[must_use]
    pub const fn no_step_limit(mut self) -> Self {
        self.max_steps = None;
        self
    }

    /// Sets whether runnable detached tasks are drained at close.
    #[must_use]
    pub const fn drain_detached(mut self, value: bool) -> Self {
        self.drain_detached = value;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Waits for outstanding wakers without a time bound.
    #[must_use]
    pub const fn no_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        Self::new()
    }
}
