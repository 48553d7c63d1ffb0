//! Step ordering and single completion.
//!
//! Both cells are lock-free: `expect` is one `fetch_add` and `finish` is one
//! `swap`, so two tasks asserting at the same instant never observe the same
//! step and never both complete.

use crate::error::Failure;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Global step counter shared by every task of a scenario.
#[derive(Debug, Default)]
pub struct ActionSequencer {
    step: AtomicUsize,
}

impl ActionSequencer {
    /// Creates a sequencer at step 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            step: AtomicUsize::new(0),
        }
    }

    /// Advances the counter and checks that `declared` is the step reached.
    ///
    /// The counter advances even when the check fails.
    pub fn check(&self, declared: usize) -> Result<usize, Failure> {
        let actual = self.step.fetch_add(1, Ordering::AcqRel) + 1;
        if actual == declared {
            tracing::trace!(step = actual, "step reached");
            Ok(actual)
        } else {
            Err(Failure::sequence(format!(
                "expected step {declared} but the actual step is {actual}"
            )))
        }
    }

    /// Returns the number of steps taken so far.
    #[must_use]
    pub fn current(&self) -> usize {
        self.step.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.step.store(0, Ordering::Release);
    }
}

/// One-shot latch marking the scenario's final step.
#[derive(Debug, Default)]
pub struct CompletionGuard {
    finished: AtomicBool,
}

impl CompletionGuard {
    /// Creates an unfinished guard.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            finished: AtomicBool::new(false),
        }
    }

    /// Takes the final step `declared` and latches completion.
    ///
    /// A second call fails with "called more than once" whatever step it
    /// declares, without advancing the counter.
    pub fn finish(&self, sequencer: &ActionSequencer, declared: usize) -> Result<usize, Failure> {
        if self.is_finished() {
            return Err(Self::finished_twice());
        }
        let step = sequencer.check(declared)?;
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(Self::finished_twice());
        }
        tracing::debug!(step, "scenario finished");
        Ok(step)
    }

    /// Fails unless `finish` has succeeded.
    pub fn ensure_finished(&self) -> Result<(), Failure> {
        if self.is_finished() {
            Ok(())
        } else {
            Err(Failure::sequence(
                "scenario did not finish: finish was never called",
            ))
        }
    }

    /// Returns true once `finish` has succeeded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.finished.store(false, Ordering::Release);
    }

    fn finished_twice() -> Failure {
        Failure::sequence("finish called more than once")
    }
}
