//! The ordering and failure oracle.
//!
//! A [`TestCase`] owns one run state shared by every task of a scenario:
//!
//! - [`sequencer`]: Global step counter and one-shot completion latch
//! - [`recorder`]: First-failure-wins record of harness failures
//! - [`classifier`]: Expected vs observed failures of one run
//! - [`driver`]: Runs a computation on the scheduler and reconciles
//! - [`diagnostic`]: Writes failure reports before they unwind
//!
//! Every assertion that fails is recorded before it unwinds, so the scenario
//! stays failed even if the code under test catches the unwind. Check
//! [`TestCase::verify`] at teardown.
//!
//! # Example
//!
//! ```ignore
//! let case = TestCase::new();
//! case.run(Expectations::none(), {
//!     let case = case.clone();
//!     move |cx| async move {
//!         case.expect(1);
//!         let child = cx.spawn({
//!             let case = case.clone();
//!             move |_| async move { case.expect(2) }
//!         });
//!         child.join().await?;
//!         case.finish(3);
//!         Ok::<(), Failure>(())
//!     }
//! });
//! case.ensure_finished();
//! ```

pub mod classifier;
pub mod diagnostic;
pub mod driver;
pub mod recorder;
pub mod sequencer;

pub use classifier::{Expectations, FailurePredicate, OutcomeClassifier, Verdict};
pub use recorder::FailureRecorder;
pub use sequencer::{ActionSequencer, CompletionGuard};

use crate::config::{ConfigError, HarnessConfig};
use crate::error::Failure;
use crate::lab::LabScheduler;
use crate::runtime::Scheduler;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
struct RunState {
    sequencer: ActionSequencer,
    completion: CompletionGuard,
    recorder: FailureRecorder,
}

/// A test case: the assertion surface plus the run driver.
///
/// Cloning is cheap and every clone shares the same run state, so a clone
/// can be moved into each task (or thread) that asserts.
#[derive(Clone)]
pub struct TestCase {
    state: Arc<RunState>,
    scheduler: Arc<dyn Scheduler + Send + Sync>,
    config: Arc<HarnessConfig>,
}

impl TestCase {
    /// Creates a test case with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::default())
    }

    /// Creates a test case with `ORDERCHECK_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        HarnessConfig::from_env().map(Self::with_config)
    }

    /// Creates a test case running on a lab scheduler built from `config`.
    #[must_use]
    pub fn with_config(config: HarnessConfig) -> Self {
        Self {
            state: Arc::new(RunState {
                sequencer: ActionSequencer::new(),
                completion: CompletionGuard::new(),
                recorder: FailureRecorder::new(config.log_failures),
            }),
            scheduler: Arc::new(LabScheduler::new(config.lab.clone())),
            config: Arc::new(config),
        }
    }

    /// Replaces the scheduler computations are run on.
    #[must_use]
    pub fn with_scheduler<S>(mut self, scheduler: S) -> Self
    where
        S: Scheduler + Send + Sync + 'static,
    {
        self.scheduler = Arc::new(scheduler);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Asserts that this call is step `step` of the scenario.
    ///
    /// # Panics
    ///
    /// Unwinds with a [`FailureKind::Sequence`](crate::error::FailureKind::Sequence)
    /// failure naming both steps if `step` is not the next one.
    pub fn expect(&self, step: usize) -> usize {
        match self.state.sequencer.check(step) {
            Ok(step) => step,
            Err(failure) => self.fail(failure),
        }
    }

    /// Asserts that this code path is never reached.
    pub fn expect_unreached(&self) -> ! {
        self.fail(Failure::unreachable())
    }

    /// Takes the final step `step` and marks the scenario finished.
    ///
    /// # Panics
    ///
    /// Unwinds if `step` is out of order or if the scenario already finished.
    pub fn finish(&self, step: usize) -> usize {
        match self.state.completion.finish(&self.state.sequencer, step) {
            Ok(step) => step,
            Err(failure) => self.fail(failure),
        }
    }

    /// Asserts that [`finish`](Self::finish) has been called.
    pub fn ensure_finished(&self) {
        if let Err(failure) = self.state.completion.ensure_finished() {
            self.fail(failure);
        }
    }

    /// Records an assertion failure and unwinds with it.
    pub fn raise(&self, message: impl Into<String>) -> ! {
        self.state.recorder.raise(message)
    }

    /// Records an assertion failure caused by `cause` and unwinds with it.
    pub fn raise_with_cause(&self, message: impl Into<String>, cause: Failure) -> ! {
        self.state.recorder.raise_with_cause(message, cause)
    }

    /// Prepares the run state for the next scenario.
    ///
    /// The recorded failure, if any, is kept.
    ///
    /// # Panics
    ///
    /// Unwinds if the previous scenario took a step but never finished.
    pub fn reset(&self) {
        let step = self.step();
        if step > 0 && !self.is_finished() {
            self.fail(Failure::sequence(format!(
                "reset called before the scenario finished (at step {step})"
            )));
        }
        self.state.sequencer.reset();
        self.state.completion.reset();
        tracing::trace!("run state reset");
    }

    /// Returns the first failure recorded by the harness.
    #[must_use]
    pub fn recorded_failure(&self) -> Option<Failure> {
        self.state.recorder.recorded().cloned()
    }

    /// Teardown gate: fails with the recorded failure, if any.
    pub fn verify(&self) -> Result<(), Failure> {
        self.recorded_failure().map_or(Ok(()), Err)
    }

    /// Returns the number of steps taken in the current scenario.
    #[must_use]
    pub fn step(&self) -> usize {
        self.state.sequencer.current()
    }

    /// Returns true once the current scenario has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.completion.is_finished()
    }

    fn record(&self, failure: Failure) -> Failure {
        self.state.recorder.record(failure)
    }

    fn fail(&self, failure: Failure) -> ! {
        self.record(failure).raise()
    }
}

impl Default for TestCase {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("step", &self.step())
            .field("finished", &self.is_finished())
            .field("recorded", &self.state.recorder.recorded())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::panic::{self, AssertUnwindSafe};

    fn quiet() -> TestCase {
        TestCase::with_config(HarnessConfig::default().log_failures(false))
    }

    fn unwind<R: std::fmt::Debug>(f: impl FnOnce() -> R) -> Failure {
        let payload = panic::catch_unwind(AssertUnwindSafe(f)).expect_err("should unwind");
        Failure::from_panic(payload)
    }

    #[test]
    fn steps_in_order() {
        let case = quiet();
        assert_eq!(case.expect(1), 1);
        assert_eq!(case.expect(2), 2);
        assert_eq!(case.finish(3), 3);
        case.ensure_finished();
        assert!(case.verify().is_ok());
    }

    #[test]
    fn out_of_order_step_is_recorded() {
        let case = quiet();
        let failure = unwind(|| case.expect(2));
        assert_eq!(failure.kind(), FailureKind::Sequence);
        assert_eq!(case.verify().expect_err("recorded").message(), failure.message());
    }

    #[test]
    fn unreached_is_recorded_even_if_caught() {
        let case = quiet();
        let failure = unwind(|| case.expect_unreached());
        assert_eq!(failure.kind(), FailureKind::Unreachable);
        assert_eq!(
            case.recorded_failure().map(|f| f.kind()),
            Some(FailureKind::Unreachable)
        );
    }

    #[test]
    fn ensure_finished_before_finish_unwinds() {
        let case = quiet();
        let failure = unwind(|| case.ensure_finished());
        assert_eq!(failure.kind(), FailureKind::Sequence);
    }

    #[test]
    fn reset_after_completion() {
        let case = quiet();
        case.expect(1);
        case.finish(2);
        case.reset();
        assert_eq!(case.step(), 0);
        assert!(!case.is_finished());
        assert_eq!(case.expect(1), 1);
    }

    #[test]
    fn reset_before_completion_unwinds() {
        let case = quiet();
        case.reset();
        case.expect(1);
        let failure = unwind(|| case.reset());
        assert!(failure.message().contains("reset called before"));
        assert_eq!(case.step(), 1);
    }

    #[test]
    fn reset_keeps_recorded_failure() {
        let case = quiet();
        let _ = unwind(|| case.raise("kept"));
        case.finish(1);
        case.reset();
        assert_eq!(case.recorded_failure().map(|f| f.message().to_string()), Some("kept".into()));
    }
}
