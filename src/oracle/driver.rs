//! Runs one scenario and reconciles its failures against expectations.
//!
//! The run is split in two: [`TestCase::try_run`] always reconciles, on
//! every exit path of the scheduler (including a panic out of it), and
//! returns the outcome; [`TestCase::run`] unwinds with it.

use super::classifier::{Expectations, OutcomeClassifier, Verdict};
use super::{diagnostic, TestCase};
use crate::error::Failure;
use crate::runtime::{Computation, Cx, FailureHook, RunContext, TaskFuture, Termination};
use crate::types::RegionId;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

impl TestCase {
    /// Runs `f` to completion and checks the failures it produced.
    ///
    /// `f` receives the root [`Cx`]. Failures escaping detached tasks are
    /// matched against `expectations` as they arrive; voluntary
    /// cancellations allowed by the configured filter are ignored.
    ///
    /// Returns, in order of precedence:
    /// 1. a scheduler-fatal failure (step limit, stall)
    /// 2. the first rejected unhandled failure
    /// 3. the terminating failure, unmodified, when none was expected, or the
    ///    classification failure when it did not match
    /// 4. "too few unhandled exceptions"
    ///
    /// Every classification failure is also recorded. With `log_failures`
    /// on, the returned failure has been written to the diagnostic output
    /// with its cause chain.
    pub fn try_run<F, Fut>(&self, expectations: Expectations, f: F) -> Result<(), Failure>
    where
        F: FnOnce(Cx) -> Fut + 'static,
        Fut: Future + 'static,
        Fut::Output: Termination,
    {
        let region = RegionId::next();
        let span = tracing::debug_span!(
            "run",
            region = %region,
            expects_failure = expectations.expects_failure(),
            unhandled = expectations.unhandled_count(),
        );
        let _guard = span.enter();

        let classifier = Arc::new(OutcomeClassifier::new(expectations));
        let ctx = RunContext::new(region, self.failure_hook(region, &classifier));
        let root: Computation = Box::new(move |cx: Cx| -> TaskFuture {
            Box::pin(async move { f(cx).await.into_failure() })
        });

        tracing::debug!("run started");
        let scheduler = Arc::clone(&self.scheduler);
        let terminating = panic::catch_unwind(AssertUnwindSafe(|| scheduler.block_on(root, ctx)))
            .unwrap_or_else(|payload| Err(Failure::from_panic(payload)))
            .err();

        let outcome = self.reconcile(&classifier, terminating);
        tracing::debug!(
            arrivals = classifier.arrivals(),
            ok = outcome.is_ok(),
            "run finished"
        );
        outcome
    }

    /// Runs `f` like [`try_run`](Self::try_run) and unwinds with the failure.
    ///
    /// # Panics
    ///
    /// Unwinds with the [`Failure`] returned by `try_run`.
    pub fn run<F, Fut>(&self, expectations: Expectations, f: F)
    where
        F: FnOnce(Cx) -> Fut + 'static,
        Fut: Future + 'static,
        Fut::Output: Termination,
    {
        if let Err(failure) = self.try_run(expectations, f) {
            failure.raise();
        }
    }

    fn failure_hook(&self, region: RegionId, classifier: &Arc<OutcomeClassifier>) -> FailureHook {
        let classifier = Arc::clone(classifier);
        let state = Arc::clone(&self.state);
        let filter = self.config.cancellation_filter;
        Arc::new(move |failure: Failure| {
            if filter.is_benign(&failure, region) {
                tracing::warn!(failure = %failure, "ignoring cancellation of background task");
                return;
            }
            if let Some(violation) = classifier.on_unhandled(failure) {
                state.recorder.record(violation);
            }
        })
    }

    fn reconcile(
        &self,
        classifier: &OutcomeClassifier,
        terminating: Option<Failure>,
    ) -> Result<(), Failure> {
        if let Some(fatal) = terminating
            .as_ref()
            .filter(|failure| failure.kind().is_scheduler_fatal())
        {
            return Err(self.record(fatal.clone()));
        }

        let violation = classifier.first_violation().cloned();
        let verdict = match classifier.classify_terminating(terminating) {
            Verdict::Pass => None,
            Verdict::Fail(failure) => Some(self.record(failure)),
            Verdict::Reraise(failure) => {
                if self.config.log_failures {
                    diagnostic::emit("run failed", &failure);
                }
                Some(failure)
            }
        };
        let too_few = classifier.check_arrivals().err().map(|f| self.record(f));

        match violation.or(verdict).or(too_few) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}
