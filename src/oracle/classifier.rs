//! Classification of the failures a run produced.
//!
//! Unhandled failures from detached tasks are matched positionally as they
//! arrive: the n-th arrival is checked against the n-th declared predicate.
//! The terminating failure and the arrival count are checked once the run
//! is over.

use crate::error::Failure;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// A predicate over a failure.
pub type FailurePredicate = Arc<dyn Fn(&Failure) -> bool + Send + Sync>;

/// The failures a run is expected to produce.
///
/// # Example
///
/// ```ignore
/// let expectations = Expectations::none()
///     .failure(|f| f.message() == "boom")
///     .unhandled(|f| f.message() == "f1");
/// ```
#[derive(Clone, Default)]
pub struct Expectations {
    failure: Option<FailurePredicate>,
    unhandled: Vec<FailurePredicate>,
}

impl Expectations {
    /// Expects a clean run: no terminating failure, no unhandled failures.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Expects the run to terminate with a failure matching `predicate`.
    #[must_use]
    pub fn failure<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Failure) -> bool + Send + Sync + 'static,
    {
        self.failure = Some(Arc::new(predicate));
        self
    }

    /// Expects one more unhandled failure, matching `predicate`.
    #[must_use]
    pub fn unhandled<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Failure) -> bool + Send + Sync + 'static,
    {
        self.unhandled.push(Arc::new(predicate));
        self
    }

    /// Expects one unhandled failure per predicate, in arrival order.
    #[must_use]
    pub fn unhandled_all<I, P>(self, predicates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Fn(&Failure) -> bool + Send + Sync + 'static,
    {
        predicates.into_iter().fold(self, Self::unhandled)
    }

    /// Returns true if a terminating failure is expected.
    #[must_use]
    pub fn expects_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Returns the number of unhandled failures expected.
    #[must_use]
    pub fn unhandled_count(&self) -> usize {
        self.unhandled.len()
    }
}

impl fmt::Debug for Expectations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectations")
            .field("failure", &self.failure.is_some())
            .field("unhandled", &self.unhandled.len())
            .finish()
    }
}

/// Decision on the terminating failure of a run.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Expectations met.
    Pass,
    /// Expectations violated; the classification failure.
    Fail(Failure),
    /// No failure was expected; the terminating failure propagates as-is.
    Reraise(Failure),
}

/// Per-run classifier state.
#[derive(Debug)]
pub struct OutcomeClassifier {
    expectations: Expectations,
    arrivals: AtomicUsize,
    unhandled: Mutex<Vec<Failure>>,
    violation: OnceLock<Failure>,
}

impl OutcomeClassifier {
    /// Creates a classifier with no arrivals.
    #[must_use]
    pub fn new(expectations: Expectations) -> Self {
        Self {
            expectations,
            arrivals: AtomicUsize::new(0),
            unhandled: Mutex::new(Vec::new()),
            violation: OnceLock::new(),
        }
    }

    /// Matches one arriving unhandled failure.
    ///
    /// Returns the classification failure if the arrival is one too many or
    /// is rejected by the predicate for its position. Never panics, even if
    /// the predicate does.
    pub fn on_unhandled(&self, failure: Failure) -> Option<Failure> {
        let ordinal = self.arrivals.fetch_add(1, Ordering::AcqRel);
        self.unhandled.lock().push(failure.clone());

        let expected = self.expectations.unhandled.len();
        let violation = match self.expectations.unhandled.get(ordinal) {
            None => Failure::classification(format!(
                "too many unhandled exceptions: expected {expected}, got at least {}",
                ordinal + 1
            ))
            .with_cause(failure),
            Some(predicate) => match evaluate(predicate, &failure) {
                Ok(true) => {
                    tracing::debug!(ordinal = ordinal + 1, failure = %failure, "unhandled failure accepted");
                    return None;
                }
                Ok(false) => Failure::classification(format!(
                    "unexpected unhandled exception #{}",
                    ordinal + 1
                ))
                .with_cause(failure),
                Err(panicked) => panicked,
            },
        };
        let _ = self.violation.set(violation.clone());
        Some(violation)
    }

    /// Classifies the failure that terminated the run, if any.
    #[must_use]
    pub fn classify_terminating(&self, terminating: Option<Failure>) -> Verdict {
        match (&self.expectations.failure, terminating) {
            (None, None) => Verdict::Pass,
            (None, Some(failure)) => Verdict::Reraise(failure),
            (Some(_), None) => Verdict::Fail(Failure::classification(
                "exception was expected but none produced",
            )),
            (Some(predicate), Some(failure)) => match evaluate(predicate, &failure) {
                Ok(true) => Verdict::Pass,
                Ok(false) => {
                    Verdict::Fail(Failure::classification("unexpected exception").with_cause(failure))
                }
                Err(panicked) => Verdict::Fail(panicked),
            },
        }
    }

    /// Fails if fewer unhandled failures arrived than were declared.
    pub fn check_arrivals(&self) -> Result<(), Failure> {
        let arrived = self.arrivals();
        let expected = self.expectations.unhandled.len();
        if arrived < expected {
            return Err(Failure::classification(format!(
                "too few unhandled exceptions: expected {expected}, got {arrived}"
            )));
        }
        Ok(())
    }

    /// Returns the number of unhandled failures that arrived.
    #[must_use]
    pub fn arrivals(&self) -> usize {
        self.arrivals.load(Ordering::Acquire)
    }

    /// Returns the first violation found while matching arrivals.
    #[must_use]
    pub fn first_violation(&self) -> Option<&Failure> {
        self.violation.get()
    }

    /// Returns the unhandled failures in arrival order.
    #[must_use]
    pub fn unhandled(&self) -> Vec<Failure> {
        self.unhandled.lock().clone()
    }
}

fn evaluate(predicate: &FailurePredicate, failure: &Failure) -> Result<bool, Failure> {
    panic::catch_unwind(AssertUnwindSafe(|| predicate(failure))).map_err(|payload| {
        Failure::classification("failure predicate panicked")
            .with_cause(Failure::from_panic(payload).with_cause(failure.clone()))
    })
}
