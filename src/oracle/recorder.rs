//! First-failure-wins recording.

use super::diagnostic;
use crate::error::Failure;
use std::sync::OnceLock;

/// Single-assignment slot for the first failure raised through the harness.
///
/// Storage is advisory: every caller still gets its own failure back, and
/// later failures are logged but never replace the stored one. With logging
/// on, each failure is reported with its cause chain through
/// [`diagnostic::emit`] before the caller can unwind with it.
#[derive(Debug)]
pub struct FailureRecorder {
    slot: OnceLock<Failure>,
    log: bool,
}

impl FailureRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub const fn new(log: bool) -> Self {
        Self {
            slot: OnceLock::new(),
            log,
        }
    }

    /// Stores `failure` if the slot is empty and returns it to the caller.
    pub fn record(&self, failure: Failure) -> Failure {
        let first = self.slot.set(failure.clone()).is_ok();
        if self.log {
            let what = if first { "recorded failure" } else { "further failure" };
            diagnostic::emit(what, &failure);
        }
        failure
    }

    /// Records an assertion failure and unwinds with it.
    pub fn raise(&self, message: impl Into<String>) -> ! {
        self.record(Failure::assertion(message)).raise()
    }

    /// Records an assertion failure caused by `cause` and unwinds with it.
    pub fn raise_with_cause(&self, message: impl Into<String>, cause: Failure) -> ! {
        self.record(Failure::assertion(message).with_cause(cause))
            .raise()
    }

    /// Returns the recorded failure, if any.
    #[must_use]
    pub fn recorded(&self) -> Option<&Failure> {
        self.slot.get()
    }
}

impl Default for FailureRecorder {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::panic;

    #[test]
    fn first_failure_wins() {
        let recorder = FailureRecorder::new(false);
        assert!(recorder.recorded().is_none());

        let first = recorder.record(Failure::assertion("first"));
        let second = recorder.record(Failure::assertion("second"));

        assert_eq!(first.message(), "first");
        assert_eq!(second.message(), "second");
        assert_eq!(recorder.recorded().map(Failure::message), Some("first"));
    }

    #[test]
    fn raise_survives_being_caught() {
        let recorder = FailureRecorder::new(false);
        let payload = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            recorder.raise_with_cause("outer", Failure::assertion("inner"))
        }))
        .expect_err("raise unwinds");

        let raised = Failure::from_panic(payload);
        assert_eq!(raised.kind(), FailureKind::Assertion);
        assert_eq!(raised.message(), "outer");
        assert_eq!(raised.cause().map(Failure::message), Some("inner"));

        let recorded = recorder.recorded().expect("recorded");
        assert_eq!(recorded.message(), "outer");
    }
}
