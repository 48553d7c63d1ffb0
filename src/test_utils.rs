//! Test utilities for ordercheck.
//!
//! This module provides shared helpers for tests written against the oracle:
//! - Consistent tracing-based logging initialization
//! - Phase macros for readable test output
//! - A quiet test case constructor
//! - Failure predicates for [`Expectations`](crate::oracle::Expectations)
//!
//! # Example
//! ```ignore
//! use ordercheck::oracle::Expectations;
//! use ordercheck::test_utils::{init_test_logging, message_is, test_case};
//!
//! init_test_logging();
//! let case = test_case();
//! case.run(Expectations::none().failure(message_is("boom")), |_| async {
//!     panic!("boom")
//! });
//! ```

use crate::config::HarnessConfig;
use crate::error::{Failure, FailureKind};
use crate::oracle::TestCase;
use std::sync::Once;
#[cfg(test)]
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
#[cfg(test)]
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
#[cfg(test)]
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a test case that does not log recorded failures.
///
/// Useful for tests that provoke failures on purpose.
#[must_use]
pub fn test_case() -> TestCase {
    TestCase::with_config(HarnessConfig::default().log_failures(false))
}

/// Matches a failure whose message is exactly `expected`.
pub fn message_is(expected: impl Into<String>) -> impl Fn(&Failure) -> bool + Send + Sync + 'static {
    let expected = expected.into();
    move |failure| failure.message() == expected
}

/// Matches a failure of the given kind.
pub fn kind_is(kind: FailureKind) -> impl Fn(&Failure) -> bool + Send + Sync + 'static {
    move |failure| failure.kind() == kind
}

/// Matches a panic with message `expected`.
pub fn is_panic_with(expected: impl Into<String>) -> impl Fn(&Failure) -> bool + Send + Sync + 'static {
    let expected = expected.into();
    move |failure| failure.kind() == FailureKind::Panic && failure.message() == expected
}

/// Matches a failure with `expected` as the message of one of its causes.
pub fn caused_by_message(
    expected: impl Into<String>,
) -> impl Fn(&Failure) -> bool + Send + Sync + 'static {
    let expected = expected.into();
    move |failure| failure.chain().skip(1).any(|cause| cause.message() == expected)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}
