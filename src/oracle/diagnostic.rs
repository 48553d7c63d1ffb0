//! Diagnostic output for failures leaving the harness.
//!
//! A failure unwinds with a [`Failure`] payload, which the default panic
//! hook cannot print. Its report is written here first: to the active
//! `tracing` subscriber at `ERROR` level, or to stderr when no subscriber
//! would accept the event.

use crate::error::Failure;

/// Writes `failure` and its cause chain to the diagnostic output.
pub fn emit(what: &str, failure: &Failure) {
    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(kind = ?failure.kind(), "{}", render(what, failure));
    } else {
        eprintln!("{}", render(what, failure));
    }
}

/// Formats the diagnostic line for `failure`.
#[must_use]
pub fn render(what: &str, failure: &Failure) -> String {
    format!("ordercheck: {what}: {}", failure.report())
}
