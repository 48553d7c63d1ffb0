//! Step ordering, completion and reset behavior of the assertion surface.

mod common;

use common::*;
use ordercheck::error::FailureKind;
use ordercheck::oracle::ActionSequencer;
use ordercheck::test_complete;
use proptest::prelude::*;

proptest! {
    #![proptest_config(test_proptest_config(64))]

    #[test]
    fn steps_in_order_never_fail(n in 1usize..200) {
        let case = quiet_case();
        for step in 1..=n {
            prop_assert_eq!(case.expect(step), step);
        }
        prop_assert_eq!(case.step(), n);
        prop_assert!(case.verify().is_ok());
    }

    #[test]
    fn wrong_step_names_declared_and_actual(taken in 0usize..50, offset in 1usize..50) {
        let sequencer = ActionSequencer::new();
        for step in 1..=taken {
            prop_assert!(sequencer.check(step).is_ok());
        }
        let actual = taken + 1;
        let declared = actual + offset;

        let failure = sequencer.check(declared).unwrap_err();
        prop_assert_eq!(failure.kind(), FailureKind::Sequence);
        prop_assert!(failure.message().contains(&declared.to_string()));
        prop_assert!(failure.message().contains(&actual.to_string()));
    }

    #[test]
    fn second_finish_always_fails(first in 1usize..20, second in 0usize..40) {
        let case = quiet_case();
        for step in 1..first {
            case.expect(step);
        }
        case.finish(first);

        let failure = unwind(|| case.finish(second));
        prop_assert!(failure.message().contains("called more than once"));
        prop_assert_eq!(case.step(), first);
    }
}

#[test]
fn ensure_finished_before_and_after_finish() {
    init_test_logging();
    let case = quiet_case();

    let failure = unwind(|| case.ensure_finished());
    assert_eq!(failure.kind(), FailureKind::Sequence);

    case.expect(1);
    case.finish(2);
    case.ensure_finished();
    test_complete!("ensure_finished_before_and_after_finish");
}

#[test]
fn reset_restores_counter_after_completion() {
    init_test_logging();
    let case = quiet_case();
    case.expect(1);
    case.finish(2);

    case.reset();
    assert_eq!(case.step(), 0);
    assert!(!case.is_finished());

    case.finish(1);
    case.reset();
    test_complete!("reset_restores_counter_after_completion");
}

#[test]
fn reset_before_completion_fails() {
    init_test_logging();
    let case = quiet_case();
    case.expect(1);
    case.expect(2);

    let failure = unwind(|| case.reset());
    assert_eq!(failure.kind(), FailureKind::Sequence);
    assert!(case.verify().is_err());
}

#[test]
fn caught_assertion_still_fails_verification() {
    init_test_logging();
    let case = quiet_case();

    let swallowed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        case.expect_unreached();
    }));
    assert!(swallowed.is_err());

    let recorded = case.verify().expect_err("recorded failure survives");
    assert_eq!(recorded.kind(), FailureKind::Unreachable);
}

#[test]
fn raise_with_cause_keeps_chain() {
    init_test_logging();
    let case = quiet_case();
    let cause = ordercheck::Failure::assertion("disk full");

    let failure = unwind(|| case.raise_with_cause("write failed", cause));
    assert_eq!(failure.message(), "write failed");
    assert_eq!(failure.cause().map(ordercheck::Failure::message), Some("disk full"));
    assert!(failure.report().contains("caused by: "));

    let _ = unwind(|| case.raise("later"));
    assert_eq!(
        case.recorded_failure().map(|f| f.message().to_string()),
        Some("write failed".to_string())
    );
}
