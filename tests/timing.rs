use std::thread;
use std::time::Duration;

use forkwait::{Failure, TestContext, TimeUnit, test};

#[test]
fn passed_after_enough_time() {
    test()
        .run(|cx| {
            let timing = cx.timing_validator();
            let fork = cx.fork();
            cx.schedule_task_millis(150, move || {
                timing.validate_passed_millis(100);
                fork.complete();
            });
        })
        .execute();
}

#[test]
fn passed_too_early_reports_threshold_and_elapsed() {
    let outcome = test()
        .run(|cx| {
            let timing = cx.timing_validator();
            let fork = cx.fork();
            cx.schedule_task_millis(50, move || {
                timing.validate_passed_millis(100);
                fork.complete();
            });
        })
        .outcome();

    match outcome {
        Err(failure @ Failure::NotPassed { expected, actual, unit }) => {
            assert_eq!(expected, 100);
            assert_eq!(unit, TimeUnit::Milliseconds);
            assert!((50..100).contains(&actual), "actual = {actual}");
            let message = failure.to_string();
            assert!(message.contains("100 milliseconds"), "{message}");
            assert!(message.contains(&format!("{actual} milliseconds")), "{message}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn not_passed_early_enough() {
    test()
        .run(|cx| {
            let timing = cx.timing_validator();
            let fork = cx.fork();
            cx.schedule_task_millis(50, move || {
                timing.validate_not_passed_millis(100);
                fork.complete();
            });
        })
        .execute();
}

#[test]
fn not_passed_too_late_fails() {
    let outcome = test()
        .run(|cx| {
            let timing = cx.timing_validator();
            let fork = cx.fork();
            cx.schedule_task_millis(150, move || {
                timing.validate_not_passed_millis(100);
                fork.complete();
            });
        })
        .outcome();

    match outcome {
        Err(Failure::Passed { expected, actual, unit }) => {
            assert_eq!(expected, 100);
            assert_eq!(unit, TimeUnit::Milliseconds);
            assert!(actual >= 150, "actual = {actual}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn report_uses_caller_unit() {
    let cx = TestContext::new(thread::current());
    let timing = cx.timing_validator();
    timing.validate_passed(3, TimeUnit::Seconds);

    match cx.wait() {
        Err(Failure::NotPassed { expected, actual, unit }) => {
            assert_eq!((expected, actual, unit), (3, 0, TimeUnit::Seconds));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn validation_after_conclusion_is_advisory() {
    let cx = TestContext::new(thread::current());
    let timing = cx.timing_validator();
    assert!(cx.wait().is_ok());

    thread::sleep(Duration::from_millis(5));
    timing.validate_not_passed(1, TimeUnit::Milliseconds);
    assert!(cx.first_failure().is_none());
    assert!(!cx.is_active());
}
