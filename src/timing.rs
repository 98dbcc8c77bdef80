//! Elapsed-time validation anchored at a creation instant.

use std::fmt;
use std::time::{Duration, Instant};

use crate::context::TestContext;
use crate::error::Failure;

/// Unit in which a timing threshold is expressed and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    fn nanos_per_unit(self) -> u128 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
        }
    }

    /// Whole units contained in `duration`, truncated.
    pub fn of(self, duration: Duration) -> u64 {
        let units = duration.as_nanos() / self.nanos_per_unit();
        u64::try_from(units).unwrap_or(u64::MAX)
    }

    /// `amount` of this unit as a [`Duration`].
    pub fn duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Nanoseconds => "nanoseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
        };
        f.write_str(name)
    }
}

/// Checks how much time passed since its creation.
///
/// Created through [`TestContext::timing_validator`]. A failed validation
/// fails the owning test; validations never block and may run on any thread.
/// Once the test has concluded, a failed validation is advisory only and no
/// longer changes the verdict.
#[derive(Debug, Clone)]
pub struct TimingValidator {
    started: Instant,
    cx: TestContext,
}

impl TimingValidator {
    pub(crate) fn new(cx: TestContext) -> Self {
        Self {
            started: Instant::now(),
            cx,
        }
    }

    /// Time passed since creation. Measured on every call.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fail the test unless at least `amount` `unit`s passed since creation.
    pub fn validate_passed(&self, amount: u64, unit: TimeUnit) {
        let elapsed = self.elapsed();
        if elapsed < unit.duration(amount) {
            self.cx.report(Failure::NotPassed {
                expected: amount,
                actual: unit.of(elapsed),
                unit,
            });
        }
    }

    /// Fail the test if `amount` `unit`s or more passed since creation.
    pub fn validate_not_passed(&self, amount: u64, unit: TimeUnit) {
        let elapsed = self.elapsed();
        if elapsed >= unit.duration(amount) {
            self.cx.report(Failure::Passed {
                expected: amount,
                actual: unit.of(elapsed),
                unit,
            });
        }
    }

    /// [`validate_passed`](Self::validate_passed) in milliseconds.
    pub fn validate_passed_millis(&self, millis: u64) {
        self.validate_passed(millis, TimeUnit::Milliseconds);
    }

    /// [`validate_not_passed`](Self::validate_not_passed) in milliseconds.
    pub fn validate_not_passed_millis(&self, millis: u64) {
        self.validate_not_passed(millis, TimeUnit::Milliseconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn validator() -> (TestContext, TimingValidator) {
        let cx = TestContext::new(thread::current());
        let v = cx.timing_validator();
        (cx, v)
    }

    #[test]
    fn test_unit_conversions() {
        let d = Duration::from_micros(1_500_250);
        assert_eq!(TimeUnit::Seconds.of(d), 1);
        assert_eq!(TimeUnit::Milliseconds.of(d), 1_500);
        assert_eq!(TimeUnit::Microseconds.of(d), 1_500_250);
        assert_eq!(TimeUnit::Nanoseconds.of(d), 1_500_250_000);
        assert_eq!(TimeUnit::Milliseconds.duration(7), Duration::from_millis(7));
        assert_eq!(TimeUnit::Seconds.to_string(), "seconds");
    }

    #[test]
    fn test_passed_fails_early_with_both_amounts() {
        let (cx, v) = validator();
        v.validate_passed_millis(10_000);

        match cx.first_failure() {
            Some(Failure::NotPassed {
                expected, unit, ..
            }) => {
                assert_eq!(expected, 10_000);
                assert_eq!(unit, TimeUnit::Milliseconds);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        let message = cx.first_failure().unwrap().to_string();
        assert!(message.contains("10000 milliseconds"), "{message}");
    }

    #[test]
    fn test_passed_holds_after_sleep() {
        let (cx, v) = validator();
        thread::sleep(Duration::from_millis(30));
        v.validate_passed_millis(20);
        assert!(cx.first_failure().is_none());
    }

    #[test]
    fn test_not_passed_holds_early() {
        let (cx, v) = validator();
        v.validate_not_passed(10, TimeUnit::Seconds);
        assert!(cx.first_failure().is_none());
    }

    #[test]
    fn test_not_passed_fails_late() {
        let (cx, v) = validator();
        thread::sleep(Duration::from_millis(30));
        v.validate_not_passed_millis(20);

        match cx.first_failure() {
            Some(Failure::Passed {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 20);
                assert!(actual >= 20, "actual = {actual}");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_validation_is_repeatable() {
        let (cx, v) = validator();
        v.validate_not_passed(10, TimeUnit::Seconds);
        v.validate_not_passed(10, TimeUnit::Seconds);
        assert!(v.elapsed() < Duration::from_secs(10));
        assert!(cx.first_failure().is_none());
    }
}
