//! Assertions usable from any thread.
//!
//! A panic raised on a callback thread never reaches the test runner. Each
//! assertion here runs through [`TestContext::assertion`], so a failure is
//! recorded on the test before the panic continues on the current thread.

use std::fmt::{Debug, Display};

use crate::context::TestContext;

/// Assertion surface of a [`TestContext`].
///
/// Obtained from [`TestContext::assertions`]. Owns a handle on the context,
/// so it can be moved into callbacks.
#[derive(Debug, Clone)]
pub struct Assertions {
    cx: TestContext,
}

impl Assertions {
    pub(crate) fn new(cx: TestContext) -> Self {
        Self { cx }
    }

    pub fn assert_true(&self, condition: bool) {
        self.cx.assertion(|| assert!(condition, "expected true"));
    }

    pub fn assert_false(&self, condition: bool) {
        self.cx.assertion(|| assert!(!condition, "expected false"));
    }

    /// Assert `condition`, failing with `message`.
    pub fn assert_that(&self, condition: bool, message: impl Display) {
        self.cx.assertion(|| assert!(condition, "{message}"));
    }

    pub fn assert_eq<T>(&self, expected: T, actual: T)
    where
        T: PartialEq + Debug,
    {
        self.cx.assertion(|| assert_eq!(expected, actual));
    }

    pub fn assert_ne<T>(&self, unexpected: T, actual: T)
    where
        T: PartialEq + Debug,
    {
        self.cx.assertion(|| assert_ne!(unexpected, actual));
    }

    /// Assert `actual` is within `delta` of `expected`.
    pub fn assert_approx_eq(&self, expected: f64, actual: f64, delta: f64) {
        self.cx.assertion(|| {
            assert!(
                (expected - actual).abs() <= delta,
                "expected {expected} +/- {delta}, got {actual}"
            )
        });
    }

    /// Assert `actual` is further than `delta` from `unexpected`.
    pub fn assert_not_approx_eq(&self, unexpected: f64, actual: f64, delta: f64) {
        self.cx.assertion(|| {
            assert!(
                (unexpected - actual).abs() > delta,
                "expected anything but {unexpected} +/- {delta}, got {actual}"
            )
        });
    }

    /// Element-wise equality, reporting the first differing index.
    pub fn assert_slices_eq<T>(&self, expected: &[T], actual: &[T])
    where
        T: PartialEq + Debug,
    {
        self.cx.assertion(|| {
            assert_eq!(
                expected.len(),
                actual.len(),
                "slice lengths differ: expected {}, got {}",
                expected.len(),
                actual.len()
            );
            if let Some(i) = expected.iter().zip(actual).position(|(e, a)| e != a) {
                panic!(
                    "slices differ at index {i}: expected {:?}, got {:?}",
                    expected[i], actual[i]
                );
            }
        });
    }

    pub fn assert_some<T: Debug>(&self, value: &Option<T>) {
        self.cx.assertion(|| assert!(value.is_some(), "expected Some, got None"));
    }

    pub fn assert_none<T: Debug>(&self, value: &Option<T>) {
        self.cx
            .assertion(|| assert!(value.is_none(), "expected None, got {value:?}"));
    }

    /// Assert both references point at the same object.
    pub fn assert_same<T: ?Sized>(&self, expected: &T, actual: &T) {
        self.cx.assertion(|| {
            assert!(
                std::ptr::eq(expected, actual),
                "expected both references to point at the same object"
            )
        });
    }

    /// Assert the references point at different objects.
    pub fn assert_not_same<T: ?Sized>(&self, unexpected: &T, actual: &T) {
        self.cx.assertion(|| {
            assert!(
                !std::ptr::eq(unexpected, actual),
                "expected references to point at different objects"
            )
        });
    }

    pub fn assert_ok<T, E: Debug>(&self, result: &Result<T, E>) {
        self.cx.assertion(|| {
            if let Err(e) = result {
                panic!("expected Ok, got Err({e:?})");
            }
        });
    }

    pub fn assert_err<T: Debug, E>(&self, result: &Result<T, E>) {
        self.cx.assertion(|| {
            if let Ok(v) = result {
                panic!("expected Err, got Ok({v:?})");
            }
        });
    }

    /// Fail the test and panic with `message`.
    pub fn fail(&self, message: impl Display) -> ! {
        self.cx.assertion::<_, ()>(|| panic!("{message}"));
        unreachable!("assertion resumes the panic")
    }
}
