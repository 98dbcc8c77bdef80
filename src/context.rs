//! Test context and forks.
//!
//! A [`TestContext`] is bound to the thread that runs the test. It hands out
//! [`Fork`]s for outstanding asynchronous work and collects the first failure
//! reported from any thread.

use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::Thread;
use std::time::Duration;

use uuid::Uuid;

use crate::assertions::Assertions;
use crate::error::{Failure, panic_message};
use crate::hub::{Hub, Settlement, Union};
use crate::orchestrator;
use crate::scheduler;
use crate::timing::TimingValidator;

/// Shared state behind every clone of a [`TestContext`].
#[derive(Debug)]
struct ContextInner {
    /// Identifies this context in logs.
    id: Uuid,
    /// Thread that runs the wait protocol. Unparked on every failure.
    calling_thread: Thread,
    /// Aggregate over all forks.
    hub: Hub,
    /// Written once: `Some(failure)` by the first failure, or `None` when the
    /// context closes without one. Later writes are rejected.
    verdict: OnceLock<Option<Failure>>,
    /// True until the wait protocol concludes.
    active: AtomicBool,
}

/// The context of an asynchronous test.
///
/// Cloning is cheap and every clone refers to the same test, so a context
/// can be handed to callbacks on any thread.
///
/// All forks must be created before the test body returns. To wait for two
/// operations that run one after the other, fork twice up front rather than
/// forking the second one from the first one's callback.
#[derive(Debug, Clone)]
pub struct TestContext {
    inner: Arc<ContextInner>,
}

impl TestContext {
    /// Create a context bound to `calling_thread`.
    ///
    /// The wait protocol must later run on that same thread.
    pub fn new(calling_thread: Thread) -> Self {
        let inner = ContextInner {
            id: Uuid::new_v4(),
            hub: Hub::new(calling_thread.clone()),
            calling_thread,
            verdict: OnceLock::new(),
            active: AtomicBool::new(true),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Identifier of this context, as it appears in logs.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The thread this context is bound to.
    pub fn calling_thread(&self) -> &Thread {
        &self.inner.calling_thread
    }

    /// Fork the test.
    ///
    /// The returned fork must be completed (or failed) for the test to end.
    /// Forking after the wait protocol started is a programming error: the
    /// fork is logged and counted, but a test that already passed stays
    /// passed.
    pub fn fork(&self) -> Fork {
        Fork {
            inner: Arc::new(ForkInner {
                settlement: self.inner.hub.provide(),
                cx: self.clone(),
            }),
        }
    }

    /// Fail the test with a message.
    pub fn fail(&self, message: impl Into<String>) {
        self.report(Failure::Message(message.into()));
    }

    /// Fail the test with an error.
    pub fn fail_with<E>(&self, error: E)
    where
        E: StdError + Send + Sync + 'static,
    {
        self.report(Failure::from_error(error));
    }

    /// Fail the test without a reason.
    pub fn fail_unspecified(&self) {
        self.report(Failure::Unspecified);
    }

    /// Record `failure` unless an earlier one was recorded, then wake the
    /// calling thread.
    ///
    /// Safe from any thread at any time. Once the test has concluded this only
    /// unparks the calling thread, which is harmless.
    pub fn report(&self, failure: Failure) {
        match self.inner.verdict.set(Some(failure)) {
            Ok(()) => {
                tracing::debug!(context = %self.inner.id, "first failure recorded");
            }
            Err(rejected) => {
                let late = matches!(self.inner.verdict.get(), Some(None));
                if let Some(rejected) = rejected {
                    if late {
                        tracing::debug!(context = %self.inner.id, %rejected, "failure after the test concluded");
                    } else {
                        tracing::debug!(context = %self.inner.id, %rejected, "failure superseded by an earlier one");
                    }
                }
            }
        }
        self.inner.calling_thread.unpark();
    }

    /// Whether the test is still pending.
    ///
    /// Late callbacks can use this to skip work that no longer matters. Once
    /// false, it never becomes true again.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// A validator anchored at this instant.
    pub fn timing_validator(&self) -> TimingValidator {
        TimingValidator::new(self.clone())
    }

    /// Run an assertion.
    ///
    /// If `check` panics, the panic is recorded as the test's failure and then
    /// resumed, so a caller on the test thread sees it as well.
    pub fn assertion<F, R>(&self, check: F) -> R
    where
        F: FnOnce() -> R,
    {
        match panic::catch_unwind(AssertUnwindSafe(check)) {
            Ok(value) => value,
            Err(payload) => {
                self.report(Failure::Assertion(panic_message(payload.as_ref())));
                panic::resume_unwind(payload)
            }
        }
    }

    /// Record an `Err` as the test's failure and hand it back.
    pub fn check<T, E>(&self, result: Result<T, E>) -> Result<T, Failure>
    where
        E: StdError + Send + Sync + 'static,
    {
        result.map_err(|error| {
            let failure = Failure::from_error(error);
            self.report(failure.clone());
            failure
        })
    }

    /// Assertions that fail this test.
    pub fn assertions(&self) -> Assertions {
        Assertions::new(self.clone())
    }

    /// Run `task` on the shared scheduler thread after `delay`.
    pub fn schedule_task<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        scheduler::schedule(delay, task);
    }

    /// [`schedule_task`](Self::schedule_task) with a delay in milliseconds.
    pub fn schedule_task_millis<F>(&self, delay_millis: u64, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_task(Duration::from_millis(delay_millis), task);
    }

    /// The failure recorded so far, if any.
    pub fn first_failure(&self) -> Option<Failure> {
        self.inner.verdict.get().cloned().flatten()
    }

    /// Block until every fork settled or any failure was reported.
    ///
    /// Must run on the calling thread, after the test body returned. Uses the
    /// `FORKWAIT_TIMEOUT_MS` default, if set.
    pub fn wait(&self) -> Result<(), Failure> {
        orchestrator::wait(self, crate::rt::runtime().default_timeout)
    }

    /// [`wait`](Self::wait) with an explicit upper bound.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), Failure> {
        orchestrator::wait(self, Some(timeout))
    }

    /// Seal the hub and return the aggregate over all forks.
    pub(crate) fn unite(&self) -> Union {
        self.inner.hub.unite()
    }

    /// Mark the test as concluded and return its verdict.
    ///
    /// A failure recorded before this call is kept. Anything later is rejected.
    pub(crate) fn close(&self) -> Option<Failure> {
        let _ = self.inner.verdict.set(None);
        self.inner.active.store(false, Ordering::Release);
        self.first_failure()
    }
}

/// Shared state behind every clone of a [`Fork`].
#[derive(Debug)]
struct ForkInner {
    settlement: Settlement,
    cx: TestContext,
}

impl ForkInner {
    fn fail(&self, failure: Failure) {
        // The context records the cause before the union can wake the waiter.
        self.settlement
            .fail_with(failure, |f| self.cx.report(f.clone()));
    }
}

impl Drop for ForkInner {
    fn drop(&mut self) {
        // Not a failure of its own: any real failure still has to win.
        if !self.settlement.is_settled() && self.settlement.abandon() {
            tracing::debug!(
                context = %self.cx.inner.id,
                fork = self.settlement.index(),
                "fork dropped while pending"
            );
        }
    }
}

/// One outstanding asynchronous operation of a test.
///
/// Complete or fail it exactly once, from any thread. Clones refer to the
/// same fork; settling it again is a no-op. Dropping the last clone of a
/// fork that was never settled abandons it: once abandoned forks are all that
/// is left to wait for, the test fails with [`Failure::ForkDropped`], unless a
/// real failure was reported first.
#[derive(Debug, Clone)]
pub struct Fork {
    inner: Arc<ForkInner>,
}

impl Fork {
    /// Mark the fork as completed.
    pub fn complete(&self) {
        self.inner.settlement.resolve();
    }

    /// Fail the test with a message.
    pub fn fail(&self, message: impl Into<String>) {
        self.inner.fail(Failure::Message(message.into()));
    }

    /// Fail the test with an error.
    pub fn fail_with<E>(&self, error: E)
    where
        E: StdError + Send + Sync + 'static,
    {
        self.inner.fail(Failure::from_error(error));
    }

    /// Fail the test without a reason.
    pub fn fail_unspecified(&self) {
        self.inner.fail(Failure::Unspecified);
    }

    /// Fail the fork with `failure`.
    pub fn report(&self, failure: Failure) {
        self.inner.fail(failure);
    }

    /// Whether the fork has been completed or failed.
    pub fn is_settled(&self) -> bool {
        self.inner.settlement.is_settled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct ConnectionReset;

    fn context() -> TestContext {
        TestContext::new(thread::current())
    }

    #[test]
    fn test_first_failure_wins() {
        let cx = context();
        cx.fail("first");
        cx.fail("second");
        cx.fail_unspecified();

        match cx.first_failure() {
            Some(Failure::Message(m)) => assert_eq!(m, "first"),
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_fail_with_keeps_error() {
        let cx = context();
        cx.fail_with(ConnectionReset);
        assert_eq!(cx.first_failure().unwrap().to_string(), "connection reset");
    }

    #[test]
    fn test_close_seals_verdict() {
        let cx = context();
        assert!(cx.is_active());
        assert!(cx.close().is_none());
        assert!(!cx.is_active());

        cx.fail("too late");
        assert!(cx.first_failure().is_none());
        assert!(!cx.is_active());
    }

    #[test]
    fn test_close_keeps_recorded_failure() {
        let cx = context();
        cx.fail("recorded");
        assert!(matches!(cx.close(), Some(Failure::Message(_))));
        cx.fail("ignored");
        match cx.first_failure() {
            Some(Failure::Message(m)) => assert_eq!(m, "recorded"),
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_fork_failure_reaches_slot() {
        let cx = context();
        let fork = cx.fork();
        fork.fail("fork broke");

        assert!(fork.is_settled());
        match cx.first_failure() {
            Some(Failure::Message(m)) => assert_eq!(m, "fork broke"),
            other => panic!("unexpected failure: {other:?}"),
        }
        assert!(matches!(cx.unite().poll(), Some(Err(_))));
    }

    #[test]
    fn test_fork_settles_once() {
        let cx = context();
        let fork = cx.fork();
        fork.complete();
        fork.complete();
        fork.fail("after completion");

        assert!(cx.first_failure().is_none());
        assert!(matches!(cx.unite().poll(), Some(Ok(()))));
    }

    #[test]
    fn test_dropped_fork_fails() {
        let cx = context();
        let fork = cx.fork();
        let clone = fork.clone();
        drop(fork);
        drop(clone);
        // Abandoning records nothing by itself.
        assert!(cx.first_failure().is_none());

        assert!(matches!(cx.wait(), Err(Failure::ForkDropped)));
        assert!(matches!(cx.first_failure(), Some(Failure::ForkDropped)));
    }

    #[test]
    fn test_dropped_fork_does_not_mask_real_failure() {
        let cx = context();
        let a = cx.fork();
        let b = cx.fork();
        thread::spawn(move || drop(b)).join().unwrap();
        a.fail("real cause");

        match cx.wait() {
            Err(Failure::Message(m)) => assert_eq!(m, "real cause"),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_assertion_records_and_resumes() {
        let cx = context();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            cx.assertion(|| assert_eq!(1 + 1, 3, "arithmetic"));
        }));

        assert!(result.is_err());
        match cx.first_failure() {
            Some(Failure::Assertion(m)) => assert!(m.contains("arithmetic"), "{m}"),
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_assertion_passes_value_through() {
        let cx = context();
        assert_eq!(cx.assertion(|| 42), 42);
        assert!(cx.first_failure().is_none());
    }

    #[test]
    fn test_check_records_err() {
        let cx = context();
        assert_eq!(cx.check(Ok::<_, ConnectionReset>(5)).unwrap(), 5);
        assert!(cx.first_failure().is_none());

        let err = cx.check(Err::<(), _>(ConnectionReset)).unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(cx.first_failure().unwrap().to_string(), "connection reset");
    }

    #[test]
    fn test_clones_share_state() {
        let cx = context();
        let other = cx.clone();
        assert_eq!(cx.id(), other.id());

        thread::spawn(move || other.fail("from afar")).join().unwrap();
        assert!(cx.first_failure().is_some());
    }
}
