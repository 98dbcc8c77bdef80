//! Orchestrator: the wait protocol.
//!
//! Blocks the calling thread until every fork settled or a failure was
//! recorded, then closes the context and reports its verdict.

use std::thread;
use std::time::{Duration, Instant};

use crate::context::TestContext;
use crate::error::Failure;

/// Run the wait protocol for `cx`.
///
/// Parks the calling thread until the union of all forks settles or any
/// failure is reported, whichever comes first. Every failure and every
/// settlement unparks the thread; wake-ups that change nothing are absorbed by
/// re-checking state. With `timeout` set, gives up after it elapses and
/// reports [`Failure::TimedOut`].
///
/// The verdict is read from the context's first-failure slot as it is being
/// closed, not from whatever woke the thread: a failure recorded after the
/// union succeeded but before the close still fails the test. Once closed, the
/// slot alone answers every later call.
pub(crate) fn wait(cx: &TestContext, timeout: Option<Duration>) -> Result<(), Failure> {
    if thread::current().id() != cx.calling_thread().id() {
        tracing::error!(
            context = %cx.id(),
            "wait called off the context's thread; refusing to block"
        );
        return Err(Failure::WrongThread);
    }

    if !cx.is_active() {
        return match cx.first_failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        };
    }

    let span = tracing::debug_span!("wait", context = %cx.id());
    let _enter = span.enter();

    let union = cx.unite();
    let started = Instant::now();
    // A deadline past what `Instant` can represent is no deadline.
    let deadline = timeout.and_then(|t| started.checked_add(t));
    tracing::debug!(outstanding = union.outstanding(), ?timeout, "waiting for forks");

    let aggregate = loop {
        if cx.first_failure().is_some() {
            break None;
        }
        if let Some(result) = union.poll() {
            break Some(result);
        }

        match deadline {
            None => thread::park(),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    cx.report(Failure::TimedOut {
                        waited: started.elapsed(),
                        outstanding: union.outstanding(),
                    });
                    continue;
                }
                thread::park_timeout(deadline - now);
            }
        }
        tracing::trace!("woken");
    };

    // A union failure not yet in the slot, such as abandoned forks. A no-op
    // when the slot already holds the cause.
    if let Some(Err(failure)) = aggregate {
        cx.report(failure);
    }
    let verdict = match cx.close() {
        Some(failure) => Err(failure),
        None => Ok(()),
    };

    match &verdict {
        Ok(()) => tracing::info!(elapsed = ?started.elapsed(), "test passed"),
        Err(failure) => tracing::info!(elapsed = ?started.elapsed(), %failure, "test failed"),
    }
    verdict
}
