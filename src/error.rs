//! Failure type.
//!
//! Every failure path of a test (fork failure, explicit `fail`, failed
//! assertion, timing validation) converges on [`Failure`].

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::timing::TimeUnit;

/// The reason a test failed.
///
/// Cheap to clone: the first failure is stored once and handed out to every
/// reader.
#[derive(Debug, Clone, Error)]
pub enum Failure {
    /// Failure with a plain message.
    #[error("{0}")]
    Message(String),

    /// Failure without a reason.
    #[error("test failed")]
    Unspecified,

    /// Failure carrying a caller-supplied error.
    #[error("{0}")]
    Error(Arc<dyn StdError + Send + Sync + 'static>),

    /// An assertion panicked.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A timing validator expected a period to have passed.
    #[error("expected {expected} {unit} to pass, but only {actual} {unit} passed")]
    NotPassed {
        expected: u64,
        actual: u64,
        unit: TimeUnit,
    },

    /// A timing validator expected a period not to have passed.
    #[error("expected {expected} {unit} not to pass, but {actual} {unit} passed")]
    Passed {
        expected: u64,
        actual: u64,
        unit: TimeUnit,
    },

    /// Every handle on a fork was dropped without completing or failing it.
    #[error("fork dropped without being completed or failed")]
    ForkDropped,

    /// The wait protocol gave up before all forks settled.
    #[error("timed out after {waited:?} with {outstanding} fork(s) outstanding")]
    TimedOut { waited: Duration, outstanding: usize },

    /// The wait protocol was entered from a thread other than the one the
    /// context is bound to.
    #[error("wait must run on the thread the test context is bound to")]
    WrongThread,
}

impl Failure {
    /// Wrap an arbitrary error.
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Failure::Error(Arc::new(error))
    }

    /// Whether this failure came from a [`TimingValidator`](crate::TimingValidator).
    pub fn is_timing(&self) -> bool {
        matches!(self, Failure::NotPassed { .. } | Failure::Passed { .. })
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Failure::Message(message)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Failure::Message(message.to_string())
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
