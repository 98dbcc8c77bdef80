//! forkwait: block a test until its asynchronous work settles.
//!
//! A test declares up front the asynchronous operations it waits on by
//! forking its [`TestContext`]. After the test body returns, the calling
//! thread blocks until every [`Fork`] completes, or until anyone, on any
//! thread, reports a failure. Only the first failure is kept, and it is
//! raised on the test's own thread where the test runner can see it.
//!
//! # Example
//!
//! ```
//! use std::thread;
//! use std::time::Duration;
//!
//! forkwait::test()
//!     .run(|cx| {
//!         let fork = cx.fork();
//!         let timing = cx.timing_validator();
//!         cx.schedule_task(Duration::from_millis(20), move || {
//!             timing.validate_passed_millis(20);
//!             fork.complete();
//!         });
//!
//!         let other = cx.fork();
//!         let asserts = cx.assertions();
//!         thread::spawn(move || {
//!             asserts.assert_eq(4, 2 + 2);
//!             other.complete();
//!         });
//!     })
//!     .execute();
//! ```

mod assertions;
mod context;
mod error;
mod hub;
mod orchestrator;
mod rt;
mod scheduler;
mod timing;

pub use assertions::Assertions;
pub use context::{Fork, TestContext};
pub use error::Failure;
pub use hub::{Hub, Settlement, Union};
pub use test::{TestBuilder, test};
pub use timing::{TimeUnit, TimingValidator};
