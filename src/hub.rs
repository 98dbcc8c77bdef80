//! Settlement primitive: pending units and their optimistic union.
//!
//! A [`Hub`] hands out [`Settlement`]s, each of which settles at most once.
//! The hub's [`Union`] succeeds once every unit resolved and fails as soon as
//! any unit fails. A unit can also be abandoned: it stays outstanding, and
//! the union fails with [`Failure::ForkDropped`] only once abandoned units are
//! all that is left. Every settlement unparks the hub's waiter thread so it
//! can re-poll the union.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::Thread;

use crate::error::Failure;

const PENDING: u8 = 0;
const RESOLVED: u8 = 1;
const FAILED: u8 = 2;
const ABANDONED: u8 = 3;

/// State shared by a hub and all of its units.
#[derive(Debug)]
struct HubState {
    /// Thread unparked whenever the union may have settled.
    waiter: Thread,
    /// Units registered so far. Used to number units in logs.
    registered: AtomicUsize,
    /// Units neither resolved nor failed. Includes abandoned units.
    outstanding: AtomicUsize,
    /// Units that can no longer settle.
    abandoned: AtomicUsize,
    /// Set once the union has been taken.
    sealed: AtomicBool,
    /// First failure among the units.
    failure: OnceLock<Failure>,
}

/// Aggregate over a growing set of pending units.
#[derive(Debug)]
pub struct Hub {
    state: Arc<HubState>,
}

impl Hub {
    /// Create an empty hub that wakes `waiter` on every settlement.
    pub fn new(waiter: Thread) -> Self {
        Self {
            state: Arc::new(HubState {
                waiter,
                registered: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                abandoned: AtomicUsize::new(0),
                sealed: AtomicBool::new(false),
                failure: OnceLock::new(),
            }),
        }
    }

    /// Register one new pending unit.
    ///
    /// Units must be registered before [`Hub::unite`]. A unit registered
    /// afterwards is still counted, but a union that already reported success
    /// will not take it back.
    pub fn provide(&self) -> Settlement {
        let index = self.state.registered.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.outstanding.fetch_add(1, Ordering::AcqRel);

        if self.state.sealed.load(Ordering::Acquire) {
            tracing::warn!(unit = index, "unit registered after the union was taken");
        } else {
            tracing::debug!(unit = index, "unit registered");
        }

        Settlement {
            hub: Arc::clone(&self.state),
            state: AtomicU8::new(PENDING),
            index,
        }
    }

    /// Seal the hub and return its aggregate view.
    pub fn unite(&self) -> Union {
        self.state.sealed.store(true, Ordering::Release);
        Union {
            hub: Arc::clone(&self.state),
        }
    }
}

/// One pending unit of a [`Hub`]. Settles at most once.
#[derive(Debug)]
pub struct Settlement {
    hub: Arc<HubState>,
    state: AtomicU8,
    index: usize,
}

impl Settlement {
    /// Resolve the unit.
    ///
    /// Returns `false`, and does nothing, if the unit was already settled.
    pub fn resolve(&self) -> bool {
        if !self.transition(RESOLVED) {
            return false;
        }
        self.hub.outstanding.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(unit = self.index, "unit resolved");
        self.hub.waiter.unpark();
        true
    }

    /// Fail the unit, and with it the union.
    ///
    /// Returns `false`, and does nothing, if the unit was already settled.
    pub fn fail(&self, failure: Failure) -> bool {
        self.fail_with(failure, |_| {})
    }

    /// Fail the unit, running `before_publish` once the unit is claimed but
    /// before the union can observe the failure.
    ///
    /// Returns `false`, and runs nothing, if the unit was already settled.
    pub fn fail_with<F>(&self, failure: Failure, before_publish: F) -> bool
    where
        F: FnOnce(&Failure),
    {
        if !self.transition(FAILED) {
            return false;
        }
        before_publish(&failure);
        // The failure must be visible before the count drops, or a concurrent
        // poll could see zero outstanding and report success.
        let _ = self.hub.failure.set(failure);
        self.hub.outstanding.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(unit = self.index, "unit failed");
        self.hub.waiter.unpark();
        true
    }

    /// Give up on the unit without settling it.
    ///
    /// The unit stays outstanding, so it never lets the union succeed, and a
    /// real failure of any other unit still wins. Returns `false`, and does
    /// nothing, if the unit was already settled or abandoned.
    pub fn abandon(&self) -> bool {
        if !self.transition(ABANDONED) {
            return false;
        }
        self.hub.abandoned.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(unit = self.index, "unit abandoned");
        self.hub.waiter.unpark();
        true
    }

    /// Whether the unit has been resolved, failed or abandoned.
    pub fn is_settled(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    /// 1-based registration number of this unit within its hub.
    pub fn index(&self) -> usize {
        self.index
    }

    fn transition(&self, to: u8) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !won {
            tracing::debug!(unit = self.index, "unit already settled");
        }
        won
    }
}

/// Aggregate signal of a sealed [`Hub`].
#[derive(Debug, Clone)]
pub struct Union {
    hub: Arc<HubState>,
}

impl Union {
    /// Non-blocking check of the aggregate.
    ///
    /// - `Some(Err(_))` as soon as any unit failed
    /// - `Some(Ok(()))` once no unit is outstanding
    /// - `Some(Err(Failure::ForkDropped))` once every outstanding unit is
    ///   abandoned
    /// - `None` while units are still pending
    pub fn poll(&self) -> Option<Result<(), Failure>> {
        if let Some(failure) = self.hub.failure.get() {
            return Some(Err(failure.clone()));
        }
        let outstanding = self.hub.outstanding.load(Ordering::Acquire);
        if outstanding == 0 {
            return Some(Ok(()));
        }
        // Abandoned units never leave the outstanding count.
        if self.hub.abandoned.load(Ordering::Acquire) >= outstanding {
            return Some(Err(Failure::ForkDropped));
        }
        None
    }

    /// Units neither resolved nor failed.
    pub fn outstanding(&self) -> usize {
        self.hub.outstanding.load(Ordering::Acquire)
    }
}
