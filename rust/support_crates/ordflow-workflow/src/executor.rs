//! The surface shared by the ordered executors.

use ordflow_common::Result;

use crate::{unit_state::Ticket, work_unit::WorkUnit};

/// Lifecycle of an ordered executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolPhase {
    /// Submissions are allowed.
    Accepting,
    /// No new submissions; outstanding units are executed and delivered.
    Draining,
    /// Every accepted unit has been delivered and all threads have exited.
    Terminated,
}

/// A snapshot of an executor's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Units accepted by `add`.
    pub accepted: u64,
    /// Units handed to an execution context.
    pub dispatched: u64,
    /// Units whose action has returned (successfully or not).
    pub completed: u64,
    /// Completed units that carry a failure.
    pub failed: u64,
    /// Units released to the consumer.
    pub delivered: u64,
    /// Units executing right now.
    pub in_flight: usize,
    /// Highest number of units ever executing at the same time.
    pub max_in_flight: usize,
}

impl PoolStats {
    /// Accepted units that have not been delivered yet.
    pub fn undelivered(&self) -> u64 {
        self.accepted - self.delivered
    }

    pub(crate) fn on_dispatch(&mut self) {
        self.dispatched += 1;
        self.in_flight += 1;
        self.max_in_flight = self.max_in_flight.max(self.in_flight);
    }

    pub(crate) fn on_complete(&mut self, succeeded: bool) {
        debug_assert!(self.in_flight > 0);
        self.in_flight -= 1;
        self.completed += 1;
        if !succeeded {
            self.failed += 1;
        }
    }
}

/// Executes work units concurrently and delivers them to a consumer strictly
/// in submission order.
pub trait OrderedExecutor<U: WorkUnit> {
    /// Submits a unit. Fails with `PoolClosed` once shutdown has begun.
    fn add(&self, unit: U) -> Result<Ticket>;

    /// Stops accepting units and blocks until every accepted unit has been
    /// delivered. Calling it again is a no-op.
    fn shutdown(&self) -> Result<()>;

    fn stats(&self) -> PoolStats;

    fn phase(&self) -> PoolPhase;
}
