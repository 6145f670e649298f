//! The single shared ordered structure behind [`OrderedPool`](crate::ordered_pool::OrderedPool).
//!
//! The record is both the dispatch queue and the delivery order record:
//!
//! ```text
//!   head (oldest undelivered)                          tail (newest)
//!   | dispatched: running or ready | not yet dispatched |
//!   0                       dispatch_cursor        entries.len()
//! ```
//!
//! Workers claim the entry at `dispatch_cursor`; the sequencer only ever looks
//! at `entries[0]`. Because both sides read the same deque, submission order
//! and dispatch order can never diverge.
//!
//! The record carries no synchronization of its own; the pool guards it with a
//! single mutex.

use std::{collections::VecDeque, sync::Arc};

use ordflow_common::{Result, error::Error};

use crate::{
    delivery::Slot,
    executor::{PoolPhase, PoolStats},
    unit_state::Ticket,
    work_unit::WorkUnit,
};

pub(crate) struct OrderRecord<U> {
    entries: VecDeque<Arc<Slot<U>>>,
    dispatch_cursor: usize,
    next_seq: u64,
    phase: PoolPhase,
    workers_exited: bool,
    stats: PoolStats,
}

impl<U: WorkUnit> OrderRecord<U> {
    pub(crate) fn new() -> OrderRecord<U> {
        OrderRecord {
            entries: VecDeque::new(),
            dispatch_cursor: 0,
            next_seq: 0,
            phase: PoolPhase::Accepting,
            workers_exited: false,
            stats: PoolStats::default(),
        }
    }

    pub(crate) fn phase(&self) -> PoolPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: PoolPhase) {
        self.phase = phase;
    }

    pub(crate) fn stats(&self) -> PoolStats {
        self.stats
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Appends a unit at the tail. Rejected unless the pool is accepting.
    pub(crate) fn push(&mut self, unit: U) -> Result<Ticket> {
        if self.phase != PoolPhase::Accepting {
            return Err(Error::pool_closed());
        }
        let slot = Slot::new(self.next_seq, unit);
        self.next_seq += 1;
        let ticket = slot.ticket();
        self.entries.push_back(slot);
        self.stats.accepted += 1;
        Ok(ticket)
    }

    /// Claims the oldest entry that has not been handed to a worker yet.
    pub(crate) fn claim_next(&mut self) -> Option<Arc<Slot<U>>> {
        let slot = self.entries.get(self.dispatch_cursor)?.clone();
        self.dispatch_cursor += 1;
        self.stats.on_dispatch();
        Some(slot)
    }

    pub(crate) fn record_completion(&mut self, succeeded: bool) {
        self.stats.on_complete(succeeded);
    }

    /// Removes the head entry if, and only if, it is ready. Entries behind a
    /// pending head are never released, even when they are ready themselves.
    pub(crate) fn pop_ready_head(&mut self) -> Option<Arc<Slot<U>>> {
        if !self.entries.front()?.is_ready() {
            return None;
        }
        let slot = self.entries.pop_front()?;
        self.dispatch_cursor = self.dispatch_cursor.saturating_sub(1);
        Some(slot)
    }

    pub(crate) fn record_delivered(&mut self) {
        self.stats.delivered += 1;
    }

    /// A worker may exit once no more entries can arrive and none are left to
    /// dispatch.
    pub(crate) fn worker_should_exit(&self) -> bool {
        self.phase != PoolPhase::Accepting && self.dispatch_cursor == self.entries.len()
    }

    /// Called once all workers have been joined: no further readiness
    /// transitions will happen.
    pub(crate) fn set_workers_exited(&mut self) {
        self.workers_exited = true;
    }

    /// The sequencer may exit once the workers are gone and everything has
    /// been released.
    pub(crate) fn is_drained(&self) -> bool {
        self.workers_exited && self.entries.is_empty()
    }

    /// Fails every entry that is still pending. Only meaningful after the
    /// workers have exited, when a pending entry can no longer complete.
    pub(crate) fn abandon_unfinished(&mut self) -> usize {
        let mut abandoned = 0;
        for slot in self.entries.iter().filter(|s| !s.is_ready()) {
            slot.abandon();
            abandoned += 1;
        }
        self.dispatch_cursor = self.entries.len();
        abandoned
    }
}
