//! Order record entries, the consumer seam and the per-unit execution helper
//! shared by both ordered executors.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use ordflow_common::error::Error;

use crate::{
    unit_state::{Ticket, UnitState},
    work_unit::WorkUnit,
};

/// An order record entry: a submitted unit together with its submission
/// position and completion state.
pub(crate) struct Slot<U> {
    seq: u64,
    unit: U,
    state: Arc<UnitState>,
}

impl<U: WorkUnit> Slot<U> {
    pub(crate) fn new(seq: u64, unit: U) -> Arc<Slot<U>> {
        Arc::new(Slot {
            seq,
            unit,
            state: Arc::new(UnitState::new()),
        })
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn ticket(&self) -> Ticket {
        Ticket::new(self.seq, self.state.clone())
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Runs the unit's action, catching both returned errors and panics, and
    /// transitions the slot's state accordingly.
    ///
    /// Returns `true` if the unit completed successfully.
    pub(crate) fn run(&self) -> bool {
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.unit.execute())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(Error::execution_failed(self.seq, source)),
            Err(payload) => Err(Error::unit_panicked(self.seq, panic_message(&*payload))),
        };
        if let Err(e) = &outcome {
            log::warn!("{}: {e}", self.label());
        }
        let succeeded = outcome.is_ok();
        self.state.complete(outcome);
        succeeded
    }

    /// Marks a unit that will never run (e.g. its execution thread could not
    /// be started) as failed so that it can still be delivered in order.
    pub(crate) fn abandon(&self) {
        self.state.complete(Err(Error::unit_abandoned(self.seq)));
    }

    /// Log label, e.g. `unit #3 (sleep 500ms)`.
    pub(crate) fn label(&self) -> String {
        match self.unit.describe() {
            Some(desc) => format!("unit #{} ({desc})", self.seq),
            None => format!("unit #{}", self.seq),
        }
    }
}

/// A completed unit released to the consumer in submission order.
pub struct Delivery<U> {
    slot: Arc<Slot<U>>,
}

impl<U: WorkUnit> Delivery<U> {
    pub(crate) fn new(slot: Arc<Slot<U>>) -> Delivery<U> {
        debug_assert!(slot.is_ready());
        Delivery { slot }
    }

    /// Zero-based submission position.
    pub fn seq(&self) -> u64 {
        self.slot.seq
    }

    pub fn unit(&self) -> &U {
        &self.slot.unit
    }

    /// `Ok(())` if the unit's action succeeded, otherwise the attached failure.
    pub fn outcome(&self) -> Result<(), &Error> {
        match self.slot.state.failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.slot.state.is_failed()
    }

    pub fn describe(&self) -> Option<String> {
        self.slot.unit.describe()
    }
}

impl<U: WorkUnit> std::fmt::Debug for Delivery<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("seq", &self.seq())
            .field("description", &self.describe())
            .field("state", &self.slot.state)
            .finish()
    }
}

/// Receiver of ordered deliveries.
///
/// The consumer runs on the executor's single sequencer thread: a slow
/// `deliver` delays the delivery of every unit behind it.
pub trait Consumer<U>: Send + 'static {
    fn deliver(&mut self, delivery: Delivery<U>);
}

impl<U, F> Consumer<U> for F
where
    F: FnMut(Delivery<U>) + Send + 'static,
{
    fn deliver(&mut self, delivery: Delivery<U>) {
        self(delivery)
    }
}

/// Hands a ready slot to the consumer, shielding the sequencer thread from a
/// panicking consumer.
pub(crate) fn deliver_to<U: WorkUnit>(consumer: &mut dyn Consumer<U>, slot: Arc<Slot<U>>) {
    let label = slot.label();
    log::trace!("delivering {label}");
    let delivery = Delivery::new(slot);
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| consumer.deliver(delivery))) {
        log::error!(
            "consumer panicked while handling {label}: {}",
            panic_message(&*payload)
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
