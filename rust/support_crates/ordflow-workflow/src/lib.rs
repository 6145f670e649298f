//! Concurrent execution with in-order delivery.
//!
//! This crate runs independent units of work concurrently and hands their
//! results to a consumer in exactly the order the units were submitted,
//! regardless of the order in which they finish.
//!
//! # Key Components
//!
//! ## Ordered Executors
//!
//! - [`ordered_pool::OrderedPool`] - A fixed set of worker threads feeding a
//!   single delivery sequencer. The principal executor: concurrency is capped
//!   at the pool size.
//! - [`spawn_sequencer::SpawnSequencer`] - One thread per submitted unit,
//!   bounded by a [`gate::ConcurrencyGate`], with the sequencer blocking on the
//!   head unit's completion handle.
//!
//! Both implement [`executor::OrderedExecutor`].
//!
//! ## Work and Delivery
//!
//! - [`work_unit`] - The [`WorkUnit`](work_unit::WorkUnit) contract and a
//!   closure adapter
//! - [`unit_state`] - Monotonic per-unit readiness and the submitter's
//!   [`Ticket`](unit_state::Ticket)
//! - [`delivery`] - The [`Consumer`](delivery::Consumer) seam and the
//!   [`Delivery`](delivery::Delivery) it receives
//!
//! ## Synchronization Primitives
//!
//! - [`completion`] - Single-use completion signal between two threads
//! - [`gate`] - Counting gate bounding concurrent execution
//!
//! # Delivery Guarantees
//!
//! Every accepted unit is delivered exactly once, in submission order, on the
//! executor's sequencer thread. Only the oldest undelivered unit is ever
//! considered for release: a slow unit holds back every unit submitted after
//! it (head-of-line blocking). Failed units are delivered in place, carrying
//! their failure.

pub mod completion;
pub mod delivery;
pub mod executor;
pub mod gate;
pub mod ordered_pool;
pub mod spawn_sequencer;
pub mod unit_state;
pub mod work_unit;

mod order_record;
