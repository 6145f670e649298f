//! A consumer that records what was delivered, and in which order.

use std::{
    sync::{Arc, Mutex},
    thread::ThreadId,
    time::Instant,
};

use anyhow::{Context, Result, ensure};
use ordflow_workflow::{
    delivery::{Consumer, Delivery},
    executor::OrderedExecutor,
    unit_state::Ticket,
};

use crate::sleepy::SleepyUnit;

/// One delivery as observed by the [`DeliveryRecorder`].
#[derive(Clone, Debug)]
pub struct Record {
    pub seq: u64,
    pub id: u32,
    pub failed: bool,
    pub error: Option<String>,
    pub at: Instant,
    pub thread: ThreadId,
}

/// Shared, thread-safe delivery log. Clone it, hand one clone to the executor
/// via [`consumer`](Self::consumer), inspect the other.
#[derive(Clone, Default)]
pub struct DeliveryRecorder(Arc<Mutex<Vec<Record>>>);

impl DeliveryRecorder {
    pub fn new() -> DeliveryRecorder {
        DeliveryRecorder::default()
    }

    pub fn consumer(&self) -> impl Consumer<SleepyUnit> + use<> {
        let records = self.0.clone();
        move |d: Delivery<SleepyUnit>| {
            let record = Record {
                seq: d.seq(),
                id: d.unit().id(),
                failed: d.is_failed(),
                error: d.outcome().err().map(|e| e.to_string()),
                at: Instant::now(),
                thread: std::thread::current().id(),
            };
            records.lock().unwrap().push(record);
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.0.lock().unwrap().clone()
    }

    /// Delivered unit ids, in delivery order.
    pub fn ids(&self) -> Vec<u32> {
        self.0.lock().unwrap().iter().map(|r| r.id).collect()
    }

    pub fn failed_ids(&self) -> Vec<u32> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.failed)
            .map(|r| r.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Submits every unit to `executor`, in order.
pub fn submit_all<E>(executor: &E, units: Vec<SleepyUnit>) -> Result<Vec<Ticket>>
where
    E: OrderedExecutor<SleepyUnit> + ?Sized,
{
    units
        .into_iter()
        .map(|unit| {
            let id = unit.id();
            executor
                .add(unit)
                .with_context(|| format!("failed to submit unit {id}"))
        })
        .collect()
}

/// Checks that the recorder saw ids `1..=count` in exactly that order, each
/// once.
pub fn verify_in_order(recorder: &DeliveryRecorder, count: u32) -> Result<()> {
    let ids = recorder.ids();
    let expected: Vec<u32> = (1..=count).collect();
    ensure!(
        ids == expected,
        "delivery order mismatch: expected {expected:?}, got {ids:?}"
    );
    let seqs: Vec<u64> = recorder.records().iter().map(|r| r.seq).collect();
    ensure!(
        seqs.iter().copied().eq(0..u64::from(count)),
        "sequence numbers out of order: {seqs:?}"
    );
    Ok(())
}
