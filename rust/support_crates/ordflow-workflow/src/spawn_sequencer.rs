//! Per-unit task execution with in-order delivery.
//!
//! [`SpawnSequencer`] starts a dedicated thread for every submitted unit
//! instead of feeding a fixed worker pool. The sequencer thread keeps the
//! completion handles in submission order and blocks on the head handle:
//! resolving a handle means that unit's thread has finished it, so waiting on
//! the head alone enforces the delivery order.
//!
//! Unbounded per-submission spawning exhausts threads under bursty load, so
//! task creation is gated by a [`ConcurrencyGate`]: at most `max_in_flight`
//! units execute at once, and [`add`](SpawnSequencer::add) blocks while the
//! gate is saturated.

use std::{
    cell::Cell,
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle, ThreadId},
};

use ordflow_common::{Result, error::Error};

use crate::{
    completion::{self, CompletionHandle},
    delivery::{Consumer, Slot, deliver_to},
    executor::{OrderedExecutor, PoolPhase, PoolStats},
    gate::ConcurrencyGate,
    unit_state::Ticket,
    work_unit::WorkUnit,
};

/// An ordered executor that runs each unit on its own thread, bounded by a
/// concurrency gate.
///
/// Prefer [`OrderedPool`](crate::ordered_pool::OrderedPool) for long-running
/// pipelines: it reuses its threads. `SpawnSequencer` suits sparse, bursty
/// submissions where keeping idle workers around is undesirable.
pub struct SpawnSequencer<U: WorkUnit> {
    shared: Arc<Shared<U>>,
    gate: Arc<ConcurrencyGate>,
    sequencer: Mutex<Option<JoinHandle<()>>>,
    sequencer_id: ThreadId,
}

impl<U: WorkUnit> SpawnSequencer<U> {
    /// Creates a sequencer that lets at most `max_in_flight` units execute
    /// concurrently. Fails with `InvalidArgument` if `max_in_flight` is 0.
    pub fn new(max_in_flight: usize, consumer: impl Consumer<U>) -> Result<SpawnSequencer<U>> {
        let gate = ConcurrencyGate::new(max_in_flight)?;
        let shared = Arc::new(Shared {
            queue: Mutex::new(HandleQueue {
                pending: VecDeque::new(),
                next_seq: 0,
                phase: PoolPhase::Accepting,
                stats: PoolStats::default(),
            }),
            available: Condvar::new(),
            terminated: Condvar::new(),
        });

        let sequencer = {
            let shared = shared.clone();
            let mut consumer: Box<dyn Consumer<U>> = Box::new(consumer);
            thread::Builder::new()
                .name("ordflow-spawn-sequencer".to_string())
                .spawn(move || Shared::sequencer_fn(shared, consumer.as_mut()))
                .map_err(|e| Error::thread_spawn("ordflow-spawn-sequencer", e))?
        };
        let sequencer_id = sequencer.thread().id();
        log::debug!("spawn sequencer started, max {max_in_flight} units in flight");

        Ok(SpawnSequencer {
            shared,
            gate,
            sequencer: Mutex::new(Some(sequencer)),
            sequencer_id,
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.gate.capacity()
    }

    /// Identifies this sequencer to the task threads it starts.
    fn owner_key(&self) -> usize {
        Arc::as_ptr(&self.shared) as *const () as usize
    }

    /// Submits a unit and immediately starts a thread executing it.
    ///
    /// Blocks while `max_in_flight` units are executing. Fails with
    /// `PoolClosed` once shutdown has begun, and with `ThreadSpawn` if the
    /// execution thread cannot be started (the unit is then not accepted).
    pub fn add(&self, unit: U) -> Result<Ticket> {
        // Acquired before the queue lock: finishing tasks need that lock.
        let permit = self.gate.acquire();

        let mut queue = self.shared.lock();
        if queue.phase != PoolPhase::Accepting {
            return Err(Error::pool_closed());
        }
        let seq = queue.next_seq;
        let slot = Slot::new(seq, unit);
        let (completer, handle) = completion::channel();

        let task = {
            let slot = slot.clone();
            let shared = self.shared.clone();
            let owner = self.owner_key();
            move || {
                TASK_OWNER.with(|o| o.set(owner));
                let succeeded = slot.run();
                shared.lock().stats.on_complete(succeeded);
                drop(permit);
                completer.complete(());
            }
        };
        let name = format!("ordflow-task-{seq}");
        thread::Builder::new()
            .name(name.clone())
            .spawn(task)
            .map_err(|e| Error::thread_spawn(name, e))?;

        queue.next_seq += 1;
        queue.stats.accepted += 1;
        queue.stats.on_dispatch();
        let ticket = slot.ticket();
        queue.pending.push_back((slot, handle));
        drop(queue);

        log::trace!("spawned unit #{seq}");
        self.shared.available.notify_one();
        Ok(ticket)
    }

    /// Stops accepting units and blocks until every accepted unit has been
    /// delivered. Idempotent.
    ///
    /// Rejected with `InvalidOperation` when called from the consumer or from
    /// one of this sequencer's units: either would wait on itself.
    pub fn shutdown(&self) -> Result<()> {
        if thread::current().id() == self.sequencer_id {
            return Err(Error::invalid_operation("shutdown from the consumer"));
        }
        if TASK_OWNER.with(Cell::get) == self.owner_key() {
            return Err(Error::invalid_operation("shutdown from a work unit"));
        }

        {
            let mut queue = self.shared.lock();
            match queue.phase {
                PoolPhase::Accepting => queue.phase = PoolPhase::Draining,
                PoolPhase::Draining => {
                    let _queue = self
                        .shared
                        .terminated
                        .wait_while(queue, |q| q.phase != PoolPhase::Terminated)
                        .unwrap_or_else(PoisonError::into_inner);
                    return Ok(());
                }
                PoolPhase::Terminated => return Ok(()),
            }
        }
        self.shared.available.notify_all();

        let sequencer = self
            .sequencer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut result = Ok(());
        if let Some(sequencer) = sequencer {
            if sequencer.join().is_err() {
                log::error!("spawn sequencer panicked");
                result = Err(Error::thread_panicked("ordflow-spawn-sequencer"));
            }
        }

        self.shared.lock().phase = PoolPhase::Terminated;
        self.shared.terminated.notify_all();
        log::debug!("spawn sequencer terminated");
        result
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().stats
    }

    pub fn phase(&self) -> PoolPhase {
        self.shared.lock().phase
    }
}

impl<U: WorkUnit> OrderedExecutor<U> for SpawnSequencer<U> {
    fn add(&self, unit: U) -> Result<Ticket> {
        SpawnSequencer::add(self, unit)
    }

    fn shutdown(&self) -> Result<()> {
        SpawnSequencer::shutdown(self)
    }

    fn stats(&self) -> PoolStats {
        SpawnSequencer::stats(self)
    }

    fn phase(&self) -> PoolPhase {
        SpawnSequencer::phase(self)
    }
}

impl<U: WorkUnit> Drop for SpawnSequencer<U> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("spawn sequencer shutdown on drop failed: {e}");
        }
    }
}

thread_local! {
    /// Owner key of the sequencer whose unit this thread runs, 0 elsewhere.
    static TASK_OWNER: Cell<usize> = const { Cell::new(0) };
}

struct HandleQueue<U> {
    pending: VecDeque<(Arc<Slot<U>>, CompletionHandle<()>)>,
    next_seq: u64,
    phase: PoolPhase,
    stats: PoolStats,
}

struct Shared<U> {
    queue: Mutex<HandleQueue<U>>,
    available: Condvar,
    terminated: Condvar,
}

impl<U: WorkUnit> Shared<U> {
    fn lock(&self) -> MutexGuard<'_, HandleQueue<U>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sequencer_fn(shared: Arc<Shared<U>>, consumer: &mut dyn Consumer<U>) {
        loop {
            let head = {
                let queue = shared.lock();
                let mut queue = shared
                    .available
                    .wait_while(queue, |q| {
                        q.pending.is_empty() && q.phase == PoolPhase::Accepting
                    })
                    .unwrap_or_else(PoisonError::into_inner);
                queue.pending.pop_front()
            };
            let Some((slot, handle)) = head else {
                break;
            };

            // Blocks outside the lock: submissions continue meanwhile.
            if handle.wait().is_none() {
                slot.abandon();
            }
            deliver_to(consumer, slot);
            shared.lock().stats.delivered += 1;
        }
        log::debug!("spawn sequencer exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{delivery::Delivery, work_unit::UnitFn};
    use ordflow_common::error::ErrorKind;
    use std::{
        sync::{
            OnceLock,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    type SleepFn = Box<dyn Fn() -> crate::work_unit::UnitResult + Send + Sync>;
    type Sleepy = UnitFn<SleepFn>;

    fn sleepy(ms: u64) -> Sleepy {
        let f: SleepFn = Box::new(move || {
            thread::sleep(Duration::from_millis(ms));
            Ok(())
        });
        UnitFn::new(f)
    }

    fn recording(max_in_flight: usize) -> (SpawnSequencer<Sleepy>, Arc<Mutex<Vec<u64>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let sequencer = SpawnSequencer::new(max_in_flight, move |d: Delivery<Sleepy>| {
            sink.lock().unwrap().push(d.seq())
        })
        .unwrap();
        (sequencer, log)
    }

    #[test]
    fn test_zero_in_flight_rejected() {
        let res = SpawnSequencer::new(0, |_: Delivery<Sleepy>| {});
        assert!(res.is_err());
    }

    #[test]
    fn test_delivery_in_submission_order() {
        let (sequencer, log) = recording(8);
        for ms in [100, 700, 500, 200, 300] {
            sequencer.add(sleepy(ms)).unwrap();
        }
        sequencer.shutdown().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        let stats = sequencer.stats();
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.completed, 5);
    }

    #[test]
    fn test_gate_bounds_concurrency() {
        let (sequencer, log) = recording(2);
        for _ in 0..8 {
            sequencer.add(sleepy(10)).unwrap();
        }
        sequencer.shutdown().unwrap();
        assert_eq!(log.lock().unwrap().len(), 8);
        assert!(sequencer.stats().max_in_flight <= 2);
        assert_eq!(sequencer.max_in_flight(), 2);
    }

    #[test]
    fn test_add_after_shutdown_fails() {
        let (sequencer, _log) = recording(2);
        sequencer.shutdown().unwrap();
        sequencer.shutdown().unwrap();
        let err = sequencer.add(sleepy(0)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PoolClosed));
        assert_eq!(sequencer.phase(), PoolPhase::Terminated);
    }

    #[test]
    fn test_failed_unit_delivered_in_place() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let sequencer = SpawnSequencer::new(4, move |d: Delivery<Sleepy>| {
            sink.lock().unwrap().push((d.seq(), d.is_failed()))
        })
        .unwrap();
        sequencer.add(sleepy(20)).unwrap();
        let f: SleepFn = Box::new(|| Err("no such file".into()));
        sequencer.add(UnitFn::new(f)).unwrap();
        sequencer.add(sleepy(0)).unwrap();
        sequencer.shutdown().unwrap();
        assert_eq!(
            *failures.lock().unwrap(),
            vec![(0, false), (1, true), (2, false)]
        );
        assert_eq!(sequencer.stats().failed, 1);
    }

    #[test]
    fn test_drop_delivers_outstanding_units() {
        let (sequencer, log) = recording(3);
        for ms in [30, 10, 20] {
            sequencer.add(sleepy(ms)).unwrap();
        }
        drop(sequencer);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_concurrent_shutdown_callers_wait_for_drain() {
        let (sequencer, log) = recording(2);
        let sequencer = Arc::new(sequencer);
        for _ in 0..4 {
            sequencer.add(sleepy(50)).unwrap();
        }
        let closers: Vec<_> = (0..3)
            .map(|_| {
                let sequencer = sequencer.clone();
                let log = log.clone();
                thread::spawn(move || {
                    sequencer.shutdown().unwrap();
                    log.lock().unwrap().len()
                })
            })
            .collect();
        for closer in closers {
            assert_eq!(closer.join().unwrap(), 4);
        }
        assert_eq!(sequencer.phase(), PoolPhase::Terminated);
    }

    #[test]
    fn test_shutdown_from_unit_is_rejected() {
        let slot: Arc<OnceLock<Arc<SpawnSequencer<Sleepy>>>> = Arc::new(OnceLock::new());
        let rejected = Arc::new(AtomicUsize::new(0));
        let (sequencer, log) = recording(2);
        let sequencer = Arc::new(sequencer);
        let _ = slot.set(sequencer.clone());

        let (unit_slot, count) = (slot.clone(), rejected.clone());
        let f: SleepFn = Box::new(move || {
            if let Some(sequencer) = unit_slot.get() {
                if let Err(e) = sequencer.shutdown() {
                    assert!(matches!(e.kind(), ErrorKind::InvalidOperation { .. }));
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        });
        sequencer.add(UnitFn::new(f)).unwrap();
        sequencer.add(sleepy(10)).unwrap();

        sequencer.shutdown().unwrap();
        assert_eq!(sequencer.phase(), PoolPhase::Terminated);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), vec![0, 1]);
        assert_eq!(sequencer.stats().failed, 0);
        drop(slot);
    }
}
