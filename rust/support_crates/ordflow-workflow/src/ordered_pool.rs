//! Fixed-size worker pool with in-order delivery.
//!
//! [`OrderedPool`] runs submitted units on `num_threads` worker threads, in no
//! particular completion order, and releases them to a [`Consumer`] on a single
//! sequencer thread strictly in the order they were submitted.
//!
//! # Threads and wake-ups
//!
//! All state lives in one [`OrderRecord`] guarded by one mutex, with three
//! condition variables:
//!
//! - `work_available`: workers wait here while nothing is left to dispatch
//! - `head_ready`: the sequencer waits here while the head of the record is
//!   pending; every completion (not only the head's) notifies it, and the
//!   sequencer re-checks only the head
//! - `terminated`: concurrent `shutdown` callers wait here for the one that
//!   performs the drain
//!
//! # Head-of-line blocking
//!
//! A slow unit delays the delivery of every unit submitted after it, even
//! those that already finished. This is inherent to in-order delivery. In
//! particular, a unit whose action never returns stalls delivery forever.
//!
//! # Cancellation
//!
//! Not supported: an accepted unit always runs to completion or failure.

use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
};

use ordflow_common::{Result, error::Error, verify_arg};

use crate::{
    delivery::{Consumer, deliver_to},
    executor::{OrderedExecutor, PoolPhase, PoolStats},
    order_record::OrderRecord,
    unit_state::Ticket,
    work_unit::WorkUnit,
};

/// A fixed-size worker pool that delivers completed units in submission order.
///
/// ## Usage
///
/// ```rust,no_run
/// use ordflow_workflow::{
///     delivery::Delivery,
///     ordered_pool::OrderedPool,
///     work_unit::{BoxedUnit, UnitFn},
/// };
///
/// let pool = OrderedPool::new(4, |delivery: Delivery<BoxedUnit>| {
///     println!("unit #{} delivered", delivery.seq());
/// })
/// .unwrap();
/// for i in 0..10u64 {
///     pool.add(Box::new(UnitFn::new(move || {
///         std::thread::sleep(std::time::Duration::from_millis(10 * (10 - i)));
///         Ok(())
///     })))
///     .unwrap();
/// }
/// pool.shutdown().unwrap();
/// ```
///
/// ## Drop Behavior
///
/// Dropping a pool that has not been shut down performs [`shutdown`](Self::shutdown),
/// blocking until every accepted unit has been delivered.
pub struct OrderedPool<U: WorkUnit> {
    shared: Arc<Shared<U>>,
    threads: Mutex<Option<Threads>>,
    sequencer_id: ThreadId,
    worker_ids: Vec<ThreadId>,
    num_threads: usize,
}

impl<U: WorkUnit> OrderedPool<U> {
    /// Creates a pool with `num_threads` workers delivering to `consumer`.
    ///
    /// Fails with `InvalidArgument` if `num_threads` is 0 or exceeds
    /// [`MAX_POOL_SIZE`].
    pub fn new(num_threads: usize, consumer: impl Consumer<U>) -> Result<OrderedPool<U>> {
        OrderedPoolBuilder::new()
            .num_threads(num_threads)
            .build(consumer)
    }

    /// Creates a pool sized by [`default_pool_size`].
    pub fn with_default_threads(consumer: impl Consumer<U>) -> Result<OrderedPool<U>> {
        OrderedPoolBuilder::new().build(consumer)
    }

    pub fn builder() -> OrderedPoolBuilder {
        OrderedPoolBuilder::new()
    }

    /// Submits a unit for execution and eventual in-order delivery.
    ///
    /// Never blocks beyond the short record lock. Fails with `PoolClosed` once
    /// [`shutdown`](Self::shutdown) has begun; an `add` that wins the lock
    /// before the phase flips is accepted and will be delivered.
    pub fn add(&self, unit: U) -> Result<Ticket> {
        let ticket = self.shared.lock().push(unit)?;
        log::trace!("accepted unit #{}", ticket.seq());
        self.shared.work_available.notify_one();
        Ok(ticket)
    }

    /// Stops accepting units, waits for the workers to drain the record, then
    /// waits for the sequencer to deliver every remaining unit.
    ///
    /// Returns only after every accepted unit has been delivered exactly once.
    /// Idempotent: later (or concurrent) calls block until the drain is
    /// complete and then return `Ok(())`.
    ///
    /// Calling it from the consumer or from a unit's `execute` would join the
    /// calling thread itself, and is rejected with `InvalidOperation`.
    pub fn shutdown(&self) -> Result<()> {
        let current = thread::current().id();
        if current == self.sequencer_id {
            return Err(Error::invalid_operation("shutdown from the consumer"));
        }
        if self.worker_ids.contains(&current) {
            return Err(Error::invalid_operation("shutdown from a work unit"));
        }

        {
            let mut record = self.shared.lock();
            match record.phase() {
                PoolPhase::Accepting => record.set_phase(PoolPhase::Draining),
                PoolPhase::Draining => {
                    let _record = self
                        .shared
                        .terminated
                        .wait_while(record, |r| r.phase() != PoolPhase::Terminated)
                        .unwrap_or_else(PoisonError::into_inner);
                    return Ok(());
                }
                PoolPhase::Terminated => return Ok(()),
            }
            log::debug!("draining ordered pool, {} units outstanding", record.len());
        }
        self.shared.work_available.notify_all();

        let threads = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let result = match threads {
            Some(threads) => self.join(threads),
            None => Ok(()),
        };

        self.shared.lock().set_phase(PoolPhase::Terminated);
        self.shared.terminated.notify_all();
        log::debug!("ordered pool terminated");
        result
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().stats()
    }

    pub fn phase(&self) -> PoolPhase {
        self.shared.lock().phase()
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn join(&self, threads: Threads) -> Result<()> {
        let mut result = Ok(());
        for (i, worker) in threads.workers.into_iter().enumerate() {
            if worker.join().is_err() {
                log::error!("worker {i} panicked");
                result = Err(Error::thread_panicked(format!("worker {i}")));
            }
        }

        {
            let mut record = self.shared.lock();
            let abandoned = record.abandon_unfinished();
            if abandoned != 0 {
                log::error!("{abandoned} units abandoned by exited workers");
            }
            record.set_workers_exited();
        }
        self.shared.head_ready.notify_all();

        if let Some(sequencer) = threads.sequencer {
            if sequencer.join().is_err() {
                log::error!("sequencer panicked");
                result = Err(Error::thread_panicked("sequencer"));
            }
        }
        result
    }
}

impl<U: WorkUnit> OrderedExecutor<U> for OrderedPool<U> {
    fn add(&self, unit: U) -> Result<Ticket> {
        OrderedPool::add(self, unit)
    }

    fn shutdown(&self) -> Result<()> {
        OrderedPool::shutdown(self)
    }

    fn stats(&self) -> PoolStats {
        OrderedPool::stats(self)
    }

    fn phase(&self) -> PoolPhase {
        OrderedPool::phase(self)
    }
}

impl<U: WorkUnit> Drop for OrderedPool<U> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("ordered pool shutdown on drop failed: {e}");
        }
    }
}

/// Configures and starts an [`OrderedPool`].
///
/// ```rust,no_run
/// use ordflow_workflow::{delivery::Delivery, ordered_pool::OrderedPool, work_unit::BoxedUnit};
///
/// let pool = OrderedPool::<BoxedUnit>::builder()
///     .num_threads(8)
///     .thread_name(|i| format!("resize-{i}"))
///     .build(|d: Delivery<BoxedUnit>| println!("{}", d.seq()))
///     .unwrap();
/// pool.shutdown().unwrap();
/// ```
pub struct OrderedPoolBuilder {
    num_threads: Option<usize>,
    thread_name: Box<dyn Fn(usize) -> String>,
    sequencer_name: String,
}

impl OrderedPoolBuilder {
    pub fn new() -> OrderedPoolBuilder {
        OrderedPoolBuilder {
            num_threads: None,
            thread_name: Box::new(|i| format!("ordflow-worker-{i}")),
            sequencer_name: "ordflow-sequencer".to_string(),
        }
    }

    /// Number of worker threads, from 1 to [`MAX_POOL_SIZE`]. Defaults to
    /// [`default_pool_size`].
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Names worker threads by index. An empty name leaves the thread unnamed.
    pub fn thread_name(mut self, thread_name: impl Fn(usize) -> String + 'static) -> Self {
        self.thread_name = Box::new(thread_name);
        self
    }

    pub fn sequencer_name(mut self, name: impl Into<String>) -> Self {
        self.sequencer_name = name.into();
        self
    }

    /// Spawns the sequencer and the workers.
    pub fn build<U: WorkUnit>(self, consumer: impl Consumer<U>) -> Result<OrderedPool<U>> {
        let num_threads = self.num_threads.unwrap_or_else(default_pool_size);
        verify_arg!(num_threads, (1..=MAX_POOL_SIZE).contains(&num_threads));

        let shared = Arc::new(Shared {
            record: Mutex::new(OrderRecord::new()),
            work_available: Condvar::new(),
            head_ready: Condvar::new(),
            terminated: Condvar::new(),
        });

        let sequencer = {
            let shared = shared.clone();
            let mut consumer: Box<dyn Consumer<U>> = Box::new(consumer);
            spawn_named(&self.sequencer_name, move || {
                Shared::sequencer_fn(shared, consumer.as_mut())
            })?
        };
        let sequencer_id = sequencer.thread().id();

        let mut workers = Vec::with_capacity(num_threads);
        let mut spawn_error = None;
        for i in 0..num_threads {
            let shared = shared.clone();
            match spawn_named(&(self.thread_name)(i), move || Shared::worker_fn(shared, i)) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    spawn_error = Some(e);
                    break;
                }
            }
        }

        let pool = OrderedPool {
            shared,
            worker_ids: workers.iter().map(|w| w.thread().id()).collect(),
            threads: Mutex::new(Some(Threads {
                workers,
                sequencer: Some(sequencer),
            })),
            sequencer_id,
            num_threads,
        };

        if let Some(e) = spawn_error {
            // The partially started pool is torn down by `shutdown`.
            let _ = pool.shutdown();
            return Err(e);
        }
        log::debug!("ordered pool started with {num_threads} workers");
        Ok(pool)
    }
}

impl Default for OrderedPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Upper bound on the number of worker threads of one pool.
pub const MAX_POOL_SIZE: usize = 4096;

/// Configures the pool size used when no explicit size is given.
///
/// Values are clamped to `1..=MAX_POOL_SIZE`. Affects pools created afterwards.
pub fn configure_default_pool_size(pool_size: usize) {
    DEFAULT_POOL_SIZE.store(pool_size.clamp(1, MAX_POOL_SIZE), Ordering::SeqCst);
}

/// The pool size used when no explicit size is given: the value set by
/// [`configure_default_pool_size`], otherwise the system's available
/// parallelism (capped at [`MAX_POOL_SIZE`]), otherwise 8.
pub fn default_pool_size() -> usize {
    match DEFAULT_POOL_SIZE.load(Ordering::SeqCst) {
        0 => thread::available_parallelism()
            .map(|n| n.get().min(MAX_POOL_SIZE))
            .unwrap_or(8),
        size => size,
    }
}

static DEFAULT_POOL_SIZE: AtomicUsize = AtomicUsize::new(0);

struct Threads {
    workers: Vec<JoinHandle<()>>,
    sequencer: Option<JoinHandle<()>>,
}

struct Shared<U> {
    record: Mutex<OrderRecord<U>>,
    work_available: Condvar,
    head_ready: Condvar,
    terminated: Condvar,
}

impl<U: WorkUnit> Shared<U> {
    fn lock(&self) -> MutexGuard<'_, OrderRecord<U>> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker_fn(shared: Arc<Shared<U>>, index: usize) {
        loop {
            let slot = {
                let mut record = shared.lock();
                loop {
                    if let Some(slot) = record.claim_next() {
                        break slot;
                    }
                    if record.worker_should_exit() {
                        log::debug!("worker {index} exiting");
                        return;
                    }
                    record = shared
                        .work_available
                        .wait(record)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            log::trace!("worker {index} running {}", slot.label());
            let succeeded = slot.run();
            drop(slot);

            // Taking the lock orders this completion after any head check the
            // sequencer is doing, so the notification cannot be lost.
            shared.lock().record_completion(succeeded);
            shared.head_ready.notify_one();
        }
    }

    fn sequencer_fn(shared: Arc<Shared<U>>, consumer: &mut dyn Consumer<U>) {
        loop {
            let slot = {
                let mut record = shared.lock();
                loop {
                    if let Some(slot) = record.pop_ready_head() {
                        break Some(slot);
                    }
                    if record.is_drained() {
                        break None;
                    }
                    record = shared
                        .head_ready
                        .wait(record)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };
            let Some(slot) = slot else {
                break;
            };
            deliver_to(consumer, slot);
            shared.lock().record_delivered();
        }
        log::debug!("sequencer exiting");
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = thread::Builder::new();
    if !name.is_empty() {
        builder = builder.name(name.to_string());
    }
    builder
        .spawn(f)
        .map_err(|e| Error::thread_spawn(name.to_string(), e))
}
