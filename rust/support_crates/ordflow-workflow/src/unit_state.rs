//! Per-unit completion state and the submitter-side [`Ticket`].
//!
//! Every submitted unit is paired with a [`UnitState`]. The state starts
//! *pending* and is transitioned exactly once, by the thread that executed the
//! unit, to either *ready* or *failed*. The transition is monotonic: once
//! [`UnitState::is_ready`] returns `true` it never reverts.
//!
//! ## Lifecycle
//!
//! 1. **Pending**: submitted, queued or executing
//! 2. **Ready**: the action returned `Ok(())`
//! 3. **Failed**: the action returned an error or panicked; the failure is
//!    attached to the state and travels with the unit to its delivery

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, Ordering},
};

use ordflow_common::error::Error;

const PENDING: u8 = 0;
const READY: u8 = 1;
const FAILED: u8 = 2;

/// Completion state of a single submitted unit.
pub struct UnitState {
    status: AtomicU8,
    failure: OnceLock<Error>,
}

impl UnitState {
    pub(crate) fn new() -> UnitState {
        UnitState {
            status: AtomicU8::new(PENDING),
            failure: OnceLock::new(),
        }
    }

    /// Records the outcome of the unit's action.
    ///
    /// Only the first call has an effect; the state never leaves the ready
    /// (or failed) status once it has reached it.
    pub(crate) fn complete(&self, outcome: Result<(), Error>) -> bool {
        match outcome {
            Ok(()) => self
                .status
                .compare_exchange(PENDING, READY, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            Err(e) => {
                if self.status.load(Ordering::Acquire) != PENDING {
                    return false;
                }
                // The failure must be visible before the status flips.
                if self.failure.set(e).is_err() {
                    return false;
                }
                self.status
                    .compare_exchange(PENDING, FAILED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }
        }
    }

    /// Non-blocking readiness check. `true` for both successful and failed
    /// units.
    pub fn is_ready(&self) -> bool {
        self.status.load(Ordering::Acquire) != PENDING
    }

    /// `true` if the unit completed with a failure.
    pub fn is_failed(&self) -> bool {
        self.status.load(Ordering::Acquire) == FAILED
    }

    /// The failure attached to the unit, if it failed.
    pub fn failure(&self) -> Option<&Error> {
        if self.is_failed() {
            self.failure.get()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self.status.load(Ordering::Acquire) {
            PENDING => "pending",
            READY => "ready",
            _ => "failed",
        };
        f.debug_struct("UnitState")
            .field("status", &status)
            .field("failure", &self.failure.get())
            .finish()
    }
}

/// Submitter-side view of an accepted unit.
///
/// Returned by `add`; allows the submitter to learn the unit's sequence
/// number and to poll its readiness without holding on to the unit itself.
#[derive(Clone, Debug)]
pub struct Ticket {
    seq: u64,
    state: Arc<UnitState>,
}

impl Ticket {
    pub(crate) fn new(seq: u64, state: Arc<UnitState>) -> Ticket {
        Ticket { seq, state }
    }

    /// Zero-based submission position of the unit.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    pub fn failure(&self) -> Option<&Error> {
        self.state.failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_is_monotonic() {
        let state = UnitState::new();
        assert!(!state.is_ready());
        assert!(state.complete(Ok(())));
        assert!(state.is_ready());
        assert!(!state.is_failed());

        // Later transitions are ignored.
        assert!(!state.complete(Err(Error::unit_panicked(0, "late"))));
        assert!(state.is_ready());
        assert!(!state.is_failed());
        assert!(state.failure().is_none());
    }

    #[test]
    fn test_failed_state_carries_error() {
        let state = UnitState::new();
        assert!(state.complete(Err(Error::execution_failed(4, "io".into()))));
        assert!(state.is_ready());
        assert!(state.is_failed());
        assert_eq!(state.failure().and_then(Error::unit_seq), Some(4));
        assert!(!state.complete(Ok(())));
        assert!(state.is_failed());
    }

    #[test]
    fn test_ticket_observes_state() {
        let state = Arc::new(UnitState::new());
        let ticket = Ticket::new(9, state.clone());
        assert_eq!(ticket.seq(), 9);
        assert!(!ticket.is_ready());

        let observer = ticket.clone();
        let handle = std::thread::spawn(move || {
            state.complete(Ok(()));
        });
        handle.join().unwrap();
        assert!(observer.is_ready());
        assert!(ticket.is_ready());
    }

    #[test]
    fn test_concurrent_readiness_queries() {
        let state = Arc::new(UnitState::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    let mut seen_ready = false;
                    for _ in 0..10_000 {
                        let ready = state.is_ready();
                        assert!(!(seen_ready && !ready), "readiness reverted");
                        seen_ready |= ready;
                    }
                })
            })
            .collect();
        state.complete(Ok(()));
        for r in readers {
            r.join().unwrap();
        }
        assert!(state.is_ready());
    }
}
