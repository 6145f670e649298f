//! A single-use completion signal between an execution thread and a waiter.
//!
//! [`channel`] returns a [`Completer`] for the thread doing the work and a
//! [`CompletionHandle`] for the thread waiting on it. The completer resolves
//! the handle at most once; if it is dropped without resolving, the handle
//! resolves as abandoned, so a waiter never blocks on work that can no longer
//! finish.
//!
//! ## Lifecycle
//!
//! 1. Pending: the work is queued or running
//! 2. Ready: [`Completer::complete`] stored a value
//! 3. Abandoned: the completer was dropped without completing
//! 4. Taken: the value was consumed by [`CompletionHandle::wait`]

use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Creates a connected completer/handle pair.
pub fn channel<T>() -> (Completer<T>, CompletionHandle<T>) {
    let cell = Arc::new(CompletionCell::new());
    (Completer(Some(cell.clone())), CompletionHandle(cell))
}

/// The resolving side. Not cloneable: exactly one thread owns the work.
pub struct Completer<T>(Option<Arc<CompletionCell<T>>>);

impl<T> Completer<T> {
    /// Resolves the handle with `value`.
    pub fn complete(mut self, value: T) {
        if let Some(cell) = self.0.take() {
            cell.resolve(State::Ready(value));
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.0.take() {
            cell.resolve(State::Abandoned);
        }
    }
}

/// The waiting side.
pub struct CompletionHandle<T>(Arc<CompletionCell<T>>);

impl<T> CompletionHandle<T> {
    /// `true` once the completer has either completed or been dropped.
    #[cfg(test)]
    fn is_ready(&self) -> bool {
        !self.0.lock().is_pending()
    }

    /// Blocks until the handle resolves.
    ///
    /// Returns `Some(value)` if the work completed, `None` if it was
    /// abandoned.
    pub fn wait(self) -> Option<T> {
        let state = self.0.lock();
        let mut state = self
            .0
            .resolved
            .wait_while(state, |s| s.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        state.take()
    }
}

struct CompletionCell<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

impl<T> CompletionCell<T> {
    fn new() -> CompletionCell<T> {
        CompletionCell {
            state: Mutex::new(State::Pending),
            resolved: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, new_state: State<T>) {
        let mut state = self.lock();
        if state.is_pending() {
            *state = new_state;
        }
        drop(state);
        self.resolved.notify_all();
    }
}

enum State<T> {
    Pending,
    Ready(T),
    Abandoned,
    Taken,
}

impl<T> State<T> {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    /// Consumes a resolved state.
    fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, State::Taken) {
            State::Ready(value) => Some(value),
            State::Pending => {
                *self = State::Pending;
                None
            }
            State::Abandoned | State::Taken => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn test_completion_send_sync() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<CompletionHandle<usize>>();
        is_send_sync::<Completer<usize>>();
    }

    #[test]
    fn test_complete_from_other_thread() {
        let (completer, handle) = channel::<u32>();
        assert!(!handle.is_ready());
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(7);
        });
        assert_eq!(handle.wait(), Some(7));
    }

    #[test]
    fn test_dropped_completer_abandons() {
        let (completer, handle) = channel::<u32>();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(completer);
        });
        assert_eq!(handle.wait(), None);
    }

    #[test]
    fn test_complete_before_wait() {
        let (completer, handle) = channel();
        completer.complete("done");
        assert!(handle.is_ready());
        assert_eq!(handle.wait(), Some("done"));
    }
}
