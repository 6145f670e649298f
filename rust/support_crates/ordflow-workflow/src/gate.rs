//! A counting gate that bounds how many units may execute at once.
//!
//! [`ConcurrencyGate::acquire`] blocks while all permits are taken; the
//! returned [`Permit`] gives its slot back when dropped.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use ordflow_common::{Result, verify_arg};

pub struct ConcurrencyGate {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

impl ConcurrencyGate {
    /// Creates a gate admitting at most `capacity` concurrent holders.
    pub fn new(capacity: usize) -> Result<Arc<ConcurrencyGate>> {
        verify_arg!(capacity, capacity >= 1);
        Ok(Arc::new(ConcurrencyGate {
            available: Mutex::new(capacity),
            released: Condvar::new(),
            capacity,
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    fn in_use(&self) -> usize {
        self.capacity - *self.lock()
    }

    /// Blocks until a permit is available.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let available = self.lock();
        let mut available = self
            .released
            .wait_while(available, |n| *n == 0)
            .unwrap_or_else(PoisonError::into_inner);
        *available -= 1;
        Permit(self.clone())
    }

    fn release(&self) {
        let mut available = self.lock();
        debug_assert!(*available < self.capacity);
        *available += 1;
        drop(available);
        self.released.notify_one();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held slot of a [`ConcurrencyGate`].
pub struct Permit(Arc<ConcurrencyGate>);

impl Drop for Permit {
    fn drop(&mut self) {
        self.0.release();
    }
}
