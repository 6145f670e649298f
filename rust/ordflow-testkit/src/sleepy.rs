//! A synthetic work unit that simulates latency by sleeping.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use ordflow_workflow::work_unit::{UnitResult, WorkUnit};

use crate::probe::ConcurrencyProbe;

/// How a [`SleepyUnit`] ends after sleeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    /// Returns an error from `execute`.
    Fail,
    /// Panics inside `execute`.
    Panic,
}

/// Sleeps for its duration, then succeeds, fails or panics.
pub struct SleepyUnit {
    id: u32,
    duration: Duration,
    outcome: Outcome,
    probe: Option<Arc<ConcurrencyProbe>>,
    executions: AtomicUsize,
}

impl SleepyUnit {
    pub fn new(id: u32, duration: Duration) -> SleepyUnit {
        SleepyUnit {
            id,
            duration,
            outcome: Outcome::Succeed,
            probe: None,
            executions: AtomicUsize::new(0),
        }
    }

    pub fn millis(id: u32, ms: u64) -> SleepyUnit {
        Self::new(id, Duration::from_millis(ms))
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> SleepyUnit {
        self.outcome = outcome;
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> SleepyUnit {
        self.probe = Some(probe);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// How many times `execute` was called.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl WorkUnit for SleepyUnit {
    fn execute(&self) -> UnitResult {
        let _guard = self.probe.as_ref().map(|p| p.enter());
        self.executions.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.duration);
        match self.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(format!("unit {} failed", self.id).into()),
            Outcome::Panic => panic!("unit {} panicked", self.id),
        }
    }

    fn describe(&self) -> Option<String> {
        Some(format!("id {}, {} ms", self.id, self.duration.as_millis()))
    }
}

/// Builds units numbered from 1 with the given durations.
pub fn sleepy_units(durations: &[Duration]) -> Vec<SleepyUnit> {
    durations
        .iter()
        .zip(1..)
        .map(|(d, id)| SleepyUnit::new(id, *d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleepy_unit_outcomes() {
        let ok = SleepyUnit::millis(1, 0);
        assert!(ok.execute().is_ok());
        assert_eq!(ok.executions(), 1);
        assert_eq!(ok.describe().as_deref(), Some("id 1, 0 ms"));

        let failing = SleepyUnit::millis(2, 0).with_outcome(Outcome::Fail);
        assert_eq!(failing.execute().unwrap_err().to_string(), "unit 2 failed");
    }

    #[test]
    fn test_sleepy_units_numbering() {
        let units = sleepy_units(&crate::data_gen::millis(&[5, 10]));
        assert_eq!(units.iter().map(SleepyUnit::id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(units[1].duration(), Duration::from_millis(10));
    }
}
