//! Data generation utilities for testing.

use std::time::Duration;

/// Generates `count` durations uniformly distributed in `0..=max_ms`
/// milliseconds, reproducibly from `seed`.
pub fn random_durations(count: usize, max_ms: u64, seed: u64) -> Vec<Duration> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..count)
        .map(|_| Duration::from_millis(rng.u64(0..=max_ms)))
        .collect()
}

/// Converts a list of millisecond values into durations.
pub fn millis(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_millis).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_durations_reproducible() {
        let a = random_durations(16, 50, 42);
        let b = random_durations(16, 50, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.iter().all(|d| *d <= Duration::from_millis(50)));
    }

    #[test]
    fn test_millis() {
        assert_eq!(
            millis(&[1, 2]),
            vec![Duration::from_millis(1), Duration::from_millis(2)]
        );
    }
}
