//! # Fibonacci Backoff
//!
//! Progressive retry delays for failed reconcile passes. The sequence grows
//! more slowly than exponential backoff, so a flapping API server is not
//! hammered while a one-off failure is still retried quickly.
//!
//! Sequence with the defaults: 30s, 30s, 60s, 90s, 150s, 240s, 390s, 600s (max).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min` and capped at `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_secs = min.as_secs().max(1);
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs: max.as_secs().max(min_secs),
        }
    }

    /// Current delay; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;
        let next = self.prev_secs + self.current_secs;
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        Duration::from_secs(result)
    }

    /// Restart the sequence
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}

/// Backoff state per AuditConfig (`namespace/name`)
///
/// Only the error policy and successful passes touch this; it never
/// influences what a pass does, only when the next one runs.
#[derive(Debug)]
pub struct BackoffTracker {
    min: Duration,
    max: Duration,
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffTracker {
    /// Tracker handing out sequences from `min` to `max`
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Next delay for `key` after a failure
    pub fn next_failure_delay(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.min, self.max))
            .next_backoff()
    }

    /// Forget failures of `key` after a successful pass
    pub fn reset(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        states.remove(key);
    }
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(30), Duration::from_secs(600));
        let sequence: Vec<u64> = (0..9).map(|_| secs(&mut backoff)).collect();
        assert_eq!(sequence, vec![30, 30, 60, 90, 150, 240, 390, 600, 600]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 2);

        backoff.reset();
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
    }

    #[test]
    fn test_tracker_is_per_key() {
        let tracker = BackoffTracker::default();
        assert_eq!(tracker.next_failure_delay("ns/a"), Duration::from_secs(30));
        assert_eq!(tracker.next_failure_delay("ns/a"), Duration::from_secs(30));
        assert_eq!(tracker.next_failure_delay("ns/a"), Duration::from_secs(60));
        assert_eq!(tracker.next_failure_delay("ns/b"), Duration::from_secs(30));

        tracker.reset("ns/a");
        assert_eq!(tracker.next_failure_delay("ns/a"), Duration::from_secs(30));
    }
}
