//! # Fibonacci Backoff
//!
//! Per-item retry delays for the work queue. The delay grows along the
//! Fibonacci sequence, more slowly than exponential backoff, so a handful of
//! transient control-plane failures are retried quickly while a persistent
//! failure settles at the configured cap.
//!
//! Sequence for a 500ms base and 60s cap: 500ms, 500ms, 1s, 1.5s, 2.5s, 4s, ... 60s.

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, starting with `min` twice and
/// capped at `max`. Calculations run in milliseconds.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff in milliseconds
    prev_ms: u64,
    /// Current backoff in milliseconds
    current_ms: u64,
    /// Maximum backoff in milliseconds
    max_ms: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff between `min` and `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX).max(1);
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX).max(min_ms);
        Self {
            prev_ms: 0,
            current_ms: min_ms,
            max_ms,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_ms;

        let next_ms = self.prev_ms.saturating_add(self.current_ms);
        self.prev_ms = self.current_ms;
        self.current_ms = next_ms.min(self.max_ms);

        Duration::from_millis(result)
    }
}
