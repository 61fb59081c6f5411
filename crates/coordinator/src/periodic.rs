//! Wall-clock rate limiting for log lines.

use std::time::{Duration, Instant};

/// A value-type gate that opens at most once per interval.
///
/// Used to rate-limit progress logging without allocating timers.
#[derive(Debug, Clone)]
pub struct Periodic {
    interval: Duration,
    last: Option<Instant>,
}

impl Periodic {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` at most once per interval. The first poll fires
    /// immediately.
    pub fn poll(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Suppress the gate for a full interval from now.
    pub fn reset(&mut self) {
        self.last = Some(Instant::now());
    }
}
