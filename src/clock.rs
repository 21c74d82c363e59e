//! Monotonic session clock.

use std::time::{Duration, Instant};

use crate::types::TimeNs;

/// Nanosecond clock anchored at a fixed epoch.
///
/// Backed by `Instant`, so successive readings never go backwards. Copies
/// share the epoch, which keeps timestamps from different threads and
/// primitives of one session comparable.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    epoch: Instant,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    pub fn new() -> Self {
        SimClock {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the epoch.
    pub fn now_ns(&self) -> TimeNs {
        duration_ns(self.epoch.elapsed())
    }
}

/// Saturating conversion of a `Duration` to nanoseconds.
pub fn duration_ns(d: Duration) -> TimeNs {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Nanoseconds as fractional seconds.
pub fn ns_to_secs(ns: TimeNs) -> f64 {
    ns as f64 / 1e9
}
