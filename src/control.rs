//! Shared run/pause/stop flags and the simulation speed multiplier.
//!
//! There is no forced preemption in the simulator. Work functions poll a
//! `SimControl` between steps: `proceed()` parks the caller while the run is
//! paused and reports `false` once it has been stopped, and `sleep()` scales
//! a nominal delay by the speed multiplier and wakes early on stop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::lock;

/// Lower bound of the speed multiplier.
pub const MIN_SPEED: f64 = 0.1;
/// Upper bound of the speed multiplier.
pub const MAX_SPEED: f64 = 10.0;

#[derive(Debug, Default)]
struct Flags {
    paused: bool,
    stopped: bool,
}

#[derive(Debug)]
pub struct SimControl {
    flags: Mutex<Flags>,
    changed: Condvar,
    /// f64 bits of the speed multiplier.
    speed: AtomicU64,
}

impl Default for SimControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SimControl {
    pub fn new() -> Self {
        SimControl {
            flags: Mutex::new(Flags::default()),
            changed: Condvar::new(),
            speed: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    /// Neither paused nor stopped.
    pub fn is_running(&self) -> bool {
        let flags = lock(&self.flags);
        !flags.paused && !flags.stopped
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.flags).paused
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.flags).stopped
    }

    pub fn pause(&self) {
        lock(&self.flags).paused = true;
        self.changed.notify_all();
    }

    pub fn resume(&self) {
        lock(&self.flags).paused = false;
        self.changed.notify_all();
    }

    /// Cancel the run. Parked and sleeping work functions wake immediately.
    pub fn stop(&self) {
        let mut flags = lock(&self.flags);
        flags.stopped = true;
        flags.paused = false;
        drop(flags);
        self.changed.notify_all();
    }

    /// Clear both flags ahead of a new run.
    pub fn rearm(&self) {
        *lock(&self.flags) = Flags::default();
        self.changed.notify_all();
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::Relaxed))
    }

    /// Set the speed multiplier, clamped to [`MIN_SPEED`, `MAX_SPEED`].
    /// Returns the value actually applied.
    pub fn set_speed(&self, speed: f64) -> f64 {
        let speed = clamp_speed(speed);
        self.speed.store(speed.to_bits(), Ordering::Relaxed);
        speed
    }

    /// Block while paused. Returns `false` if the run has been stopped.
    pub fn proceed(&self) -> bool {
        let flags = lock(&self.flags);
        let flags = self
            .changed
            .wait_while(flags, |f| f.paused && !f.stopped)
            .unwrap_or_else(|e| e.into_inner());
        !flags.stopped
    }

    /// Sleep for `nominal` divided by the speed multiplier.
    ///
    /// Time spent paused does not count towards the delay. Returns `false`
    /// if the run was stopped before the delay elapsed.
    pub fn sleep(&self, nominal: Duration) -> bool {
        let mut remaining = nominal.div_f64(self.speed());
        let mut flags = lock(&self.flags);
        loop {
            if flags.stopped {
                return false;
            }
            if flags.paused {
                flags = self
                    .changed
                    .wait_while(flags, |f| f.paused && !f.stopped)
                    .unwrap_or_else(|e| e.into_inner());
                continue;
            }
            if remaining.is_zero() {
                return true;
            }
            let started = Instant::now();
            let (guard, _) = self
                .changed
                .wait_timeout(flags, remaining)
                .unwrap_or_else(|e| e.into_inner());
            flags = guard;
            remaining = remaining.saturating_sub(started.elapsed());
        }
    }
}

/// Clamp a requested speed multiplier into the supported range.
///
/// NaN maps to 1.0.
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        1.0
    } else {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}
