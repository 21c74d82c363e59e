//! Ready-made work functions for common thread patterns.
//!
//! Each function returns a [`WorkFn`] for a well-known burst shape. All of
//! them sleep through [`WorkContext::sleep`], so they follow the session's
//! speed multiplier, park while paused and end early once the run is
//! stopped or the thread is terminated.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::sync::{Monitor, Semaphore, SyncError};
use crate::thread::{work_fn, WorkContext, WorkFn};

/// Sizes of the example simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleSpec {
    pub processes: usize,
    pub threads_per_process: usize,
    pub semaphore_value: u32,
    /// Critical-section steps per thread.
    pub steps: u32,
    pub step: Duration,
    /// Retry interval while the semaphore is unavailable.
    pub poll: Duration,
}

impl Default for ExampleSpec {
    fn default() -> Self {
        ExampleSpec {
            processes: 1,
            threads_per_process: 5,
            semaphore_value: 1,
            steps: 10,
            step: Duration::from_millis(200),
            poll: Duration::from_millis(100),
        }
    }
}

/// Advance progress in `steps` equal increments, sleeping `step` each time.
/// Returns `false` if the burst was cancelled part way.
pub fn advance(ctx: &WorkContext<'_>, steps: u32, step: Duration) -> bool {
    if steps == 0 {
        ctx.set_progress(100);
        return true;
    }
    for i in 1..=steps {
        if !ctx.sleep(step) {
            return false;
        }
        ctx.set_progress((i as u64 * 100 / steps as u64) as u8);
    }
    true
}

/// Plain progress loop with no synchronization.
pub fn progress_loop(steps: u32, step: Duration) -> WorkFn {
    work_fn(move |ctx| {
        advance(ctx, steps, step);
        Ok(())
    })
}

/// Poll `sem` every `poll` until a permit is taken, run the critical
/// section, then release the permit.
///
/// A thread that regains the permit after being blocked is re-dispatched
/// (Ready → Running) before entering the critical section.
pub fn semaphore_guarded(
    sem: Arc<Semaphore>,
    steps: u32,
    step: Duration,
    poll: Duration,
) -> WorkFn {
    work_fn(move |ctx| {
        let thread = ctx.thread();
        while !sem.wait(thread) {
            if !ctx.sleep(poll) {
                debug!(thread = %thread.id(), sem = sem.name(), "gave up waiting");
                return Ok(());
            }
        }
        thread.dispatch();
        advance(ctx, steps, step);
        sem.signal(Some(thread.as_ref()));
        Ok(())
    })
}

/// Like [`semaphore_guarded`] but parks on [`Semaphore::acquire`] instead of
/// polling.
pub fn semaphore_blocking(sem: Arc<Semaphore>, steps: u32, step: Duration) -> WorkFn {
    work_fn(move |ctx| {
        let thread = ctx.thread();
        match sem.acquire(thread) {
            Ok(()) => {}
            Err(SyncError::Interrupted { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        thread.dispatch();
        advance(ctx, steps, step);
        sem.signal(Some(thread.as_ref()));
        Ok(())
    })
}

/// Run the critical section inside `monitor`. `enter` re-dispatches a
/// thread that had to queue.
pub fn monitor_guarded(monitor: Arc<Monitor>, steps: u32, step: Duration) -> WorkFn {
    work_fn(move |ctx| {
        let thread = ctx.thread();
        match monitor.enter(thread) {
            Ok(()) => {}
            Err(SyncError::Interrupted { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        advance(ctx, steps, step);
        monitor.exit(thread)?;
        Ok(())
    })
}
