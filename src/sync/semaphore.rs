//! Counting semaphore with a FIFO wait queue.
//!
//! `value` and the wait queue are never both non-empty: a thread is only
//! queued when no permit is free, and `signal` hands its permit straight to
//! the head of the queue instead of incrementing `value` whenever someone is
//! waiting. A handed-off permit is parked as a grant for that thread and
//! consumed by its next `wait` (or wakes it if it is inside `acquire`).
//! A grant never outlives its thread: once the holder is terminated the
//! permit is reclaimed and released again.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use serde::Serialize;
use tracing::{debug, trace};

use crate::clock::SimClock;
use crate::lock;
use crate::sync::{AuditLog, EventSink, LogEntry, ResourceKind, ResourceRef, SyncError, SyncEvent};
use crate::thread::SimThread;
use crate::types::ThreadId;

#[derive(Debug)]
struct SemState {
    value: u32,
    waiting: VecDeque<Arc<SimThread>>,
    /// Threads released by `signal` that have not yet claimed their permit.
    granted: Vec<Arc<SimThread>>,
    log: AuditLog,
    /// Bumped by `reset`/`interrupt` to cut blocked `acquire` calls short.
    epoch: u64,
}

/// Outcome of one acquisition attempt.
enum Attempt {
    Acquired,
    Queued,
    Refused,
}

pub struct Semaphore {
    name: String,
    initial: u32,
    clock: SimClock,
    sink: Option<Arc<dyn EventSink>>,
    state: Mutex<SemState>,
    wakeup: Condvar,
}

/// Snapshot of a semaphore for statistics and export.
#[derive(Debug, Clone, Serialize)]
pub struct SemaphoreSummary {
    pub name: String,
    pub value: u32,
    pub initial_value: u32,
    pub waiting_threads: usize,
    pub log: Vec<LogEntry>,
}

impl Semaphore {
    pub fn new(value: u32, name: &str) -> Self {
        Semaphore {
            name: name.to_string(),
            initial: value,
            clock: SimClock::new(),
            sink: None,
            state: Mutex::new(SemState {
                value,
                waiting: VecDeque::new(),
                granted: Vec::new(),
                log: AuditLog::default(),
                epoch: 0,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Stamp audit entries from `clock` instead of a private one.
    pub fn with_clock(mut self, clock: SimClock) -> Self {
        self.clock = clock;
        self
    }

    /// Publish notifications to `sink`, starting with a creation event.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        sink.publish(SyncEvent::SemaphoreCreated {
            name: self.name.clone(),
            count: self.initial,
        });
        self.sink = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> u32 {
        lock(&self.state).value
    }

    pub fn initial_value(&self) -> u32 {
        self.initial
    }

    pub fn waiting_count(&self) -> usize {
        lock(&self.state).waiting.len()
    }

    /// Ids of queued threads, head first.
    pub fn waiting_threads(&self) -> Vec<ThreadId> {
        lock(&self.state).waiting.iter().map(|t| t.id()).collect()
    }

    pub fn log(&self) -> Vec<LogEntry> {
        lock(&self.state).log.entries()
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(ResourceKind::Semaphore, self.name.clone())
    }

    /// Try to take a permit for `thread`.
    ///
    /// Returns `true` when a permit was taken. Otherwise the thread is
    /// blocked on this semaphore, queued (once; retries keep their place)
    /// and `false` is returned: the caller is expected to retry later.
    pub fn wait(&self, thread: &Arc<SimThread>) -> bool {
        let mut state = lock(&self.state);
        matches!(self.attempt(&mut state, thread), Attempt::Acquired)
    }

    /// Blocking variant of [`wait`](Self::wait) with the same FIFO order.
    ///
    /// Returns `Err(SyncError::Interrupted)` if the semaphore is reset or
    /// interrupted, or the thread is terminated, while waiting.
    pub fn acquire(&self, thread: &Arc<SimThread>) -> Result<(), SyncError> {
        let id = thread.id();
        let mut state = lock(&self.state);
        let epoch = state.epoch;
        loop {
            match self.attempt(&mut state, thread) {
                Attempt::Acquired => return Ok(()),
                Attempt::Refused => return Err(self.interrupted()),
                Attempt::Queued => {}
            }
            state = self
                .wakeup
                .wait_while(state, |s| {
                    if self.reclaim_grants(s) {
                        self.wakeup.notify_all();
                    }
                    s.epoch == epoch
                        && !s.granted.iter().any(|g| g.id() == id)
                        && !(s.value > 0 && s.waiting.is_empty())
                })
                .unwrap_or_else(|e| e.into_inner());
            if state.epoch != epoch {
                return Err(self.interrupted());
            }
        }
    }

    /// Release a permit.
    ///
    /// If threads are queued, the head is unblocked and handed the permit;
    /// otherwise `value` is incremented. Never both.
    pub fn signal(&self, releaser: Option<&SimThread>) {
        let mut state = lock(&self.state);
        self.reclaim_grants(&mut state);
        self.release(&mut state, releaser.map(SimThread::name));
        drop(state);
        self.wakeup.notify_all();
    }

    /// Release the permits of granted threads that were terminated before
    /// claiming them, waking anyone who can now proceed.
    pub fn reclaim_abandoned(&self) {
        let mut state = lock(&self.state);
        let reclaimed = self.reclaim_grants(&mut state);
        drop(state);
        if reclaimed {
            self.wakeup.notify_all();
        }
    }

    /// Restore the construction-time value and clear the queue, pending
    /// grants and the log. Blocked `acquire` calls return `Interrupted`.
    ///
    /// Queued threads keep whatever state they are in; the caller resets
    /// thread states separately.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.value = self.initial;
        state.waiting.clear();
        state.granted.clear();
        state.log.clear();
        state.epoch += 1;
        drop(state);
        self.wakeup.notify_all();
    }

    /// Wake every blocked `acquire` with `Interrupted` and drop the queue,
    /// keeping `value` and the log.
    pub fn interrupt(&self) {
        let mut state = lock(&self.state);
        state.waiting.clear();
        state.granted.clear();
        state.epoch += 1;
        let now = self.clock.now_ns();
        state.log.push(now, format!("{} interrupted", self.name));
        drop(state);
        self.wakeup.notify_all();
    }

    /// Snapshot with the last `recent` log entries.
    pub fn summary(&self, recent: usize) -> SemaphoreSummary {
        let state = lock(&self.state);
        SemaphoreSummary {
            name: self.name.clone(),
            value: state.value,
            initial_value: self.initial,
            waiting_threads: state.waiting.len(),
            log: state.log.recent(recent),
        }
    }

    fn attempt(&self, state: &mut SemState, thread: &Arc<SimThread>) -> Attempt {
        let id = thread.id();
        if self.reclaim_grants(state) {
            self.wakeup.notify_all();
        }
        let now = self.clock.now_ns();

        if let Some(pos) = state.granted.iter().position(|g| g.id() == id) {
            state.granted.swap_remove(pos);
            thread.unblock();
            state
                .log
                .push(now, format!("{} acquired {}", thread.name(), self.name));
            self.publish_wait(id, true);
            return Attempt::Acquired;
        }

        if thread.is_terminated() {
            return Attempt::Refused;
        }

        if state.value > 0 {
            state.value -= 1;
            thread.unblock();
            state
                .log
                .push(now, format!("{} acquired {}", thread.name(), self.name));
            self.publish_wait(id, true);
            return Attempt::Acquired;
        }

        thread.block(self.resource_ref());
        if state.waiting.iter().any(|t| t.id() == id) {
            return Attempt::Queued;
        }
        state.waiting.push_back(thread.clone());
        state
            .log
            .push(now, format!("{} blocked on {}", thread.name(), self.name));
        debug!(sem = %self.name, thread = %id, queued = state.waiting.len(), "blocked");
        self.publish_wait(id, false);
        Attempt::Queued
    }

    /// Hand one permit to the first live waiter, or return it to `value`.
    fn release(&self, state: &mut SemState, releaser: Option<&str>) -> Option<ThreadId> {
        let now = self.clock.now_ns();

        while let Some(next) = state.waiting.pop_front() {
            if next.is_terminated() {
                trace!(sem = %self.name, thread = %next.id(), "skipping terminated waiter");
                continue;
            }
            next.unblock();
            state
                .log
                .push(now, format!("{} unblocked by {}", next.name(), self.name));
            debug!(sem = %self.name, thread = %next.id(), "permit handed off");
            self.publish(SyncEvent::SemaphoreSignal {
                name: self.name.clone(),
                thread_id: Some(next.id()),
            });
            let id = next.id();
            state.granted.push(next);
            return Some(id);
        }

        state.value += 1;
        let msg = match releaser {
            Some(name) => format!("{} released by {}; value={}", self.name, name, state.value),
            None => format!("{} released; value={}", self.name, state.value),
        };
        state.log.push(now, msg);
        self.publish(SyncEvent::SemaphoreSignal {
            name: self.name.clone(),
            thread_id: None,
        });
        None
    }

    /// Drop grants held by terminated threads and release their permits.
    /// Returns whether anything was reclaimed.
    fn reclaim_grants(&self, state: &mut SemState) -> bool {
        let mut reclaimed = false;
        while let Some(pos) = state.granted.iter().position(|g| g.is_terminated()) {
            let dead = state.granted.swap_remove(pos);
            let now = self.clock.now_ns();
            state
                .log
                .push(now, format!("{} reclaimed from {}", self.name, dead.name()));
            debug!(sem = %self.name, thread = %dead.id(), "reclaiming abandoned permit");
            self.release(state, None);
            reclaimed = true;
        }
        reclaimed
    }

    fn publish_wait(&self, thread_id: ThreadId, success: bool) {
        self.publish(SyncEvent::SemaphoreWait {
            name: self.name.clone(),
            thread_id,
            success,
        });
    }

    fn publish(&self, event: SyncEvent) {
        if let Some(sink) = &self.sink {
            sink.publish(event);
        }
    }

    fn interrupted(&self) -> SyncError {
        SyncError::Interrupted {
            resource: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Semaphore")
            .field("name", &self.name)
            .field("value", &state.value)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}
