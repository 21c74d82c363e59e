//! Monitor with named condition variables (Mesa semantics).
//!
//! One lock protects the owner, the entry queue and every condition's wait
//! queue; one `Condvar` wakes all waiters, each of which re-checks whether
//! ownership was handed to it. Ownership passes FIFO: `exit` (or a `wait`
//! that releases the monitor) gives it directly to the head of the entry
//! queue. `signal` moves one condition waiter to Ready and appends it to the
//! entry queue, so it re-acquires the monitor after the signaller leaves.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use serde::Serialize;
use tracing::{debug, trace};

use crate::clock::SimClock;
use crate::lock;
use crate::sync::{AuditLog, EventSink, LogEntry, ResourceKind, ResourceRef, SyncError, SyncEvent};
use crate::thread::SimThread;
use crate::types::ThreadId;

#[derive(Debug, Default)]
struct ConditionState {
    waiting: VecDeque<Arc<SimThread>>,
    log: AuditLog,
}

#[derive(Debug, Default)]
struct MonitorState {
    owner: Option<ThreadId>,
    entry: VecDeque<Arc<SimThread>>,
    conditions: BTreeMap<String, ConditionState>,
    log: AuditLog,
    epoch: u64,
}

pub struct Monitor {
    name: String,
    clock: SimClock,
    sink: Option<Arc<dyn EventSink>>,
    state: Mutex<MonitorState>,
    wakeup: Condvar,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConditionSummary {
    pub waiting_threads: usize,
    pub log: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub name: String,
    pub owner: Option<ThreadId>,
    pub entry_queue: usize,
    pub log: Vec<LogEntry>,
    pub condition_vars: BTreeMap<String, ConditionSummary>,
}

impl Monitor {
    pub fn new(name: &str) -> Self {
        Monitor {
            name: name.to_string(),
            clock: SimClock::new(),
            sink: None,
            state: Mutex::new(MonitorState::default()),
            wakeup: Condvar::new(),
        }
    }

    pub fn with_clock(mut self, clock: SimClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Option<ThreadId> {
        lock(&self.state).owner
    }

    pub fn entry_count(&self) -> usize {
        lock(&self.state).entry.len()
    }

    pub fn log(&self) -> Vec<LogEntry> {
        lock(&self.state).log.entries()
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(ResourceKind::Monitor, self.name.clone())
    }

    /// Declare a condition variable. Conditions are also created on first use.
    pub fn add_condition(&self, condition: &str) {
        lock(&self.state)
            .conditions
            .entry(condition.to_string())
            .or_default();
    }

    pub fn condition_names(&self) -> Vec<String> {
        lock(&self.state).conditions.keys().cloned().collect()
    }

    /// Threads waiting on `condition`, 0 for an unknown condition.
    pub fn condition_waiting(&self, condition: &str) -> usize {
        lock(&self.state)
            .conditions
            .get(condition)
            .map_or(0, |c| c.waiting.len())
    }

    pub fn condition_log(&self, condition: &str) -> Vec<LogEntry> {
        lock(&self.state)
            .conditions
            .get(condition)
            .map_or_else(Vec::new, |c| c.log.entries())
    }

    /// Enter the monitor, blocking the caller while another thread holds it.
    ///
    /// A contended thread is Blocked on the monitor and queued FIFO; when
    /// ownership reaches it, it is made Ready by the releasing thread and
    /// dispatched back to Running here. Re-entering an already held monitor
    /// is a no-op.
    pub fn enter(&self, thread: &Arc<SimThread>) -> Result<(), SyncError> {
        let id = thread.id();
        let mut state = lock(&self.state);
        let now = self.clock.now_ns();

        if state.owner == Some(id) {
            return Ok(());
        }
        if thread.is_terminated() {
            return Err(self.interrupted());
        }

        if state.owner.is_none() && state.entry.is_empty() {
            state.owner = Some(id);
            state
                .log
                .push(now, format!("{} entered {}", thread.name(), self.name));
            thread.dispatch();
            self.publish(SyncEvent::MonitorEnter {
                name: self.name.clone(),
                thread_id: id,
                contended: false,
            });
            return Ok(());
        }

        thread.block(self.resource_ref());
        state.entry.push_back(thread.clone());
        state
            .log
            .push(now, format!("{} waiting to enter {}", thread.name(), self.name));
        debug!(monitor = %self.name, thread = %id, queued = state.entry.len(), "contended");
        self.publish(SyncEvent::MonitorEnter {
            name: self.name.clone(),
            thread_id: id,
            contended: true,
        });

        let epoch = state.epoch;
        let state = self
            .wakeup
            .wait_while(state, |s| s.epoch == epoch && s.owner != Some(id))
            .unwrap_or_else(|e| e.into_inner());
        if state.epoch != epoch {
            return Err(self.interrupted());
        }
        drop(state);
        thread.dispatch();
        Ok(())
    }

    /// Leave the monitor, handing it to the head of the entry queue.
    pub fn exit(&self, thread: &SimThread) -> Result<(), SyncError> {
        let mut state = lock(&self.state);
        if state.owner != Some(thread.id()) {
            return Err(self.not_owner(thread.id()));
        }
        let now = self.clock.now_ns();
        state
            .log
            .push(now, format!("{} left {}", thread.name(), self.name));
        let handed_to = self.hand_off(&mut state);
        self.publish(SyncEvent::MonitorExit {
            name: self.name.clone(),
            thread_id: thread.id(),
            handed_to,
        });
        Ok(())
    }

    /// Release the monitor and block on `condition` until signalled and the
    /// monitor has been re-acquired.
    pub fn wait(&self, condition: &str, thread: &Arc<SimThread>) -> Result<(), SyncError> {
        let id = thread.id();
        let mut state = lock(&self.state);
        if state.owner != Some(id) {
            return Err(self.not_owner(id));
        }
        let now = self.clock.now_ns();
        let resource = ResourceRef::new(
            ResourceKind::Condition,
            format!("{}.{}", self.name, condition),
        );
        thread.block(resource);
        let cond = state.conditions.entry(condition.to_string()).or_default();
        cond.waiting.push_back(thread.clone());
        cond.log
            .push(now, format!("{} waiting on {}", thread.name(), condition));
        self.publish(SyncEvent::ConditionWait {
            name: self.name.clone(),
            condition: condition.to_string(),
            thread_id: id,
        });
        self.hand_off(&mut state);

        let epoch = state.epoch;
        let state = self
            .wakeup
            .wait_while(state, |s| s.epoch == epoch && s.owner != Some(id))
            .unwrap_or_else(|e| e.into_inner());
        if state.epoch != epoch {
            return Err(self.interrupted());
        }
        drop(state);
        thread.dispatch();
        Ok(())
    }

    /// Move one waiter of `condition` (FIFO) to Ready and queue it to
    /// re-acquire the monitor. Returns the thread moved, if any.
    pub fn signal(&self, condition: &str) -> Option<ThreadId> {
        let mut state = lock(&self.state);
        let moved = self.signal_one(&mut state, condition);
        if moved.is_some() && state.owner.is_none() {
            self.hand_off(&mut state);
        }
        moved
    }

    /// Signal every waiter of `condition`. Returns how many were moved.
    pub fn broadcast(&self, condition: &str) -> usize {
        let mut state = lock(&self.state);
        let mut moved = 0;
        while self.signal_one(&mut state, condition).is_some() {
            moved += 1;
        }
        if moved > 0 && state.owner.is_none() {
            self.hand_off(&mut state);
        }
        moved
    }

    /// Release ownership, drop every queue and clear all logs. Blocked
    /// callers return `Interrupted`. Declared conditions are kept.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.owner = None;
        state.entry.clear();
        state.log.clear();
        for cond in state.conditions.values_mut() {
            cond.waiting.clear();
            cond.log.clear();
        }
        state.epoch += 1;
        drop(state);
        self.wakeup.notify_all();
    }

    /// Like [`reset`](Self::reset) but keeps the logs.
    pub fn interrupt(&self) {
        let mut state = lock(&self.state);
        state.owner = None;
        state.entry.clear();
        for cond in state.conditions.values_mut() {
            cond.waiting.clear();
        }
        state.epoch += 1;
        let now = self.clock.now_ns();
        state.log.push(now, format!("{} interrupted", self.name));
        drop(state);
        self.wakeup.notify_all();
    }

    pub fn summary(&self, recent: usize) -> MonitorSummary {
        let state = lock(&self.state);
        MonitorSummary {
            name: self.name.clone(),
            owner: state.owner,
            entry_queue: state.entry.len(),
            log: state.log.recent(recent),
            condition_vars: state
                .conditions
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        ConditionSummary {
                            waiting_threads: c.waiting.len(),
                            log: c.log.recent(recent),
                        },
                    )
                })
                .collect(),
        }
    }

    fn signal_one(&self, state: &mut MonitorState, condition: &str) -> Option<ThreadId> {
        let now = self.clock.now_ns();
        let cond = state.conditions.get_mut(condition)?;
        let next = loop {
            let next = cond.waiting.pop_front()?;
            if !next.is_terminated() {
                break next;
            }
        };
        next.unblock();
        cond.log
            .push(now, format!("{} signalled on {}", next.name(), condition));
        let id = next.id();
        state.entry.push_back(next);
        self.publish(SyncEvent::ConditionSignal {
            name: self.name.clone(),
            condition: condition.to_string(),
            thread_id: Some(id),
        });
        Some(id)
    }

    /// Give ownership to the first live thread of the entry queue, or free
    /// the monitor.
    fn hand_off(&self, state: &mut MonitorState) -> Option<ThreadId> {
        while let Some(next) = state.entry.pop_front() {
            if next.is_terminated() {
                trace!(monitor = %self.name, thread = %next.id(), "skipping terminated waiter");
                continue;
            }
            state.owner = Some(next.id());
            next.unblock();
            let now = self.clock.now_ns();
            state
                .log
                .push(now, format!("{} handed to {}", self.name, next.name()));
            self.wakeup.notify_all();
            return Some(next.id());
        }
        state.owner = None;
        None
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

    fn not_owner(&self, thread: ThreadId) -> SyncError {
        SyncError::NotOwner {
            resource: self.name.clone(),
            thread,
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Monitor")
            .field("name", &self.name)
            .field("owner", &state.owner)
            .field("entry", &state.entry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadState;
    use std::time::Duration;

    fn running(id: u64) -> Arc<SimThread> {
        let t = Arc::new(SimThread::new(ThreadId(id), None, None));
        t.start();
        t.dispatch();
        t
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_uncontended_enter_exit() {
        let mon = Monitor::new("M");
        let a = running(1);
        mon.enter(&a).unwrap();
        assert_eq!(mon.owner(), Some(ThreadId(1)));
        assert_eq!(a.state(), ThreadState::Running);
        mon.exit(&a).unwrap();
        assert_eq!(mon.owner(), None);
    }

    #[test]
    fn test_exit_by_non_owner_fails() {
        let mon = Monitor::new("M");
        let (a, b) = (running(1), running(2));
        mon.enter(&a).unwrap();
        assert_eq!(
            mon.exit(&b),
            Err(SyncError::NotOwner {
                resource: "M".into(),
                thread: ThreadId(2)
            })
        );
    }

    #[test]
    fn test_contended_enter_blocks_until_exit() {
        let mon = Arc::new(Monitor::new("M"));
        let (a, b) = (running(1), running(2));
        mon.enter(&a).unwrap();

        let waiter = {
            let (mon, b) = (mon.clone(), b.clone());
            std::thread::spawn(move || mon.enter(&b))
        };
        wait_for(|| mon.entry_count() == 1);
        assert_eq!(b.state(), ThreadState::Blocked);
        assert_eq!(b.blocked_by().unwrap().name, "M");

        mon.exit(&a).unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(mon.owner(), Some(ThreadId(2)));
        assert_eq!(b.state(), ThreadState::Running);
    }

    #[test]
    fn test_entry_order_is_fifo() {
        let mon = Arc::new(Monitor::new("M"));
        let holder = running(1);
        mon.enter(&holder).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 2..=4 {
            let t = running(id);
            let (mon_c, order) = (mon.clone(), order.clone());
            handles.push(std::thread::spawn(move || {
                mon_c.enter(&t).unwrap();
                order.lock().unwrap().push(t.id());
                mon_c.exit(&t).unwrap();
            }));
            // Queue them one at a time so the arrival order is fixed.
            wait_for(|| mon.entry_count() == (id - 1) as usize);
        }

        mon.exit(&holder).unwrap();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(
            *order.lock().unwrap(),
            vec![ThreadId(2), ThreadId(3), ThreadId(4)]
        );
    }

    #[test]
    fn test_condition_wait_and_signal() {
        let mon = Arc::new(Monitor::new("M"));
        mon.add_condition("ready");
        let (a, b) = (running(1), running(2));

        let waiter = {
            let (mon, a) = (mon.clone(), a.clone());
            std::thread::spawn(move || {
                mon.enter(&a)?;
                mon.wait("ready", &a)?;
                mon.exit(&a)
            })
        };
        wait_for(|| mon.condition_waiting("ready") == 1);
        assert_eq!(a.state(), ThreadState::Blocked);
        assert_eq!(mon.owner(), None, "waiting released the monitor");

        mon.enter(&b).unwrap();
        assert_eq!(mon.signal("ready"), Some(ThreadId(1)));
        assert_eq!(a.state(), ThreadState::Ready);
        assert_eq!(mon.condition_waiting("ready"), 0);
        mon.exit(&b).unwrap();

        waiter.join().unwrap().unwrap();
        assert_eq!(mon.owner(), None);
        assert_eq!(mon.condition_log("ready").len(), 2);
    }

    #[test]
    fn test_signal_without_waiters() {
        let mon = Monitor::new("M");
        assert_eq!(mon.signal("nobody"), None);
        assert_eq!(mon.broadcast("nobody"), 0);
    }

    #[test]
    fn test_reset_interrupts_waiters() {
        let mon = Arc::new(Monitor::new("M"));
        let (a, b) = (running(1), running(2));
        mon.enter(&a).unwrap();
        let waiter = {
            let (mon, b) = (mon.clone(), b.clone());
            std::thread::spawn(move || mon.enter(&b))
        };
        wait_for(|| mon.entry_count() == 1);
        mon.reset();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(SyncError::Interrupted { .. })
        ));
        assert_eq!(mon.owner(), None);
        assert!(mon.log().is_empty());
    }

    #[test]
    fn test_summary() {
        let mon = Monitor::new("M");
        mon.add_condition("c");
        let a = running(1);
        mon.enter(&a).unwrap();
        let s = mon.summary(10);
        assert_eq!(s.owner, Some(ThreadId(1)));
        assert_eq!(s.log.len(), 1);
        assert_eq!(s.condition_vars["c"].waiting_threads, 0);
    }
}
