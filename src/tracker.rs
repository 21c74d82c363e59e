//! Performance tracking driven by thread transitions.
//!
//! [`PerfTracker`] is attached to every thread the engine creates and stays
//! attached for the thread's lifetime. It only accounts transitions while
//! it is active, which the engine arranges to be exactly the span of a run,
//! so threads and primitives used outside a run leave no trace here.
//!
//! Time between two transitions of a thread is charged to the state the
//! thread was leaving: Ready counts as wait time, Running as run time and
//! Blocked as blocked time.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::lock;
use crate::stats::{PerformanceStats, ThreadEfficiency, ThreadPerf, TimelineEvent, RECENT};
use crate::thread::{SimThread, ThreadState, Transition, TransitionListener};
use crate::types::{ThreadId, TimeNs};

/// Maximum number of timeline events retained.
pub const TIMELINE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Default)]
struct ThreadAccum {
    wait_ns: TimeNs,
    run_ns: TimeNs,
    blocked_ns: TimeNs,
    context_switches: u64,
    last_change: TimeNs,
    state_durations: BTreeMap<String, TimeNs>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    threads: HashMap<ThreadId, ThreadAccum>,
    context_switches: u64,
    resource_contentions: u64,
    timeline: VecDeque<TimelineEvent>,
    last_dispatched: Option<ThreadId>,
    running: usize,
    peak_running: usize,
}

impl TrackerInner {
    fn record(&mut self, event: TimelineEvent) {
        if self.timeline.len() == TIMELINE_CAPACITY {
            self.timeline.pop_front();
        }
        self.timeline.push_back(event);
    }
}

#[derive(Debug, Default)]
pub struct PerfTracker {
    active: AtomicBool,
    inner: Mutex<TrackerInner>,
}

impl PerfTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Drop every counter and the timeline.
    pub fn reset(&self) {
        *lock(&self.inner) = TrackerInner::default();
    }

    pub fn context_switches(&self) -> u64 {
        lock(&self.inner).context_switches
    }

    pub fn resource_contentions(&self) -> u64 {
        lock(&self.inner).resource_contentions
    }

    pub fn peak_running(&self) -> usize {
        lock(&self.inner).peak_running
    }

    /// The whole retained timeline, oldest first.
    pub fn timeline(&self) -> Vec<TimelineEvent> {
        lock(&self.inner).timeline.iter().cloned().collect()
    }

    /// `None` if `thread` never transitioned while the tracker was active.
    pub fn efficiency(&self, thread: ThreadId) -> Option<ThreadEfficiency> {
        let inner = lock(&self.inner);
        let acc = inner.threads.get(&thread)?;
        Some(ThreadEfficiency::from_times(
            acc.run_ns,
            acc.wait_ns,
            acc.blocked_ns,
        ))
    }

    /// Assemble performance statistics for `threads`, in the given order.
    /// Threads the tracker has not seen are skipped.
    pub fn snapshot(&self, threads: &[Arc<SimThread>]) -> PerformanceStats {
        // Thread locks are taken before ours on transitions; read states first.
        let seen: Vec<_> = threads.iter().map(|t| (t, t.state())).collect();
        let inner = lock(&self.inner);
        let thread_stats = seen
            .into_iter()
            .filter_map(|(t, state)| {
                let acc = inner.threads.get(&t.id())?;
                Some(ThreadPerf {
                    thread_id: t.id(),
                    name: t.name().to_string(),
                    state,
                    wait_time_ns: acc.wait_ns,
                    run_time_ns: acc.run_ns,
                    blocked_time_ns: acc.blocked_ns,
                    context_switches: acc.context_switches,
                    cpu_utilization: ThreadEfficiency::from_times(
                        acc.run_ns,
                        acc.wait_ns,
                        acc.blocked_ns,
                    )
                    .cpu_utilization,
                    state_durations: acc.state_durations.clone(),
                })
            })
            .collect();

        let skip = inner.timeline.len().saturating_sub(RECENT);
        PerformanceStats {
            context_switches: inner.context_switches,
            resource_contentions: inner.resource_contentions,
            peak_running: inner.peak_running,
            thread_stats,
            overall_cpu_utilization: 0.0,
            recent_events: inner.timeline.iter().skip(skip).cloned().collect(),
        }
        .finish()
    }
}

impl TransitionListener for PerfTracker {
    fn on_transition(&self, t: &Transition) {
        if !self.is_active() {
            return;
        }
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;

        let acc = inner.threads.entry(t.thread).or_insert_with(|| ThreadAccum {
            last_change: t.time_ns,
            ..Default::default()
        });
        let elapsed = t.time_ns.saturating_sub(acc.last_change);
        match t.from {
            ThreadState::Ready => acc.wait_ns += elapsed,
            ThreadState::Running => acc.run_ns += elapsed,
            ThreadState::Blocked => acc.blocked_ns += elapsed,
            ThreadState::New | ThreadState::Terminated => {}
        }
        *acc
            .state_durations
            .entry(t.from.as_str().to_string())
            .or_default() += elapsed;
        acc.last_change = t.time_ns;

        match (t.from, t.to) {
            (ThreadState::Ready, ThreadState::Running) => {
                acc.context_switches += 1;
                inner.context_switches += 1;
                let from_thread = inner.last_dispatched.replace(t.thread);
                inner.record(TimelineEvent::ContextSwitch {
                    time_ns: t.time_ns,
                    from_thread,
                    to_thread: t.thread,
                });
            }
            (ThreadState::Running, ThreadState::Blocked) => {
                inner.resource_contentions += 1;
                let resource = t
                    .resource
                    .as_ref()
                    .map_or_else(|| "unknown".to_string(), |r| r.name.clone());
                inner.record(TimelineEvent::ResourceContention {
                    time_ns: t.time_ns,
                    thread: t.thread,
                    resource,
                });
            }
            _ => {}
        }

        if t.to == ThreadState::Running {
            inner.running += 1;
            inner.peak_running = inner.peak_running.max(inner.running);
        } else if t.from == ThreadState::Running {
            inner.running = inner.running.saturating_sub(1);
        }
        trace!(thread = %t.thread, from = %t.from, to = %t.to, running = inner.running, "tracked");
    }
}
