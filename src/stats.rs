//! Serializable snapshots of a simulation session.
//!
//! These are plain data: the engine assembles them from the tracker, the
//! threads and the primitives, and the export writes them out as JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::clock::ns_to_secs;
use crate::sync::{MonitorSummary, SemaphoreSummary};
use crate::thread::{HistoryEntry, ThreadState};
use crate::types::{ThreadId, TimeNs};

/// Number of timeline events and audit entries included in snapshots.
pub const RECENT: usize = 10;

/// One entry of the bounded event timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// A Ready → Running transition.
    ContextSwitch {
        time_ns: TimeNs,
        /// The thread that was last dispatched before this one, if any.
        from_thread: Option<ThreadId>,
        to_thread: ThreadId,
    },
    /// A Running → Blocked transition.
    ResourceContention {
        time_ns: TimeNs,
        thread: ThreadId,
        resource: String,
    },
}

impl TimelineEvent {
    pub fn time_ns(&self) -> TimeNs {
        match self {
            TimelineEvent::ContextSwitch { time_ns, .. }
            | TimelineEvent::ResourceContention { time_ns, .. } => *time_ns,
        }
    }
}

/// Share of a thread's accounted time spent in each bucket, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ThreadEfficiency {
    pub cpu_utilization: f64,
    pub wait_ratio: f64,
    pub blocked_ratio: f64,
}

impl ThreadEfficiency {
    /// All ratios are 0 when nothing was accounted yet.
    pub fn from_times(run_ns: TimeNs, wait_ns: TimeNs, blocked_ns: TimeNs) -> Self {
        let total = run_ns + wait_ns + blocked_ns;
        if total == 0 {
            return Self::default();
        }
        let pct = |v: TimeNs| v as f64 * 100.0 / total as f64;
        ThreadEfficiency {
            cpu_utilization: pct(run_ns),
            wait_ratio: pct(wait_ns),
            blocked_ratio: pct(blocked_ns),
        }
    }
}

/// Per-thread performance counters.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadPerf {
    pub thread_id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub wait_time_ns: TimeNs,
    pub run_time_ns: TimeNs,
    pub blocked_time_ns: TimeNs,
    pub context_switches: u64,
    pub cpu_utilization: f64,
    /// Time spent in each state the thread has left, keyed by state name.
    pub state_durations: BTreeMap<String, TimeNs>,
}

impl ThreadPerf {
    pub fn total_time_ns(&self) -> TimeNs {
        self.run_time_ns + self.wait_time_ns + self.blocked_time_ns
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStats {
    pub context_switches: u64,
    pub resource_contentions: u64,
    /// Most threads observed Running at the same time.
    pub peak_running: usize,
    pub thread_stats: Vec<ThreadPerf>,
    /// `100 * run / (run + wait + blocked)` over all threads, or 0.
    pub overall_cpu_utilization: f64,
    pub recent_events: Vec<TimelineEvent>,
}

impl PerformanceStats {
    /// Derive the overall utilization from the per-thread counters.
    pub(crate) fn finish(mut self) -> Self {
        let run: TimeNs = self.thread_stats.iter().map(|t| t.run_time_ns).sum();
        let total: TimeNs = self.thread_stats.iter().map(|t| t.total_time_ns()).sum();
        self.overall_cpu_utilization = if total > 0 {
            run as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        self
    }
}

impl fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "context switches: {}  contentions: {}  peak running: {}  cpu: {:.1}%",
            self.context_switches,
            self.resource_contentions,
            self.peak_running,
            self.overall_cpu_utilization
        )?;
        writeln!(
            f,
            "{:>5} {:<16} {:<10} {:>9} {:>9} {:>9} {:>4} {:>6}",
            "id", "name", "state", "run(s)", "wait(s)", "block(s)", "cs", "cpu%"
        )?;
        for t in &self.thread_stats {
            writeln!(
                f,
                "{:>5} {:<16} {:<10} {:>9.3} {:>9.3} {:>9.3} {:>4} {:>6.1}",
                t.thread_id.0,
                t.name,
                t.state.as_str(),
                ns_to_secs(t.run_time_ns),
                ns_to_secs(t.wait_time_ns),
                ns_to_secs(t.blocked_time_ns),
                t.context_switches,
                t.cpu_utilization
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationStats {
    pub process_count: usize,
    pub thread_count: usize,
    /// Thread count per state name; every state is present.
    pub thread_states: BTreeMap<String, usize>,
    pub semaphores: Vec<SemaphoreSummary>,
    pub monitors: Vec<MonitorSummary>,
    pub is_running: bool,
    pub is_paused: bool,
    pub current_time_ns: TimeNs,
    pub simulation_speed: f64,
    pub context_switches: u64,
    pub resource_contentions: u64,
}

impl SimulationStats {
    pub(crate) fn count_states(states: impl IntoIterator<Item = ThreadState>) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = ThreadState::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for s in states {
            *counts.entry(s.as_str().to_string()).or_default() += 1;
        }
        counts
    }
}

/// Full history of one thread.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub thread_id: ThreadId,
    pub name: String,
    pub history: Vec<HistoryEntry>,
}

/// The document written by `export_simulation_data`.
#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    pub model_type: Option<String>,
    pub thread_count: usize,
    pub process_count: usize,
    pub simulation_time_ns: TimeNs,
    pub performance_stats: PerformanceStats,
    pub simulation_stats: SimulationStats,
    pub thread_histories: Vec<HistoryRecord>,
}
