//! Synchronization primitives driven by simulated threads.
//!
//! - [`Semaphore`]: counting semaphore with a strict FIFO wait queue. `wait`
//!   never suspends the caller (cooperative retry contract); `acquire` is the
//!   blocking equivalent.
//! - [`Monitor`]: mutual-exclusion region with named condition variables.
//!   `enter` really blocks on a condition signal.
//!
//! Both own their own lock, independent of the engine's. Lock order is
//! always primitive → thread → transition listener.

mod monitor;
mod semaphore;

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::{ThreadId, TimeNs};

pub use monitor::{ConditionSummary, Monitor, MonitorSummary};
pub use semaphore::{Semaphore, SemaphoreSummary};

/// Maximum number of audit entries a primitive retains.
pub const LOG_CAPACITY: usize = 1000;

/// Kind of primitive a thread can be blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Semaphore,
    Monitor,
    Condition,
}

/// Non-owning reference to the primitive blocking a thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        ResourceRef {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Errors from the blocking operations of the primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The primitive was reset or interrupted while the caller was waiting.
    Interrupted { resource: String },
    /// The calling thread does not hold the monitor.
    NotOwner { resource: String, thread: ThreadId },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Interrupted { resource } => write!(f, "wait on {resource} interrupted"),
            SyncError::NotOwner { resource, thread } => {
                write!(f, "{thread} does not hold {resource}")
            }
        }
    }
}

impl std::error::Error for SyncError {}

/// Notification published by a primitive to an optional [`EventSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    SemaphoreCreated {
        name: String,
        count: u32,
    },
    SemaphoreWait {
        name: String,
        thread_id: ThreadId,
        success: bool,
    },
    SemaphoreSignal {
        name: String,
        thread_id: Option<ThreadId>,
    },
    MonitorEnter {
        name: String,
        thread_id: ThreadId,
        contended: bool,
    },
    MonitorExit {
        name: String,
        thread_id: ThreadId,
        handed_to: Option<ThreadId>,
    },
    ConditionWait {
        name: String,
        condition: String,
        thread_id: ThreadId,
    },
    ConditionSignal {
        name: String,
        condition: String,
        thread_id: Option<ThreadId>,
    },
}

/// Something that accepts primitive notifications.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: SyncEvent);
}

impl EventSink for crossbeam::channel::Sender<SyncEvent> {
    fn publish(&self, event: SyncEvent) {
        if let Err(e) = self.send(event) {
            trace!("dropping sync event, receiver gone: {:?}", e.into_inner());
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time_ns: TimeNs,
    pub message: String,
}

/// Bounded audit trail; the oldest entries fall off first.
#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl AuditLog {
    pub fn with_capacity(capacity: usize) -> Self {
        AuditLog {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, time_ns: TimeNs, message: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry { time_ns, message });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Up to `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}
