//! Newtype wrappers and type aliases for domain concepts.
//!
//! Newtypes for identifiers (threads, processes, kernel contexts) prevent
//! silent type confusion between the different id spaces. Timestamps are a
//! plain alias: they are only ever compared and subtracted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Simulated user-thread identifier. Unique within a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

/// Process identifier. Unique within a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

/// Identifier of a simulated kernel execution context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContextId(pub u32);

/// Nanoseconds since a clock's epoch.
pub type TimeNs = u64;

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Monotonic id source scoped to one simulation session.
///
/// Every session owns its own allocator, so ids never leak between
/// independent sessions. Ids start at 1.
#[derive(Debug)]
pub struct IdAllocator {
    next_thread: AtomicU64,
    next_process: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        IdAllocator {
            next_thread: AtomicU64::new(1),
            next_process: AtomicU64::new(1),
        }
    }

    pub fn thread(&self) -> ThreadId {
        ThreadId(self.next_thread.fetch_add(1, Ordering::Relaxed))
    }

    pub fn process(&self) -> ProcessId {
        ProcessId(self.next_process.fetch_add(1, Ordering::Relaxed))
    }
}
