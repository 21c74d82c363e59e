//! thread_sim - Simulator of user-to-kernel threading models.
//!
//! User threads are small state machines owned by processes. A threading
//! model maps them onto kernel contexts (real OS threads), runs each burst
//! to completion, and the engine's tracker derives wait/run/blocked times,
//! context switches and resource contention from every state transition.
//!
//! # Architecture
//!
//! - **Threads**: `New → Ready → Running → {Blocked, Terminated}` with an
//!   append-only history
//! - **Models**: Many-to-One, One-to-Many, Many-to-Many, One-to-One
//! - **Sync**: FIFO counting semaphore and Mesa-style monitor with named
//!   condition variables
//! - **Engine**: session owner with start/pause/resume/stop/reset, update
//!   callbacks, statistics and JSON export
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use thread_sim::*;
//!
//! let sim = Simulator::new();
//! sim.create_example_simulation(ModelKind::ManyToOne);
//! sim.start_simulation().unwrap();
//! sim.wait_for_completion(Some(Duration::from_secs(30)));
//! println!("{}", sim.get_performance_stats());
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod cli;
pub mod clock;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod fmt;
pub mod model;
pub mod process;
pub mod stats;
pub mod sync;
pub mod thread;
pub mod tracker;
pub mod types;
pub mod workloads;

pub use cli::Cli;
pub use clock::SimClock;
pub use config::Config;
pub use control::SimControl;
pub use engine::{SimStatus, Simulator};
pub use error::SimError;
pub use fmt::{FmtTs, SimFormat};
pub use model::{build_model, BurstCallback, ModelKind, ThreadingModel};
pub use process::{KernelContext, SimProcess};
pub use stats::{
    ExportDocument, PerformanceStats, SimulationStats, ThreadEfficiency, ThreadPerf,
    TimelineEvent,
};
pub use sync::{EventSink, Monitor, ResourceRef, Semaphore, SyncError, SyncEvent};
pub use thread::{
    work_fn, BurstOutcome, HistoryEntry, SimThread, ThreadState, Transition,
    TransitionListener, WorkContext, WorkFn,
};
pub use tracker::PerfTracker;
pub use types::{ContextId, IdAllocator, ProcessId, ThreadId, TimeNs};
pub use workloads::ExampleSpec;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Work functions run user code; a panic there must not wedge the session.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
