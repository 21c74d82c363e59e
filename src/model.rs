//! Threading models: how user threads are mapped onto kernel contexts.
//!
//! Every model admits all threads of all processes first (New → Ready), then
//! hands each thread to a kernel context, which runs its burst to completion
//! via [`SimThread::run`] and reports it through the burst callback. Kernel
//! contexts are real OS threads named `k<ctx>-<process>`; `run_simulation`
//! returns once all of them have finished.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::control::SimControl;
use crate::error::SimError;
use crate::process::SimProcess;
use crate::thread::{BurstOutcome, SimThread};
use crate::types::ContextId;

/// Default pool size of the Many-to-Many model.
pub const DEFAULT_KERNEL_THREADS: usize = 2;

/// Invoked after each burst, on the kernel context that ran it.
pub type BurstCallback = Arc<dyn Fn(&SimThread, &BurstOutcome) + Send + Sync>;

/// The four user-to-kernel thread mappings. On the command line they are
/// spelled `many-to-one` etc.; in config files either spelling works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ModelKind {
    #[serde(rename = "Many-to-One", alias = "many-to-one")]
    ManyToOne,
    #[serde(rename = "One-to-Many", alias = "one-to-many")]
    OneToMany,
    #[serde(rename = "Many-to-Many", alias = "many-to-many")]
    ManyToMany,
    #[serde(rename = "One-to-One", alias = "one-to-one")]
    OneToOne,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::ManyToOne,
        ModelKind::OneToMany,
        ModelKind::ManyToMany,
        ModelKind::OneToOne,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::ManyToOne => "Many-to-One",
            ModelKind::OneToMany => "One-to-Many",
            ModelKind::ManyToMany => "Many-to-Many",
            ModelKind::OneToOne => "One-to-One",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = SimError;

    /// Accepts the display names and their kebab/snake-case spellings,
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        ModelKind::ALL
            .into_iter()
            .find(|k| k.as_str().to_ascii_lowercase() == norm)
            .ok_or_else(|| SimError::InvalidConfig(format!("unknown threading model {s:?}")))
    }
}

/// A strategy for mapping user threads to kernel contexts.
pub trait ThreadingModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Run every thread of `processes` to completion.
    fn run_simulation(
        &self,
        processes: &[Arc<SimProcess>],
        control: &SimControl,
        callback: &BurstCallback,
    );
}

/// Construct the model for `kind`. `kernel_threads` only applies to
/// Many-to-Many and must be at least 1.
pub fn build_model(
    kind: ModelKind,
    kernel_threads: usize,
) -> Result<Box<dyn ThreadingModel>, SimError> {
    Ok(match kind {
        ModelKind::ManyToOne => Box::new(ManyToOne),
        ModelKind::OneToMany => Box::new(OneToMany),
        ModelKind::ManyToMany => Box::new(ManyToMany::new(kernel_threads)?),
        ModelKind::OneToOne => Box::new(OneToOne),
    })
}

/// All threads of a process run one after another on a single shared
/// kernel context, in thread-list order. Processes run concurrently.
#[derive(Debug, Default)]
pub struct ManyToOne;

/// Every thread gets its own kernel context; all start at once and no
/// context is reused.
#[derive(Debug, Default)]
pub struct OneToMany;

/// Scheduling-wise identical to [`OneToMany`]: one dedicated context per
/// thread. Kept distinct to document the different real-world mapping.
#[derive(Debug, Default)]
pub struct OneToOne;

/// A fixed pool of kernel contexts services every thread of every process
/// in queue order. The pool size bounds how many bursts run at once.
#[derive(Debug)]
pub struct ManyToMany {
    kernel_threads: usize,
}

impl ManyToMany {
    pub fn new(kernel_threads: usize) -> Result<Self, SimError> {
        if kernel_threads == 0 {
            return Err(SimError::InvalidConfig(
                "many-to-many needs at least one kernel thread".into(),
            ));
        }
        Ok(ManyToMany { kernel_threads })
    }

    pub fn kernel_threads(&self) -> usize {
        self.kernel_threads
    }
}

impl ThreadingModel for ManyToOne {
    fn kind(&self) -> ModelKind {
        ModelKind::ManyToOne
    }

    fn run_simulation(
        &self,
        processes: &[Arc<SimProcess>],
        control: &SimControl,
        callback: &BurstCallback,
    ) {
        admit(processes);
        let result = crossbeam::thread::scope(|s| {
            for process in processes {
                let ctx = ContextId(0);
                let body = move |_: &crossbeam::thread::Scope<'_>| {
                    for thread in process.threads() {
                        run_burst(ctx, process, &thread, control, callback);
                    }
                };
                if let Err(e) = s.builder().name(context_name(ctx, process)).spawn(body) {
                    error!(process = %process.id(), "failed to spawn kernel context: {e}");
                    for thread in process.threads() {
                        run_burst(ctx, process, &thread, control, callback);
                    }
                }
            }
        });
        if result.is_err() {
            error!(model = %self.kind(), "a kernel context panicked");
        }
    }
}

impl ThreadingModel for OneToMany {
    fn kind(&self) -> ModelKind {
        ModelKind::OneToMany
    }

    fn run_simulation(
        &self,
        processes: &[Arc<SimProcess>],
        control: &SimControl,
        callback: &BurstCallback,
    ) {
        run_dedicated(self.kind(), processes, control, callback);
    }
}

impl ThreadingModel for OneToOne {
    fn kind(&self) -> ModelKind {
        ModelKind::OneToOne
    }

    fn run_simulation(
        &self,
        processes: &[Arc<SimProcess>],
        control: &SimControl,
        callback: &BurstCallback,
    ) {
        run_dedicated(self.kind(), processes, control, callback);
    }
}

impl ThreadingModel for ManyToMany {
    fn kind(&self) -> ModelKind {
        ModelKind::ManyToMany
    }

    fn run_simulation(
        &self,
        processes: &[Arc<SimProcess>],
        control: &SimControl,
        callback: &BurstCallback,
    ) {
        admit(processes);

        let (tx, rx) = crossbeam::channel::unbounded();
        let mut total = 0;
        for process in processes {
            for thread in process.threads() {
                // The receiver outlives this loop.
                let _ = tx.send((process, thread));
                total += 1;
            }
        }
        drop(tx);

        let workers = self.kernel_threads.min(total);
        info!(workers, threads = total, "starting kernel thread pool");
        let result = crossbeam::thread::scope(|s| {
            for k in 0..workers {
                let ctx = ContextId(k as u32);
                let rx = rx.clone();
                let body = move |_: &crossbeam::thread::Scope<'_>| {
                    for (process, thread) in rx.iter() {
                        run_burst(ctx, process, &thread, control, callback);
                    }
                };
                if let Err(e) = s.builder().name(format!("{ctx}-pool")).spawn(body) {
                    error!(%ctx, "failed to spawn pool context: {e}");
                }
            }
        });
        if result.is_err() {
            error!(model = %self.kind(), "a kernel context panicked");
        }

        // If no worker could be spawned, drain the queue here.
        for (process, thread) in rx.try_iter() {
            run_burst(ContextId(0), process, &thread, control, callback);
        }
    }
}

fn run_dedicated(
    kind: ModelKind,
    processes: &[Arc<SimProcess>],
    control: &SimControl,
    callback: &BurstCallback,
) {
    admit(processes);
    let result = crossbeam::thread::scope(|s| {
        for process in processes {
            for (k, thread) in process.threads().into_iter().enumerate() {
                let ctx = ContextId(k as u32);
                let body = {
                    let thread = thread.clone();
                    move |_: &crossbeam::thread::Scope<'_>| {
                        run_burst(ctx, process, &thread, control, callback);
                    }
                };
                if let Err(e) = s.builder().name(context_name(ctx, process)).spawn(body) {
                    error!(thread = %thread.id(), "failed to spawn kernel context: {e}");
                    run_burst(ctx, process, &thread, control, callback);
                }
            }
        }
    });
    if result.is_err() {
        error!(model = %kind, "a kernel context panicked");
    }
}

/// New → Ready for every thread, and forget the previous run's contexts.
fn admit(processes: &[Arc<SimProcess>]) {
    for process in processes {
        process.set_kernel_contexts(Vec::new());
        for thread in process.threads() {
            thread.start();
        }
    }
}

fn run_burst(
    ctx: ContextId,
    process: &SimProcess,
    thread: &Arc<SimThread>,
    control: &SimControl,
    callback: &BurstCallback,
) {
    process.assign(ctx, thread.id());
    debug!(%ctx, process = %process.id(), thread = %thread.id(), "burst start");
    let outcome = thread.run(control);
    debug!(%ctx, thread = %thread.id(), ?outcome, "burst end");
    callback(thread, &outcome);
}

fn context_name(ctx: ContextId, process: &SimProcess) -> String {
    format!("{ctx}-{}", process.id())
}
