//! Simulation session.
//!
//! The [`Simulator`] owns every process, thread and primitive of a session,
//! the selected threading model and the performance tracker. `start_simulation`
//! hands the processes to the model on a separate control thread, so callers
//! are never blocked; `wait_for_completion` joins up with the run.
//!
//! Lock order is session → primitive → thread → tracker. Update callbacks
//! are always invoked with no engine lock held.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::SimClock;
use crate::control::SimControl;
use crate::error::SimError;
use crate::lock;
use crate::model::{build_model, BurstCallback, ModelKind, DEFAULT_KERNEL_THREADS};
use crate::process::SimProcess;
use crate::stats::{
    ExportDocument, HistoryRecord, PerformanceStats, SimulationStats, ThreadEfficiency, RECENT,
};
use crate::sync::{EventSink, Monitor, Semaphore};
use crate::thread::{panic_message, SimThread, TransitionListener, WorkFn};
use crate::tracker::PerfTracker;
use crate::types::{IdAllocator, ProcessId, ThreadId, TimeNs};
use crate::workloads::{self, ExampleSpec};

/// Observer invoked after state-affecting operations.
pub type UpdateCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SimStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl SimStatus {
    fn in_flight(self) -> bool {
        matches!(self, SimStatus::Running | SimStatus::Paused)
    }
}

struct Session {
    ids: IdAllocator,
    processes: Vec<Arc<SimProcess>>,
    threads: Vec<Arc<SimThread>>,
    semaphores: Vec<Arc<Semaphore>>,
    monitors: Vec<Arc<Monitor>>,
    semaphore_seq: u64,
    monitor_seq: u64,
    model: Option<ModelKind>,
    kernel_threads: usize,
    sink: Option<Arc<dyn EventSink>>,
    status: SimStatus,
    started_ns: Option<TimeNs>,
    finished_ns: Option<TimeNs>,
    /// Bumped by every start and reset; a run only finalizes its own generation.
    generation: u64,
}

impl Session {
    fn new() -> Self {
        Session {
            ids: IdAllocator::new(),
            processes: Vec::new(),
            threads: Vec::new(),
            semaphores: Vec::new(),
            monitors: Vec::new(),
            semaphore_seq: 0,
            monitor_seq: 0,
            model: None,
            kernel_threads: DEFAULT_KERNEL_THREADS,
            sink: None,
            status: SimStatus::Idle,
            started_ns: None,
            finished_ns: None,
            generation: 0,
        }
    }

    fn elapsed_ns(&self, now: TimeNs) -> TimeNs {
        match self.started_ns {
            Some(start) => self.finished_ns.unwrap_or(now).saturating_sub(start),
            None => 0,
        }
    }
}

struct Shared {
    session: Mutex<Session>,
    done: Condvar,
    callbacks: Mutex<Vec<UpdateCallback>>,
    tracker: Arc<PerfTracker>,
    control: SimControl,
    clock: SimClock,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Invoke every update callback, isolating failures.
    fn notify(&self) {
        let callbacks = lock(&self.callbacks).clone();
        for (i, cb) in callbacks.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| cb())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(callback = i, "update callback failed: {e:#}"),
                Err(payload) => error!(
                    callback = i,
                    "update callback panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        }
    }

    fn finish_run(&self, generation: u64) {
        let mut session = lock(&self.session);
        if session.generation != generation {
            return;
        }
        self.tracker.deactivate();
        if session.status.in_flight() {
            session.status = SimStatus::Stopped;
        }
        if session.finished_ns.is_none() {
            session.finished_ns = Some(self.clock.now_ns());
        }
        let elapsed = session.elapsed_ns(self.clock.now_ns());
        drop(session);
        self.done.notify_all();
        info!(elapsed_ns = elapsed, "simulation finished");
        self.notify();
    }
}

/// A simulation session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Simulator {
    shared: Arc<Shared>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Simulator {
            shared: Arc::new(Shared {
                session: Mutex::new(Session::new()),
                done: Condvar::new(),
                callbacks: Mutex::new(Vec::new()),
                tracker: Arc::new(PerfTracker::new()),
                control: SimControl::new(),
                clock: SimClock::new(),
                runner: Mutex::new(None),
            }),
        }
    }

    // ---- population ----

    /// Create an empty process. Unnamed processes are `Process-<id>`.
    pub fn create_process(&self, name: Option<&str>) -> Arc<SimProcess> {
        let mut session = lock(&self.shared.session);
        let id = session.ids.process();
        let process = Arc::new(SimProcess::new(id, name));
        session.processes.push(process.clone());
        debug!(process = %id, name = process.name(), "created process");
        process
    }

    /// Create a thread in `process`. Without a work function the thread
    /// runs [`default_work`](crate::thread::default_work).
    pub fn create_thread(
        &self,
        process: ProcessId,
        name: Option<&str>,
        work: Option<WorkFn>,
    ) -> Result<Arc<SimThread>, SimError> {
        let mut session = lock(&self.shared.session);
        let owner = session
            .processes
            .iter()
            .find(|p| p.id() == process)
            .cloned()
            .ok_or(SimError::UnknownProcess(process))?;
        Ok(self.add_thread(&mut session, &owner, name, work))
    }

    fn add_thread(
        &self,
        session: &mut Session,
        process: &SimProcess,
        name: Option<&str>,
        work: Option<WorkFn>,
    ) -> Arc<SimThread> {
        let id = session.ids.thread();
        let listener: Arc<dyn TransitionListener> = self.shared.tracker.clone();
        let thread = Arc::new(SimThread::with_clock(
            id,
            name,
            work,
            self.shared.clock,
            Some(listener),
        ));
        process.add_thread(thread.clone());
        session.threads.push(thread.clone());
        debug!(thread = %id, process = %process.id(), name = thread.name(), "created thread");
        thread
    }

    /// Remove a thread from the session and its process. A thread that has
    /// not finished is terminated first, and any semaphore permit handed to
    /// it is released again.
    pub fn remove_thread(&self, id: ThreadId) -> bool {
        let mut session = lock(&self.shared.session);
        let Some(pos) = session.threads.iter().position(|t| t.id() == id) else {
            return false;
        };
        let thread = session.threads.remove(pos);
        thread.terminate();
        for process in &session.processes {
            if process.remove_thread(id) {
                break;
            }
        }
        for sem in &session.semaphores {
            sem.reclaim_abandoned();
        }
        debug!(thread = %id, "removed thread");
        true
    }

    /// Create a semaphore. Unnamed semaphores are `Semaphore-<n>`.
    pub fn create_semaphore(&self, value: u32, name: Option<&str>) -> Arc<Semaphore> {
        let mut session = lock(&self.shared.session);
        session.semaphore_seq += 1;
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("Semaphore-{}", session.semaphore_seq),
        };
        let mut sem = Semaphore::new(value, &name).with_clock(self.shared.clock);
        if let Some(sink) = &session.sink {
            sem = sem.with_sink(sink.clone());
        }
        let sem = Arc::new(sem);
        session.semaphores.push(sem.clone());
        debug!(sem = %name, value, "created semaphore");
        sem
    }

    /// Create a monitor. Unnamed monitors are `Monitor-<n>`.
    pub fn create_monitor(&self, name: Option<&str>) -> Arc<Monitor> {
        let mut session = lock(&self.shared.session);
        session.monitor_seq += 1;
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("Monitor-{}", session.monitor_seq),
        };
        let mut monitor = Monitor::new(&name).with_clock(self.shared.clock);
        if let Some(sink) = &session.sink {
            monitor = monitor.with_sink(sink.clone());
        }
        let monitor = Arc::new(monitor);
        session.monitors.push(monitor.clone());
        debug!(monitor = %name, "created monitor");
        monitor
    }

    /// Primitives created from now on publish to `sink`.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        lock(&self.shared.session).sink = Some(sink);
    }

    pub fn processes(&self) -> Vec<Arc<SimProcess>> {
        lock(&self.shared.session).processes.clone()
    }

    pub fn threads(&self) -> Vec<Arc<SimThread>> {
        lock(&self.shared.session).threads.clone()
    }

    pub fn thread(&self, id: ThreadId) -> Option<Arc<SimThread>> {
        lock(&self.shared.session)
            .threads
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }

    pub fn semaphores(&self) -> Vec<Arc<Semaphore>> {
        lock(&self.shared.session).semaphores.clone()
    }

    pub fn monitors(&self) -> Vec<Arc<Monitor>> {
        lock(&self.shared.session).monitors.clone()
    }

    // ---- configuration ----

    pub fn set_threading_model(&self, kind: ModelKind) {
        lock(&self.shared.session).model = Some(kind);
        info!(model = %kind, "threading model selected");
    }

    pub fn threading_model(&self) -> Option<ModelKind> {
        lock(&self.shared.session).model
    }

    /// Pool size used by the Many-to-Many model. Must be at least 1.
    pub fn set_kernel_threads(&self, kernel_threads: usize) -> Result<(), SimError> {
        if kernel_threads == 0 {
            return Err(SimError::InvalidConfig(
                "kernel thread pool must not be empty".into(),
            ));
        }
        lock(&self.shared.session).kernel_threads = kernel_threads;
        Ok(())
    }

    pub fn kernel_threads(&self) -> usize {
        lock(&self.shared.session).kernel_threads
    }

    /// Set the speed multiplier, clamped to [0.1, 10.0]. Returns the value
    /// actually applied.
    pub fn set_simulation_speed(&self, speed: f64) -> f64 {
        let applied = self.shared.control.set_speed(speed);
        debug!(speed = applied, "simulation speed set");
        applied
    }

    pub fn simulation_speed(&self) -> f64 {
        self.shared.control.speed()
    }

    pub fn register_update_callback<F>(&self, callback: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).push(Arc::new(callback));
    }

    // ---- lifecycle ----

    pub fn status(&self) -> SimStatus {
        lock(&self.shared.session).status
    }

    /// True while a run is in flight and not paused.
    pub fn is_running(&self) -> bool {
        self.status() == SimStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status() == SimStatus::Paused
    }

    /// Start a run of the selected model.
    ///
    /// Every thread is returned to New, every primitive to its initial
    /// state and all performance counters are cleared before the model
    /// takes over on a separate control thread.
    pub fn start_simulation(&self) -> Result<(), SimError> {
        {
            let session = lock(&self.shared.session);
            if session.model.is_none() {
                return Err(SimError::ModelNotSet);
            }
            if session.status.in_flight() {
                return Err(SimError::AlreadyRunning);
            }
        }
        self.reap_runner();

        let mut session = lock(&self.shared.session);
        let kind = session.model.ok_or(SimError::ModelNotSet)?;
        if session.status.in_flight() {
            return Err(SimError::AlreadyRunning);
        }
        let model = build_model(kind, session.kernel_threads)?;

        for thread in &session.threads {
            thread.rearm();
        }
        for sem in &session.semaphores {
            sem.reset();
        }
        for monitor in &session.monitors {
            monitor.reset();
        }
        self.shared.tracker.reset();
        self.shared.tracker.activate();
        self.shared.control.rearm();

        session.generation += 1;
        let generation = session.generation;
        let processes = session.processes.clone();
        let threads = session.threads.len();

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("sim-control".into())
            .spawn(move || {
                let callback: BurstCallback = {
                    let shared = shared.clone();
                    Arc::new(move |thread, outcome| {
                        debug!(thread = %thread.id(), ?outcome, "burst complete");
                        shared.notify();
                    })
                };
                model.run_simulation(&processes, &shared.control, &callback);
                shared.finish_run(generation);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.tracker.deactivate();
                error!("failed to spawn control thread: {e}");
                return Err(SimError::Spawn(e));
            }
        };
        session.status = SimStatus::Running;
        session.started_ns = Some(self.shared.clock.now_ns());
        session.finished_ns = None;
        drop(session);

        *lock(&self.shared.runner) = Some(handle);
        info!(model = %kind, threads, "simulation started");
        self.shared.notify();
        Ok(())
    }

    /// Wait for the previous run's control thread, which a stop has already
    /// told to wind down.
    fn reap_runner(&self) {
        let Some(handle) = lock(&self.shared.runner).take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            // Restarted from an update callback of the finishing run.
            return;
        }
        if handle.join().is_err() {
            warn!("previous control thread panicked");
        }
    }

    pub fn pause_simulation(&self) {
        let mut session = lock(&self.shared.session);
        if session.status != SimStatus::Running {
            return;
        }
        session.status = SimStatus::Paused;
        self.shared.control.pause();
        drop(session);
        info!("simulation paused");
        self.shared.notify();
    }

    pub fn resume_simulation(&self) {
        let mut session = lock(&self.shared.session);
        if session.status != SimStatus::Paused {
            return;
        }
        session.status = SimStatus::Running;
        self.shared.control.resume();
        drop(session);
        info!("simulation resumed");
        self.shared.notify();
    }

    /// Stop the run: cancel cooperative work, wake every blocked waiter and
    /// terminate every unfinished thread. No-op unless a run is in flight.
    pub fn stop_simulation(&self) {
        let mut session = lock(&self.shared.session);
        if !session.status.in_flight() {
            return;
        }
        self.shared.control.stop();
        for sem in &session.semaphores {
            sem.interrupt();
        }
        for monitor in &session.monitors {
            monitor.interrupt();
        }
        let mut terminated = 0;
        for thread in &session.threads {
            if thread.terminate() {
                terminated += 1;
            }
        }
        self.shared.tracker.deactivate();
        session.status = SimStatus::Stopped;
        session.finished_ns = Some(self.shared.clock.now_ns());
        drop(session);

        self.shared.done.notify_all();
        info!(terminated, "simulation stopped");
        self.shared.notify();
    }

    /// Stop, then drop every process, thread and primitive and the model
    /// selection. Callbacks, the event sink, the pool size and the speed
    /// are kept.
    pub fn reset_simulation(&self) {
        self.stop_simulation();
        let mut session = lock(&self.shared.session);
        for sem in &session.semaphores {
            sem.reset();
        }
        for monitor in &session.monitors {
            monitor.reset();
        }
        let fresh = Session {
            sink: session.sink.take(),
            kernel_threads: session.kernel_threads,
            generation: session.generation + 1,
            ..Session::new()
        };
        *session = fresh;
        drop(session);
        self.shared.tracker.reset();
        self.shared.done.notify_all();
        info!("simulation reset");
        self.shared.notify();
    }

    /// Block until the current run has finished. Returns `false` if
    /// `timeout` elapsed first.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut session = lock(&self.shared.session);
        while session.status.in_flight() {
            session = match deadline {
                None => self
                    .shared
                    .done
                    .wait(session)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.shared
                        .done
                        .wait_timeout(session, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
        true
    }

    // ---- statistics ----

    /// Time since the current (or last) run started.
    pub fn current_time_ns(&self) -> TimeNs {
        lock(&self.shared.session).elapsed_ns(self.shared.clock.now_ns())
    }

    pub fn get_performance_stats(&self) -> PerformanceStats {
        let threads = self.threads();
        self.shared.tracker.snapshot(&threads)
    }

    /// `None` for threads without accounted transitions.
    pub fn get_thread_efficiency(&self, id: ThreadId) -> Option<ThreadEfficiency> {
        self.shared.tracker.efficiency(id)
    }

    pub fn get_simulation_stats(&self) -> SimulationStats {
        let session = lock(&self.shared.session);
        let process_count = session.processes.len();
        let threads = session.threads.clone();
        let semaphores = session.semaphores.clone();
        let monitors = session.monitors.clone();
        let status = session.status;
        let current_time_ns = session.elapsed_ns(self.shared.clock.now_ns());
        drop(session);

        SimulationStats {
            process_count,
            thread_count: threads.len(),
            thread_states: SimulationStats::count_states(threads.iter().map(|t| t.state())),
            semaphores: semaphores.iter().map(|s| s.summary(RECENT)).collect(),
            monitors: monitors.iter().map(|m| m.summary(RECENT)).collect(),
            is_running: status == SimStatus::Running,
            is_paused: status == SimStatus::Paused,
            current_time_ns,
            simulation_speed: self.shared.control.speed(),
            context_switches: self.shared.tracker.context_switches(),
            resource_contentions: self.shared.tracker.resource_contentions(),
        }
    }

    pub fn export_document(&self) -> ExportDocument {
        let (model, processes) = {
            let session = lock(&self.shared.session);
            (session.model, session.processes.len())
        };
        let threads = self.threads();
        let simulation_stats = self.get_simulation_stats();
        ExportDocument {
            model_type: model.map(|m| m.to_string()),
            thread_count: threads.len(),
            process_count: processes,
            simulation_time_ns: simulation_stats.current_time_ns,
            performance_stats: self.shared.tracker.snapshot(&threads),
            simulation_stats,
            thread_histories: threads
                .iter()
                .map(|t| HistoryRecord {
                    thread_id: t.id(),
                    name: t.name().to_string(),
                    history: t.history(),
                })
                .collect(),
        }
    }

    /// Write the export document as JSON to `path`, or to
    /// `thread_simulation_<unix-seconds>.json` in the working directory.
    /// Returns the path written.
    pub fn export_simulation_data(&self, path: Option<&Path>) -> Result<PathBuf, SimError> {
        let path = path.map_or_else(default_export_path, Path::to_path_buf);
        let json = serde_json::to_string_pretty(&self.export_document())?;
        std::fs::write(&path, json).map_err(|source| {
            error!(path = %path.display(), "export failed: {source}");
            SimError::Io {
                path: path.clone(),
                source,
            }
        })?;
        info!(path = %path.display(), "exported simulation data");
        Ok(path)
    }

    // ---- example ----

    /// Reset, then build the stock example with `model` selected.
    pub fn create_example_simulation(&self, model: ModelKind) {
        self.create_example_simulation_with(model, &ExampleSpec::default());
    }

    /// Reset, then build one semaphore ("Resource Semaphore") shared by
    /// `Worker-<n>` threads across `spec.processes` processes.
    pub fn create_example_simulation_with(&self, model: ModelKind, spec: &ExampleSpec) {
        self.reset_simulation();

        let sem = self.create_semaphore(spec.semaphore_value, Some("Resource Semaphore"));
        let work = workloads::semaphore_guarded(sem, spec.steps, spec.step, spec.poll);

        let mut worker = 0;
        for p in 0..spec.processes {
            let name = match p {
                0 => "Example Process".to_string(),
                _ => format!("Example Process {}", p + 1),
            };
            let process = self.create_process(Some(&name));
            let mut session = lock(&self.shared.session);
            for _ in 0..spec.threads_per_process {
                worker += 1;
                let name = format!("Worker-{worker}");
                self.add_thread(&mut session, &process, Some(&name), Some(work.clone()));
            }
        }
        self.set_threading_model(model);
        info!(model = %model, threads = worker, "example simulation created");
        self.shared.notify();
    }
}

fn default_export_path() -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    PathBuf::from(format!("thread_simulation_{secs}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{work_fn, ThreadState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instant_work() -> WorkFn {
        work_fn(|ctx| {
            ctx.set_progress(100);
            Ok(())
        })
    }

    #[test]
    fn test_start_without_model_fails() {
        let sim = Simulator::new();
        let p = sim.create_process(None);
        sim.create_thread(p.id(), None, Some(instant_work())).unwrap();
        assert!(matches!(sim.start_simulation(), Err(SimError::ModelNotSet)));
        assert!(!sim.is_running());
        assert_eq!(sim.status(), SimStatus::Idle);
    }

    #[test]
    fn test_default_names_and_ids() {
        let sim = Simulator::new();
        let p = sim.create_process(None);
        assert_eq!(p.name(), "Process-1");
        let t = sim.create_thread(p.id(), None, None).unwrap();
        assert_eq!(t.name(), "Thread-1");
        assert_eq!(sim.create_semaphore(2, None).name(), "Semaphore-1");
        assert_eq!(sim.create_semaphore(2, None).name(), "Semaphore-2");
        assert_eq!(sim.create_monitor(None).name(), "Monitor-1");

        // Ids restart after a reset.
        sim.reset_simulation();
        let p = sim.create_process(None);
        assert_eq!(p.id(), ProcessId(1));
        assert_eq!(sim.create_semaphore(1, None).name(), "Semaphore-1");
    }

    #[test]
    fn test_unknown_process_rejected() {
        let sim = Simulator::new();
        let err = sim.create_thread(ProcessId(42), None, None).unwrap_err();
        assert!(matches!(err, SimError::UnknownProcess(ProcessId(42))));
    }

    #[test]
    fn test_remove_thread() {
        let sim = Simulator::new();
        let p = sim.create_process(None);
        let t = sim.create_thread(p.id(), None, None).unwrap();
        assert!(sim.remove_thread(t.id()));
        assert!(!sim.remove_thread(t.id()));
        assert_eq!(p.thread_count(), 0);
        assert!(sim.thread(t.id()).is_none());
        assert!(t.is_terminated());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let sim = Simulator::new();
        assert!(sim.set_kernel_threads(0).is_err());
        assert_eq!(sim.kernel_threads(), DEFAULT_KERNEL_THREADS);
        sim.set_kernel_threads(4).unwrap();
        assert_eq!(sim.kernel_threads(), 4);
    }

    #[test]
    fn test_speed_is_clamped() {
        let sim = Simulator::new();
        assert_eq!(sim.set_simulation_speed(50.0), 10.0);
        assert_eq!(sim.set_simulation_speed(0.0), 0.1);
        assert_eq!(sim.simulation_speed(), 0.1);
    }

    #[test]
    fn test_run_to_completion() {
        let sim = Simulator::new();
        let p = sim.create_process(None);
        for _ in 0..3 {
            sim.create_thread(p.id(), None, Some(instant_work())).unwrap();
        }
        sim.set_threading_model(ModelKind::OneToOne);
        sim.start_simulation().unwrap();
        assert!(sim.wait_for_completion(Some(Duration::from_secs(10))));
        assert_eq!(sim.status(), SimStatus::Stopped);
        assert!(sim
            .threads()
            .iter()
            .all(|t| t.state() == ThreadState::Terminated && t.progress() == 100));
        assert_eq!(sim.get_performance_stats().context_switches, 3);

        // A second run starts from scratch.
        sim.start_simulation().unwrap();
        assert!(sim.wait_for_completion(Some(Duration::from_secs(10))));
        assert_eq!(sim.get_performance_stats().context_switches, 3);
    }

    #[test]
    fn test_tracker_inactive_outside_run() {
        let sim = Simulator::new();
        let p = sim.create_process(None);
        let t = sim.create_thread(p.id(), None, Some(instant_work())).unwrap();
        t.start();
        t.dispatch();
        t.terminate();
        assert_eq!(sim.get_performance_stats().context_switches, 0);
        assert!(sim.get_thread_efficiency(t.id()).is_none());
    }

    #[test]
    fn test_callbacks_are_isolated() {
        let sim = Simulator::new();
        let hits = Arc::new(AtomicUsize::new(0));
        sim.register_update_callback(|| anyhow::bail!("observer broke"));
        sim.register_update_callback(|| panic!("observer panicked"));
        {
            let hits = hits.clone();
            sim.register_update_callback(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        sim.reset_simulation();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pause_and_resume() {
        let sim = Simulator::new();
        let p = sim.create_process(None);
        sim.create_thread(
            p.id(),
            None,
            Some(workloads::progress_loop(50, Duration::from_millis(10))),
        )
        .unwrap();
        sim.set_threading_model(ModelKind::ManyToOne);

        // Only a running simulation can be paused.
        sim.pause_simulation();
        assert_eq!(sim.status(), SimStatus::Idle);

        sim.start_simulation().unwrap();
        sim.pause_simulation();
        assert!(sim.is_paused());
        assert!(!sim.is_running());
        assert!(matches!(sim.start_simulation(), Err(SimError::AlreadyRunning)));
        sim.resume_simulation();
        assert!(sim.is_running());
        sim.stop_simulation();
        sim.stop_simulation();
        assert_eq!(sim.status(), SimStatus::Stopped);
        assert!(sim.wait_for_completion(Some(Duration::from_secs(1))));
    }
}
