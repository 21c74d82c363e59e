//! Simulated user threads.
//!
//! A `SimThread` is a small state machine (`New → Ready → Running →
//! {Blocked, Terminated}`, `Blocked → Ready`) with an append-only history.
//! Every state change is stamped from the session clock, appended to the
//! history and reported to the thread's optional `TransitionListener` while
//! the thread's own lock is held, so listeners observe one thread's
//! transitions in the order they happened.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::clock::SimClock;
use crate::control::SimControl;
use crate::lock;
use crate::sync::ResourceRef;
use crate::types::{ThreadId, TimeNs};

/// The state a simulated thread can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreadState {
    /// Created, not yet admitted by a scheduler.
    New,
    /// Runnable, waiting for an execution context.
    Ready,
    /// Executing its burst on an execution context.
    Running,
    /// Waiting on a synchronization primitive.
    Blocked,
    /// Burst finished or forcibly terminated.
    Terminated,
}

impl ThreadState {
    pub const ALL: [ThreadState; 5] = [
        ThreadState::New,
        ThreadState::Ready,
        ThreadState::Running,
        ThreadState::Blocked,
        ThreadState::Terminated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ThreadState::New => "New",
            ThreadState::Ready => "Ready",
            ThreadState::Running => "Running",
            ThreadState::Blocked => "Blocked",
            ThreadState::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a thread's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: ThreadState,
    pub time_ns: TimeNs,
}

/// A state change, as reported to a [`TransitionListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub thread: ThreadId,
    pub from: ThreadState,
    pub to: ThreadState,
    pub time_ns: TimeNs,
    /// The primitive the thread is blocked on, for transitions into Blocked.
    pub resource: Option<ResourceRef>,
}

/// Receives every state change of the threads it is attached to.
///
/// Called with the thread's internal lock held: implementations must not
/// call back into the same thread.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &Transition);
}

/// The body of a thread's burst.
pub type WorkFn = Arc<dyn Fn(&WorkContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`WorkFn`].
pub fn work_fn<F>(f: F) -> WorkFn
where
    F: Fn(&WorkContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a work function sees while it runs.
pub struct WorkContext<'a> {
    thread: &'a Arc<SimThread>,
    control: &'a SimControl,
}

impl<'a> WorkContext<'a> {
    pub fn new(thread: &'a Arc<SimThread>, control: &'a SimControl) -> Self {
        WorkContext { thread, control }
    }

    pub fn thread(&self) -> &'a Arc<SimThread> {
        self.thread
    }

    pub fn control(&self) -> &'a SimControl {
        self.control
    }

    /// Cooperative cancellation point: parks while the run is paused and
    /// returns `false` once the run is stopped or this thread was terminated.
    pub fn proceed(&self) -> bool {
        self.control.proceed() && !self.thread.is_terminated()
    }

    /// Speed-scaled sleep. Returns `false` if the burst should end.
    pub fn sleep(&self, nominal: Duration) -> bool {
        self.control.sleep(nominal) && !self.thread.is_terminated()
    }

    pub fn set_progress(&self, progress: u8) {
        self.thread.set_progress(progress);
    }
}

/// How a burst ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurstOutcome {
    /// The work function returned `Ok`.
    Completed,
    /// The work function returned an error.
    Failed(String),
    /// The work function panicked.
    Panicked(String),
    /// The thread was not runnable (New, Blocked or Terminated); nothing ran.
    Skipped,
}

#[derive(Debug)]
struct ThreadInner {
    state: ThreadState,
    progress: u8,
    start_ns: Option<TimeNs>,
    end_ns: Option<TimeNs>,
    execution_ns: TimeNs,
    blocked_by: Option<ResourceRef>,
    history: Vec<HistoryEntry>,
}

pub struct SimThread {
    id: ThreadId,
    name: String,
    work: WorkFn,
    clock: SimClock,
    listener: Option<Arc<dyn TransitionListener>>,
    inner: Mutex<ThreadInner>,
}

impl fmt::Debug for SimThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl SimThread {
    /// Create a thread in the New state. Unnamed threads are `Thread-<id>`;
    /// threads without a work function run [`default_work`].
    pub fn new(id: ThreadId, name: Option<&str>, work: Option<WorkFn>) -> Self {
        Self::with_clock(id, name, work, SimClock::new(), None)
    }

    pub fn with_clock(
        id: ThreadId,
        name: Option<&str>,
        work: Option<WorkFn>,
        clock: SimClock,
        listener: Option<Arc<dyn TransitionListener>>,
    ) -> Self {
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("Thread-{}", id.0),
        };
        let history = vec![HistoryEntry {
            state: ThreadState::New,
            time_ns: clock.now_ns(),
        }];
        SimThread {
            id,
            name,
            work: work.unwrap_or_else(|| work_fn(default_work)),
            clock,
            listener,
            inner: Mutex::new(ThreadInner {
                state: ThreadState::New,
                progress: 0,
                start_ns: None,
                end_ns: None,
                execution_ns: 0,
                blocked_by: None,
                history,
            }),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        lock(&self.inner).state
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ThreadState::Terminated
    }

    pub fn progress(&self) -> u8 {
        lock(&self.inner).progress
    }

    /// Set progress, clamped to 100.
    pub fn set_progress(&self, progress: u8) {
        lock(&self.inner).progress = progress.min(100);
    }

    /// Time between entering Running and termination. Zero until terminated.
    pub fn execution_time_ns(&self) -> TimeNs {
        lock(&self.inner).execution_ns
    }

    pub fn start_time_ns(&self) -> Option<TimeNs> {
        lock(&self.inner).start_ns
    }

    pub fn end_time_ns(&self) -> Option<TimeNs> {
        lock(&self.inner).end_ns
    }

    pub fn blocked_by(&self) -> Option<ResourceRef> {
        lock(&self.inner).blocked_by.clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.inner).history.clone()
    }

    /// New → Ready. Returns whether the transition happened.
    pub fn start(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state != ThreadState::New {
            return false;
        }
        self.transition(&mut inner, ThreadState::Ready, None);
        true
    }

    /// Run the burst: Ready → Running, invoke the work function to
    /// completion, then terminate.
    ///
    /// Only a Ready (or already Running) thread can run; any other state is
    /// left untouched and reported as [`BurstOutcome::Skipped`]. Errors and
    /// panics raised by the work function are caught and logged; the thread
    /// is terminated either way.
    pub fn run(self: &Arc<Self>, control: &SimControl) -> BurstOutcome {
        {
            let mut inner = lock(&self.inner);
            let state = inner.state;
            match state {
                ThreadState::Ready => self.transition(&mut inner, ThreadState::Running, None),
                ThreadState::Running => {}
                _ => {
                    debug!(thread = %self.id, %state, "not runnable, skipping burst");
                    return BurstOutcome::Skipped;
                }
            }
            inner.start_ns = Some(inner.history.last().map_or(0, |h| h.time_ns));
        }

        let ctx = WorkContext::new(self, control);
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (self.work)(&ctx))) {
            Ok(Ok(())) => BurstOutcome::Completed,
            Ok(Err(e)) => {
                error!(thread = %self.id, name = %self.name, "work function failed: {e:#}");
                BurstOutcome::Failed(format!("{e:#}"))
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(thread = %self.id, name = %self.name, "work function panicked: {msg}");
                BurstOutcome::Panicked(msg)
            }
        };

        self.terminate();
        outcome
    }

    /// Ready → Running without invoking the work function. Used when a
    /// thread that was blocked mid-burst regains its resource.
    pub fn dispatch(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state != ThreadState::Ready {
            return false;
        }
        self.transition(&mut inner, ThreadState::Running, None);
        true
    }

    /// Any non-terminated state → Blocked on `resource`.
    pub fn block(&self, resource: ResourceRef) -> bool {
        let mut inner = lock(&self.inner);
        match inner.state {
            ThreadState::Terminated => false,
            ThreadState::Blocked => {
                inner.blocked_by = Some(resource);
                false
            }
            _ => {
                inner.blocked_by = Some(resource.clone());
                self.transition(&mut inner, ThreadState::Blocked, Some(resource));
                true
            }
        }
    }

    /// Blocked → Ready, clearing the blocking resource.
    pub fn unblock(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state != ThreadState::Blocked {
            return false;
        }
        inner.blocked_by = None;
        self.transition(&mut inner, ThreadState::Ready, None);
        true
    }

    /// Force Terminated and finalize the execution time. No-op when
    /// already terminated.
    pub fn terminate(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state == ThreadState::Terminated {
            return false;
        }
        inner.blocked_by = None;
        self.transition(&mut inner, ThreadState::Terminated, None);
        let end = inner.history.last().map_or(0, |h| h.time_ns);
        inner.end_ns = Some(end);
        if let Some(start) = inner.start_ns {
            inner.execution_ns = end.saturating_sub(start);
        }
        true
    }

    /// Return to New ahead of a fresh run. History is appended, not cleared.
    pub(crate) fn rearm(&self) {
        let mut inner = lock(&self.inner);
        inner.progress = 0;
        inner.start_ns = None;
        inner.end_ns = None;
        inner.execution_ns = 0;
        inner.blocked_by = None;
        if inner.state != ThreadState::New {
            self.transition(&mut inner, ThreadState::New, None);
        }
    }

    fn transition(
        &self,
        inner: &mut ThreadInner,
        to: ThreadState,
        resource: Option<ResourceRef>,
    ) {
        let from = inner.state;
        let last = inner.history.last().map_or(0, |h| h.time_ns);
        let time_ns = self.clock.now_ns().max(last);
        inner.state = to;
        inner.history.push(HistoryEntry { state: to, time_ns });
        debug!(thread = %self.id, %from, %to, "transition");

        if let Some(listener) = &self.listener {
            listener.on_transition(&Transition {
                thread: self.id,
                from,
                to,
                time_ns,
                resource,
            });
        }
    }
}

/// Ten steps of 100ms each, advancing progress by 10 per step.
pub fn default_work(ctx: &WorkContext<'_>) -> anyhow::Result<()> {
    for step in 1..=10u8 {
        if !ctx.sleep(Duration::from_millis(100)) {
            warn!(thread = %ctx.thread().id(), step, "burst cancelled");
            break;
        }
        ctx.set_progress(step * 10);
    }
    Ok(())
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ResourceKind;

    fn quick(id: u64) -> Arc<SimThread> {
        let work = work_fn(|ctx| {
            ctx.set_progress(100);
            Ok(())
        });
        Arc::new(SimThread::new(ThreadId(id), None, Some(work)))
    }

    fn sem_ref() -> ResourceRef {
        ResourceRef::new(ResourceKind::Semaphore, "S")
    }

    fn assert_history_sane(thread: &SimThread) {
        let history = thread.history();
        for pair in history.windows(2) {
            assert!(pair[1].time_ns >= pair[0].time_ns, "history went backwards");
        }
    }

    #[test]
    fn test_default_name() {
        let t = quick(7);
        assert_eq!(t.name(), "Thread-7");
        assert_eq!(t.state(), ThreadState::New);
        assert_eq!(t.history().len(), 1);
    }

    #[test]
    fn test_full_lifecycle() {
        let t = quick(1);
        let control = SimControl::new();
        assert!(t.start());
        assert!(!t.start(), "start is only valid from New");
        assert_eq!(t.run(&control), BurstOutcome::Completed);
        assert_eq!(t.state(), ThreadState::Terminated);
        assert_eq!(t.progress(), 100);

        let states: Vec<_> = t.history().iter().map(|h| h.state).collect();
        assert_eq!(
            states,
            vec![
                ThreadState::New,
                ThreadState::Ready,
                ThreadState::Running,
                ThreadState::Terminated
            ]
        );
        assert!(t.end_time_ns().unwrap() >= t.start_time_ns().unwrap());
        assert_history_sane(&t);
    }

    #[test]
    fn test_block_and_unblock() {
        let t = quick(1);
        t.start();
        assert!(t.block(sem_ref()));
        assert_eq!(t.blocked_by().unwrap().name, "S");
        assert!(t.unblock());
        assert_eq!(t.state(), ThreadState::Ready);
        assert!(t.blocked_by().is_none());
        assert!(!t.unblock(), "unblock only leaves Blocked");
    }

    #[test]
    fn test_terminated_is_terminal() {
        let t = quick(1);
        assert!(t.terminate());
        assert!(!t.block(sem_ref()));
        assert!(!t.unblock());
        assert!(!t.start());
        assert!(!t.dispatch());
        assert_eq!(t.run(&SimControl::new()), BurstOutcome::Skipped);
        assert_eq!(t.state(), ThreadState::Terminated);
        assert_eq!(t.execution_time_ns(), 0, "never ran");
    }

    #[test]
    fn test_terminate_from_any_state() {
        for setup in 0..4 {
            let t = quick(1);
            match setup {
                1 => {
                    t.start();
                }
                2 => {
                    t.start();
                    t.dispatch();
                }
                3 => {
                    t.block(sem_ref());
                }
                _ => {}
            }
            t.terminate();
            assert_eq!(t.state(), ThreadState::Terminated);
            assert_history_sane(&t);
        }
    }

    #[test]
    fn test_failing_work_still_terminates() {
        let work = work_fn(|_| anyhow::bail!("boom"));
        let t = Arc::new(SimThread::new(ThreadId(1), None, Some(work)));
        t.start();
        let outcome = t.run(&SimControl::new());
        assert_eq!(outcome, BurstOutcome::Failed("boom".into()));
        assert!(t.is_terminated());
    }

    #[test]
    fn test_panicking_work_still_terminates() {
        let work = work_fn(|_| panic!("kaboom"));
        let t = Arc::new(SimThread::new(ThreadId(1), None, Some(work)));
        t.start();
        let outcome = t.run(&SimControl::new());
        assert_eq!(outcome, BurstOutcome::Panicked("kaboom".into()));
        assert!(t.is_terminated());
    }

    #[test]
    fn test_listener_sees_transitions() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(ThreadState, ThreadState)>>);
        impl TransitionListener for Recorder {
            fn on_transition(&self, t: &Transition) {
                self.0.lock().unwrap().push((t.from, t.to));
            }
        }

        let recorder = Arc::new(Recorder::default());
        let t = SimThread::with_clock(
            ThreadId(1),
            None,
            None,
            SimClock::new(),
            Some(recorder.clone()),
        );
        t.start();
        t.dispatch();
        t.block(sem_ref());
        t.block(sem_ref());
        t.unblock();
        t.terminate();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (ThreadState::New, ThreadState::Ready),
                (ThreadState::Ready, ThreadState::Running),
                (ThreadState::Running, ThreadState::Blocked),
                (ThreadState::Blocked, ThreadState::Ready),
                (ThreadState::Ready, ThreadState::Terminated),
            ]
        );
    }

    #[test]
    fn test_run_requires_ready() {
        let t = quick(1);
        assert_eq!(t.run(&SimControl::new()), BurstOutcome::Skipped);
        assert_eq!(t.state(), ThreadState::New);
        assert_eq!(t.progress(), 0);

        t.start();
        t.block(sem_ref());
        assert_eq!(t.run(&SimControl::new()), BurstOutcome::Skipped);
        assert_eq!(t.state(), ThreadState::Blocked);

        t.unblock();
        assert_eq!(t.run(&SimControl::new()), BurstOutcome::Completed);
        let states: Vec<_> = t.history().iter().map(|h| h.state).collect();
        assert_eq!(
            states,
            vec![
                ThreadState::New,
                ThreadState::Ready,
                ThreadState::Blocked,
                ThreadState::Ready,
                ThreadState::Running,
                ThreadState::Terminated
            ]
        );
    }

    #[test]
    fn test_rearm_appends_history() {
        let t = quick(1);
        t.start();
        t.run(&SimControl::new());
        let before = t.history().len();
        t.rearm();
        assert_eq!(t.state(), ThreadState::New);
        assert_eq!(t.progress(), 0);
        assert_eq!(t.history().len(), before + 1);
        assert_history_sane(&t);
    }
}
