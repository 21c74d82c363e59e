//! Simulated processes: ordered thread lists plus the kernel contexts the
//! active threading model assigned to them.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::lock;
use crate::thread::SimThread;
use crate::types::{ContextId, ProcessId, ThreadId};

/// A kernel execution context created by a threading model, with the user
/// threads it serviced in the order it picked them up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelContext {
    pub id: ContextId,
    pub threads: Vec<ThreadId>,
}

#[derive(Debug, Default)]
struct ProcessInner {
    threads: Vec<Arc<SimThread>>,
    contexts: Vec<KernelContext>,
}

#[derive(Debug)]
pub struct SimProcess {
    id: ProcessId,
    name: String,
    inner: Mutex<ProcessInner>,
}

impl SimProcess {
    /// Unnamed processes are `Process-<id>`.
    pub fn new(id: ProcessId, name: Option<&str>) -> Self {
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("Process-{}", id.0),
        };
        SimProcess {
            id,
            name,
            inner: Mutex::new(ProcessInner::default()),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_thread(&self, thread: Arc<SimThread>) {
        lock(&self.inner).threads.push(thread);
    }

    /// Remove a thread from the membership list. Returns whether it was there.
    pub fn remove_thread(&self, id: ThreadId) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.threads.len();
        inner.threads.retain(|t| t.id() != id);
        inner.threads.len() != before
    }

    /// Threads in insertion order.
    pub fn threads(&self) -> Vec<Arc<SimThread>> {
        lock(&self.inner).threads.clone()
    }

    pub fn thread_count(&self) -> usize {
        lock(&self.inner).threads.len()
    }

    pub fn kernel_contexts(&self) -> Vec<KernelContext> {
        lock(&self.inner).contexts.clone()
    }

    pub(crate) fn set_kernel_contexts(&self, contexts: Vec<KernelContext>) {
        lock(&self.inner).contexts = contexts;
    }

    /// Record that `thread` was picked up by context `ctx`.
    pub(crate) fn assign(&self, ctx: ContextId, thread: ThreadId) {
        let mut inner = lock(&self.inner);
        match inner.contexts.iter_mut().find(|c| c.id == ctx) {
            Some(c) => c.threads.push(thread),
            None => inner.contexts.push(KernelContext {
                id: ctx,
                threads: vec![thread],
            }),
        }
    }
}
