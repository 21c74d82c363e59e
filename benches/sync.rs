//! Criterion benchmarks for the synchronization primitives.
//!
//! Run with:
//!
//!     cargo bench --bench sync

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use thread_sim::*;

fn running(id: u64) -> Arc<SimThread> {
    let t = Arc::new(SimThread::new(ThreadId(id), None, None));
    t.start();
    t.dispatch();
    t
}

fn bench_semaphore_uncontended(c: &mut Criterion) {
    let sem = Semaphore::new(1, "S");
    let t = running(1);
    c.bench_function("semaphore wait/signal", |b| {
        b.iter(|| {
            assert!(sem.wait(&t));
            sem.signal(Some(t.as_ref()));
        })
    });
}

/// One holder, `n` queued waiters, then a full chain of handoffs.
fn bench_semaphore_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("semaphore handoff");
    for n in [4u64, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let sem = Semaphore::new(1, "S");
                    let threads: Vec<_> = (0..=n).map(running).collect();
                    (sem, threads)
                },
                |(sem, threads)| {
                    let (holder, waiters) = threads.split_first().unwrap();
                    sem.wait(holder);
                    for t in waiters {
                        sem.wait(t);
                    }
                    let mut prev = holder;
                    for t in waiters {
                        sem.signal(Some(prev.as_ref()));
                        sem.wait(t);
                        t.dispatch();
                        prev = t;
                    }
                    sem.signal(Some(prev.as_ref()));
                    sem
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_monitor_uncontended(c: &mut Criterion) {
    let monitor = Monitor::new("M");
    let t = running(1);
    c.bench_function("monitor enter/exit", |b| {
        b.iter(|| {
            monitor.enter(&t).unwrap();
            monitor.exit(&t).unwrap();
        })
    });
}

fn bench_tracker_snapshot(c: &mut Criterion) {
    let tracker = Arc::new(PerfTracker::new());
    tracker.activate();
    let threads: Vec<_> = (1..=64)
        .map(|id| {
            let listener: Arc<dyn TransitionListener> = tracker.clone();
            let t = Arc::new(SimThread::with_clock(
                ThreadId(id),
                None,
                None,
                SimClock::new(),
                Some(listener),
            ));
            t.start();
            t.dispatch();
            t
        })
        .collect();
    c.bench_function("tracker snapshot 64 threads", |b| {
        b.iter(|| tracker.snapshot(&threads))
    });
}

criterion_group!(
    benches,
    bench_semaphore_uncontended,
    bench_semaphore_handoff,
    bench_monitor_uncontended,
    bench_tracker_snapshot,
);
criterion_main!(benches);
