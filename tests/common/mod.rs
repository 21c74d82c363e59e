#![allow(dead_code)]

use std::time::{Duration, Instant};

use thread_sim::{ExampleSpec, SimFormat, Simulator};

/// Initialize tracing from `RUST_LOG`.
///
/// `try_init()` is idempotent: first call in the process succeeds,
/// subsequent calls are silently ignored.
pub fn setup_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .event_format(SimFormat)
        .try_init();
}

/// The stock example shrunk to run in tens of milliseconds.
pub fn fast_spec(threads: usize) -> ExampleSpec {
    ExampleSpec {
        threads_per_process: threads,
        steps: 5,
        step: Duration::from_millis(2),
        poll: Duration::from_millis(1),
        ..ExampleSpec::default()
    }
}

/// Wait for the run to finish, failing the test after ten seconds.
pub fn finish(sim: &Simulator) {
    assert!(
        sim.wait_for_completion(Some(Duration::from_secs(10))),
        "simulation did not finish"
    );
}

/// Poll `cond` every millisecond for up to two seconds.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
