mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thread_sim::workloads;
use thread_sim::*;

use common::{eventually, fast_spec, finish, setup_test};

#[test]
fn test_many_to_one_example() {
    setup_test();
    let sim = Simulator::new();
    sim.create_example_simulation_with(ModelKind::ManyToOne, &fast_spec(5));
    sim.start_simulation().unwrap();
    finish(&sim);

    let threads = sim.threads();
    assert_eq!(threads.len(), 5);
    for t in &threads {
        assert_eq!(t.state(), ThreadState::Terminated, "{}", t.name());
        assert_eq!(t.progress(), 100, "{}", t.name());
    }
    let perf = sim.get_performance_stats();
    assert_eq!(perf.context_switches, 5);
    assert_eq!(perf.resource_contentions, 0);
    assert_eq!(perf.peak_running, 1);

    let sems = sim.semaphores();
    assert_eq!(sems.len(), 1);
    assert_eq!(sems[0].name(), "Resource Semaphore");
    assert_eq!(sems[0].value(), 1);

    // One shared context ran every thread in list order.
    let process = &sim.processes()[0];
    assert_eq!(process.name(), "Example Process");
    let ctxs = process.kernel_contexts();
    assert_eq!(ctxs.len(), 1);
    let order: Vec<_> = threads.iter().map(|t| t.id()).collect();
    assert_eq!(ctxs[0].threads, order);
}

#[test]
fn test_start_without_model() {
    setup_test();
    let sim = Simulator::new();
    let p = sim.create_process(Some("solo"));
    sim.create_thread(p.id(), None, None).unwrap();
    assert!(matches!(sim.start_simulation(), Err(SimError::ModelNotSet)));
    assert!(!sim.is_running());
    assert!(sim.threads().iter().all(|t| t.state() == ThreadState::New));
}

#[test]
fn test_many_to_many_bounds_running_threads() {
    setup_test();
    let sim = Simulator::new();
    sim.set_kernel_threads(2).unwrap();
    let p = sim.create_process(None);
    for _ in 0..4 {
        sim.create_thread(
            p.id(),
            None,
            Some(workloads::progress_loop(5, Duration::from_millis(5))),
        )
        .unwrap();
    }
    sim.set_threading_model(ModelKind::ManyToMany);

    sim.start_simulation().unwrap();
    finish(&sim);

    // The tracker sees transitions in lock order, so its running count is
    // an exact instantaneous value.
    let perf = sim.get_performance_stats();
    assert!(perf.peak_running <= 2, "peak {}", perf.peak_running);
    assert_eq!(perf.context_switches, 4);
    assert!(p.kernel_contexts().len() <= 2);
    assert!(sim.threads().iter().all(|t| t.progress() == 100));
}

#[test]
fn test_every_model_completes_example() {
    setup_test();
    for model in ModelKind::ALL {
        let sim = Simulator::new();
        sim.create_example_simulation_with(model, &fast_spec(4));
        sim.start_simulation().unwrap();
        finish(&sim);

        assert!(
            sim.threads()
                .iter()
                .all(|t| t.is_terminated() && t.progress() == 100),
            "{model}"
        );
        let sem = &sim.semaphores()[0];
        assert_eq!(sem.value(), 1, "{model}");
        assert_eq!(sem.waiting_count(), 0, "{model}");
        assert!(sim.get_performance_stats().context_switches >= 4, "{model}");
    }
}

#[test]
fn test_cpu_utilization_formula() {
    setup_test();
    let sim = Simulator::new();
    sim.create_example_simulation_with(ModelKind::OneToMany, &fast_spec(3));

    let before = sim.get_performance_stats();
    assert_eq!(before.overall_cpu_utilization, 0.0);

    sim.start_simulation().unwrap();
    finish(&sim);

    let perf = sim.get_performance_stats();
    let run: u64 = perf.thread_stats.iter().map(|t| t.run_time_ns).sum();
    let total: u64 = perf.thread_stats.iter().map(|t| t.total_time_ns()).sum();
    assert!(total > 0);
    let expected = 100.0 * run as f64 / total as f64;
    assert!((perf.overall_cpu_utilization - expected).abs() < 1e-9);
    assert!((0.0..=100.0).contains(&perf.overall_cpu_utilization));

    for t in &perf.thread_stats {
        let eff = sim.get_thread_efficiency(t.thread_id).unwrap();
        let sum = eff.cpu_utilization + eff.wait_ratio + eff.blocked_ratio;
        assert!((sum - 100.0).abs() < 1e-6);
    }
    assert!(sim.get_thread_efficiency(ThreadId(999)).is_none());
}

#[test]
fn test_contention_is_tracked() {
    setup_test();
    let sim = Simulator::new();
    let spec = ExampleSpec {
        step: Duration::from_millis(20),
        ..fast_spec(3)
    };
    sim.create_example_simulation_with(ModelKind::OneToOne, &spec);
    sim.start_simulation().unwrap();
    finish(&sim);

    // Three threads race for one permit: at least two of them must block.
    let perf = sim.get_performance_stats();
    assert!(perf.resource_contentions >= 2);
    assert!(perf.context_switches >= 3 + perf.resource_contentions);
    assert!(perf.thread_stats.iter().any(|t| t.blocked_time_ns > 0));
    assert!(perf.recent_events.len() <= 10);
}

#[test]
fn test_reset_while_blocked() {
    setup_test();
    let sim = Simulator::new();
    let spec = ExampleSpec {
        steps: 100,
        step: Duration::from_millis(20),
        ..fast_spec(4)
    };
    sim.create_example_simulation_with(ModelKind::OneToMany, &spec);
    sim.create_monitor(None);
    sim.start_simulation().unwrap();

    assert!(eventually(|| sim
        .threads()
        .iter()
        .any(|t| t.state() == ThreadState::Blocked)));

    let held = sim.threads();
    sim.reset_simulation();
    assert!(sim.threads().is_empty());
    assert!(sim.processes().is_empty());
    assert!(sim.semaphores().is_empty());
    assert!(sim.monitors().is_empty());
    assert!(!sim.is_running());
    assert_eq!(sim.status(), SimStatus::Idle);
    assert!(sim.threading_model().is_none());
    assert!(held.iter().all(|t| t.is_terminated()));

    // The session is immediately reusable.
    sim.create_example_simulation_with(ModelKind::ManyToOne, &fast_spec(2));
    sim.start_simulation().unwrap();
    finish(&sim);
    assert_eq!(sim.get_performance_stats().context_switches, 2);
}

#[test]
fn test_removing_granted_thread_releases_permit() {
    setup_test();
    let sim = Simulator::new();
    let spec = ExampleSpec {
        step: Duration::from_millis(20),
        poll: Duration::from_millis(200),
        ..fast_spec(3)
    };
    sim.create_example_simulation_with(ModelKind::OneToMany, &spec);
    sim.start_simulation().unwrap();

    // A thread handed the permit sits Ready until its next poll.
    let granted = || {
        sim.threads().into_iter().find(|t| {
            t.state() == ThreadState::Ready
                && t.history().iter().any(|h| h.state == ThreadState::Blocked)
        })
    };
    let mut victim = None;
    assert!(eventually(|| {
        victim = granted();
        victim.is_some()
    }));
    let victim = victim.unwrap();
    assert!(sim.remove_thread(victim.id()));

    finish(&sim);
    let threads = sim.threads();
    assert_eq!(threads.len(), 2);
    assert!(threads
        .iter()
        .all(|t| t.is_terminated() && t.progress() == 100));
    assert!(victim.is_terminated());
    assert_eq!(sim.semaphores()[0].value(), 1);
}

#[test]
fn test_stop_terminates_everything() {
    setup_test();
    let sim = Simulator::new();
    let spec = ExampleSpec {
        steps: 100,
        step: Duration::from_millis(20),
        ..fast_spec(3)
    };
    sim.create_example_simulation_with(ModelKind::ManyToOne, &spec);
    sim.start_simulation().unwrap();
    assert!(eventually(|| sim.threads()[0].progress() > 0));

    sim.stop_simulation();
    assert_eq!(sim.status(), SimStatus::Stopped);
    assert!(sim.threads().iter().all(|t| t.is_terminated()));
    assert!(sim.threads()[1..].iter().all(|t| t.progress() == 0));
    assert!(sim.wait_for_completion(Some(Duration::from_secs(5))));

    // Stop is idempotent.
    sim.stop_simulation();
    assert_eq!(sim.status(), SimStatus::Stopped);
}

#[test]
fn test_callbacks_fire_during_run() {
    setup_test();
    let sim = Simulator::new();
    sim.create_example_simulation_with(ModelKind::ManyToOne, &fast_spec(3));

    let calls = Arc::new(AtomicUsize::new(0));
    sim.register_update_callback(|| anyhow::bail!("broken observer"));
    {
        let calls = calls.clone();
        sim.register_update_callback(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    sim.start_simulation().unwrap();
    finish(&sim);

    // start + one per burst + finish
    assert!(eventually(|| calls.load(Ordering::SeqCst) >= 5));
}

#[test]
fn test_simulation_stats() {
    setup_test();
    let sim = Simulator::new();
    sim.create_example_simulation_with(ModelKind::ManyToOne, &fast_spec(2));
    let monitor = sim.create_monitor(Some("Gate"));
    monitor.add_condition("ready");

    let stats = sim.get_simulation_stats();
    assert_eq!(stats.process_count, 1);
    assert_eq!(stats.thread_count, 2);
    assert_eq!(stats.thread_states["New"], 2);
    assert!(!stats.is_running);
    assert_eq!(stats.simulation_speed, 1.0);
    assert_eq!(stats.monitors[0].name, "Gate");
    assert!(stats.monitors[0].condition_vars.contains_key("ready"));

    sim.start_simulation().unwrap();
    finish(&sim);
    let stats = sim.get_simulation_stats();
    assert_eq!(stats.thread_states["Terminated"], 2);
    assert_eq!(stats.semaphores[0].value, 1);
    assert!(stats.semaphores[0].log.len() <= 10);
    assert!(stats.current_time_ns > 0);
    assert_eq!(stats.context_switches, 2);
}

#[test]
fn test_export_round_trip() {
    setup_test();
    let sim = Simulator::new();
    sim.create_example_simulation_with(ModelKind::ManyToOne, &fast_spec(3));
    sim.start_simulation().unwrap();
    finish(&sim);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    let written = sim.export_simulation_data(Some(&path)).unwrap();
    assert_eq!(written, path);

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["model_type"], "Many-to-One");
    assert_eq!(doc["thread_count"], 3);
    assert_eq!(doc["process_count"], 1);
    assert_eq!(doc["performance_stats"]["context_switches"], 3);
    assert_eq!(doc["simulation_stats"]["thread_states"]["Terminated"], 3);

    let histories = doc["thread_histories"].as_array().unwrap();
    assert_eq!(histories.len(), 3);
    let first = histories[0]["history"].as_array().unwrap();
    assert_eq!(first[0]["state"], "New");
    assert_eq!(first.last().unwrap()["state"], "Terminated");
}

#[test]
fn test_export_failure_is_reported() {
    setup_test();
    let sim = Simulator::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("run.json");
    match sim.export_simulation_data(Some(&path)) {
        Err(SimError::Io { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected an I/O error, got {other:?}"),
    }
}
