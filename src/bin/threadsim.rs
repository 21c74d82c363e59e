//! threadsim: run the example workload under one threading model and print
//! the resulting statistics.
//!
//! Usage:
//!   threadsim --model many-to-many --kernel-threads 2 --threads 6
//!   threadsim --model one-to-one --speed 4 --export out.json --dump-history

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::EnvFilter;

use thread_sim::clock::ns_to_secs;
use thread_sim::config::get_config_path;
use thread_sim::{Cli, Config, SimFormat, Simulator, ThreadState};

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| match EnvFilter::try_new(log_level) {
            Ok(filter) => Ok(filter),
            Err(e) => {
                eprintln!("invalid log level: {log_level}, using info, err is: {e}");
                EnvFilter::try_new("info")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(SimFormat)
        .try_init()
    {
        eprintln!("failed to init logger: {e}");
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(path) = &cli.config {
        return Config::load(Some(path));
    }
    match get_config_path() {
        Ok(path) if path.exists() => Config::load(Some(&path)),
        Ok(_) => Ok(Config::default()),
        Err(e) => {
            debug!("no config directory: {e}");
            Ok(Config::default())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    debug!("cli={:?}", &cli);

    let config = Config::merge_cli(&load_config(&cli)?, &cli);
    config.validate().context("invalid configuration")?;

    let sim = Simulator::new();
    sim.set_simulation_speed(config.speed());
    sim.set_kernel_threads(config.kernel_threads())?;
    sim.create_example_simulation_with(config.model(), &config.example_spec());

    {
        let observer = sim.clone();
        sim.register_update_callback(move || {
            let threads = observer.threads();
            let done = threads
                .iter()
                .filter(|t| t.state() == ThreadState::Terminated)
                .count();
            debug!(done, total = threads.len(), "progress");
            Ok(())
        });
    }

    {
        let sim = sim.clone();
        ctrlc::set_handler(move || {
            warn!("interrupted, stopping simulation");
            sim.stop_simulation();
        })
        .context("Error setting Ctrl-C handler")?;
    }

    sim.start_simulation()?;
    sim.wait_for_completion(None);

    let perf = sim.get_performance_stats();
    let stats = sim.get_simulation_stats();
    info!(
        model = %config.model(),
        elapsed_s = ns_to_secs(stats.current_time_ns),
        "simulation complete"
    );

    println!("model: {}", config.model());
    print!("{perf}");
    for sem in &stats.semaphores {
        println!(
            "semaphore {:?}: value={} (initial {}) waiting={}",
            sem.name, sem.value, sem.initial_value, sem.waiting_threads
        );
    }
    for process in sim.processes() {
        for ctx in process.kernel_contexts() {
            let threads: Vec<String> = ctx.threads.iter().map(|t| t.to_string()).collect();
            println!("{} {}: {}", process.name(), ctx.id, threads.join(" "));
        }
    }

    if cli.dump_history {
        for thread in sim.threads() {
            println!("{} ({}):", thread.name(), thread.id());
            for entry in thread.history() {
                println!("  {:>12.6}s {}", ns_to_secs(entry.time_ns), entry.state);
            }
        }
    }

    if let Some(path) = config.export_path() {
        let written = sim
            .export_simulation_data(Some(path))
            .context("failed to export simulation data")?;
        println!("exported to {}", written.display());
    }

    Ok(())
}
