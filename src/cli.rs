//! Command-line interface of `threadsim`.

use std::path::PathBuf;

use clap::Parser;

use crate::model::ModelKind;

#[derive(Clone, Debug, Default, Parser)]
#[command(name = "threadsim", author, version, about, long_about = None)]
pub struct Cli {
    /// Threading model to simulate.
    #[arg(short, long, value_enum, env = "THREADSIM_MODEL")]
    pub model: Option<ModelKind>,
    /// Threads per process.
    #[arg(short, long)]
    pub threads: Option<usize>,
    /// Number of processes.
    #[arg(short, long)]
    pub processes: Option<usize>,
    /// Initial value of the shared semaphore.
    #[arg(long)]
    pub semaphore_value: Option<u32>,
    /// Kernel thread pool size for the many-to-many model.
    #[arg(short, long)]
    pub kernel_threads: Option<usize>,
    /// Speed multiplier, clamped to [0.1, 10.0].
    #[arg(short, long)]
    pub speed: Option<f64>,
    /// Critical-section steps per thread.
    #[arg(long)]
    pub work_steps: Option<u32>,
    /// Nominal length of one step in milliseconds.
    #[arg(long)]
    pub step_ms: Option<u64>,
    /// Semaphore retry interval in milliseconds.
    #[arg(long)]
    pub poll_ms: Option<u64>,
    /// Config file. Defaults to $XDG_CONFIG_HOME/threadsim/threadsim.toml.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Write the simulation data as JSON to this path when done.
    #[arg(short, long)]
    pub export: Option<PathBuf>,
    /// Print every thread's state history when done.
    #[arg(long)]
    pub dump_history: bool,
    /// Specify the logging level. Accepts rust's envfilter syntax for modular
    /// logging: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#example-syntax.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
