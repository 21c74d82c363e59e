//! Persistent settings for the `threadsim` binary.
//!
//! Every field is optional so a partial TOML file only overrides what it
//! names; accessors fill in the defaults. Command-line flags are merged on
//! top with [`Config::merge_cli`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::control::clamp_speed;
use crate::error::SimError;
use crate::model::{ModelKind, DEFAULT_KERNEL_THREADS};
use crate::workloads::ExampleSpec;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Threading model.
    model: Option<ModelKind>,
    /// Threads per process.
    threads: Option<usize>,
    /// Number of processes.
    processes: Option<usize>,
    /// Initial value of the shared semaphore.
    semaphore_value: Option<u32>,
    /// Many-to-many pool size.
    kernel_threads: Option<usize>,
    /// Speed multiplier.
    speed: Option<f64>,
    /// Critical-section steps per thread.
    work_steps: Option<u32>,
    /// Step length in milliseconds.
    step_ms: Option<u64>,
    /// Semaphore retry interval in milliseconds.
    poll_ms: Option<u64>,
    /// Where to export results.
    export_path: Option<PathBuf>,
}

pub fn get_config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("threadsim")?;
    Ok(xdg_dirs.get_config_file("threadsim.toml"))
}

impl Config {
    pub fn model(&self) -> ModelKind {
        self.model.unwrap_or(ModelKind::ManyToOne)
    }

    pub fn set_model(&mut self, model: ModelKind) {
        self.model = Some(model);
    }

    pub fn threads(&self) -> usize {
        self.threads.unwrap_or(5)
    }

    pub fn processes(&self) -> usize {
        self.processes.unwrap_or(1)
    }

    pub fn semaphore_value(&self) -> u32 {
        self.semaphore_value.unwrap_or(1)
    }

    pub fn kernel_threads(&self) -> usize {
        self.kernel_threads.unwrap_or(DEFAULT_KERNEL_THREADS)
    }

    /// Speed multiplier, clamped to [0.1, 10.0].
    pub fn speed(&self) -> f64 {
        clamp_speed(self.speed.unwrap_or(1.0))
    }

    pub fn work_steps(&self) -> u32 {
        self.work_steps.unwrap_or(10)
    }

    pub fn step_ms(&self) -> u64 {
        self.step_ms.unwrap_or(200)
    }

    pub fn poll_ms(&self) -> u64 {
        self.poll_ms.unwrap_or(100)
    }

    pub fn export_path(&self) -> Option<&Path> {
        self.export_path.as_deref()
    }

    /// Returns the default config with every value filled in.
    pub fn default_config() -> Config {
        let empty = Config::default();
        Config {
            model: Some(empty.model()),
            threads: Some(empty.threads()),
            processes: Some(empty.processes()),
            semaphore_value: Some(empty.semaphore_value()),
            kernel_threads: Some(empty.kernel_threads()),
            speed: Some(empty.speed()),
            work_steps: Some(empty.work_steps()),
            step_ms: Some(empty.step_ms()),
            poll_ms: Some(empty.poll_ms()),
            export_path: None,
        }
    }

    /// Loads the config from `path`, or from the XDG config file.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => get_config_path()?,
        };
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Merges a Config with the command line; flags win.
    pub fn merge_cli(config: &Config, cli: &Cli) -> Config {
        Config {
            model: Some(cli.model.unwrap_or(config.model())),
            threads: Some(cli.threads.unwrap_or(config.threads())),
            processes: Some(cli.processes.unwrap_or(config.processes())),
            semaphore_value: Some(cli.semaphore_value.unwrap_or(config.semaphore_value())),
            kernel_threads: Some(cli.kernel_threads.unwrap_or(config.kernel_threads())),
            speed: Some(cli.speed.map_or(config.speed(), clamp_speed)),
            work_steps: Some(cli.work_steps.unwrap_or(config.work_steps())),
            step_ms: Some(cli.step_ms.unwrap_or(config.step_ms())),
            poll_ms: Some(cli.poll_ms.unwrap_or(config.poll_ms())),
            export_path: cli.export.clone().or_else(|| config.export_path.clone()),
        }
    }

    /// Saves the config to `path`, or to the XDG config file.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => get_config_path()?,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config_str = toml::to_string(self)?;
        fs::write(&path, config_str).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.threads() == 0 {
            return Err(SimError::InvalidConfig("threads must be at least 1".into()));
        }
        if self.processes() == 0 {
            return Err(SimError::InvalidConfig("processes must be at least 1".into()));
        }
        if self.kernel_threads() == 0 {
            return Err(SimError::InvalidConfig(
                "kernel_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn example_spec(&self) -> ExampleSpec {
        ExampleSpec {
            processes: self.processes(),
            threads_per_process: self.threads(),
            semaphore_value: self.semaphore_value(),
            steps: self.work_steps(),
            step: Duration::from_millis(self.step_ms()),
            poll: Duration::from_millis(self.poll_ms()),
        }
    }
}
