// src/utils/config.rs
//! Engine configuration
//!
//! Values are layered: built-in defaults, then an optional config file, then
//! `LOCKSTEP__*` environment variables (e.g. `LOCKSTEP__POOL__BUFFER_SIZE=8`).

use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default config file stem, resolved against every format `config` knows
pub const DEFAULT_CONFIG_FILE: &str = "lockstep";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolSettings,
    pub orchestrator: OrchestratorSettings,
    pub observability: ObservabilitySettings,
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Idle workers kept ready for immediate acquisition
    pub buffer_size: usize,

    /// Hard bound on live workers (idle + leased)
    pub max_workers: usize,

    /// How long `acquire` waits for capacity before giving up
    pub acquire_timeout_ms: u64,

    /// Grace period between asking a worker to stop and killing it
    pub shutdown_grace_ms: u64,

    /// Worker process to launch
    pub worker: WorkerCommand,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            buffer_size: 4,
            max_workers: 64,
            acquire_timeout_ms: 10_000,
            shutdown_grace_ms: 2_000,
            worker: WorkerCommand::default(),
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Command line of a worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<String>,
    pub env_vars: Vec<(String, String)>,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self {
            program: "lockstep-engine".to_string(),
            args: vec!["worker".to_string()],
            work_dir: None,
            env_vars: vec![],
        }
    }
}

/// Tick orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// How long each social agent gets to answer with an action
    pub action_timeout_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            action_timeout_ms: 5_000,
        }
    }
}

impl OrchestratorSettings {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,

    /// Prometheus scrape address; metrics are disabled when unset
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `lockstep.*` in the working directory and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from the given file stem (or path) and the environment
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("LOCKSTEP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
