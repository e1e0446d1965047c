// src/runtime/process_manager.rs
//! Process manager for spawning and stopping worker processes
//!
//! Workers talk over piped stdin/stdout; stderr is inherited so worker logs
//! land next to the engine's.

use crate::utils::config::WorkerCommand;
use crate::utils::errors::{EngineError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Process manager for spawning worker processes
pub struct ProcessManager {
    /// Resolved executables (cached)
    executable_paths: HashMap<String, PathBuf>,
}

impl ProcessManager {
    /// Create a new process manager
    pub fn new() -> Self {
        Self {
            executable_paths: HashMap::new(),
        }
    }

    /// Resolve the worker program, searching `PATH` for bare names
    fn find_executable(&mut self, program: &str) -> Result<PathBuf> {
        if let Some(path) = self.executable_paths.get(program) {
            return Ok(path.clone());
        }

        let candidate = Path::new(program);
        if candidate.components().count() > 1 {
            if candidate.exists() {
                return Ok(candidate.to_path_buf());
            }
            return Err(EngineError::ProcessSpawnFailed(format!(
                "Executable '{}' does not exist",
                program
            )));
        }

        match which::which(program) {
            Ok(path) => {
                info!("Found {} at {:?}", program, path);
                self.executable_paths.insert(program.to_string(), path.clone());
                Ok(path)
            }
            Err(e) => Err(EngineError::ProcessSpawnFailed(format!(
                "Executable '{}' not found in PATH: {}",
                program, e
            ))),
        }
    }

    /// Spawn a new worker process
    pub fn spawn(&mut self, command: &WorkerCommand) -> Result<Child> {
        let executable = self.find_executable(&command.program)?;

        debug!("Spawning worker process: {:?} {:?}", executable, command.args);

        let mut process = Command::new(executable);
        process.args(&command.args);

        if let Some(work_dir) = &command.work_dir {
            process.current_dir(work_dir);
        }

        for (key, value) in &command.env_vars {
            process.env(key, value);
        }

        process
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = process.spawn().map_err(|e| {
            EngineError::ProcessSpawnFailed(format!("Failed to spawn process: {}", e))
        })?;

        debug!("Process spawned with PID: {:?}", child.id());

        Ok(child)
    }

    /// Stop a process by PID: SIGTERM, then SIGKILL once `grace` has passed
    pub async fn kill(&self, pid: u32, grace: Duration) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw_pid = pid;
        let pid = Pid::from_raw(raw_pid as i32);

        debug!("Sending SIGTERM to PID {}", pid);
        kill(pid, Signal::SIGTERM)
            .map_err(|e| EngineError::RuntimeError(format!("Failed to send SIGTERM: {}", e)))?;

        tokio::time::sleep(grace).await;

        if self.is_running(raw_pid) {
            debug!("Process still alive, sending SIGKILL to PID {}", pid);
            kill(pid, Signal::SIGKILL)
                .map_err(|e| EngineError::RuntimeError(format!("Failed to send SIGKILL: {}", e)))?;
        }

        Ok(())
    }

    /// Check if a process is running
    pub fn is_running(&self, pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
