// src/main.rs
//! Lockstep worker host
//!
//! Runs one social-agent controller, speaking the JSON-lines worker protocol
//! on stdin/stdout. Logs go to stderr.

use anyhow::{bail, Result};
use lockstep_engine::observability::{init_metrics, init_tracing};
use lockstep_engine::runtime::worker_host::serve;
use lockstep_engine::utils::config::EngineConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load()?;
    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    match std::env::args().nth(1).as_deref() {
        None | Some("worker") => {}
        Some(other) => bail!("Unknown command: {}", other),
    }

    info!(
        "Starting Lockstep worker v{} (pid {})",
        lockstep_engine::VERSION,
        std::process::id()
    );

    match serve(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => {
            info!("Worker stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Worker error: {}", e);
            Err(e.into())
        }
    }
}
