// src/observability/mod.rs
//! Logging and metrics setup
//!
//! Logs always go to stderr: worker processes use stdout as their protocol
//! channel, so nothing else may write there.

use crate::utils::config::ObservabilitySettings;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Ticks whose observations were computed
pub const TICKS_OBSERVED: &str = "lockstep_ticks_observed_total";

/// Social agents that produced no action within the timeout
pub const MISSING_ACTIONS: &str = "lockstep_missing_actions_total";

/// Actions dropped because the agent does not control the target vehicle
pub const FILTERED_ACTIONS: &str = "lockstep_filtered_actions_total";

/// Worker handles leased from the pool
pub const WORKERS_ACQUIRED: &str = "lockstep_workers_acquired_total";

/// Worker handles terminated
pub const WORKERS_TERMINATED: &str = "lockstep_workers_terminated_total";

/// Agents currently active (registered and not pending)
pub const ACTIVE_AGENTS: &str = "lockstep_active_agents";

/// Install the global tracing subscriber
pub fn init_tracing(settings: &ObservabilitySettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if settings.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    installed.map_err(|e| EngineError::RuntimeError(format!("Failed to install tracing: {}", e)))
}

/// Install the Prometheus recorder when a scrape address is configured.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(settings: &ObservabilitySettings) -> Result<()> {
    let Some(addr) = settings.metrics_addr.as_deref() else {
        return Ok(());
    };

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| EngineError::ConfigError(format!("Invalid metrics address '{}': {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::RuntimeError(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Serving Prometheus metrics on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_without_address() {
        let settings = ObservabilitySettings::default();
        assert!(init_metrics(&settings).is_ok());
    }

    #[test]
    fn test_invalid_metrics_address() {
        let settings = ObservabilitySettings {
            metrics_addr: Some("not-an-address".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            init_metrics(&settings),
            Err(EngineError::ConfigError(_))
        ));
    }
}
