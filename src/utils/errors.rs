// src/utils/errors.rs
//! Engine error types
//!
//! A remote agent that misses its action deadline is not an error: the
//! handle reports `Ok(None)` and the tick degrades to a no-op for that agent.

use thiserror::Error;

/// Errors raised by the agent engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Worker pool exhausted")]
    PoolExhausted,

    #[error("Worker pool has been destroyed")]
    PoolClosed,

    #[error("Failed to spawn worker process: {0}")]
    ProcessSpawnFailed(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Worker protocol error: {0}")]
    ProtocolError(String),

    #[error("Agent already registered: {0}")]
    AgentAlreadyExists(String),

    #[error("Unknown agents: {0:?}")]
    UnknownAgents(Vec<String>),

    #[error("No interface registered for agent `{0}`")]
    MissingInterface(String),

    #[error(
        "Agent `{agent_id}` must be bound to exactly one vehicle unless it controls \
         multiple vehicles, found {vehicle_ids:?}"
    )]
    ControlBindingViolation {
        agent_id: String,
        vehicle_ids: Vec<String>,
    },

    #[error("Vehicle `{0}` not found in vehicle index")]
    VehicleNotFound(String),

    #[error("No sensor state for vehicle `{0}`")]
    MissingSensorState(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    /// `removed` lists everything unregistered anyway, failures included
    #[error("Failed to tear down agents {agents:?}: {reason}")]
    TeardownFailed {
        agents: Vec<String>,
        removed: Vec<String>,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Engine result alias
pub type Result<T> = std::result::Result<T, EngineError>;
