// src/lib.rs
//! Lockstep Agent Engine Library
//!
//! Advances a population of agents in lockstep with a shared simulation
//! tick. Ego agents are driven in-process by the caller; social agents run
//! as worker processes answering observations with actions under a timeout.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **agents**: Agent registry, life cycle, tick orchestration, bystanders
//! - **runtime**: Worker processes, wire protocol and the worker pool
//! - **simulation**: Contracts of the vehicle index, sensors, planner and providers
//! - **observability**: Tracing and metrics
//! - **utils**: Configuration and errors

pub mod agents;
pub mod observability;
pub mod runtime;
pub mod simulation;
pub mod utils;

// Re-export commonly used types
pub use agents::manager::AgentManager;
pub use runtime::worker_pool::{WorkerPool, WorkerPoolConfig};
pub use simulation::SimContext;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
