// src/runtime/mod.rs
//! Out-of-process agent runtime
//!
//! This module provides everything on the far side of the social-agent
//! boundary:
//!
//! - **Remote Agent**: the handle contract and its process-backed implementation
//! - **Worker Pool**: warm, bounded pool of worker handles
//! - **Process Manager**: spawning and killing worker processes
//! - **Protocol**: JSON-lines messages between engine and worker
//! - **Worker Host**: the worker-side request loop
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 AgentManager (engine)                │
//! │   send_observation ──┐          ┌── recv_action(t)   │
//! └──────────────────────┼──────────┼────────────────────┘
//!                        ▼          │
//!              ┌──────────────────────────┐
//!              │  WorkerPool (max N)      │
//!              │  ┌────────┐ ┌────────┐   │
//!              │  │worker 1│ │worker 2│ … │  one process per social agent
//!              │  └────────┘ └────────┘   │
//!              └──────────────────────────┘
//! ```

pub mod process_manager;
pub mod protocol;
pub mod remote_agent;
pub mod worker_host;
pub mod worker_pool;

// Re-export commonly used types
pub use process_manager::ProcessManager;
pub use protocol::{WorkerReply, WorkerRequest};
pub use remote_agent::{ProcessRemoteAgent, RemoteAgent};
pub use worker_host::FixedActionController;
pub use worker_pool::{
    PoolStats, ProcessLauncher, RemoteAgentPool, WorkerLauncher, WorkerPool, WorkerPoolConfig,
};
