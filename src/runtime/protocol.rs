// src/runtime/protocol.rs
//! Wire protocol between the engine and worker processes
//!
//! One JSON document per line. The engine writes [`WorkerRequest`]s to the
//! worker's stdin and reads [`WorkerReply`]s from its stdout. Every
//! observation carries a sequence number that the matching action echoes, so
//! a reply arriving after its deadline is recognised and discarded.

use crate::agents::interface::SocialAgent;
use crate::agents::values::{AgentAction, AgentObservation};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Engine → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Load the controller described by `agent`
    Start { agent: SocialAgent },

    /// Compute an action for this observation
    Observe {
        seq: u64,
        observation: AgentObservation,
    },

    Shutdown,
}

/// Worker → engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    Action {
        seq: u64,
        action: Option<AgentAction>,
    },

    Error { message: String },
}

pub fn encode_request(request: &WorkerRequest) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

pub fn decode_request(line: &str) -> Result<WorkerRequest> {
    serde_json::from_str(line)
        .map_err(|e| EngineError::ProtocolError(format!("Invalid request '{}': {}", line, e)))
}

pub fn encode_reply(reply: &WorkerReply) -> Result<String> {
    Ok(serde_json::to_string(reply)?)
}

pub fn decode_reply(line: &str) -> Result<WorkerReply> {
    serde_json::from_str(line)
        .map_err(|e| EngineError::ProtocolError(format!("Invalid reply '{}': {}", line, e)))
}
