// src/runtime/remote_agent.rs
//! Handles to out-of-process controllers
//!
//! [`RemoteAgent`] is the one contract the pool and the agent manager share.
//! [`ProcessRemoteAgent`] implements it over a child process speaking the
//! JSON-lines protocol in [`crate::runtime::protocol`].

use crate::agents::interface::SocialAgent;
use crate::agents::values::{AgentAction, AgentObservation};
use crate::runtime::process_manager::ProcessManager;
use crate::runtime::protocol::{decode_reply, encode_request, WorkerReply, WorkerRequest};
use crate::utils::config::WorkerCommand;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, warn};

/// Handle to one out-of-process controller
#[async_trait]
pub trait RemoteAgent: Send {
    /// Stable identifier of the underlying worker
    fn worker_id(&self) -> &str;

    /// Load the controller described by `agent`
    async fn start(&mut self, agent: &SocialAgent) -> Result<()>;

    /// Hand an observation to the controller without waiting for anything
    async fn send_observation(&mut self, observation: &AgentObservation) -> Result<()>;

    /// Wait up to `timeout` for the action answering the latest observation.
    ///
    /// `Ok(None)` means no action this tick.
    async fn recv_action(&mut self, timeout: Duration) -> Result<Option<AgentAction>>;

    /// Stop the controller; the handle is unusable afterwards
    async fn terminate(&mut self) -> Result<()>;
}

/// Handle to a running worker process
#[derive(Debug, Clone)]
struct RuntimeHandle {
    pid: u32,
    started_at: Instant,
}

/// Remote agent backed by a child process
pub struct ProcessRemoteAgent {
    worker_id: String,

    /// The spawned process
    process: Option<Child>,

    /// Request channel
    stdin: Option<ChildStdin>,

    /// Reply channel, one JSON document per line
    replies: Option<FramedRead<ChildStdout, LinesCodec>>,

    /// Process manager
    manager: ProcessManager,

    /// Time between a shutdown request and a forced kill
    shutdown_grace: Duration,

    /// Sequence number of the last observation sent
    last_seq: u64,

    /// Sequence number still waiting for its action
    awaiting: Option<u64>,

    handle: Option<RuntimeHandle>,
}

impl ProcessRemoteAgent {
    /// Spawn a worker process
    pub fn spawn(command: &WorkerCommand, shutdown_grace: Duration) -> Result<Self> {
        let mut manager = ProcessManager::new();
        let mut child = manager.spawn(command)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::ProcessSpawnFailed("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::ProcessSpawnFailed("Failed to capture stdout".into()))?;

        let handle = child.id().map(|pid| RuntimeHandle {
            pid,
            started_at: Instant::now(),
        });

        let worker_id = ulid::Ulid::new().to_string();
        debug!("Worker {} spawned ({:?})", worker_id, handle.as_ref().map(|h| h.pid));

        Ok(Self {
            worker_id,
            process: Some(child),
            stdin: Some(stdin),
            replies: Some(FramedRead::new(stdout, LinesCodec::new())),
            manager,
            shutdown_grace,
            last_seq: 0,
            awaiting: None,
            handle,
        })
    }

    async fn write_request(&mut self, request: &WorkerRequest) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::RuntimeError(format!("Worker {} is not running", self.worker_id)))?;

        let mut line = encode_request(request)?;
        line.push('\n');

        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EngineError::RuntimeError(format!("Failed to write to stdin: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| EngineError::RuntimeError(format!("Failed to flush stdin: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl RemoteAgent for ProcessRemoteAgent {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn start(&mut self, agent: &SocialAgent) -> Result<()> {
        debug!("Starting controller '{}' on worker {}", agent.locator, self.worker_id);
        self.write_request(&WorkerRequest::Start {
            agent: agent.clone(),
        })
        .await
    }

    async fn send_observation(&mut self, observation: &AgentObservation) -> Result<()> {
        let seq = self.last_seq + 1;
        self.write_request(&WorkerRequest::Observe {
            seq,
            observation: observation.clone(),
        })
        .await?;

        self.last_seq = seq;
        self.awaiting = Some(seq);
        Ok(())
    }

    async fn recv_action(&mut self, timeout: Duration) -> Result<Option<AgentAction>> {
        let Some(expected) = self.awaiting else {
            return Ok(None);
        };

        let replies = self
            .replies
            .as_mut()
            .ok_or_else(|| EngineError::RuntimeError(format!("Worker {} is not running", self.worker_id)))?;

        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let line = match tokio::time::timeout_at(deadline, replies.next()).await {
                Err(_) => {
                    debug!("Worker {} missed the action deadline for #{}", self.worker_id, expected);
                    return Ok(None);
                }
                Ok(None) => {
                    self.awaiting = None;
                    return Err(EngineError::RuntimeError(format!(
                        "Worker {} closed its reply channel",
                        self.worker_id
                    )));
                }
                Ok(Some(Err(e))) => {
                    return Err(EngineError::ProtocolError(format!("Read error: {}", e)));
                }
                Ok(Some(Ok(line))) => line,
            };

            match decode_reply(&line)? {
                WorkerReply::Action { seq, action } if seq == expected => {
                    self.awaiting = None;
                    return Ok(action);
                }
                WorkerReply::Action { seq, .. } => {
                    debug!("Worker {} discarded stale action #{}", self.worker_id, seq);
                }
                WorkerReply::Error { message } => {
                    return Err(EngineError::RuntimeError(format!(
                        "Worker {} failed: {}",
                        self.worker_id, message
                    )));
                }
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        debug!("Terminating worker {}", self.worker_id);

        if self.stdin.is_some() {
            if let Err(e) = self.write_request(&WorkerRequest::Shutdown).await {
                debug!("Worker {} did not take the shutdown request: {}", self.worker_id, e);
            }
        }
        self.stdin = None;
        self.replies = None;
        self.awaiting = None;

        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        let handle = self.handle.take();

        match tokio::time::timeout(self.shutdown_grace, process.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    "Worker {} exited with status {} after {:?}",
                    self.worker_id,
                    status,
                    handle.as_ref().map(|h| h.started_at.elapsed())
                );
                return Ok(());
            }
            Ok(Err(e)) => {
                error!("Error waiting for worker {}: {}", self.worker_id, e);
            }
            Err(_) => {
                warn!("Worker {} did not exit in time, forcing kill", self.worker_id);
            }
        }

        if let Some(pid) = handle.as_ref().map(|h| h.pid).or_else(|| process.id()) {
            self.manager.kill(pid, self.shutdown_grace).await?;
        }

        process
            .wait()
            .await
            .map_err(|e| EngineError::RuntimeError(format!("Failed to reap worker: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::interface::{ActionSpaceType, AgentInterface};
    use crate::agents::values::AgentValue;
    use serde_json::json;

    /// `cat` echoes requests back; none of them is a valid reply
    fn cat_worker() -> ProcessRemoteAgent {
        let command = WorkerCommand {
            program: "cat".to_string(),
            args: vec![],
            work_dir: None,
            env_vars: vec![],
        };
        ProcessRemoteAgent::spawn(&command, Duration::from_millis(200)).unwrap()
    }

    #[tokio::test]
    async fn test_no_outstanding_observation() {
        let mut worker = cat_worker();
        let action = worker.recv_action(Duration::from_secs(5)).await.unwrap();
        assert!(action.is_none());
        worker.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_echoed_request_is_a_protocol_error() {
        let mut worker = cat_worker();
        worker
            .start(&SocialAgent::new("zoo/keep-lane", AgentInterface::new(ActionSpaceType::Lane)))
            .await
            .unwrap();
        worker
            .send_observation(&AgentValue::Single(json!({"speed": 1.0})))
            .await
            .unwrap();

        let result = worker.recv_action(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(EngineError::ProtocolError(_))));
        worker.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_twice() {
        let mut worker = cat_worker();
        worker.terminate().await.unwrap();
        worker.terminate().await.unwrap();
        assert!(worker
            .send_observation(&AgentValue::Single(json!(null)))
            .await
            .is_err());
    }
}
