// src/runtime/worker_host.rs
//! Worker side of the protocol
//!
//! Runs inside a worker process. The bundled controller answers every
//! observation with the action found under `policy_kwargs.action`, repeated
//! for every vehicle of a multi-vehicle observation. `policy_kwargs.delay_ms`
//! holds each reply back, which is how slow controllers are reproduced.

use crate::agents::interface::SocialAgent;
use crate::agents::values::{AgentAction, AgentObservation, AgentValue};
use crate::runtime::protocol::{decode_request, encode_reply, WorkerReply, WorkerRequest};
use crate::utils::errors::{EngineError, Result};
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

/// Controller replying with one fixed action
#[derive(Debug, Clone)]
pub struct FixedActionController {
    action: serde_json::Value,
    delay: Option<Duration>,
}

impl FixedActionController {
    pub fn from_agent(agent: &SocialAgent) -> Self {
        let action = agent
            .policy_kwargs
            .get("action")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let delay = agent
            .policy_kwargs
            .get("delay_ms")
            .and_then(serde_json::Value::as_u64)
            .map(Duration::from_millis);

        Self { action, delay }
    }

    pub fn act(&self, observation: &AgentObservation) -> AgentAction {
        match observation {
            AgentValue::Single(_) => AgentValue::Single(self.action.clone()),
            AgentValue::PerVehicle(per_vehicle) => AgentValue::PerVehicle(
                per_vehicle
                    .keys()
                    .map(|vehicle_id| (vehicle_id.clone(), self.action.clone()))
                    .collect(),
            ),
        }
    }
}

/// Serve requests from `reader` until shutdown or end of input
pub async fn serve<R, W>(reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut requests = FramedRead::new(reader, LinesCodec::new());
    let mut controller: Option<FixedActionController> = None;

    while let Some(line) = requests.next().await {
        let line = line.map_err(|e| EngineError::ProtocolError(format!("Read error: {}", e)))?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match decode_request(&line) {
            Ok(WorkerRequest::Start { agent }) => {
                info!("Starting controller '{}'", agent.locator);
                controller = Some(FixedActionController::from_agent(&agent));
                None
            }
            Ok(WorkerRequest::Observe { seq, observation }) => match &controller {
                Some(controller) => {
                    if let Some(delay) = controller.delay {
                        tokio::time::sleep(delay).await;
                    }
                    Some(WorkerReply::Action {
                        seq,
                        action: Some(controller.act(&observation)),
                    })
                }
                None => Some(WorkerReply::Error {
                    message: "observation received before start".to_string(),
                }),
            },
            Ok(WorkerRequest::Shutdown) => {
                debug!("Shutdown requested");
                break;
            }
            Err(e) => {
                warn!("{}", e);
                Some(WorkerReply::Error {
                    message: e.to_string(),
                })
            }
        };

        if let Some(reply) = reply {
            let mut out = encode_reply(&reply)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::interface::{ActionSpaceType, AgentInterface};
    use crate::runtime::protocol::{decode_reply, encode_request};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn request_lines(requests: &[WorkerRequest]) -> String {
        requests
            .iter()
            .map(|r| encode_request(r).unwrap() + "\n")
            .collect()
    }

    #[tokio::test]
    async fn test_serves_fixed_actions() {
        let agent = SocialAgent::new("zoo/boids", AgentInterface::new(ActionSpaceType::MultiTargetPose))
            .with_policy_kwargs(json!({"action": [1.0, 2.0, 0.0, 0.1]}));
        let mut per_vehicle = BTreeMap::new();
        per_vehicle.insert("v1".to_string(), json!({}));
        per_vehicle.insert("v2".to_string(), json!({}));

        let input = request_lines(&[
            WorkerRequest::Start { agent },
            WorkerRequest::Observe {
                seq: 1,
                observation: AgentValue::PerVehicle(per_vehicle),
            },
            WorkerRequest::Shutdown,
        ]);

        let mut output = Vec::new();
        serve(input.as_bytes(), &mut output).await.unwrap();

        let mut lines = BufReader::new(output.as_slice()).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        match decode_reply(&line).unwrap() {
            WorkerReply::Action { seq, action } => {
                assert_eq!(seq, 1);
                let action = action.unwrap();
                let per_vehicle = action.as_per_vehicle().unwrap();
                assert_eq!(per_vehicle.len(), 2);
                assert_eq!(per_vehicle["v2"], json!([1.0, 2.0, 0.0, 0.1]));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_observe_before_start_is_an_error_reply() {
        let input = request_lines(&[WorkerRequest::Observe {
            seq: 1,
            observation: AgentValue::Single(json!(null)),
        }]);

        let mut output = Vec::new();
        serve(input.as_bytes(), &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(matches!(
            decode_reply(text.trim()).unwrap(),
            WorkerReply::Error { .. }
        ));
    }
}
