// src/agents/mod.rs
//! Agent orchestration
//!
//! - **interface**: capability descriptors, metadata and records
//! - **values**: per-agent observation/action/reward maps
//! - **manager**: registry and life cycle
//! - **orchestrator**: the per-tick observe, dispatch, collect and filter cycle
//! - **bystander**: passive observers for uncontrolled vehicles

pub mod bystander;
pub mod interface;
pub mod manager;
pub mod orchestrator;
pub mod values;

#[cfg(test)]
pub(crate) mod test_support;

pub use bystander::bystander_agent_id;
pub use interface::{
    ActionSpaceType, AgentDataModel, AgentInterface, AgentKind, AgentRecord, ControlMode,
    SensorConfig, SocialAgent,
};
pub use manager::AgentManager;
pub use values::{format_actor_id, AgentAction, AgentObservation, AgentValue, TickObservations};
