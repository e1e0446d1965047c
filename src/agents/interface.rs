// src/agents/interface.rs
//! Agent capability descriptors and metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Action spaces a controller can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSpaceType {
    Continuous,
    Lane,
    ActuatorDynamic,
    LaneWithContinuousSpeed,
    TargetPose,
    Trajectory,
    TrajectoryWithTime,
    Mpc,
    /// One target pose per vehicle, for agents driving a swarm of vehicles
    MultiTargetPose,
}

impl ActionSpaceType {
    pub fn control_mode(self) -> ControlMode {
        match self {
            ActionSpaceType::MultiTargetPose => ControlMode::MultiVehicle,
            _ => ControlMode::SingleVehicle,
        }
    }
}

/// How many vehicles an agent may drive at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Exactly one bound vehicle at observation time
    SingleVehicle,

    /// Zero to N bound vehicles ("boid" agents)
    MultiVehicle,
}

/// Sensors to mount on every vehicle the agent drives or observes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub waypoints: bool,
    pub road_waypoints: bool,
    pub drivable_area_grid_map: bool,
    pub occupancy_grid_map: bool,
    pub rgb: bool,
    pub lidar: bool,

    /// Radius in meters; neighbours are not reported when unset
    pub neighborhood_vehicle_radius: Option<f64>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            waypoints: true,
            road_waypoints: false,
            drivable_area_grid_map: false,
            occupancy_grid_map: false,
            rgb: false,
            lidar: false,
            neighborhood_vehicle_radius: None,
        }
    }
}

/// Capability descriptor of an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInterface {
    pub action_space: ActionSpaceType,

    #[serde(default)]
    pub sensors: SensorConfig,

    #[serde(default)]
    pub max_episode_steps: Option<u64>,
}

impl AgentInterface {
    pub fn new(action_space: ActionSpaceType) -> Self {
        Self {
            action_space,
            sensors: SensorConfig::default(),
            max_episode_steps: None,
        }
    }

    pub fn control_mode(&self) -> ControlMode {
        self.action_space.control_mode()
    }
}

/// Who supplies an agent's actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Actions come synchronously from the caller
    Ego,

    /// Actions come from a worker process
    Social,
}

/// Metadata supplied with a social agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDataModel {
    pub name: String,
    pub initial_speed: Option<f64>,
    pub auxiliary: BTreeMap<String, String>,
}

impl AgentDataModel {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Controller specification handed to a worker when it starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialAgent {
    /// Identifies the policy the worker should load
    pub locator: String,

    pub interface: AgentInterface,

    /// Free-form policy parameters
    #[serde(default)]
    pub policy_kwargs: serde_json::Value,
}

impl SocialAgent {
    pub fn new(locator: impl Into<String>, interface: AgentInterface) -> Self {
        Self {
            locator: locator.into(),
            interface,
            policy_kwargs: serde_json::Value::Null,
        }
    }

    pub fn with_policy_kwargs(mut self, kwargs: serde_json::Value) -> Self {
        self.policy_kwargs = kwargs;
        self
    }
}

/// Registry view of one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub kind: AgentKind,
    pub interface: Option<AgentInterface>,
    pub pending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_mode() {
        assert_eq!(
            ActionSpaceType::MultiTargetPose.control_mode(),
            ControlMode::MultiVehicle
        );
        assert_eq!(
            ActionSpaceType::LaneWithContinuousSpeed.control_mode(),
            ControlMode::SingleVehicle
        );
    }

    #[test]
    fn test_interface_deserializes_with_defaults() {
        let interface: AgentInterface =
            serde_json::from_str(r#"{"action_space": "multi_target_pose"}"#).unwrap();
        assert_eq!(interface.control_mode(), ControlMode::MultiVehicle);
        assert!(interface.sensors.waypoints);
        assert!(interface.max_episode_steps.is_none());
    }
}
