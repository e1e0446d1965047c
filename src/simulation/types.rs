// src/simulation/types.rs
//! Value types exchanged with the simulation's collaborators

use serde::{Deserialize, Serialize};

/// Agent identity, unique across a run
pub type AgentId = String;

/// Vehicle identity as known by the vehicle index
pub type VehicleId = String;

/// Observation produced by the sensor engine for one vehicle
pub type Observation = serde_json::Value;

/// Action a controller wants applied to one vehicle
pub type Action = serde_json::Value;

/// Planar pose
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

/// Vehicle bounding box in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Dimensions {
    fn default() -> Self {
        // Passenger car
        Self {
            length: 3.68,
            width: 1.47,
            height: 1.4,
        }
    }
}

/// Snapshot of a vehicle, as handed to providers when a vehicle is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub vehicle_id: VehicleId,
    pub vehicle_type: String,
    pub pose: Pose,
    pub dimensions: Dimensions,
    pub speed: f64,

    /// Who asked for the vehicle (e.g. `NEW-AGENT`)
    pub source: String,
}

/// Where an agent starts and where it should go
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub start: Pose,
    pub goal: Option<Pose>,
    pub route_vias: Vec<String>,
}

/// Output of the mission planner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub mission: Option<Mission>,
    pub route: Vec<String>,
}

/// Per-vehicle sensor bookkeeping owned by the vehicle index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    pub vehicle_id: VehicleId,
    pub plan: Plan,
    pub steps_completed: u64,
}

impl SensorState {
    pub fn new(vehicle_id: impl Into<VehicleId>, plan: Plan) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            plan,
            steps_completed: 0,
        }
    }
}

/// Distance accumulator attached to every vehicle.
///
/// Rewards consume the distance travelled since the last consumption; scores
/// sample the running total without resetting anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TripMeter {
    total: f64,
    unconsumed: f64,
}

impl TripMeter {
    pub fn advance(&mut self, distance: f64) {
        self.total += distance;
        self.unconsumed += distance;
    }

    /// `increment = true` consumes the pending distance, `false` samples the total
    pub fn read(&mut self, increment: bool) -> f64 {
        if increment {
            std::mem::take(&mut self.unconsumed)
        } else {
            self.total
        }
    }
}

/// One row of the vehicle index concerning an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleBinding {
    pub vehicle_id: VehicleId,

    /// Agent with actuation authority over the vehicle
    pub actor_id: Option<AgentId>,

    /// Agent observing the vehicle ahead of a hijack
    pub shadow_actor_id: Option<AgentId>,
}

/// Relation between one agent and one vehicle for the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    /// The agent observes the vehicle but may not actuate it (airlock)
    Shadowing,

    /// The agent fully actuates the vehicle
    Controlling,

    /// No relation
    Released,
}

impl ControlState {
    /// Classify a binding from `agent_id`'s point of view.
    ///
    /// A recorded shadow wins over control so that an agent observing a
    /// vehicle is never charged with that vehicle's termination.
    pub fn of(binding: &VehicleBinding, agent_id: &str) -> Self {
        if binding.shadow_actor_id.as_deref() == Some(agent_id) {
            ControlState::Shadowing
        } else if binding.actor_id.as_deref() == Some(agent_id) {
            ControlState::Controlling
        } else {
            ControlState::Released
        }
    }
}
