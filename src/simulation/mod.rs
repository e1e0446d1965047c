// src/simulation/mod.rs
//! Contracts of the simulation collaborators
//!
//! The agent manager never owns vehicles, sensors, routes or physics. It
//! reads and nudges them through the traits below, bundled per call into a
//! [`SimContext`]:
//!
//! - **VehicleIndex**: which agent controls or shadows which vehicle
//! - **SensorEngine**: observations and done flags per vehicle
//! - **MissionPlanner**: routes for newly bound vehicles
//! - **Provider**: physics/traffic backends notified of new agent vehicles
//! - **Scenario**: missions and the social agents of the current episode

pub mod memory;
pub mod types;

use crate::agents::interface::{ActionSpaceType, AgentDataModel, AgentInterface, SocialAgent};
use crate::utils::errors::Result;
use std::collections::{BTreeMap, BTreeSet};

pub use memory::InMemoryVehicleIndex;
pub use types::{
    Action, AgentId, ControlState, Dimensions, Mission, Observation, Plan, Pose, SensorState,
    TripMeter, VehicleBinding, VehicleId, VehicleState,
};

/// Authoritative mapping between vehicles and the agents bound to them
pub trait VehicleIndex: Send {
    fn vehicle_by_id(&self, vehicle_id: &str) -> Option<VehicleState>;

    fn sensor_state_for(&self, vehicle_id: &str) -> Option<SensorState>;

    fn sensor_state_mut(&mut self, vehicle_id: &str) -> Option<&mut SensorState>;

    /// Rows where `agent_id` is either the actor or the shadow actor
    fn vehicle_bindings_by_actor(&self, agent_id: &str) -> Vec<VehicleBinding>;

    /// Vehicles bound to `agent_id`; shadowed ones only when `include_shadowers`
    fn controlled_vehicle_ids_by_actor(
        &self,
        agent_id: &str,
        include_shadowers: bool,
    ) -> BTreeSet<VehicleId>;

    /// Every vehicle currently actuated by some agent
    fn agent_controlled_vehicle_ids(&self) -> BTreeSet<VehicleId>;

    fn actor_id_from_vehicle_id(&self, vehicle_id: &str) -> Option<AgentId>;

    /// Read the vehicle's trip meter, consuming it when `increment` is set
    fn trip_meter(&mut self, vehicle_id: &str, increment: bool) -> Result<f64>;

    fn build_agent_vehicle(
        &mut self,
        agent_id: &str,
        interface: &AgentInterface,
        plan: Plan,
        trainable: bool,
        initial_speed: Option<f64>,
    ) -> Result<VehicleState>;

    fn attach_sensors_to_vehicle(
        &mut self,
        vehicle_id: &str,
        interface: &AgentInterface,
        plan: Plan,
    ) -> Result<()>;

    /// Advance the vehicle-mounted sensors by one tick
    fn step_vehicle_sensors(&mut self, vehicle_id: &str);

    /// Explicit control state of every vehicle related to `agent_id`
    fn control_states_by_actor(&self, agent_id: &str) -> Vec<(VehicleId, ControlState)> {
        self.vehicle_bindings_by_actor(agent_id)
            .into_iter()
            .map(|binding| {
                let state = ControlState::of(&binding, agent_id);
                (binding.vehicle_id, state)
            })
            .collect()
    }
}

/// Observation and termination computation
pub trait SensorEngine: Send + Sync {
    fn observe(
        &self,
        agent_id: &str,
        sensor_state: &SensorState,
        vehicle: &VehicleState,
    ) -> Result<(Observation, bool)>;

    /// Batched variant for agents controlling several vehicles
    fn observe_batch(
        &self,
        agent_id: &str,
        sensor_states: &BTreeMap<VehicleId, SensorState>,
        vehicles: &BTreeMap<VehicleId, VehicleState>,
    ) -> Result<(BTreeMap<VehicleId, Observation>, BTreeMap<VehicleId, bool>)> {
        let mut observations = BTreeMap::new();
        let mut dones = BTreeMap::new();

        for (vehicle_id, sensor_state) in sensor_states {
            let Some(vehicle) = vehicles.get(vehicle_id) else {
                continue;
            };
            let (observation, done) = self.observe(agent_id, sensor_state, vehicle)?;
            observations.insert(vehicle_id.clone(), observation);
            dones.insert(vehicle_id.clone(), done);
        }

        Ok((observations, dones))
    }

    /// Periodic sensor bookkeeping
    fn step(&self, sensor_state: &mut SensorState);
}

pub trait MissionPlanner: Send + Sync {
    fn plan(&self, mission: Option<&Mission>) -> Plan;
}

/// Physics or traffic backend
pub trait Provider: Send + Sync {
    fn action_spaces(&self) -> &BTreeSet<ActionSpaceType>;

    fn create_vehicle(&mut self, state: VehicleState) -> Result<()>;
}

pub trait Scenario: Send + Sync {
    fn mission(&self, agent_id: &str) -> Option<Mission>;

    /// Social agents spawned at episode start
    fn social_agents(&self) -> BTreeMap<AgentId, (SocialAgent, AgentDataModel)>;
}

/// Borrowed view of the running simulation, passed explicitly to every
/// tick-level operation
pub struct SimContext<'a> {
    pub vehicle_index: &'a mut dyn VehicleIndex,
    pub sensors: &'a dyn SensorEngine,
    pub planner: &'a dyn MissionPlanner,
    pub providers: &'a mut [Box<dyn Provider>],
    pub scenario: &'a dyn Scenario,
}

impl<'a> SimContext<'a> {
    pub fn new(
        vehicle_index: &'a mut dyn VehicleIndex,
        sensors: &'a dyn SensorEngine,
        planner: &'a dyn MissionPlanner,
        providers: &'a mut [Box<dyn Provider>],
        scenario: &'a dyn Scenario,
    ) -> Self {
        Self {
            vehicle_index,
            sensors,
            planner,
            providers,
            scenario,
        }
    }
}
