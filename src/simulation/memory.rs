// src/simulation/memory.rs
//! In-memory vehicle index
//!
//! Backs simulations that keep vehicle bookkeeping in process, and the test
//! suites. Control transitions (shadow, hijack, release) are driven by the
//! host; the agent manager only reads them.

use crate::agents::interface::AgentInterface;
use crate::simulation::types::{
    AgentId, Dimensions, Plan, Pose, SensorState, TripMeter, VehicleBinding, VehicleId,
    VehicleState,
};
use crate::simulation::VehicleIndex;
use crate::utils::errors::{EngineError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone)]
struct IndexedVehicle {
    state: VehicleState,
    actor_id: Option<AgentId>,
    shadow_actor_id: Option<AgentId>,
    sensor_state: Option<SensorState>,
    trip_meter: TripMeter,
    sensor_attachments: usize,
    sensor_steps: u64,
}

/// Vehicle index kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryVehicleIndex {
    vehicles: BTreeMap<VehicleId, IndexedVehicle>,
}

impl InMemoryVehicleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unbound vehicle (e.g. background traffic)
    pub fn insert_vehicle(&mut self, state: VehicleState) {
        let vehicle_id = state.vehicle_id.clone();
        self.vehicles.insert(
            vehicle_id,
            IndexedVehicle {
                state,
                actor_id: None,
                shadow_actor_id: None,
                sensor_state: None,
                trip_meter: TripMeter::default(),
                sensor_attachments: 0,
                sensor_steps: 0,
            },
        );
    }

    pub fn remove_vehicle(&mut self, vehicle_id: &str) -> Option<VehicleState> {
        self.vehicles.remove(vehicle_id).map(|v| v.state)
    }

    /// Give `agent_id` full control of a vehicle, clearing any shadow
    pub fn bind(&mut self, vehicle_id: &str, agent_id: &str) -> Result<()> {
        let vehicle = self.vehicle_mut(vehicle_id)?;
        vehicle.actor_id = Some(agent_id.to_string());
        vehicle.shadow_actor_id = None;
        vehicle
            .sensor_state
            .get_or_insert_with(|| SensorState::new(vehicle_id, Plan::default()));
        Ok(())
    }

    /// Let `agent_id` observe a vehicle without actuating it
    pub fn shadow(&mut self, vehicle_id: &str, agent_id: &str) -> Result<()> {
        let vehicle = self.vehicle_mut(vehicle_id)?;
        vehicle.shadow_actor_id = Some(agent_id.to_string());
        vehicle
            .sensor_state
            .get_or_insert_with(|| SensorState::new(vehicle_id, Plan::default()));
        Ok(())
    }

    /// Move a vehicle from its shadowing agent to full control by that agent
    pub fn hijack(&mut self, vehicle_id: &str) -> Result<()> {
        let vehicle = self.vehicle_mut(vehicle_id)?;
        let shadower = vehicle.shadow_actor_id.take().ok_or_else(|| {
            EngineError::RuntimeError(format!("Vehicle `{}` has no shadowing agent", vehicle_id))
        })?;
        debug!("Agent `{}` hijacked vehicle `{}`", shadower, vehicle_id);
        vehicle.actor_id = Some(shadower);
        Ok(())
    }

    /// Drop every agent relation of a vehicle
    pub fn release(&mut self, vehicle_id: &str) -> Result<()> {
        let vehicle = self.vehicle_mut(vehicle_id)?;
        vehicle.actor_id = None;
        vehicle.shadow_actor_id = None;
        Ok(())
    }

    pub fn advance_trip(&mut self, vehicle_id: &str, distance: f64) -> Result<()> {
        self.vehicle_mut(vehicle_id)?.trip_meter.advance(distance);
        Ok(())
    }

    /// How many times sensors were attached to the vehicle
    pub fn sensor_attachments(&self, vehicle_id: &str) -> usize {
        self.vehicles
            .get(vehicle_id)
            .map(|v| v.sensor_attachments)
            .unwrap_or(0)
    }

    pub fn sensor_steps(&self, vehicle_id: &str) -> u64 {
        self.vehicles
            .get(vehicle_id)
            .map(|v| v.sensor_steps)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    fn vehicle_mut(&mut self, vehicle_id: &str) -> Result<&mut IndexedVehicle> {
        self.vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| EngineError::VehicleNotFound(vehicle_id.to_string()))
    }
}

impl VehicleIndex for InMemoryVehicleIndex {
    fn vehicle_by_id(&self, vehicle_id: &str) -> Option<VehicleState> {
        self.vehicles.get(vehicle_id).map(|v| v.state.clone())
    }

    fn sensor_state_for(&self, vehicle_id: &str) -> Option<SensorState> {
        self.vehicles
            .get(vehicle_id)
            .and_then(|v| v.sensor_state.clone())
    }

    fn sensor_state_mut(&mut self, vehicle_id: &str) -> Option<&mut SensorState> {
        self.vehicles
            .get_mut(vehicle_id)
            .and_then(|v| v.sensor_state.as_mut())
    }

    fn vehicle_bindings_by_actor(&self, agent_id: &str) -> Vec<VehicleBinding> {
        self.vehicles
            .iter()
            .filter(|(_, v)| {
                v.actor_id.as_deref() == Some(agent_id)
                    || v.shadow_actor_id.as_deref() == Some(agent_id)
            })
            .map(|(vehicle_id, v)| VehicleBinding {
                vehicle_id: vehicle_id.clone(),
                actor_id: v.actor_id.clone(),
                shadow_actor_id: v.shadow_actor_id.clone(),
            })
            .collect()
    }

    fn controlled_vehicle_ids_by_actor(
        &self,
        agent_id: &str,
        include_shadowers: bool,
    ) -> BTreeSet<VehicleId> {
        self.vehicles
            .iter()
            .filter(|(_, v)| {
                let shadowed = v.shadow_actor_id.as_deref() == Some(agent_id);
                let controlled = v.actor_id.as_deref() == Some(agent_id) && !shadowed;
                controlled || (include_shadowers && shadowed)
            })
            .map(|(vehicle_id, _)| vehicle_id.clone())
            .collect()
    }

    fn agent_controlled_vehicle_ids(&self) -> BTreeSet<VehicleId> {
        self.vehicles
            .iter()
            .filter(|(_, v)| v.actor_id.is_some())
            .map(|(vehicle_id, _)| vehicle_id.clone())
            .collect()
    }

    fn actor_id_from_vehicle_id(&self, vehicle_id: &str) -> Option<AgentId> {
        self.vehicles.get(vehicle_id).and_then(|v| v.actor_id.clone())
    }

    fn trip_meter(&mut self, vehicle_id: &str, increment: bool) -> Result<f64> {
        Ok(self.vehicle_mut(vehicle_id)?.trip_meter.read(increment))
    }

    fn build_agent_vehicle(
        &mut self,
        agent_id: &str,
        interface: &AgentInterface,
        plan: Plan,
        _trainable: bool,
        initial_speed: Option<f64>,
    ) -> Result<VehicleState> {
        let vehicle_id = format!("agent-{}", agent_id);
        if self.vehicles.contains_key(&vehicle_id) {
            return Err(EngineError::RuntimeError(format!(
                "Vehicle `{}` already exists",
                vehicle_id
            )));
        }

        let pose = plan
            .mission
            .as_ref()
            .map(|mission| mission.start)
            .unwrap_or_else(Pose::default);

        let state = VehicleState {
            vehicle_id: vehicle_id.clone(),
            vehicle_type: "passenger".to_string(),
            pose,
            dimensions: Dimensions::default(),
            speed: initial_speed.unwrap_or(0.0),
            source: "NEW-AGENT".to_string(),
        };

        debug!(
            "Built vehicle `{}` for agent `{}` ({:?})",
            vehicle_id, agent_id, interface.action_space
        );

        self.insert_vehicle(state.clone());
        let vehicle = self.vehicle_mut(&vehicle_id)?;
        vehicle.actor_id = Some(agent_id.to_string());
        vehicle.sensor_state = Some(SensorState::new(vehicle_id.as_str(), plan));
        vehicle.sensor_attachments += 1;

        Ok(state)
    }

    fn attach_sensors_to_vehicle(
        &mut self,
        vehicle_id: &str,
        _interface: &AgentInterface,
        plan: Plan,
    ) -> Result<()> {
        let vehicle = self.vehicle_mut(vehicle_id)?;
        vehicle.sensor_state = Some(SensorState::new(vehicle_id, plan));
        vehicle.sensor_attachments += 1;
        Ok(())
    }

    fn step_vehicle_sensors(&mut self, vehicle_id: &str) {
        if let Some(vehicle) = self.vehicles.get_mut(vehicle_id) {
            vehicle.sensor_steps += 1;
        }
    }
}
