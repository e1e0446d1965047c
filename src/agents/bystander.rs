// src/agents/bystander.rs
//! Passive observers for vehicles no agent drives
//!
//! Background traffic can be instrumented by attaching sensors to it. Each
//! such vehicle gets a synthetic observer id that never gains actuation
//! authority.

use crate::agents::interface::AgentInterface;
use crate::agents::manager::AgentManager;
use crate::agents::values::{AgentValue, TickObservations};
use crate::simulation::types::{AgentId, VehicleId};
use crate::simulation::SimContext;
use crate::utils::errors::{EngineError, Result};
use tracing::{debug, warn};

/// Observer id for the bystander sensors of `vehicle_id`
pub fn bystander_agent_id(vehicle_id: &str) -> AgentId {
    format!("Agent-{}", vehicle_id)
}

impl AgentManager {
    /// Attach sensors to each vehicle not instrumented yet.
    ///
    /// Returns the observer ids of the newly instrumented vehicles; vehicles
    /// that already carry bystander sensors are skipped.
    pub fn attach_sensors_to_vehicles(
        &mut self,
        ctx: &mut SimContext<'_>,
        interface: &AgentInterface,
        vehicle_ids: &[VehicleId],
    ) -> Result<Vec<AgentId>> {
        let mut attached = Vec::new();

        for vehicle_id in vehicle_ids {
            if self.vehicles_with_sensors.contains_key(vehicle_id) {
                continue;
            }

            let plan = ctx.planner.plan(None);
            ctx.vehicle_index
                .attach_sensors_to_vehicle(vehicle_id, interface, plan)?;

            let agent_id = bystander_agent_id(vehicle_id);
            debug!("Attached bystander `{}` to vehicle `{}`", agent_id, vehicle_id);

            self.vehicles_with_sensors
                .insert(vehicle_id.clone(), agent_id.clone());
            self.agent_interfaces
                .insert(agent_id.clone(), interface.clone());
            attached.push(agent_id);
        }

        Ok(attached)
    }

    pub fn bystander_for_vehicle(&self, vehicle_id: &str) -> Option<&AgentId> {
        self.vehicles_with_sensors.get(vehicle_id)
    }

    /// Observe instrumented vehicles, keyed by their observer ids
    pub fn observe_from(
        &self,
        ctx: &mut SimContext<'_>,
        vehicle_ids: &[VehicleId],
    ) -> Result<TickObservations> {
        let mut tick = TickObservations::default();

        for vehicle_id in vehicle_ids {
            let Some(agent_id) = self.vehicles_with_sensors.get(vehicle_id) else {
                warn!("Vehicle `{}` carries no bystander sensors", vehicle_id);
                continue;
            };
            let Some(vehicle) = ctx.vehicle_index.vehicle_by_id(vehicle_id) else {
                warn!("Bystander vehicle `{}` left the simulation", vehicle_id);
                continue;
            };
            let sensor_state = ctx
                .vehicle_index
                .sensor_state_for(vehicle_id)
                .ok_or_else(|| EngineError::MissingSensorState(vehicle_id.clone()))?;

            let (observation, done) = ctx.sensors.observe(agent_id, &sensor_state, &vehicle)?;
            let reward = ctx.vehicle_index.trip_meter(vehicle_id, true)?;
            let score = ctx.vehicle_index.trip_meter(vehicle_id, false)?;

            tick.observations
                .insert(agent_id.clone(), AgentValue::Single(observation));
            tick.rewards.insert(agent_id.clone(), AgentValue::Single(reward));
            tick.scores.insert(agent_id.clone(), AgentValue::Single(score));
            tick.dones.insert(agent_id.clone(), done);
        }

        Ok(tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::interface::ActionSpaceType;
    use crate::agents::test_support::{FakePool, Fixture};
    use crate::simulation::VehicleIndex;
    use std::collections::BTreeMap;

    fn vehicles(ids: &[&str]) -> Vec<VehicleId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bystander_agent_id() {
        assert_eq!(bystander_agent_id("car-7"), "Agent-car-7");
    }

    #[test]
    fn test_attach_is_idempotent() {
        let pool = FakePool::new();
        let mut manager = pool.manager(BTreeMap::new());
        let interface = AgentInterface::new(ActionSpaceType::Lane);

        let mut fixture = Fixture::new();
        fixture.add_vehicle("car-7");

        let first = manager
            .attach_sensors_to_vehicles(&mut fixture.context(), &interface, &vehicles(&["car-7"]))
            .unwrap();
        let second = manager
            .attach_sensors_to_vehicles(&mut fixture.context(), &interface, &vehicles(&["car-7"]))
            .unwrap();

        assert_eq!(first, vec!["Agent-car-7".to_string()]);
        assert!(second.is_empty());
        assert_eq!(fixture.index.sensor_attachments("car-7"), 1);
        assert!(manager.agent_interface_for_agent_id("Agent-car-7").is_some());
        assert_eq!(manager.bystander_for_vehicle("car-7").map(String::as_str), Some("Agent-car-7"));
        // Observers never control anything
        assert!(fixture.index.actor_id_from_vehicle_id("car-7").is_none());
    }

    #[test]
    fn test_attach_to_unknown_vehicle_records_nothing() {
        let pool = FakePool::new();
        let mut manager = pool.manager(BTreeMap::new());
        let interface = AgentInterface::new(ActionSpaceType::Lane);
        let mut fixture = Fixture::new();

        let result =
            manager.attach_sensors_to_vehicles(&mut fixture.context(), &interface, &vehicles(&["ghost"]));

        assert!(matches!(result, Err(EngineError::VehicleNotFound(_))));
        assert!(manager.bystander_for_vehicle("ghost").is_none());
    }

    #[test]
    fn test_observe_from() {
        let pool = FakePool::new();
        let mut manager = pool.manager(BTreeMap::new());
        let interface = AgentInterface::new(ActionSpaceType::Lane);

        let mut fixture = Fixture::new();
        fixture.add_vehicle("car-7");
        fixture.add_vehicle("car-8");
        fixture.index.advance_trip("car-7", 1.5).unwrap();
        manager
            .attach_sensors_to_vehicles(&mut fixture.context(), &interface, &vehicles(&["car-7"]))
            .unwrap();

        let tick = manager
            .observe_from(&mut fixture.context(), &vehicles(&["car-7", "car-8"]))
            .unwrap();

        assert_eq!(tick.observations.len(), 1);
        assert_eq!(tick.rewards["Agent-car-7"], AgentValue::Single(1.5));
        assert_eq!(tick.dones["Agent-car-7"], false);
    }

    #[test]
    fn test_observe_from_skips_departed_vehicle() {
        let pool = FakePool::new();
        let mut manager = pool.manager(BTreeMap::new());
        let interface = AgentInterface::new(ActionSpaceType::Lane);

        let mut fixture = Fixture::new();
        fixture.add_vehicle("car-7");
        fixture.add_vehicle("car-8");
        manager
            .attach_sensors_to_vehicles(&mut fixture.context(), &interface, &vehicles(&["car-7", "car-8"]))
            .unwrap();

        assert!(fixture.index.remove_vehicle("car-8").is_some());

        let tick = manager
            .observe_from(&mut fixture.context(), &vehicles(&["car-7", "car-8"]))
            .unwrap();

        assert_eq!(tick.observations.keys().collect::<Vec<_>>(), vec!["Agent-car-7"]);
        assert!(!tick.dones.contains_key("Agent-car-8"));
    }

    #[tokio::test]
    async fn test_teardown_clears_bystanders() {
        let pool = FakePool::new();
        let mut manager = pool.manager(BTreeMap::new());
        let interface = AgentInterface::new(ActionSpaceType::Lane);

        let mut fixture = Fixture::new();
        fixture.add_vehicle("car-7");
        manager
            .attach_sensors_to_vehicles(&mut fixture.context(), &interface, &vehicles(&["car-7"]))
            .unwrap();

        manager.teardown().await.unwrap();

        assert!(manager.bystander_for_vehicle("car-7").is_none());
        assert!(manager.agent_interfaces().is_empty());
    }
}
