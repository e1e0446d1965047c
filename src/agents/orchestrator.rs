// src/agents/orchestrator.rs
//! Per-tick orchestration
//!
//! One tick runs, in order:
//!
//! 1. [`AgentManager::observe`] computes observations, rewards, scores and
//!    dones for every agent
//! 2. [`AgentManager::send_observations_to_social_agents`] hands each social
//!    agent its observation without waiting
//! 3. [`AgentManager::fetch_agent_actions`] collects every social action under
//!    the action timeout, filters it down to controlled vehicles and merges it
//!    with the caller's ego actions
//!
//! None of these change agent membership.

use crate::agents::interface::ControlMode;
use crate::agents::manager::AgentManager;
use crate::agents::values::{format_actor_id, AgentAction, AgentObservation, AgentValue, TickObservations};
use crate::observability::{FILTERED_ACTIONS, MISSING_ACTIONS, TICKS_OBSERVED};
use crate::simulation::types::{AgentId, ControlState, SensorState, VehicleId, VehicleState};
use crate::simulation::{SimContext, VehicleIndex};
use crate::utils::errors::{EngineError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

impl AgentManager {
    fn control_mode_of(&self, agent_id: &str) -> Result<ControlMode> {
        self.agent_interfaces
            .get(agent_id)
            .map(|interface| interface.control_mode())
            .ok_or_else(|| EngineError::MissingInterface(agent_id.to_string()))
    }

    /// Compute this tick's observations, rewards, scores and dones.
    ///
    /// Fails with [`EngineError::ControlBindingViolation`] when an active
    /// single-vehicle agent is not bound to exactly one vehicle, and with
    /// [`EngineError::MissingInterface`] when an active agent has no
    /// interface.
    pub fn observe(&self, ctx: &mut SimContext<'_>) -> Result<TickObservations> {
        let mut tick = TickObservations::default();

        // Agents without any vehicle: pending ones are still on their way,
        // the others have lost their vehicle
        for agent_id in self.agent_ids() {
            if ctx
                .vehicle_index
                .controlled_vehicle_ids_by_actor(&agent_id, true)
                .is_empty()
            {
                let done = !self.pending_agent_ids.contains(&agent_id);
                tick.dones.insert(agent_id, done);
            }
        }

        for agent_id in self.active_agents() {
            let bindings: Vec<(VehicleId, ControlState)> = ctx
                .vehicle_index
                .control_states_by_actor(&agent_id)
                .into_iter()
                .filter(|(_, state)| *state != ControlState::Released)
                .collect();

            match self.control_mode_of(&agent_id)? {
                ControlMode::SingleVehicle => {
                    self.observe_single_vehicle(ctx, &agent_id, bindings, &mut tick)?
                }
                ControlMode::MultiVehicle => {
                    self.observe_multi_vehicle(ctx, &agent_id, bindings, &mut tick)?
                }
            }
        }

        metrics::counter!(TICKS_OBSERVED).increment(1);
        Ok(tick)
    }

    fn observe_single_vehicle(
        &self,
        ctx: &mut SimContext<'_>,
        agent_id: &str,
        bindings: Vec<(VehicleId, ControlState)>,
        tick: &mut TickObservations,
    ) -> Result<()> {
        let [(vehicle_id, state)]: [(VehicleId, ControlState); 1] =
            bindings.try_into().map_err(|bindings: Vec<(VehicleId, ControlState)>| {
                EngineError::ControlBindingViolation {
                    agent_id: agent_id.to_string(),
                    vehicle_ids: bindings.into_iter().map(|(vehicle_id, _)| vehicle_id).collect(),
                }
            })?;

        let (sensor_state, vehicle) = sensor_inputs(&*ctx.vehicle_index, &vehicle_id)?;
        let (observation, done) = ctx.sensors.observe(agent_id, &sensor_state, &vehicle)?;

        let done = match state {
            ControlState::Shadowing => {
                if done {
                    debug!(
                        "Agent `{}` only observes vehicle `{}`; ignoring its done signal",
                        agent_id, vehicle_id
                    );
                }
                false
            }
            _ => done,
        };

        let reward = ctx.vehicle_index.trip_meter(&vehicle_id, true)?;
        let score = ctx.vehicle_index.trip_meter(&vehicle_id, false)?;

        tick.observations
            .insert(agent_id.to_string(), AgentValue::Single(observation));
        tick.rewards.insert(agent_id.to_string(), AgentValue::Single(reward));
        tick.scores.insert(agent_id.to_string(), AgentValue::Single(score));
        tick.dones.insert(agent_id.to_string(), done);
        Ok(())
    }

    fn observe_multi_vehicle(
        &self,
        ctx: &mut SimContext<'_>,
        agent_id: &str,
        bindings: Vec<(VehicleId, ControlState)>,
        tick: &mut TickObservations,
    ) -> Result<()> {
        let mut sensor_states = BTreeMap::new();
        let mut vehicles = BTreeMap::new();
        for (vehicle_id, _) in &bindings {
            let (sensor_state, vehicle) = sensor_inputs(&*ctx.vehicle_index, vehicle_id)?;
            sensor_states.insert(vehicle_id.clone(), sensor_state);
            vehicles.insert(vehicle_id.clone(), vehicle);
        }

        let (observations, dones) = ctx
            .sensors
            .observe_batch(agent_id, &sensor_states, &vehicles)?;

        // Shadowed vehicles never end the agent
        let done = bindings.iter().any(|(vehicle_id, state)| {
            *state == ControlState::Controlling && dones.get(vehicle_id).copied().unwrap_or(false)
        });

        let mut rewards = BTreeMap::new();
        let mut scores = BTreeMap::new();
        for (vehicle_id, _) in &bindings {
            rewards.insert(
                vehicle_id.clone(),
                ctx.vehicle_index.trip_meter(vehicle_id, true)?,
            );
            scores.insert(
                format_actor_id(agent_id, vehicle_id, true),
                ctx.vehicle_index.trip_meter(vehicle_id, false)?,
            );
        }

        tick.observations
            .insert(agent_id.to_string(), AgentValue::PerVehicle(observations));
        tick.rewards
            .insert(agent_id.to_string(), AgentValue::PerVehicle(rewards));
        tick.scores
            .insert(agent_id.to_string(), AgentValue::PerVehicle(scores));
        tick.dones.insert(agent_id.to_string(), done);
        Ok(())
    }

    /// Step the sensors of every agent-controlled or bystander vehicle
    pub fn step_agent_sensors(&self, ctx: &mut SimContext<'_>) {
        let mut vehicle_ids = ctx.vehicle_index.agent_controlled_vehicle_ids();
        vehicle_ids.extend(self.vehicles_with_sensors.keys().cloned());

        let sensors = ctx.sensors;
        for vehicle_id in vehicle_ids {
            if let Some(sensor_state) = ctx.vehicle_index.sensor_state_mut(&vehicle_id) {
                sensors.step(sensor_state);
            }
            ctx.vehicle_index.step_vehicle_sensors(&vehicle_id);
        }
    }

    /// Hand every social agent its observation; nothing is awaited from the
    /// workers
    pub async fn send_observations_to_social_agents(
        &mut self,
        observations: &BTreeMap<AgentId, AgentObservation>,
    ) {
        for (agent_id, remote) in self.remote_social_agents.iter_mut() {
            let Some(observation) = observations.get(agent_id) else {
                warn!("No observation for social agent `{}` this tick", agent_id);
                continue;
            };

            if let Err(e) = remote.send_observation(observation).await {
                warn!("Failed to send observation to social agent `{}`: {}", agent_id, e);
            }
        }
    }

    /// Collect social actions and merge them with the ego actions.
    ///
    /// Every social agent is queried. Agents that time out or fail are left
    /// out of the result for this tick.
    pub async fn fetch_agent_actions(
        &mut self,
        ctx: &SimContext<'_>,
        ego_actions: BTreeMap<AgentId, AgentAction>,
    ) -> BTreeMap<AgentId, AgentAction> {
        let timeout = self.action_timeout;
        let mut social_actions = BTreeMap::new();
        let mut missing = Vec::new();

        for (agent_id, remote) in self.remote_social_agents.iter_mut() {
            match remote.recv_action(timeout).await {
                Ok(Some(action)) => {
                    social_actions.insert(agent_id.clone(), action);
                }
                Ok(None) => missing.push(agent_id.clone()),
                Err(e) => {
                    warn!("Failed to receive action from social agent `{}`: {}", agent_id, e);
                    missing.push(agent_id.clone());
                }
            }
        }

        if !missing.is_empty() {
            warn!(
                "Social agents {:?} produced no action within {:?}; they stay idle this tick",
                missing, timeout
            );
            metrics::counter!(MISSING_ACTIONS).increment(missing.len() as u64);
        }

        let mut actions =
            self.filter_social_agent_actions_for_controlled_vehicles(&*ctx.vehicle_index, social_actions);
        actions.extend(ego_actions);
        actions
    }

    /// Drop every social action aimed at a vehicle its agent does not
    /// actuate.
    ///
    /// Only vehicles the agent is [`ControlState::Controlling`] count;
    /// shadowed vehicles are observed but never driven.
    pub fn filter_social_agent_actions_for_controlled_vehicles(
        &self,
        vehicle_index: &dyn VehicleIndex,
        actions: BTreeMap<AgentId, AgentAction>,
    ) -> BTreeMap<AgentId, AgentAction> {
        let mut filtered_out = 0usize;
        let mut kept = BTreeMap::new();

        for (agent_id, action) in actions {
            let controlling: BTreeSet<VehicleId> = vehicle_index
                .control_states_by_actor(&agent_id)
                .into_iter()
                .filter(|(_, state)| *state == ControlState::Controlling)
                .map(|(vehicle_id, _)| vehicle_id)
                .collect();

            if controlling.is_empty() {
                debug!("Agent `{}` controls no vehicle; dropping its action", agent_id);
                filtered_out += 1;
                continue;
            }

            let control_mode = match self.control_mode_of(&agent_id) {
                Ok(control_mode) => control_mode,
                Err(e) => {
                    warn!("Dropping action of agent `{}`: {}", agent_id, e);
                    filtered_out += 1;
                    continue;
                }
            };

            match (control_mode, action) {
                (ControlMode::MultiVehicle, AgentValue::PerVehicle(per_vehicle)) => {
                    let requested = per_vehicle.len();
                    let per_vehicle: BTreeMap<VehicleId, _> = per_vehicle
                        .into_iter()
                        .filter(|(vehicle_id, _)| controlling.contains(vehicle_id))
                        .collect();
                    filtered_out += requested - per_vehicle.len();

                    if !per_vehicle.is_empty() {
                        kept.insert(agent_id, AgentValue::PerVehicle(per_vehicle));
                    }
                }
                (ControlMode::MultiVehicle, AgentValue::Single(_)) => {
                    warn!(
                        "Multi-vehicle agent `{}` sent a single action; dropping it",
                        agent_id
                    );
                    filtered_out += 1;
                }
                (ControlMode::SingleVehicle, action) => {
                    kept.insert(agent_id, action);
                }
            }
        }

        if filtered_out > 0 {
            metrics::counter!(FILTERED_ACTIONS).increment(filtered_out as u64);
        }
        kept
    }

    /// Send the episode's first observations to the social agents and
    /// return the ones meant for active ego agents
    pub async fn reset_agents(
        &mut self,
        observations: &BTreeMap<AgentId, AgentObservation>,
    ) -> BTreeMap<AgentId, AgentObservation> {
        self.send_observations_to_social_agents(observations).await;

        observations
            .iter()
            .filter(|(agent_id, _)| {
                self.ego_agent_ids.contains(*agent_id) && !self.pending_agent_ids.contains(*agent_id)
            })
            .map(|(agent_id, observation)| (agent_id.clone(), observation.clone()))
            .collect()
    }

    /// Keep only active ego entries; social agents get theirs through their
    /// workers
    pub fn filter_response_for_ego(&self, mut response: TickObservations) -> TickObservations {
        response.retain_agents(|agent_id| {
            self.ego_agent_ids.contains(agent_id) && !self.pending_agent_ids.contains(agent_id)
        });
        response
    }
}

fn sensor_inputs(
    vehicle_index: &dyn VehicleIndex,
    vehicle_id: &str,
) -> Result<(SensorState, VehicleState)> {
    let sensor_state = vehicle_index
        .sensor_state_for(vehicle_id)
        .ok_or_else(|| EngineError::MissingSensorState(vehicle_id.to_string()))?;
    let vehicle = vehicle_index
        .vehicle_by_id(vehicle_id)
        .ok_or_else(|| EngineError::VehicleNotFound(vehicle_id.to_string()))?;
    Ok((sensor_state, vehicle))
}
