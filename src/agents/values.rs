// src/agents/values.rs
//! Per-agent value maps returned by a tick

use crate::simulation::types::{Action, AgentId, Observation, VehicleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value for a single-vehicle agent, or one value per vehicle for
/// multi-vehicle agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentValue<T> {
    Single(T),
    PerVehicle(BTreeMap<String, T>),
}

impl<T> AgentValue<T> {
    pub fn as_single(&self) -> Option<&T> {
        match self {
            AgentValue::Single(value) => Some(value),
            AgentValue::PerVehicle(_) => None,
        }
    }

    pub fn as_per_vehicle(&self) -> Option<&BTreeMap<String, T>> {
        match self {
            AgentValue::Single(_) => None,
            AgentValue::PerVehicle(values) => Some(values),
        }
    }
}

pub type AgentObservation = AgentValue<Observation>;
pub type AgentAction = AgentValue<Action>;

/// Everything a tick reports back to the simulation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickObservations {
    pub observations: BTreeMap<AgentId, AgentObservation>,

    /// Distance travelled since the previous tick
    pub rewards: BTreeMap<AgentId, AgentValue<f64>>,

    /// Distance travelled since episode start; multi-vehicle entries are
    /// keyed by [`format_actor_id`]
    pub scores: BTreeMap<AgentId, AgentValue<f64>>,

    pub dones: BTreeMap<AgentId, bool>,
}

impl TickObservations {
    /// Keep only the entries of agents matching `keep`
    pub fn retain_agents<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.observations.retain(|id, _| keep(id));
        self.rewards.retain(|id, _| keep(id));
        self.scores.retain(|id, _| keep(id));
        self.dones.retain(|id, _| keep(id));
    }
}

/// Display key for an actor; multi-vehicle agents get one key per vehicle
pub fn format_actor_id(agent_id: &str, vehicle_id: &VehicleId, is_multi: bool) -> String {
    if is_multi {
        format!("{}-{{{}}}", agent_id, vehicle_id)
    } else {
        agent_id.to_string()
    }
}
