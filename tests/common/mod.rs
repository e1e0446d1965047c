// tests/common/mod.rs
//! Simulation collaborators for integration tests

#![allow(dead_code)]

use lockstep_engine::agents::{ActionSpaceType, AgentDataModel, SocialAgent};
use lockstep_engine::simulation::{
    AgentId, Dimensions, InMemoryVehicleIndex, Mission, MissionPlanner, Observation, Plan, Pose,
    Provider, Scenario, SensorEngine, SensorState, SimContext, VehicleId, VehicleState,
};
use lockstep_engine::utils::config::{PoolSettings, WorkerCommand};
use lockstep_engine::Result;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

pub fn worker_command() -> WorkerCommand {
    WorkerCommand {
        program: env!("CARGO_BIN_EXE_lockstep-engine").to_string(),
        args: vec!["worker".to_string()],
        work_dir: None,
        env_vars: vec![("RUST_LOG".to_string(), "warn".to_string())],
    }
}

pub fn pool_settings() -> PoolSettings {
    PoolSettings {
        buffer_size: 1,
        max_workers: 4,
        acquire_timeout_ms: 10_000,
        shutdown_grace_ms: 500,
        worker: worker_command(),
    }
}

#[derive(Default)]
pub struct EchoSensors {
    pub done_vehicles: BTreeSet<VehicleId>,
}

impl SensorEngine for EchoSensors {
    fn observe(
        &self,
        _agent_id: &str,
        _sensor_state: &SensorState,
        vehicle: &VehicleState,
    ) -> Result<(Observation, bool)> {
        Ok((
            json!({"vehicle": vehicle.vehicle_id, "speed": vehicle.speed}),
            self.done_vehicles.contains(&vehicle.vehicle_id),
        ))
    }

    fn step(&self, sensor_state: &mut SensorState) {
        sensor_state.steps_completed += 1;
    }
}

pub struct NoopPlanner;

impl MissionPlanner for NoopPlanner {
    fn plan(&self, mission: Option<&Mission>) -> Plan {
        Plan {
            mission: mission.cloned(),
            route: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct StaticScenario {
    pub social_agents: BTreeMap<AgentId, (SocialAgent, AgentDataModel)>,
}

impl Scenario for StaticScenario {
    fn mission(&self, _agent_id: &str) -> Option<Mission> {
        None
    }

    fn social_agents(&self) -> BTreeMap<AgentId, (SocialAgent, AgentDataModel)> {
        self.social_agents.clone()
    }
}

pub struct NullProvider {
    action_spaces: BTreeSet<ActionSpaceType>,
}

impl Provider for NullProvider {
    fn action_spaces(&self) -> &BTreeSet<ActionSpaceType> {
        &self.action_spaces
    }

    fn create_vehicle(&mut self, _state: VehicleState) -> Result<()> {
        Ok(())
    }
}

pub struct World {
    pub index: InMemoryVehicleIndex,
    pub sensors: EchoSensors,
    pub planner: NoopPlanner,
    pub providers: Vec<Box<dyn Provider>>,
    pub scenario: StaticScenario,
}

impl World {
    pub fn new() -> Self {
        Self {
            index: InMemoryVehicleIndex::new(),
            sensors: EchoSensors::default(),
            planner: NoopPlanner,
            providers: vec![Box::new(NullProvider {
                action_spaces: BTreeSet::new(),
            })],
            scenario: StaticScenario::default(),
        }
    }

    pub fn add_vehicle(&mut self, vehicle_id: &str) {
        self.index.insert_vehicle(VehicleState {
            vehicle_id: vehicle_id.to_string(),
            vehicle_type: "passenger".to_string(),
            pose: Pose::default(),
            dimensions: Dimensions::default(),
            speed: 8.0,
            source: "traffic".to_string(),
        });
    }

    pub fn context(&mut self) -> SimContext<'_> {
        SimContext::new(
            &mut self.index,
            &self.sensors,
            &self.planner,
            &mut self.providers,
            &self.scenario,
        )
    }
}
