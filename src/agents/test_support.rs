// src/agents/test_support.rs
//! In-process doubles for the worker pool and the simulation collaborators

use crate::agents::interface::{ActionSpaceType, AgentDataModel, AgentInterface, SocialAgent};
use crate::agents::manager::AgentManager;
use crate::agents::values::{AgentAction, AgentObservation};
use crate::runtime::remote_agent::RemoteAgent;
use crate::runtime::worker_host::FixedActionController;
use crate::runtime::worker_pool::RemoteAgentPool;
use crate::simulation::types::{
    AgentId, Dimensions, Mission, Observation, Plan, Pose, SensorState, VehicleId, VehicleState,
};
use crate::simulation::{
    InMemoryVehicleIndex, MissionPlanner, Provider, Scenario, SensorEngine, SimContext,
};
use crate::utils::config::OrchestratorSettings;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn ego_interfaces(ids: &[&str]) -> BTreeMap<AgentId, AgentInterface> {
    ids.iter()
        .map(|id| (id.to_string(), AgentInterface::new(ActionSpaceType::Continuous)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    None,
    Acquire,
    Start,
    Terminate,
}

#[derive(Debug)]
struct PoolState {
    failure: Failure,
    acquired: AtomicUsize,
    started: AtomicUsize,
    terminated: AtomicUsize,
    observations: AtomicUsize,
    destroyed: AtomicBool,
}

/// Pool handing out in-process agents that answer like the worker host.
///
/// `policy_kwargs.silent` makes an agent miss every deadline and
/// `policy_kwargs.broken` makes its action collection fail.
#[derive(Clone)]
pub struct FakePool {
    state: Arc<PoolState>,
}

impl FakePool {
    fn with_failure(failure: Failure) -> Self {
        Self {
            state: Arc::new(PoolState {
                failure,
                acquired: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                terminated: AtomicUsize::new(0),
                observations: AtomicUsize::new(0),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn new() -> Self {
        Self::with_failure(Failure::None)
    }

    pub fn exhausted() -> Self {
        Self::with_failure(Failure::Acquire)
    }

    pub fn failing_start() -> Self {
        Self::with_failure(Failure::Start)
    }

    pub fn failing_terminate() -> Self {
        Self::with_failure(Failure::Terminate)
    }

    pub fn manager(&self, interfaces: BTreeMap<AgentId, AgentInterface>) -> AgentManager {
        let settings = OrchestratorSettings {
            action_timeout_ms: 50,
        };
        AgentManager::new(interfaces, Arc::new(self.clone()), &settings)
    }

    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.state.terminated.load(Ordering::SeqCst)
    }

    pub fn observations_sent(&self) -> usize {
        self.state.observations.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> bool {
        self.state.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteAgentPool for FakePool {
    async fn acquire(&self) -> Result<Box<dyn RemoteAgent>> {
        if self.state.failure == Failure::Acquire {
            return Err(EngineError::PoolExhausted);
        }
        let n = self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRemoteAgent {
            worker_id: format!("fake-{}", n),
            state: self.state.clone(),
            controller: None,
            silent: false,
            broken: false,
            pending: None,
            terminated: false,
        }))
    }

    async fn destroy(&self) -> Result<()> {
        self.state.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeRemoteAgent {
    worker_id: String,
    state: Arc<PoolState>,
    controller: Option<FixedActionController>,
    silent: bool,
    broken: bool,
    pending: Option<AgentObservation>,
    terminated: bool,
}

#[async_trait]
impl RemoteAgent for FakeRemoteAgent {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn start(&mut self, agent: &SocialAgent) -> Result<()> {
        if self.state.failure == Failure::Start {
            return Err(EngineError::RuntimeError("controller failed to load".into()));
        }
        let flag = |name: &str| {
            agent
                .policy_kwargs
                .get(name)
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
        };
        self.silent = flag("silent");
        self.broken = flag("broken");
        self.controller = Some(FixedActionController::from_agent(agent));
        self.state.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_observation(&mut self, observation: &AgentObservation) -> Result<()> {
        self.state.observations.fetch_add(1, Ordering::SeqCst);
        self.pending = Some(observation.clone());
        Ok(())
    }

    async fn recv_action(&mut self, _timeout: Duration) -> Result<Option<AgentAction>> {
        if self.broken {
            return Err(EngineError::RuntimeError("worker crashed".into()));
        }
        let Some(observation) = self.pending.take() else {
            return Ok(None);
        };
        if self.silent {
            return Ok(None);
        }
        Ok(self.controller.as_ref().map(|c| c.act(&observation)))
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.state.terminated.fetch_add(1, Ordering::SeqCst);
        if self.state.failure == Failure::Terminate {
            return Err(EngineError::RuntimeError("worker refused to stop".into()));
        }
        Ok(())
    }
}

/// Sensor engine echoing vehicle state, with scripted done flags
#[derive(Default)]
pub struct FakeSensors {
    pub done_vehicles: BTreeSet<VehicleId>,
}

impl SensorEngine for FakeSensors {
    fn observe(
        &self,
        agent_id: &str,
        sensor_state: &SensorState,
        vehicle: &VehicleState,
    ) -> Result<(Observation, bool)> {
        let observation = json!({
            "agent": agent_id,
            "vehicle": vehicle.vehicle_id,
            "speed": vehicle.speed,
            "steps": sensor_state.steps_completed,
        });
        Ok((observation, self.done_vehicles.contains(&vehicle.vehicle_id)))
    }

    fn step(&self, sensor_state: &mut SensorState) {
        sensor_state.steps_completed += 1;
    }
}

pub struct StraightPlanner;

impl MissionPlanner for StraightPlanner {
    fn plan(&self, mission: Option<&Mission>) -> Plan {
        Plan {
            mission: mission.cloned(),
            route: vec!["lane-0".to_string()],
        }
    }
}

/// Provider remembering every vehicle it was asked to create
pub struct RecordingProvider {
    action_spaces: BTreeSet<ActionSpaceType>,
    created: Arc<Mutex<Vec<VehicleState>>>,
    full: bool,
}

impl Provider for RecordingProvider {
    fn action_spaces(&self) -> &BTreeSet<ActionSpaceType> {
        &self.action_spaces
    }

    fn create_vehicle(&mut self, state: VehicleState) -> Result<()> {
        if self.full {
            return Err(EngineError::RuntimeError("no room left".to_string()));
        }
        self.created.lock().push(state);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeScenario {
    pub missions: BTreeMap<AgentId, Mission>,
    pub social_agents: BTreeMap<AgentId, (SocialAgent, AgentDataModel)>,
}

impl Scenario for FakeScenario {
    fn mission(&self, agent_id: &str) -> Option<Mission> {
        self.missions.get(agent_id).cloned()
    }

    fn social_agents(&self) -> BTreeMap<AgentId, (SocialAgent, AgentDataModel)> {
        self.social_agents.clone()
    }
}

/// Owns every collaborator a [`SimContext`] borrows
pub struct Fixture {
    pub index: InMemoryVehicleIndex,
    pub sensors: FakeSensors,
    pub planner: StraightPlanner,
    pub providers: Vec<Box<dyn Provider>>,
    pub scenario: FakeScenario,
    created: BTreeMap<String, Arc<Mutex<Vec<VehicleState>>>>,
}

impl Fixture {
    /// Two providers: one for lane and multi-target agents, one for
    /// multi-target agents only
    pub fn new() -> Self {
        let mut fixture = Self {
            index: InMemoryVehicleIndex::new(),
            sensors: FakeSensors::default(),
            planner: StraightPlanner,
            providers: Vec::new(),
            scenario: FakeScenario::default(),
            created: BTreeMap::new(),
        };
        fixture.add_provider(
            "lane-and-boids",
            &[ActionSpaceType::Lane, ActionSpaceType::MultiTargetPose],
            false,
        );
        fixture.add_provider("boids-only", &[ActionSpaceType::MultiTargetPose], false);
        fixture
    }

    fn add_provider(&mut self, name: &str, action_spaces: &[ActionSpaceType], full: bool) {
        let created = Arc::new(Mutex::new(Vec::new()));
        self.created.insert(name.to_string(), created.clone());
        self.providers.push(Box::new(RecordingProvider {
            action_spaces: action_spaces.iter().copied().collect(),
            created,
            full,
        }));
    }

    /// Add a provider that rejects every vehicle
    pub fn add_full_provider(&mut self, name: &str, action_spaces: &[ActionSpaceType]) {
        self.add_provider(name, action_spaces, true);
    }

    pub fn created_vehicles(&self, provider: &str) -> usize {
        self.created
            .get(provider)
            .map(|created| created.lock().len())
            .unwrap_or(0)
    }

    pub fn add_vehicle(&mut self, vehicle_id: &str) {
        self.index.insert_vehicle(VehicleState {
            vehicle_id: vehicle_id.to_string(),
            vehicle_type: "passenger".to_string(),
            pose: Pose::default(),
            dimensions: Dimensions::default(),
            speed: 10.0,
            source: "traffic".to_string(),
        });
    }

    pub fn add_social_agent(&mut self, agent_id: &str, action_space: ActionSpaceType, name: &str) {
        let agent = SocialAgent::new(format!("zoo/{}", name), AgentInterface::new(action_space));
        self.scenario
            .social_agents
            .insert(agent_id.to_string(), (agent, AgentDataModel::named(name)));
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
