// src/agents/manager.rs
//! Agent registry and lifecycle
//!
//! The [`AgentManager`] is the only owner of agent membership: which ids
//! exist, which are ego or social, which are still pending, their
//! interfaces, metadata and worker handles. Membership changes only here, at
//! setup, teardown and explicit add/remove calls, never during a tick.
//!
//! Invariants kept by every operation:
//! - ego and social ids are disjoint
//! - pending ids are a subset of agent ids
//! - a social agent owns exactly one worker handle, terminated when the
//!   agent is removed

use crate::agents::interface::{
    AgentDataModel, AgentInterface, AgentKind, AgentRecord, SocialAgent,
};
use crate::observability::ACTIVE_AGENTS;
use crate::runtime::remote_agent::RemoteAgent;
use crate::runtime::worker_pool::RemoteAgentPool;
use crate::simulation::types::{AgentId, VehicleId, VehicleState};
use crate::simulation::SimContext;
use crate::utils::config::OrchestratorSettings;
use crate::utils::errors::{EngineError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tracks agent state and drives the agent life cycle
pub struct AgentManager {
    pub(crate) pool: Arc<dyn RemoteAgentPool>,

    /// Deadline for each social agent's action
    pub(crate) action_timeout: Duration,

    pub(crate) ego_agent_ids: BTreeSet<AgentId>,
    pub(crate) social_agent_ids: BTreeSet<AgentId>,

    /// Registered agents whose vehicle has not shown up yet
    pub(crate) pending_agent_ids: BTreeSet<AgentId>,

    /// Agents spawned at every episode start
    pub(crate) initial_interfaces: BTreeMap<AgentId, AgentInterface>,

    /// Interfaces of every agent, bystander observers included
    pub(crate) agent_interfaces: BTreeMap<AgentId, AgentInterface>,

    pub(crate) agent_data_models: BTreeMap<AgentId, AgentDataModel>,

    /// Observations go out to, and actions come back from, these handles
    pub(crate) remote_social_agents: BTreeMap<AgentId, Box<dyn RemoteAgent>>,

    /// Vehicles carrying bystander sensors, with their observer id
    pub(crate) vehicles_with_sensors: BTreeMap<VehicleId, AgentId>,
}

impl AgentManager {
    /// Create a manager for the given startup agents
    pub fn new(
        initial_interfaces: BTreeMap<AgentId, AgentInterface>,
        pool: Arc<dyn RemoteAgentPool>,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            pool,
            action_timeout: settings.action_timeout(),
            ego_agent_ids: BTreeSet::new(),
            social_agent_ids: BTreeSet::new(),
            pending_agent_ids: BTreeSet::new(),
            initial_interfaces,
            agent_interfaces: BTreeMap::new(),
            agent_data_models: BTreeMap::new(),
            remote_social_agents: BTreeMap::new(),
            vehicles_with_sensors: BTreeMap::new(),
        }
    }

    pub fn agent_ids(&self) -> BTreeSet<AgentId> {
        self.ego_agent_ids
            .union(&self.social_agent_ids)
            .cloned()
            .collect()
    }

    pub fn ego_agent_ids(&self) -> &BTreeSet<AgentId> {
        &self.ego_agent_ids
    }

    pub fn social_agent_ids(&self) -> &BTreeSet<AgentId> {
        &self.social_agent_ids
    }

    /// Agents waiting to enter the simulation
    pub fn pending_agent_ids(&self) -> &BTreeSet<AgentId> {
        &self.pending_agent_ids
    }

    /// Registered agents that are no longer pending
    pub fn active_agents(&self) -> BTreeSet<AgentId> {
        self.agent_ids()
            .difference(&self.pending_agent_ids)
            .cloned()
            .collect()
    }

    pub fn agent_interfaces(&self) -> &BTreeMap<AgentId, AgentInterface> {
        &self.agent_interfaces
    }

    pub fn agent_interface_for_agent_id(&self, agent_id: &str) -> Option<&AgentInterface> {
        self.agent_interfaces.get(agent_id)
    }

    pub fn is_ego(&self, agent_id: &str) -> bool {
        self.ego_agent_ids.contains(agent_id)
    }

    /// Name from the agent's data model, empty when it has none
    pub fn name_for_agent(&self, agent_id: &str) -> &str {
        self.agent_data_models
            .get(agent_id)
            .map(|model| model.name.as_str())
            .unwrap_or("")
    }

    pub fn agent_record(&self, agent_id: &str) -> Option<AgentRecord> {
        let kind = if self.ego_agent_ids.contains(agent_id) {
            AgentKind::Ego
        } else if self.social_agent_ids.contains(agent_id) {
            AgentKind::Social
        } else {
            return None;
        };

        Some(AgentRecord {
            agent_id: agent_id.to_string(),
            kind,
            interface: self.agent_interfaces.get(agent_id).cloned(),
            pending: self.pending_agent_ids.contains(agent_id),
        })
    }

    fn ensure_unregistered(&self, agent_id: &str) -> Result<()> {
        if self.ego_agent_ids.contains(agent_id) || self.social_agent_ids.contains(agent_id) {
            return Err(EngineError::AgentAlreadyExists(agent_id.to_string()));
        }
        Ok(())
    }

    fn record_population(&self) {
        let active = self.agent_ids().len() - self.pending_agent_ids.len();
        metrics::gauge!(ACTIVE_AGENTS).set(active as f64);
    }

    /// Register the startup ego agents, all pending until their vehicles appear
    pub fn register_initial_agents(&mut self) -> Result<()> {
        for agent_id in self.initial_interfaces.keys() {
            if self.social_agent_ids.contains(agent_id) {
                return Err(EngineError::AgentAlreadyExists(agent_id.clone()));
            }
        }

        for (agent_id, interface) in &self.initial_interfaces {
            self.pending_agent_ids.insert(agent_id.clone());
            self.ego_agent_ids.insert(agent_id.clone());
            self.agent_interfaces
                .insert(agent_id.clone(), interface.clone());
        }

        debug!("Registered ego agents {:?}", self.initial_interfaces.keys());
        self.record_population();
        Ok(())
    }

    /// Register ego agents and spawn the scenario's social agents
    pub async fn setup_agents(&mut self, ctx: &mut SimContext<'_>) -> Result<()> {
        self.register_initial_agents()?;
        self.setup_social_agents(ctx).await
    }

    /// Spawn every social agent of the scenario with its own vehicle
    pub async fn setup_social_agents(&mut self, ctx: &mut SimContext<'_>) -> Result<()> {
        let social_agents = ctx.scenario.social_agents();
        info!("Setting up {} social agents", social_agents.len());

        for (agent_id, (social_agent, model)) in social_agents {
            self.ensure_unregistered(&agent_id)?;

            let mut remote = self.pool.acquire().await?;

            let launched = match build_agent_vehicle(ctx, &agent_id, &social_agent.interface, &model, false) {
                Ok(_) => remote.start(&social_agent).await,
                Err(e) => Err(e),
            };

            if let Err(e) = launched {
                release_worker(&agent_id, remote.as_mut()).await;
                return Err(e);
            }

            self.register_social(agent_id, social_agent.interface, model, remote);
        }

        self.record_population();
        Ok(())
    }

    /// Start a social agent that takes over existing vehicles (no vehicle is built).
    ///
    /// Acquisition and start failures are returned and leave the agent
    /// unregistered.
    pub async fn add_social_agent(
        &mut self,
        agent_id: &str,
        social_agent: SocialAgent,
        model: AgentDataModel,
    ) -> Result<()> {
        self.ensure_unregistered(agent_id)?;

        let mut remote = self.pool.acquire().await?;
        if let Err(e) = remote.start(&social_agent).await {
            release_worker(agent_id, remote.as_mut()).await;
            return Err(e);
        }

        debug!("Social agent `{}` started on worker {}", agent_id, remote.worker_id());
        self.register_social(agent_id.to_string(), social_agent.interface, model, remote);
        self.record_population();
        Ok(())
    }

    fn register_social(
        &mut self,
        agent_id: AgentId,
        interface: AgentInterface,
        model: AgentDataModel,
        remote: Box<dyn RemoteAgent>,
    ) {
        self.agent_interfaces.insert(agent_id.clone(), interface);
        self.agent_data_models.insert(agent_id.clone(), model);
        self.remote_social_agents.insert(agent_id.clone(), remote);
        self.social_agent_ids.insert(agent_id);
    }

    /// Promote pending agents whose vehicles now exist.
    ///
    /// Every id must currently be pending; otherwise nothing changes.
    pub fn remove_pending_agent_ids(&mut self, agent_ids: &BTreeSet<AgentId>) -> Result<()> {
        let unknown: Vec<AgentId> = agent_ids
            .difference(&self.pending_agent_ids)
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(EngineError::UnknownAgents(unknown));
        }

        for agent_id in agent_ids {
            self.pending_agent_ids.remove(agent_id);
        }

        self.record_population();
        Ok(())
    }

    /// Promote every pending agent that has at least one vehicle in the index
    pub fn promote_observable_agents(&mut self, ctx: &SimContext<'_>) -> BTreeSet<AgentId> {
        let observable: BTreeSet<AgentId> = self
            .pending_agent_ids
            .iter()
            .filter(|agent_id| {
                !ctx.vehicle_index
                    .controlled_vehicle_ids_by_actor(agent_id, true)
                    .is_empty()
            })
            .cloned()
            .collect();

        if !observable.is_empty() {
            debug!("Agents {:?} entered the simulation", observable);
            for agent_id in &observable {
                self.pending_agent_ids.remove(agent_id);
            }
            self.record_population();
        }

        observable
    }

    /// Remove ego agents, optionally only those in `filter_ids`
    pub fn teardown_ego_agents(&mut self, filter_ids: Option<&BTreeSet<AgentId>>) -> BTreeSet<AgentId> {
        let ids = select_for_teardown(&self.ego_agent_ids, filter_ids);
        self.forget_interfaces(&ids);

        for agent_id in &ids {
            self.ego_agent_ids.remove(agent_id);
        }

        self.record_population();
        ids
    }

    /// Remove social agents, optionally only those in `filter_ids`, and
    /// terminate their workers.
    ///
    /// Registry entries are removed even when a worker fails to terminate;
    /// the failures are reported afterwards.
    pub async fn teardown_social_agents(
        &mut self,
        filter_ids: Option<&BTreeSet<AgentId>>,
    ) -> Result<BTreeSet<AgentId>> {
        let ids = select_for_teardown(&self.social_agent_ids, filter_ids);
        self.forget_interfaces(&ids);

        let mut failed = Vec::new();
        let mut reasons = Vec::new();

        for agent_id in &ids {
            if let Some(mut remote) = self.remote_social_agents.remove(agent_id) {
                if let Err(e) = remote.terminate().await {
                    error!("Failed to terminate worker of social agent `{}`: {}", agent_id, e);
                    failed.push(agent_id.clone());
                    reasons.push(e.to_string());
                }
            }
            self.agent_data_models.remove(agent_id);
            self.social_agent_ids.remove(agent_id);
        }

        self.record_population();

        if failed.is_empty() {
            Ok(ids)
        } else {
            Err(EngineError::TeardownFailed {
                agents: failed,
                removed: ids.into_iter().collect(),
                reason: reasons.join("; "),
            })
        }
    }

    /// Remove the given agents, ego or social; absent ids are ignored
    pub async fn remove_agents(&mut self, agent_ids: &BTreeSet<AgentId>) -> Result<BTreeSet<AgentId>> {
        let mut removed = self.teardown_ego_agents(Some(agent_ids));
        match self.teardown_social_agents(Some(agent_ids)).await {
            Ok(social) => {
                removed.extend(social);
                Ok(removed)
            }
            Err(EngineError::TeardownFailed {
                agents,
                removed: social,
                reason,
            }) => {
                removed.extend(social);
                Err(EngineError::TeardownFailed {
                    agents,
                    removed: removed.into_iter().collect(),
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Drop interfaces and pending marks of agents being torn down
    fn forget_interfaces(&mut self, agent_ids: &BTreeSet<AgentId>) {
        if !agent_ids.is_empty() {
            debug!("Tearing down agents={:?}", agent_ids);
        }

        for agent_id in agent_ids {
            self.agent_interfaces.remove(agent_id);
            self.pending_agent_ids.remove(agent_id);
        }
    }

    /// Remove every agent and every bystander binding
    pub async fn teardown(&mut self) -> Result<()> {
        debug!("Tearing down AgentManager");

        self.teardown_ego_agents(None);
        let social = self.teardown_social_agents(None).await;

        for (_, observer_id) in std::mem::take(&mut self.vehicles_with_sensors) {
            self.agent_interfaces.remove(&observer_id);
        }

        social.map(|_| ())
    }

    /// Tear everything down and shut the worker pool
    pub async fn destroy(&mut self) -> Result<()> {
        let teardown = self.teardown().await;
        let pool = self.pool.destroy().await;

        if let Err(e) = &teardown {
            warn!("Teardown before pool shutdown failed: {}", e);
        }
        teardown.and(pool)
    }
}

fn select_for_teardown(
    agent_ids: &BTreeSet<AgentId>,
    filter_ids: Option<&BTreeSet<AgentId>>,
) -> BTreeSet<AgentId> {
    match filter_ids {
        Some(filter) => agent_ids.intersection(filter).cloned().collect(),
        None => agent_ids.clone(),
    }
}

/// Build a new agent's vehicle and announce it to the providers that can
/// actuate the agent's action space
fn build_agent_vehicle(
    ctx: &mut SimContext<'_>,
    agent_id: &str,
    interface: &AgentInterface,
    model: &AgentDataModel,
    trainable: bool,
) -> Result<VehicleState> {
    let mission = ctx.scenario.mission(agent_id);
    let plan = ctx.planner.plan(mission.as_ref());

    let vehicle = ctx.vehicle_index.build_agent_vehicle(
        agent_id,
        interface,
        plan,
        trainable,
        model.initial_speed,
    )?;

    for provider in ctx.providers.iter_mut() {
        if provider.action_spaces().contains(&interface.action_space) {
            provider
                .create_vehicle(VehicleState {
                    source: "NEW-AGENT".to_string(),
                    ..vehicle.clone()
                })
                .map_err(|e| {
                    EngineError::ProviderError(format!(
                        "Vehicle `{}` of agent `{}` was rejected: {}",
                        vehicle.vehicle_id, agent_id, e
                    ))
                })?;
        }
    }

    Ok(vehicle)
}

/// Best-effort cleanup of a worker that never got an agent
async fn release_worker(agent_id: &str, remote: &mut dyn RemoteAgent) {
    if let Err(e) = remote.terminate().await {
        error!(
            "Failed to release worker {} for agent `{}`: {}",
            remote.worker_id(),
            agent_id,
            e
        );
    }
}
