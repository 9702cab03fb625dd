use amr_types::{AgentId, AmrState, FleetAggregate, Position};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::Notify;

use crate::recover;

/// Errors returned by fleet registry operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(AgentId),
    #[error("agent '{0}' not found")]
    AgentNotFound(AgentId),
    #[error("agent '{agent_id}' is invalid: {reason}")]
    InvalidAgent { agent_id: AgentId, reason: String },
    #[error("agent '{0}' is not claimed")]
    NotClaimed(AgentId),
}

/// State reported by the execution side when an agent is handed back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReleaseTelemetry {
    pub position: Position,
    pub battery: f64,
}

/// Fleet operations the workflow runtime depends on.
///
/// Implementations must make `try_claim` an atomic compare-and-set and must
/// never block across an await point.
pub trait FleetStore: Send + Sync {
    fn snapshot(&self) -> Vec<AmrState>;
    fn try_claim(&self, agent_id: &str) -> Result<bool, RegistryError>;
    fn release(
        &self,
        agent_id: &str,
        telemetry: Option<ReleaseTelemetry>,
    ) -> Result<(), RegistryError>;
    fn release_signal(&self) -> &Notify;
}

#[derive(Debug)]
struct AgentRecord {
    available: AtomicBool,
    state: Mutex<AmrState>,
}

/// Indexed store of agent state keyed by agent id.
///
/// Availability lives in an atomic flag per agent: [`FleetRegistry::try_claim`]
/// is a compare-and-set from available to claimed, so two workflows racing for
/// the same agent cannot both win. Everything outside the orchestrator sees
/// cloned snapshots only.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    agents: RwLock<BTreeMap<AgentId, Arc<AgentRecord>>>,
    released: Notify,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from an initial fleet.
    pub fn from_agents(agents: impl IntoIterator<Item = AmrState>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for agent in agents {
            registry.register(agent)?;
        }
        Ok(registry)
    }

    pub fn register(&self, agent: AmrState) -> Result<(), RegistryError> {
        validate_agent(&agent)?;
        let mut agents = recover(self.agents.write());
        if agents.contains_key(&agent.agent_id) {
            return Err(RegistryError::DuplicateAgent(agent.agent_id));
        }
        let record = AgentRecord {
            available: AtomicBool::new(agent.available),
            state: Mutex::new(agent.clone()),
        };
        agents.insert(agent.agent_id, Arc::new(record));
        Ok(())
    }

    pub fn len(&self) -> usize {
        recover(self.agents.read()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the fleet, ordered by agent id.
    pub fn snapshot(&self) -> Vec<AmrState> {
        let agents = recover(self.agents.read());
        agents.values().map(|record| record.read_state()).collect()
    }

    pub fn get(&self, agent_id: &str) -> Option<AmrState> {
        self.record(agent_id).map(|record| record.read_state())
    }

    pub fn aggregate(&self) -> FleetAggregate {
        FleetAggregate::from_agents(&self.snapshot())
    }

    pub fn is_available(&self, agent_id: &str) -> Result<bool, RegistryError> {
        let record = self.require(agent_id)?;
        Ok(record.available.load(Ordering::Acquire))
    }

    /// Atomically flips the agent from available to claimed.
    ///
    /// Returns `Ok(false)` when another workflow already holds the agent.
    pub fn try_claim(&self, agent_id: &str) -> Result<bool, RegistryError> {
        let record = self.require(agent_id)?;
        let claimed = record
            .available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            tracing::debug!(agent_id, "agent claimed");
        }
        Ok(claimed)
    }

    /// Restores availability of a claimed agent, applying telemetry first when given.
    ///
    /// Invalid telemetry is not applied and is reported as `InvalidAgent`, but
    /// the agent is released either way.
    pub fn release(
        &self,
        agent_id: &str,
        telemetry: Option<ReleaseTelemetry>,
    ) -> Result<(), RegistryError> {
        let record = self.require(agent_id)?;
        if record.available.load(Ordering::Acquire) {
            return Err(RegistryError::NotClaimed(agent_id.to_string()));
        }
        let applied = match telemetry {
            Some(telemetry) => validate_telemetry(agent_id, &telemetry).map(|()| {
                let mut state = recover(record.state.lock());
                state.position = telemetry.position;
                state.battery = telemetry.battery;
            }),
            None => Ok(()),
        };
        record.available.store(true, Ordering::Release);
        tracing::debug!(agent_id, "agent released");
        self.released.notify_waiters();
        applied
    }

    /// Signalled every time an agent is released.
    pub fn release_signal(&self) -> &Notify {
        &self.released
    }

    fn record(&self, agent_id: &str) -> Option<Arc<AgentRecord>> {
        recover(self.agents.read()).get(agent_id).cloned()
    }

    fn require(&self, agent_id: &str) -> Result<Arc<AgentRecord>, RegistryError> {
        self.record(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))
    }
}

impl FleetStore for FleetRegistry {
    fn snapshot(&self) -> Vec<AmrState> {
        FleetRegistry::snapshot(self)
    }

    fn try_claim(&self, agent_id: &str) -> Result<bool, RegistryError> {
        FleetRegistry::try_claim(self, agent_id)
    }

    fn release(
        &self,
        agent_id: &str,
        telemetry: Option<ReleaseTelemetry>,
    ) -> Result<(), RegistryError> {
        FleetRegistry::release(self, agent_id, telemetry)
    }

    fn release_signal(&self) -> &Notify {
        FleetRegistry::release_signal(self)
    }
}

impl AgentRecord {
    fn read_state(&self) -> AmrState {
        let mut state = recover(self.state.lock()).clone();
        state.available = self.available.load(Ordering::Acquire);
        state
    }
}

fn validate_agent(agent: &AmrState) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidAgent {
        agent_id: agent.agent_id.clone(),
        reason: reason.to_string(),
    };
    if agent.agent_id.trim().is_empty() {
        return Err(invalid("agent_id cannot be empty"));
    }
    if !agent.max_payload_kg.is_finite() || agent.max_payload_kg <= 0.0 {
        return Err(invalid("max_payload_kg must be finite and > 0"));
    }
    if !agent.battery.is_finite() || !(0.0..=1.0).contains(&agent.battery) {
        return Err(invalid("battery must be within [0.0, 1.0]"));
    }
    if !agent.position.is_finite() {
        return Err(invalid("position must be finite"));
    }
    for (label, value) in [("lift_height_m", agent.lift_height_m), ("reach_m", agent.reach_m)] {
        if let Some(value) = value {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(&format!("{label} must be finite and > 0")));
            }
        }
    }
    Ok(())
}

fn validate_telemetry(agent_id: &str, telemetry: &ReleaseTelemetry) -> Result<(), RegistryError> {
    if !telemetry.position.is_finite()
        || !telemetry.battery.is_finite()
        || !(0.0..=1.0).contains(&telemetry.battery)
    {
        return Err(RegistryError::InvalidAgent {
            agent_id: agent_id.to_string(),
            reason: "release telemetry must carry a finite position and battery within [0.0, 1.0]"
                .to_string(),
        });
    }
    Ok(())
}
