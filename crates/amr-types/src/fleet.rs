use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::task::{Capability, Position};
use crate::AgentId;

/// Mobile robot state as held by the fleet registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmrState {
    pub agent_id: AgentId,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub mission_tags: BTreeSet<String>,
    pub capabilities: BTreeSet<Capability>,
    pub max_payload_kg: f64,
    #[serde(default)]
    pub lift_height_m: Option<f64>,
    #[serde(default)]
    pub reach_m: Option<f64>,
    #[serde(default = "default_available")]
    pub available: bool,
    pub position: Position,
    /// Remaining charge in `[0, 1]`.
    pub battery: f64,
}

fn default_available() -> bool {
    true
}

impl AmrState {
    /// Creates an available agent with a single capability.
    pub fn new(
        agent_id: impl Into<String>,
        capability: Capability,
        max_payload_kg: f64,
        position: Position,
        battery: f64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            model: String::new(),
            mission_tags: BTreeSet::new(),
            capabilities: BTreeSet::from([capability]),
            max_payload_kg,
            lift_height_m: None,
            reach_m: None,
            available: true,
            position,
            battery,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_mission_tag(mut self, tag: impl Into<String>) -> Self {
        self.mission_tags.insert(tag.into());
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_lift_height(mut self, height_m: f64) -> Self {
        self.lift_height_m = Some(height_m);
        self
    }

    pub fn with_reach(mut self, reach_m: f64) -> Self {
        self.reach_m = Some(reach_m);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Fleet-wide aggregates used to adjust scoring weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FleetAggregate {
    pub agent_count: usize,
    pub available_count: usize,
    pub mean_battery: f64,
    pub available_ratio: f64,
}

impl FleetAggregate {
    pub fn from_agents<'a>(agents: impl IntoIterator<Item = &'a AmrState>) -> Self {
        let mut agent_count = 0usize;
        let mut available_count = 0usize;
        let mut battery_total = 0.0;
        for agent in agents {
            agent_count += 1;
            if agent.available {
                available_count += 1;
            }
            battery_total += agent.battery;
        }
        if agent_count == 0 {
            return Self::default();
        }
        Self {
            agent_count,
            available_count,
            mean_battery: battery_total / agent_count as f64,
            available_ratio: available_count as f64 / agent_count as f64,
        }
    }
}
