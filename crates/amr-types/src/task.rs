use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskId;

/// Capability class a task requires and an agent provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Towing or carrying loads on the deck.
    Transport,
    /// Raising loads to a rack or station height.
    Lift,
    /// Picking with an onboard arm.
    Manipulate,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Lift => "lift",
            Self::Manipulate => "manipulate",
        }
    }
}

/// Planar shop-floor coordinate in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Quantizes the position onto a square grid with `cell_size` metre cells.
    pub fn cell(&self, cell_size: f64) -> GridCell {
        GridCell {
            x: (self.x / cell_size).floor() as i64,
            y: (self.y / cell_size).floor() as i64,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Grid cell used to build route keys for the traffic cost model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub x: i64,
    pub y: i64,
}

/// Production order admitted for dispatch. Immutable once admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionTask {
    pub task_id: TaskId,
    pub capability: Capability,
    /// Mission tag an agent must carry, when the order is restricted to a mission.
    #[serde(default)]
    pub mission: Option<String>,
    pub payload_kg: f64,
    #[serde(default)]
    pub required_lift_height_m: Option<f64>,
    #[serde(default)]
    pub required_reach_m: Option<f64>,
    pub origin: Position,
    pub destination: Position,
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ProductionTask {
    /// Creates a task with no mission restriction and no capability-specific demand.
    pub fn new(
        task_id: impl Into<String>,
        capability: Capability,
        payload_kg: f64,
        origin: Position,
        destination: Position,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            capability,
            mission: None,
            payload_kg,
            required_lift_height_m: None,
            required_reach_m: None,
            origin,
            destination,
            priority: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_mission(mut self, mission: impl Into<String>) -> Self {
        self.mission = Some(mission.into());
        self
    }

    pub fn with_lift_height(mut self, height_m: f64) -> Self {
        self.required_lift_height_m = Some(height_m);
        self
    }

    pub fn with_reach(mut self, reach_m: f64) -> Self {
        self.required_reach_m = Some(reach_m);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Straight-line length of the pickup-to-dropoff leg.
    pub fn haul_distance_m(&self) -> f64 {
        self.origin.distance_to(&self.destination)
    }
}
