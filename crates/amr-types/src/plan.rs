use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::task::GridCell;
use crate::{AgentId, TaskId};

/// Key of a traffic cost model entry: agent start cell, pickup cell and dropoff cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub start: GridCell,
    pub pickup: GridCell,
    pub dropoff: GridCell,
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}>{},{}>{},{}",
            self.start.x, self.start.y, self.pickup.x, self.pickup.y, self.dropoff.x, self.dropoff.y
        )
    }
}

/// Where a plan's predicted time came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Learned,
    Geometric,
}

/// Raw features the decision engine scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanFeatures {
    pub approach_distance_m: f64,
    pub haul_distance_m: f64,
    /// Task payload over agent maximum payload.
    pub payload_utilization: f64,
    /// Largest required/available ratio across lift height and reach; zero when not demanded.
    pub capability_utilization: f64,
    pub battery: f64,
}

/// Sub-scores and the weighted composite for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanScore {
    pub time: f64,
    pub suitability: f64,
    pub battery: f64,
    pub composite: f64,
}

/// Candidate pairing of a task with an agent that passed every hard constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentPlan {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub route_key: RouteKey,
    pub predicted_time_s: f64,
    pub prediction_source: PredictionSource,
    /// Predicted battery fraction consumed by the trip.
    pub predicted_energy: f64,
    pub features: PlanFeatures,
    /// Set by the decision engine.
    pub score: Option<PlanScore>,
    pub generated_at: DateTime<Utc>,
}

impl AssignmentPlan {
    pub fn composite_score(&self) -> Option<f64> {
        self.score.map(|score| score.composite)
    }
}
