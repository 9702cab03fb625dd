//! Shared data types for AMR task dispatch: tasks, fleet state, plans and workflow records.

mod error;
mod fleet;
mod plan;
mod task;
mod workflow;

pub use error::{ConfigError, FailureReason, PhaseTransitionError};
pub use fleet::{AmrState, FleetAggregate};
pub use plan::{AssignmentPlan, PlanFeatures, PlanScore, PredictionSource, RouteKey};
pub use task::{Capability, GridCell, Position, ProductionTask};
pub use workflow::{PhaseTransition, WorkflowPhase, WorkflowState};

/// Identifier of a production task.
pub type TaskId = String;
/// Identifier of a mobile robot in the fleet.
pub type AgentId = String;
