use amr_types::AssignmentPlan;
use anyhow::Result;
use async_trait::async_trait;

/// Single completion event for a dispatched plan.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchCompletion {
    /// The agent finished the task.
    Completed {
        actual_time_s: f64,
        /// Charge reported at hand-back, when the agent reports one.
        final_battery: Option<f64>,
    },
    Failed { detail: String },
    /// The collaborator gave up waiting on the agent.
    TimedOut,
}

impl DispatchCompletion {
    pub fn completed(actual_time_s: f64) -> Self {
        Self::Completed {
            actual_time_s,
            final_battery: None,
        }
    }
}

/// Communication seam towards the fleet: accepts a winning plan and resolves
/// once with its outcome. Protocol and device translation live behind it.
#[async_trait]
pub trait DispatchCollaborator: Send + Sync {
    async fn dispatch(&self, plan: &AssignmentPlan) -> Result<DispatchCompletion>;
}
