use std::collections::BTreeMap;
use std::time::Duration;

use amr_runner::{DispatchCollaborator, DispatchCompletion};
use amr_types::{AssignmentPlan, TaskId};
use anyhow::Result;
use async_trait::async_trait;

use crate::scenario::SimulatedOutcome;

/// Answers dispatches from the scenario's scripted outcomes instead of real hardware.
pub(crate) struct SimulatedDispatcher {
    outcomes: BTreeMap<TaskId, SimulatedOutcome>,
    latency: Duration,
}

impl SimulatedDispatcher {
    pub(crate) fn new(outcomes: BTreeMap<TaskId, SimulatedOutcome>, latency: Duration) -> Self {
        Self { outcomes, latency }
    }
}

#[async_trait]
impl DispatchCollaborator for SimulatedDispatcher {
    async fn dispatch(&self, plan: &AssignmentPlan) -> Result<DispatchCompletion> {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }

        let outcome = self.outcomes.get(&plan.task_id).cloned().unwrap_or_default();
        tracing::debug!(task_id = %plan.task_id, agent_id = %plan.agent_id, ?outcome, "simulated dispatch");
        Ok(match outcome {
            SimulatedOutcome::Complete {
                slowdown,
                final_battery,
            } => DispatchCompletion::Completed {
                actual_time_s: plan.predicted_time_s * slowdown,
                final_battery,
            },
            SimulatedOutcome::Fail { detail } => DispatchCompletion::Failed { detail },
            SimulatedOutcome::TimeOut => DispatchCompletion::TimedOut,
        })
    }
}
