use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FailureReason, PhaseTransitionError};
use crate::{AgentId, TaskId};

/// Lifecycle phase of a task workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    #[default]
    Planning,
    Executing,
    Learning,
    Completed,
    Failed,
}

impl WorkflowPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Learning => "learning",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true when this phase can transition to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::Planning, Self::Executing)
                | (Self::Executing, Self::Learning)
                | (Self::Learning, Self::Completed)
                | (_, Self::Failed)
        )
    }

    /// Returns true when no further work is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Timestamped entry in a workflow's phase history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: WorkflowPhase,
    pub at: DateTime<Utc>,
}

/// Per-task workflow record kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub task_id: TaskId,
    pub phase: WorkflowPhase,
    pub history: Vec<PhaseTransition>,
    pub agent_id: Option<AgentId>,
    pub planning_attempts: u32,
    pub predicted_time_s: Option<f64>,
    pub actual_time_s: Option<f64>,
    pub failure: Option<FailureReason>,
}

impl WorkflowState {
    /// Creates a workflow in the `Planning` phase.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            phase: WorkflowPhase::Planning,
            history: vec![PhaseTransition {
                phase: WorkflowPhase::Planning,
                at: Utc::now(),
            }],
            agent_id: None,
            planning_attempts: 0,
            predicted_time_s: None,
            actual_time_s: None,
            failure: None,
        }
    }

    /// Moves to `next`, recording the transition time.
    pub fn advance(&mut self, next: WorkflowPhase) -> Result<(), PhaseTransitionError> {
        if !self.phase.can_transition_to(next) {
            return Err(PhaseTransitionError {
                task_id: self.task_id.clone(),
                from: self.phase.as_str(),
                to: next.as_str(),
            });
        }
        self.phase = next;
        self.history.push(PhaseTransition {
            phase: next,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Terminates the workflow with `reason`.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), PhaseTransitionError> {
        self.advance(WorkflowPhase::Failed)?;
        self.failure = Some(reason);
        Ok(())
    }

    /// Actual minus predicted time, once both are known.
    pub fn prediction_error_s(&self) -> Option<f64> {
        Some(self.actual_time_s? - self.predicted_time_s?)
    }

    /// Time at which the workflow entered `phase`, if it did.
    pub fn entered_at(&self, phase: WorkflowPhase) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .find(|transition| transition.phase == phase)
            .map(|transition| transition.at)
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkflowPhase, WorkflowState};
    use crate::error::FailureReason;

    #[test]
    fn phases_follow_planning_executing_learning_completed() {
        assert!(WorkflowPhase::Planning.can_transition_to(WorkflowPhase::Executing));
        assert!(WorkflowPhase::Executing.can_transition_to(WorkflowPhase::Learning));
        assert!(WorkflowPhase::Learning.can_transition_to(WorkflowPhase::Completed));
        assert!(!WorkflowPhase::Planning.can_transition_to(WorkflowPhase::Learning));
        assert!(!WorkflowPhase::Executing.can_transition_to(WorkflowPhase::Completed));
    }

    #[test]
    fn failed_is_reachable_from_every_live_phase() {
        for phase in [
            WorkflowPhase::Planning,
            WorkflowPhase::Executing,
            WorkflowPhase::Learning,
        ] {
            assert!(phase.can_transition_to(WorkflowPhase::Failed));
        }
        assert!(!WorkflowPhase::Completed.can_transition_to(WorkflowPhase::Failed));
        assert!(!WorkflowPhase::Failed.can_transition_to(WorkflowPhase::Failed));
    }

    #[test]
    fn workflow_records_history_and_failure_reason() {
        let mut state = WorkflowState::new("order-1");
        state.advance(WorkflowPhase::Executing).expect("executing");
        state
            .fail(FailureReason::DispatchFailure {
                detail: "timeout".to_string(),
            })
            .expect("failed");

        let phases: Vec<_> = state.history.iter().map(|entry| entry.phase).collect();
        assert_eq!(
            phases,
            vec![
                WorkflowPhase::Planning,
                WorkflowPhase::Executing,
                WorkflowPhase::Failed
            ]
        );
        assert_eq!(state.failure.as_ref().map(FailureReason::code), Some("dispatch_failure"));
        assert!(state.entered_at(WorkflowPhase::Learning).is_none());
    }

    #[test]
    fn terminal_workflow_rejects_further_transitions() {
        let mut state = WorkflowState::new("order-2");
        state.fail(FailureReason::NoCandidate).expect("failed");
        let error = state
            .advance(WorkflowPhase::Executing)
            .expect_err("terminal state should reject");
        assert!(error.to_string().contains("failed -> executing"));
    }

    #[test]
    fn prediction_error_requires_both_times() {
        let mut state = WorkflowState::new("order-3");
        state.predicted_time_s = Some(10.0);
        assert!(state.prediction_error_s().is_none());
        state.actual_time_s = Some(14.0);
        assert_eq!(state.prediction_error_s(), Some(4.0));
    }
}
