//! Per-task workflow runtime: planning, exclusive commit, dispatch and learning.

mod dispatch;
mod ledger;

pub use dispatch::{DispatchCollaborator, DispatchCompletion};
pub use ledger::WorkflowLedger;

use amr_algorithm::{DecisionEngine, LearningService, PlanGenerator};
use amr_store::{FleetStore, RegistryError, ReleaseTelemetry};
use amr_types::{
    AmrState, AssignmentPlan, ConfigError, FailureReason, FleetAggregate, PhaseTransitionError,
    ProductionTask, TaskId, WorkflowPhase, WorkflowState,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Invariant violations that abort a workflow outside the task-scoped failure reasons.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("task '{0}' was already admitted")]
    DuplicateTask(TaskId),
    #[error(transparent)]
    Transition(#[from] PhaseTransitionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Runtime settings for task workflows.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Re-plans allowed after losing an agent claim before failing with `AssignmentRace`.
    pub assignment_retry_limit: u32,
    /// Upper bound on awaiting a completion; expiry counts as a dispatch failure.
    pub dispatch_timeout: Option<Duration>,
    /// How long planning may wait for an agent release when no candidate exists.
    pub release_wait: Option<Duration>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            assignment_retry_limit: 3,
            dispatch_timeout: None,
            release_wait: None,
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(ConfigError::out_of_range(
                "dispatch_timeout_ms",
                "greater than 0 when set",
                0,
            ));
        }
        if self.release_wait.is_some_and(|limit| limit.is_zero()) {
            return Err(ConfigError::out_of_range(
                "release_wait_ms",
                "greater than 0 when set",
                0,
            ));
        }
        Ok(())
    }
}

/// Plan generation, selection and learning bundled for one runner.
#[derive(Debug, Clone)]
pub struct DispatchPipeline {
    pub planner: PlanGenerator,
    pub engine: DecisionEngine,
    pub learning: LearningService,
}

impl DispatchPipeline {
    /// Generates candidates against `fleet` and returns the best one.
    pub fn plan(&self, task: &ProductionTask, fleet: &[AmrState]) -> Option<AssignmentPlan> {
        let aggregate = FleetAggregate::from_agents(fleet);
        let candidates = self.planner.generate_plans(task, fleet);
        self.engine.select_best_plan(candidates, &aggregate)
    }
}

struct CompletionReport {
    actual_time_s: f64,
    final_battery: Option<f64>,
}

/// Drives one task through `Planning -> Executing -> Learning -> Completed`.
pub struct WorkflowRunner {
    registry: Arc<dyn FleetStore>,
    pipeline: DispatchPipeline,
    dispatcher: Arc<dyn DispatchCollaborator>,
    ledger: Arc<WorkflowLedger>,
    config: WorkflowConfig,
}

impl WorkflowRunner {
    pub fn new(
        registry: Arc<dyn FleetStore>,
        pipeline: DispatchPipeline,
        dispatcher: Arc<dyn DispatchCollaborator>,
        ledger: Arc<WorkflowLedger>,
        config: WorkflowConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry,
            pipeline,
            dispatcher,
            ledger,
            config,
        })
    }

    pub fn ledger(&self) -> &Arc<WorkflowLedger> {
        &self.ledger
    }

    /// Runs the task to a terminal phase and returns its final record.
    ///
    /// Task-scoped failures end in `Failed` with a reason; `Err` is reserved for
    /// duplicate admission and broken registry or phase invariants.
    pub async fn run(&self, task: ProductionTask) -> Result<WorkflowState, WorkflowError> {
        let mut state = WorkflowState::new(task.task_id.clone());
        if !self.ledger.begin(&state) {
            return Err(WorkflowError::DuplicateTask(task.task_id));
        }
        tracing::info!(task_id = %task.task_id, capability = task.capability.as_str(), "workflow admitted");

        let plan = match self.plan_and_commit(&task, &mut state).await {
            Ok(plan) => plan,
            Err(reason) => {
                self.fail(&mut state, reason)?;
                return Ok(state);
            }
        };

        state.agent_id = Some(plan.agent_id.clone());
        state.predicted_time_s = Some(plan.predicted_time_s);
        if let Err(error) = self.transition(&mut state, WorkflowPhase::Executing) {
            self.release_agent(&plan.agent_id, None)?;
            return Err(error.into());
        }

        match self.await_completion(&plan).await {
            Ok(report) => self.learn_and_release(&task, &plan, &mut state, report)?,
            Err(detail) => {
                // Record `Failed` before the agent becomes claimable again so the
                // ledger never shows this task executing on a released agent.
                let failed = self.fail(&mut state, FailureReason::DispatchFailure { detail });
                self.release_agent(&plan.agent_id, None)?;
                failed?;
            }
        }
        Ok(state)
    }

    async fn plan_and_commit(
        &self,
        task: &ProductionTask,
        state: &mut WorkflowState,
    ) -> Result<AssignmentPlan, FailureReason> {
        let wait_deadline = self
            .config
            .release_wait
            .map(|wait| tokio::time::Instant::now() + wait);
        let mut lost_claims = 0u32;

        loop {
            // Arm the release signal before reading the fleet so a release that
            // lands between snapshot and wait still wakes this workflow.
            let released = self.registry.release_signal().notified();
            tokio::pin!(released);
            released.as_mut().enable();

            state.planning_attempts += 1;
            self.ledger.record(state);
            let fleet = self.registry.snapshot();
            let Some(plan) = self.pipeline.plan(task, &fleet) else {
                if let Some(deadline) = wait_deadline {
                    if tokio::time::timeout_at(deadline, released.as_mut()).await.is_ok() {
                        tracing::debug!(task_id = %task.task_id, "agent released, re-planning");
                        continue;
                    }
                }
                return Err(FailureReason::NoCandidate);
            };

            match self.registry.try_claim(&plan.agent_id) {
                Ok(true) => {
                    tracing::info!(
                        task_id = %task.task_id,
                        agent_id = %plan.agent_id,
                        predicted_s = plan.predicted_time_s,
                        score = plan.composite_score().unwrap_or_default(),
                        "agent committed"
                    );
                    return Ok(plan);
                }
                Ok(false) => {
                    lost_claims += 1;
                    tracing::warn!(
                        task_id = %task.task_id,
                        agent_id = %plan.agent_id,
                        lost_claims,
                        "agent claimed by another workflow"
                    );
                }
                Err(error) => {
                    lost_claims += 1;
                    tracing::warn!(task_id = %task.task_id, %error, "agent claim rejected");
                }
            }
            if lost_claims > self.config.assignment_retry_limit {
                return Err(FailureReason::AssignmentRace {
                    attempts: state.planning_attempts,
                });
            }
        }
    }

    async fn await_completion(&self, plan: &AssignmentPlan) -> Result<CompletionReport, String> {
        let dispatch = self.dispatcher.dispatch(plan);
        let outcome = match self.config.dispatch_timeout {
            Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(format!(
                        "no completion within {} ms",
                        limit.as_millis()
                    ))
                }
            },
            None => dispatch.await,
        };

        match outcome {
            Ok(DispatchCompletion::Completed {
                actual_time_s,
                final_battery,
            }) => {
                if !actual_time_s.is_finite() || actual_time_s < 0.0 {
                    return Err(format!("invalid completion report: actual time {actual_time_s}"));
                }
                if final_battery.is_some_and(|battery| !(0.0..=1.0).contains(&battery)) {
                    return Err(format!(
                        "invalid completion report: final battery {final_battery:?}"
                    ));
                }
                Ok(CompletionReport {
                    actual_time_s,
                    final_battery,
                })
            }
            Ok(DispatchCompletion::Failed { detail }) => Err(detail),
            Ok(DispatchCompletion::TimedOut) => Err("collaborator reported timeout".to_string()),
            Err(error) => Err(format!("{error:#}")),
        }
    }

    fn learn_and_release(
        &self,
        task: &ProductionTask,
        plan: &AssignmentPlan,
        state: &mut WorkflowState,
        report: CompletionReport,
    ) -> Result<(), WorkflowError> {
        let telemetry = ReleaseTelemetry {
            position: task.destination,
            battery: report
                .final_battery
                .unwrap_or_else(|| battery_after(plan)),
        };
        state.actual_time_s = Some(report.actual_time_s);
        if let Err(error) = self.transition(state, WorkflowPhase::Learning) {
            self.release_agent(&plan.agent_id, Some(telemetry))?;
            return Err(error.into());
        }

        // The observation is finite and >= 0 (checked in `await_completion`), so a
        // rejection means the prior was unbounded, e.g. a geometric prediction over
        // an infinite distance. The agent still finished, so the workflow completes
        // and the route simply stays unlearned.
        if let Err(error) = self
            .pipeline
            .learning
            .update_world_model(plan, report.actual_time_s)
        {
            tracing::error!(task_id = %task.task_id, %error, "cost model update rejected");
        }
        self.release_agent(&plan.agent_id, Some(telemetry))?;
        self.transition(state, WorkflowPhase::Completed)?;
        Ok(())
    }

    /// Hands the agent back. Rejected telemetry is logged: the registry has
    /// already restored availability and kept the last known state.
    fn release_agent(
        &self,
        agent_id: &str,
        telemetry: Option<ReleaseTelemetry>,
    ) -> Result<(), RegistryError> {
        match self.registry.release(agent_id, telemetry) {
            Err(RegistryError::InvalidAgent { reason, .. }) => {
                tracing::warn!(agent_id, %reason, "release telemetry discarded");
                Ok(())
            }
            other => other,
        }
    }

    fn transition(
        &self,
        state: &mut WorkflowState,
        next: WorkflowPhase,
    ) -> Result<(), PhaseTransitionError> {
        state.advance(next)?;
        self.ledger.record(state);
        tracing::info!(task_id = %state.task_id, phase = next.as_str(), "workflow phase changed");
        Ok(())
    }

    fn fail(&self, state: &mut WorkflowState, reason: FailureReason) -> Result<(), PhaseTransitionError> {
        tracing::warn!(
            task_id = %state.task_id,
            reason = reason.code(),
            detail = %reason,
            "workflow failed"
        );
        state.fail(reason)?;
        self.ledger.record(state);
        Ok(())
    }
}

/// Battery expected after executing `plan`; keeps the pre-dispatch level when
/// the energy estimate is undefined.
fn battery_after(plan: &AssignmentPlan) -> f64 {
    let drained = plan.features.battery - plan.predicted_energy;
    if drained.is_nan() {
        plan.features.battery
    } else {
        drained.clamp(0.0, 1.0)
    }
}
