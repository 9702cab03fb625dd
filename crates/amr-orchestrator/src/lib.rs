//! Admission-queue orchestration of task workflows with bounded concurrency.

mod config;

pub use config::FleetDispatchConfig;

use amr_runner::{DispatchCollaborator, WorkflowError, WorkflowLedger, WorkflowRunner};
use amr_store::{FleetRegistry, TrafficCostModel};
use amr_types::{ConfigError, ProductionTask, WorkflowPhase, WorkflowState};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

/// Aggregate outcome of the workflows a run processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub failures_by_reason: BTreeMap<String, usize>,
    /// Mean of |actual - predicted| over completed workflows.
    pub mean_abs_prediction_error_s: Option<f64>,
}

impl DispatchSummary {
    pub fn from_states(states: &[WorkflowState]) -> Self {
        let mut summary = Self {
            total_tasks: states.len(),
            ..Self::default()
        };
        let mut error_total = 0.0;
        let mut error_count = 0usize;
        for state in states {
            match state.phase {
                WorkflowPhase::Completed => {
                    summary.completed += 1;
                    if let Some(error) = state.prediction_error_s() {
                        error_total += error.abs();
                        error_count += 1;
                    }
                }
                WorkflowPhase::Failed => {
                    summary.failed += 1;
                    let code = state
                        .failure
                        .as_ref()
                        .map_or("unknown", |reason| reason.code());
                    *summary
                        .failures_by_reason
                        .entry(code.to_string())
                        .or_default() += 1;
                }
                _ => {}
            }
        }
        if error_count > 0 {
            summary.mean_abs_prediction_error_s = Some(error_total / error_count as f64);
        }
        summary
    }
}

/// Drains admitted tasks through a bounded pool of workflow workers.
pub struct FleetOrchestrator {
    registry: Arc<FleetRegistry>,
    cost_model: Arc<TrafficCostModel>,
    runner: Arc<WorkflowRunner>,
    worker_limit: usize,
}

impl FleetOrchestrator {
    /// Validates `config` and wires the runtime; fails before any task is processed.
    pub fn new(
        config: &FleetDispatchConfig,
        registry: Arc<FleetRegistry>,
        cost_model: Arc<TrafficCostModel>,
        dispatcher: Arc<dyn DispatchCollaborator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pipeline = config.build_pipeline(Arc::clone(&cost_model))?;
        let runner = WorkflowRunner::new(
            registry.clone(),
            pipeline,
            dispatcher,
            Arc::new(WorkflowLedger::new()),
            config.workflow_config(),
        )?;
        Ok(Self {
            registry,
            cost_model,
            runner: Arc::new(runner),
            worker_limit: config.worker_limit,
        })
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    pub fn cost_model(&self) -> &Arc<TrafficCostModel> {
        &self.cost_model
    }

    pub fn ledger(&self) -> &Arc<WorkflowLedger> {
        self.runner.ledger()
    }

    /// Admits `tasks` in order and runs them to completion.
    pub async fn run(&self, tasks: Vec<ProductionTask>) -> Result<DispatchSummary> {
        let (sender, receiver) = mpsc::channel(tasks.len().max(1));
        for task in tasks {
            sender.send(task).await?;
        }
        drop(sender);
        self.run_admission(receiver).await
    }

    /// Consumes the admission channel until it closes.
    ///
    /// Workers pull tasks in FIFO order, but completion order across tasks is
    /// not guaranteed.
    pub async fn run_admission(
        &self,
        admission: mpsc::Receiver<ProductionTask>,
    ) -> Result<DispatchSummary> {
        let admission = Arc::new(Mutex::new(admission));
        let mut workers = JoinSet::new();
        for index in 0..self.worker_limit {
            let worker_id = format!("dispatch-worker-{}", index + 1);
            let runner = Arc::clone(&self.runner);
            let admission = Arc::clone(&admission);
            workers.spawn(async move { run_worker(worker_id, runner, admission).await });
        }

        let mut processed = Vec::new();
        while let Some(joined) = workers.join_next().await {
            processed.extend(joined??);
        }

        let states: Vec<WorkflowState> = processed
            .iter()
            .filter_map(|task_id: &String| self.ledger().get(task_id))
            .collect();
        let summary = DispatchSummary::from_states(&states);
        tracing::info!(
            total = summary.total_tasks,
            completed = summary.completed,
            failed = summary.failed,
            "admission drained"
        );
        Ok(summary)
    }
}

async fn run_worker(
    worker_id: String,
    runner: Arc<WorkflowRunner>,
    admission: Arc<Mutex<mpsc::Receiver<ProductionTask>>>,
) -> Result<Vec<String>> {
    let mut processed = Vec::new();
    loop {
        let next = admission.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        let task_id = task.task_id.clone();
        match runner.run(task).await {
            Ok(state) => {
                tracing::debug!(%worker_id, %task_id, phase = state.phase.as_str(), "workflow finished");
                processed.push(task_id);
            }
            Err(WorkflowError::DuplicateTask(task_id)) => {
                tracing::warn!(%worker_id, %task_id, "duplicate task skipped");
            }
            Err(error) => return Err(error.into()),
        }
    }
    Ok(processed)
}
