use amr_types::{TaskId, WorkflowPhase, WorkflowState};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Latest recorded state of every workflow, for diagnostics and summaries.
#[derive(Debug, Default)]
pub struct WorkflowLedger {
    states: RwLock<HashMap<TaskId, WorkflowState>>,
}

impl WorkflowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new workflow; returns false when the task id is already tracked.
    pub fn begin(&self, state: &WorkflowState) -> bool {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        if states.contains_key(&state.task_id) {
            return false;
        }
        states.insert(state.task_id.clone(), state.clone());
        true
    }

    pub fn record(&self, state: &WorkflowState) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.task_id.clone(), state.clone());
    }

    pub fn get(&self, task_id: &str) -> Option<WorkflowState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }

    /// All workflows ordered by task id.
    pub fn all(&self) -> Vec<WorkflowState> {
        let mut states: Vec<WorkflowState> = self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        states.sort_by(|left, right| left.task_id.cmp(&right.task_id));
        states
    }

    pub fn in_phase(&self, phase: WorkflowPhase) -> Vec<WorkflowState> {
        self.all()
            .into_iter()
            .filter(|state| state.phase == phase)
            .collect()
    }
}
