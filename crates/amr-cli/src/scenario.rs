use std::collections::BTreeMap;
use std::path::Path;

use amr_types::{AmrState, ProductionTask, TaskId};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// How the simulated fleet answers a dispatched task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum SimulatedOutcome {
    /// Completes in `slowdown` times the predicted duration.
    Complete {
        #[serde(default = "default_slowdown")]
        slowdown: f64,
        #[serde(default)]
        final_battery: Option<f64>,
    },
    Fail {
        detail: String,
    },
    TimeOut,
}

fn default_slowdown() -> f64 {
    1.0
}

impl Default for SimulatedOutcome {
    fn default() -> Self {
        Self::Complete {
            slowdown: default_slowdown(),
            final_battery: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    pub(crate) fleet: Vec<AmrState>,
    pub(crate) tasks: Vec<ProductionTask>,
    /// Tasks without an entry complete exactly as predicted.
    #[serde(default)]
    pub(crate) outcomes: BTreeMap<TaskId, SimulatedOutcome>,
}

impl Scenario {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let scenario = serde_json::from_str::<Self>(&raw)
            .with_context(|| format!("failed to parse scenario {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        for (task_id, outcome) in &self.outcomes {
            if let SimulatedOutcome::Complete { slowdown, .. } = outcome {
                if !slowdown.is_finite() || *slowdown <= 0.0 {
                    bail!("outcome for task '{task_id}' has invalid slowdown {slowdown}");
                }
            }
        }
        Ok(())
    }
}
