use amr_algorithm::{
    ConstraintConfig, DecisionEngine, LearningConfig, LearningService, PlanGenerator,
    RoutingConfig, ScoringConfig,
};
use amr_runner::{DispatchPipeline, WorkflowConfig};
use amr_store::TrafficCostModel;
use amr_types::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Complete configuration surface of the dispatch engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetDispatchConfig {
    /// Maximum number of workflows processed concurrently.
    pub worker_limit: usize,
    pub assignment_retry_limit: u32,
    pub dispatch_timeout_ms: Option<u64>,
    pub release_wait_ms: Option<u64>,
    pub constraints: ConstraintConfig,
    pub routing: RoutingConfig,
    pub scoring: ScoringConfig,
    pub learning: LearningConfig,
}

impl Default for FleetDispatchConfig {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            assignment_retry_limit: 3,
            dispatch_timeout_ms: None,
            release_wait_ms: None,
            constraints: ConstraintConfig::default(),
            routing: RoutingConfig::default(),
            scoring: ScoringConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl FleetDispatchConfig {
    /// Reads a config file; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dispatch config {}", path.display()))?;
        Ok(Self::from_json_str(&raw, &path.display().to_string())?)
    }

    /// Parses and validates a JSON config.
    pub fn from_json_str(raw: &str, source_label: &str) -> Result<Self, ConfigError> {
        let config =
            serde_json::from_str::<Self>(raw).map_err(|error| ConfigError::Parse {
                source_label: source_label.to_string(),
                message: error.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_limit == 0 {
            return Err(ConfigError::out_of_range("worker_limit", "at least 1", 0));
        }
        self.constraints.validate()?;
        self.routing.validate()?;
        self.scoring.validate()?;
        self.learning.validate()?;
        self.workflow_config().validate()
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            assignment_retry_limit: self.assignment_retry_limit,
            dispatch_timeout: self.dispatch_timeout_ms.map(Duration::from_millis),
            release_wait: self.release_wait_ms.map(Duration::from_millis),
        }
    }

    /// Builds the validated planning, scoring and learning stages over `cost_model`.
    pub fn build_pipeline(
        &self,
        cost_model: Arc<TrafficCostModel>,
    ) -> Result<DispatchPipeline, ConfigError> {
        Ok(DispatchPipeline {
            planner: PlanGenerator::new(self.constraints, self.routing, Arc::clone(&cost_model))?,
            engine: DecisionEngine::new(self.scoring.clone())?,
            learning: LearningService::new(self.learning, cost_model)?,
        })
    }
}
