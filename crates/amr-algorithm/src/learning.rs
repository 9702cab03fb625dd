//! Reconciles predicted and realized execution times into the traffic cost model.

use amr_store::{CostEntry, CostModelError, TrafficCostModel};
use amr_types::{AssignmentPlan, ConfigError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ensure_finite_range;

/// Exponential smoothing settings for cost model updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LearningConfig {
    /// Weight of the newest observation, within `(0, 1]`.
    pub smoothing_alpha: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.3,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.smoothing_alpha.is_finite()
            || self.smoothing_alpha <= 0.0
            || self.smoothing_alpha > 1.0
        {
            return Err(ConfigError::out_of_range(
                "learning.smoothing_alpha",
                "finite and within (0.0, 1.0]",
                self.smoothing_alpha,
            ));
        }
        Ok(())
    }
}

/// `alpha * actual + (1 - alpha) * old`, clamped to the interval spanned by `old` and `actual`.
pub fn smooth_estimate(old: f64, actual: f64, alpha: f64) -> f64 {
    let blended = alpha * actual + (1.0 - alpha) * old;
    // Rounding can land a hair outside the interval.
    blended.clamp(old.min(actual), old.max(actual))
}

/// Feeds realized completion times back into the shared cost model.
#[derive(Debug, Clone)]
pub struct LearningService {
    config: LearningConfig,
    cost_model: Arc<TrafficCostModel>,
}

impl LearningService {
    pub fn new(config: LearningConfig, cost_model: Arc<TrafficCostModel>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, cost_model })
    }

    pub fn cost_model(&self) -> &Arc<TrafficCostModel> {
        &self.cost_model
    }

    /// Smooths `actual_time_s` into the plan's route entry and returns the new entry.
    ///
    /// The prior is the current learned estimate for the route, or the plan's
    /// own prediction when the route has never been learned.
    #[tracing::instrument(
        level = "debug",
        skip(self, plan),
        fields(task_id = %plan.task_id, route_key = %plan.route_key)
    )]
    pub fn update_world_model(
        &self,
        plan: &AssignmentPlan,
        actual_time_s: f64,
    ) -> Result<CostEntry, CostModelError> {
        if !actual_time_s.is_finite() || actual_time_s < 0.0 {
            return Err(CostModelError::InvalidObservation {
                route_key: plan.route_key.to_string(),
                value: actual_time_s,
            });
        }
        let alpha = self.config.smoothing_alpha;
        let entry = self.cost_model.update_with(plan.route_key, |previous| {
            let (old, observations) = match previous {
                Some(entry) => (entry.estimate_s, entry.observations),
                None => (plan.predicted_time_s, 0),
            };
            Ok(CostEntry {
                estimate_s: smooth_estimate(old, actual_time_s, alpha),
                observations: observations + 1,
                last_observed_s: Some(actual_time_s),
                updated_at: Utc::now(),
            })
        })?;
        tracing::debug!(
            predicted_s = plan.predicted_time_s,
            actual_s = actual_time_s,
            estimate_s = entry.estimate_s,
            "cost model updated"
        );
        Ok(entry)
    }
}
