//! Planning, multi-criteria selection and cost learning for AMR task dispatch.

mod learning;
mod mcdm;
mod planner;

pub use learning::{smooth_estimate, LearningConfig, LearningService};
pub use mcdm::{
    battery_score, suitability_score, time_score, CriteriaWeights, DecisionEngine,
    FleetCondition, ScoringConfig, WeightAdjustmentRule, WeightKey,
};
pub use planner::{
    check_hard_constraints, ConstraintConfig, ConstraintViolation, PlanGenerator, RoutingConfig,
};

use amr_types::ConfigError;

pub(crate) fn ensure_finite_range(
    field: &str,
    value: f64,
    min: f64,
    max: f64,
    expectation: &'static str,
) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::out_of_range(field, expectation, value));
    }
    Ok(())
}

pub(crate) fn ensure_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::out_of_range(field, "finite and > 0.0", value));
    }
    Ok(())
}
