//! Candidate plan generation under hard constraints.

use amr_store::TrafficCostModel;
use amr_types::{
    AmrState, AssignmentPlan, ConfigError, PlanFeatures, PredictionSource, ProductionTask,
    RouteKey,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::{ensure_finite_range, ensure_positive};

/// Hard-constraint thresholds applied before any scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConstraintConfig {
    /// Agents at or below this charge level are never planned.
    pub battery_reserve: f64,
    /// Extra lift height an agent must have beyond the task's requirement.
    pub lift_height_margin_m: f64,
    /// Extra reach an agent must have beyond the task's requirement.
    pub reach_margin_m: f64,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            battery_reserve: 0.15,
            lift_height_margin_m: 0.0,
            reach_margin_m: 0.0,
        }
    }
}

impl ConstraintConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_finite_range(
            "constraints.battery_reserve",
            self.battery_reserve,
            0.0,
            1.0,
            "finite and within [0.0, 1.0]",
        )?;
        ensure_finite_range(
            "constraints.lift_height_margin_m",
            self.lift_height_margin_m,
            0.0,
            f64::MAX,
            "finite and >= 0.0",
        )?;
        ensure_finite_range(
            "constraints.reach_margin_m",
            self.reach_margin_m,
            0.0,
            f64::MAX,
            "finite and >= 0.0",
        )
    }
}

/// Geometry used for route keys and the fallback time/energy estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    pub fallback_speed_mps: f64,
    /// Fixed pickup plus dropoff handling time added to geometric estimates.
    pub handling_overhead_s: f64,
    pub cell_size_m: f64,
    /// Battery fraction spent per metre driven empty.
    pub energy_per_meter: f64,
    /// Additional energy per metre at full payload, as a fraction of the empty cost.
    pub loaded_energy_factor: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback_speed_mps: 1.2,
            handling_overhead_s: 5.0,
            cell_size_m: 5.0,
            energy_per_meter: 0.0005,
            loaded_energy_factor: 0.5,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("routing.fallback_speed_mps", self.fallback_speed_mps)?;
        ensure_positive("routing.cell_size_m", self.cell_size_m)?;
        for (field, value) in [
            ("routing.handling_overhead_s", self.handling_overhead_s),
            ("routing.energy_per_meter", self.energy_per_meter),
            ("routing.loaded_energy_factor", self.loaded_energy_factor),
        ] {
            ensure_finite_range(field, value, 0.0, f64::MAX, "finite and >= 0.0")?;
        }
        Ok(())
    }

    pub fn route_key(&self, agent: &AmrState, task: &ProductionTask) -> RouteKey {
        RouteKey {
            start: agent.position.cell(self.cell_size_m),
            pickup: task.origin.cell(self.cell_size_m),
            dropoff: task.destination.cell(self.cell_size_m),
        }
    }
}

/// First hard constraint an agent failed for a task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintViolation {
    #[error("agent lacks capability '{0}'")]
    CapabilityMismatch(&'static str),
    #[error("agent is not tagged for mission '{0}'")]
    MissionMismatch(String),
    #[error("agent is not available")]
    Unavailable,
    #[error("payload {payload_kg} kg exceeds agent maximum {max_payload_kg} kg")]
    PayloadExceeded { payload_kg: f64, max_payload_kg: f64 },
    #[error("lift height {required_m} m (+margin) exceeds agent lift height {available_m:?} m")]
    LiftHeightInsufficient {
        required_m: f64,
        available_m: Option<f64>,
    },
    #[error("reach {required_m} m (+margin) exceeds agent reach {available_m:?} m")]
    ReachInsufficient {
        required_m: f64,
        available_m: Option<f64>,
    },
    #[error("battery {battery} is not above reserve {reserve}")]
    BatteryBelowReserve { battery: f64, reserve: f64 },
}

/// Checks every hard-pruning rule for one pairing, reporting the first failure.
pub fn check_hard_constraints(
    task: &ProductionTask,
    agent: &AmrState,
    constraints: &ConstraintConfig,
) -> Result<(), ConstraintViolation> {
    if !agent.supports(task.capability) {
        return Err(ConstraintViolation::CapabilityMismatch(
            task.capability.as_str(),
        ));
    }
    if let Some(mission) = &task.mission {
        if !agent.mission_tags.contains(mission) {
            return Err(ConstraintViolation::MissionMismatch(mission.clone()));
        }
    }
    if !agent.available {
        return Err(ConstraintViolation::Unavailable);
    }
    // Negated comparisons also reject NaN payloads.
    if !(task.payload_kg >= 0.0 && task.payload_kg <= agent.max_payload_kg) {
        return Err(ConstraintViolation::PayloadExceeded {
            payload_kg: task.payload_kg,
            max_payload_kg: agent.max_payload_kg,
        });
    }
    if let Some(required_m) = task.required_lift_height_m {
        if !fits_with_margin(required_m, constraints.lift_height_margin_m, agent.lift_height_m) {
            return Err(ConstraintViolation::LiftHeightInsufficient {
                required_m,
                available_m: agent.lift_height_m,
            });
        }
    }
    if let Some(required_m) = task.required_reach_m {
        if !fits_with_margin(required_m, constraints.reach_margin_m, agent.reach_m) {
            return Err(ConstraintViolation::ReachInsufficient {
                required_m,
                available_m: agent.reach_m,
            });
        }
    }
    if !(agent.battery > constraints.battery_reserve) {
        return Err(ConstraintViolation::BatteryBelowReserve {
            battery: agent.battery,
            reserve: constraints.battery_reserve,
        });
    }
    Ok(())
}

fn fits_with_margin(required: f64, margin: f64, available: Option<f64>) -> bool {
    matches!(available, Some(available) if required + margin <= available)
}

fn utilization(required: Option<f64>, available: Option<f64>) -> f64 {
    match (required, available) {
        (Some(required), Some(available)) if available > 0.0 => required / available,
        _ => 0.0,
    }
}

/// Enumerates feasible (task, agent) pairings with predicted cost features.
///
/// Generation reads the fleet snapshot and the cost model only; it never
/// mutates either.
#[derive(Debug, Clone)]
pub struct PlanGenerator {
    constraints: ConstraintConfig,
    routing: RoutingConfig,
    cost_model: Arc<TrafficCostModel>,
}

impl PlanGenerator {
    pub fn new(
        constraints: ConstraintConfig,
        routing: RoutingConfig,
        cost_model: Arc<TrafficCostModel>,
    ) -> Result<Self, ConfigError> {
        constraints.validate()?;
        routing.validate()?;
        Ok(Self {
            constraints,
            routing,
            cost_model,
        })
    }

    pub fn constraints(&self) -> &ConstraintConfig {
        &self.constraints
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    /// Returns one plan per agent that passes every hard constraint; empty is not an error.
    #[tracing::instrument(level = "debug", skip(self, task, fleet), fields(task_id = %task.task_id))]
    pub fn generate_plans(&self, task: &ProductionTask, fleet: &[AmrState]) -> Vec<AssignmentPlan> {
        let mut plans = Vec::new();
        for agent in fleet {
            match check_hard_constraints(task, agent, &self.constraints) {
                Ok(()) => plans.push(self.build_plan(task, agent)),
                Err(violation) => {
                    tracing::debug!(agent_id = %agent.agent_id, %violation, "agent pruned");
                }
            }
        }
        tracing::debug!(candidates = plans.len(), "plan generation finished");
        plans
    }

    fn build_plan(&self, task: &ProductionTask, agent: &AmrState) -> AssignmentPlan {
        let approach_distance_m = agent.position.distance_to(&task.origin);
        let haul_distance_m = task.haul_distance_m();
        let route_key = self.routing.route_key(agent, task);
        let (predicted_time_s, prediction_source) = match self.cost_model.estimate(&route_key) {
            Some(estimate) => (estimate, PredictionSource::Learned),
            None => (
                (approach_distance_m + haul_distance_m) / self.routing.fallback_speed_mps
                    + self.routing.handling_overhead_s,
                PredictionSource::Geometric,
            ),
        };
        let payload_utilization = task.payload_kg / agent.max_payload_kg;
        let capability_utilization = utilization(task.required_lift_height_m, agent.lift_height_m)
            .max(utilization(task.required_reach_m, agent.reach_m));
        let predicted_energy = self.routing.energy_per_meter
            * (approach_distance_m
                + haul_distance_m * (1.0 + self.routing.loaded_energy_factor * payload_utilization));

        AssignmentPlan {
            task_id: task.task_id.clone(),
            agent_id: agent.agent_id.clone(),
            route_key,
            predicted_time_s,
            prediction_source,
            predicted_energy,
            features: PlanFeatures {
                approach_distance_m,
                haul_distance_m,
                payload_utilization,
                capability_utilization,
                battery: agent.battery,
            },
            score: None,
            generated_at: Utc::now(),
        }
    }
}
