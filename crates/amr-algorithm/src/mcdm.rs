//! Multi-criteria scoring and selection of candidate plans.

use amr_types::{AssignmentPlan, ConfigError, FleetAggregate, PlanFeatures, PlanScore};
use serde::{Deserialize, Serialize};

use crate::{ensure_finite_range, ensure_positive};

/// Scoring criterion a weight applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightKey {
    Time,
    Suitability,
    Battery,
}

/// Relative importance of each criterion. Normalized to sum to 1 before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CriteriaWeights {
    pub time: f64,
    pub suitability: f64,
    pub battery: f64,
}

impl Default for CriteriaWeights {
    fn default() -> Self {
        Self {
            time: 0.5,
            suitability: 0.3,
            battery: 0.2,
        }
    }
}

impl CriteriaWeights {
    pub fn get(&self, key: WeightKey) -> f64 {
        match key {
            WeightKey::Time => self.time,
            WeightKey::Suitability => self.suitability,
            WeightKey::Battery => self.battery,
        }
    }

    fn scale(&mut self, key: WeightKey, factor: f64) {
        match key {
            WeightKey::Time => self.time *= factor,
            WeightKey::Suitability => self.suitability *= factor,
            WeightKey::Battery => self.battery *= factor,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("scoring.weights.time", self.time),
            ("scoring.weights.suitability", self.suitability),
            ("scoring.weights.battery", self.battery),
        ] {
            ensure_finite_range(field, value, 0.0, f64::MAX, "finite and >= 0.0")?;
        }
        if self.total() <= 0.0 {
            return Err(ConfigError::DegenerateWeights);
        }
        Ok(())
    }

    /// Returns the weights rescaled to sum to 1.
    pub fn normalized(&self) -> Result<Self, ConfigError> {
        self.validate()?;
        let total = self.total();
        Ok(Self {
            time: self.time / total,
            suitability: self.suitability / total,
            battery: self.battery / total,
        })
    }

    fn total(&self) -> f64 {
        self.time + self.suitability + self.battery
    }
}

/// Fleet-wide condition that triggers a weight adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum FleetCondition {
    MeanBatteryBelow { threshold: f64 },
    AvailableRatioBelow { threshold: f64 },
}

impl FleetCondition {
    pub fn holds(&self, fleet: &FleetAggregate) -> bool {
        if fleet.agent_count == 0 {
            return false;
        }
        match *self {
            Self::MeanBatteryBelow { threshold } => fleet.mean_battery < threshold,
            Self::AvailableRatioBelow { threshold } => fleet.available_ratio < threshold,
        }
    }

    fn threshold(&self) -> f64 {
        match *self {
            Self::MeanBatteryBelow { threshold } | Self::AvailableRatioBelow { threshold } => {
                threshold
            }
        }
    }
}

/// Multiplies one weight by `factor` while `when` holds for the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightAdjustmentRule {
    pub when: FleetCondition,
    pub boost: WeightKey,
    pub factor: f64,
}

/// Scoring curve constants and the weighting policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    /// Decay constant `k` of the time score `exp(-k * t)`, per second.
    pub time_decay_per_s: f64,
    /// Battery level below which the battery score drops steeply.
    pub low_battery_band: f64,
    pub weights: CriteriaWeights,
    /// Applied in order; every rule whose condition holds contributes.
    pub adjustments: Vec<WeightAdjustmentRule>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            time_decay_per_s: 0.02,
            low_battery_band: 0.25,
            weights: CriteriaWeights::default(),
            adjustments: vec![
                WeightAdjustmentRule {
                    when: FleetCondition::MeanBatteryBelow { threshold: 0.35 },
                    boost: WeightKey::Battery,
                    factor: 2.0,
                },
                WeightAdjustmentRule {
                    when: FleetCondition::AvailableRatioBelow { threshold: 0.25 },
                    boost: WeightKey::Time,
                    factor: 1.5,
                },
            ],
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("scoring.time_decay_per_s", self.time_decay_per_s)?;
        ensure_finite_range(
            "scoring.low_battery_band",
            self.low_battery_band,
            f64::MIN_POSITIVE,
            1.0,
            "finite and within (0.0, 1.0]",
        )?;
        self.weights.validate()?;
        for (index, rule) in self.adjustments.iter().enumerate() {
            ensure_positive(&format!("scoring.adjustments[{index}].factor"), rule.factor)?;
            ensure_finite_range(
                &format!("scoring.adjustments[{index}].threshold"),
                rule.when.threshold(),
                0.0,
                1.0,
                "finite and within [0.0, 1.0]",
            )?;
        }
        Ok(())
    }
}

/// Exponential decay of predicted time; near-optimal plans separate more sharply.
pub fn time_score(predicted_time_s: f64, decay_per_s: f64) -> f64 {
    finite_or_zero((-decay_per_s * predicted_time_s.max(0.0)).exp())
}

/// `1 - u²` for the most utilized capability dimension.
///
/// Quadratic so that an agent near its payload or lift limit scores well below
/// one with headroom, even though both are feasible.
pub fn suitability_score(features: &PlanFeatures) -> f64 {
    let utilization = features
        .payload_utilization
        .max(features.capability_utilization)
        .clamp(0.0, 1.0);
    finite_or_zero(1.0 - utilization * utilization)
}

/// Linear in charge above `low_band`, cubic below it.
pub fn battery_score(battery: f64, low_band: f64) -> f64 {
    let battery = battery.clamp(0.0, 1.0);
    let score = if battery >= low_band {
        battery
    } else {
        let ratio = battery / low_band;
        battery * ratio * ratio
    };
    finite_or_zero(score)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Scores, ranks and selects candidate plans.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: ScoringConfig,
}

impl DecisionEngine {
    /// Validates the scoring configuration and normalizes its base weights.
    pub fn new(mut config: ScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        config.weights = config.weights.normalized()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Base weights adjusted for the current fleet state, renormalized.
    pub fn effective_weights(&self, fleet: &FleetAggregate) -> CriteriaWeights {
        let mut weights = self.config.weights;
        for rule in &self.config.adjustments {
            if rule.when.holds(fleet) {
                weights.scale(rule.boost, rule.factor);
            }
        }
        // Positive factors on validated base weights keep the total positive.
        weights.normalized().unwrap_or(self.config.weights)
    }

    pub fn score(&self, plan: &AssignmentPlan, weights: &CriteriaWeights) -> PlanScore {
        let time = time_score(plan.predicted_time_s, self.config.time_decay_per_s);
        let suitability = suitability_score(&plan.features);
        let battery = battery_score(plan.features.battery, self.config.low_battery_band);
        PlanScore {
            time,
            suitability,
            battery,
            composite: weights.time * time
                + weights.suitability * suitability
                + weights.battery * battery,
        }
    }

    /// Scores every candidate and orders them best first.
    ///
    /// Equal composite scores order by agent id ascending.
    #[tracing::instrument(level = "debug", skip(self, candidates), fields(candidates = candidates.len()))]
    pub fn rank(
        &self,
        candidates: Vec<AssignmentPlan>,
        fleet: &FleetAggregate,
    ) -> Vec<AssignmentPlan> {
        let weights = self.effective_weights(fleet);
        let mut ranked: Vec<AssignmentPlan> = candidates
            .into_iter()
            .map(|mut plan| {
                plan.score = Some(self.score(&plan, &weights));
                plan
            })
            .collect();
        ranked.sort_by(|left, right| {
            let left_score = left.composite_score().unwrap_or(0.0);
            let right_score = right.composite_score().unwrap_or(0.0);
            right_score
                .total_cmp(&left_score)
                .then_with(|| left.agent_id.cmp(&right.agent_id))
        });
        ranked
    }

    /// Returns the highest-scoring candidate, or `None` for an empty set.
    pub fn select_best_plan(
        &self,
        candidates: Vec<AssignmentPlan>,
        fleet: &FleetAggregate,
    ) -> Option<AssignmentPlan> {
        let best = self.rank(candidates, fleet).into_iter().next()?;
        tracing::debug!(
            task_id = %best.task_id,
            agent_id = %best.agent_id,
            score = best.composite_score().unwrap_or_default(),
            "plan selected"
        );
        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        battery_score, suitability_score, time_score, CriteriaWeights, DecisionEngine,
        FleetCondition, ScoringConfig, WeightAdjustmentRule, WeightKey,
    };
    use amr_types::{
        AssignmentPlan, ConfigError, FleetAggregate, GridCell, PlanFeatures, PredictionSource,
        RouteKey,
    };
    use chrono::Utc;
    use proptest::prelude::*;

    fn plan(agent_id: &str, predicted_time_s: f64, payload_utilization: f64, battery: f64) -> AssignmentPlan {
        let cell = GridCell { x: 0, y: 0 };
        AssignmentPlan {
            task_id: "order-1".to_string(),
            agent_id: agent_id.to_string(),
            route_key: RouteKey {
                start: cell,
                pickup: cell,
                dropoff: cell,
            },
            predicted_time_s,
            prediction_source: PredictionSource::Geometric,
            predicted_energy: 0.01,
            features: PlanFeatures {
                approach_distance_m: 0.0,
                haul_distance_m: 0.0,
                payload_utilization,
                capability_utilization: 0.0,
                battery,
            },
            score: None,
            generated_at: Utc::now(),
        }
    }

    fn healthy_fleet() -> FleetAggregate {
        FleetAggregate {
            agent_count: 4,
            available_count: 4,
            mean_battery: 0.9,
            available_ratio: 1.0,
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(ScoringConfig::default()).expect("engine")
    }

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        let delta = (actual - expected).abs();
        assert!(
            delta <= tolerance,
            "delta {delta} exceeds tolerance {tolerance}; actual={actual}, expected={expected}"
        );
    }

    #[test]
    fn time_score_decays_faster_near_optimum() {
        let near = time_score(10.0, 0.02) - time_score(20.0, 0.02);
        let far = time_score(200.0, 0.02) - time_score(210.0, 0.02);
        assert!(near > far * 10.0);
        assert_close(time_score(0.0, 0.02), 1.0, 1e-12);
    }

    #[test]
    fn suitability_penalizes_marginal_capacity_quadratically() {
        let features = |utilization: f64| PlanFeatures {
            approach_distance_m: 0.0,
            haul_distance_m: 0.0,
            payload_utilization: utilization,
            capability_utilization: 0.0,
            battery: 1.0,
        };
        assert_close(suitability_score(&features(0.5)), 0.75, 1e-12);
        assert_close(suitability_score(&features(1.0)), 0.0, 1e-12);
        assert!(suitability_score(&features(0.9)) < suitability_score(&features(0.6)));
    }

    #[test]
    fn battery_score_is_monotone_and_steep_below_band() {
        let band = 0.25;
        let mut previous = -1.0;
        for step in 0..=100 {
            let score = battery_score(step as f64 / 100.0, band);
            assert!(score >= previous);
            previous = score;
        }
        assert_close(battery_score(0.3, band), 0.3, 1e-12);
        assert!(battery_score(0.2, band) < 0.2 * 0.7);
        assert_close(battery_score(band, band), band, 1e-12);
    }

    #[test]
    fn selects_maximum_composite_score() {
        let engine = engine();
        let selected = engine
            .select_best_plan(
                vec![
                    plan("amr-slow", 120.0, 0.3, 0.9),
                    plan("amr-fast", 20.0, 0.3, 0.9),
                    plan("amr-strained", 20.0, 0.95, 0.9),
                ],
                &healthy_fleet(),
            )
            .expect("selection");
        assert_eq!(selected.agent_id, "amr-fast");
        assert!(selected.score.is_some());
    }

    #[test]
    fn ties_resolve_to_smallest_agent_id() {
        let engine = engine();
        let selected = engine
            .select_best_plan(
                vec![
                    plan("amr-c", 30.0, 0.4, 0.8),
                    plan("amr-a", 30.0, 0.4, 0.8),
                    plan("amr-b", 30.0, 0.4, 0.8),
                ],
                &healthy_fleet(),
            )
            .expect("selection");
        assert_eq!(selected.agent_id, "amr-a");
    }

    #[test]
    fn empty_candidates_select_none_but_zero_score_is_a_plan() {
        let engine = engine();
        assert!(engine.select_best_plan(Vec::new(), &healthy_fleet()).is_none());

        let zero_only = DecisionEngine::new(ScoringConfig {
            weights: CriteriaWeights {
                time: 0.0,
                suitability: 1.0,
                battery: 0.0,
            },
            ..ScoringConfig::default()
        })
        .expect("engine");
        let selected = zero_only
            .select_best_plan(vec![plan("amr-full", 10.0, 1.0, 0.9)], &healthy_fleet())
            .expect("zero-score plan is still a selection");
        assert_eq!(selected.composite_score(), Some(0.0));
    }

    #[test]
    fn low_fleet_battery_boosts_battery_weight() {
        let engine = engine();
        let base = engine.effective_weights(&healthy_fleet());
        assert_close(base.battery, 0.2, 1e-12);

        let drained = FleetAggregate {
            mean_battery: 0.3,
            ..healthy_fleet()
        };
        let boosted = engine.effective_weights(&drained);
        assert_close(boosted.battery, 0.4 / 1.2, 1e-12);
        assert_close(boosted.time + boosted.suitability + boosted.battery, 1.0, 1e-12);
    }

    #[test]
    fn reweighting_can_flip_selection_toward_charged_agent() {
        let engine = engine();
        let candidates = vec![
            plan("amr-quick-low", 10.0, 0.3, 0.3),
            plan("amr-slow-full", 35.0, 0.3, 1.0),
        ];
        let healthy = engine
            .select_best_plan(candidates.clone(), &healthy_fleet())
            .expect("selection");
        assert_eq!(healthy.agent_id, "amr-quick-low");

        let drained = FleetAggregate {
            mean_battery: 0.3,
            ..healthy_fleet()
        };
        let under_pressure = engine
            .select_best_plan(candidates, &drained)
            .expect("selection");
        assert_eq!(under_pressure.agent_id, "amr-slow-full");
    }

    #[test]
    fn base_weights_are_normalized_at_construction() {
        let engine = DecisionEngine::new(ScoringConfig {
            weights: CriteriaWeights {
                time: 2.0,
                suitability: 1.0,
                battery: 1.0,
            },
            adjustments: Vec::new(),
            ..ScoringConfig::default()
        })
        .expect("engine");
        let weights = engine.effective_weights(&healthy_fleet());
        assert_close(weights.time, 0.5, 1e-12);
        assert_close(weights.battery, 0.25, 1e-12);
    }

    #[test]
    fn rejects_invalid_scoring_config() {
        let degenerate = DecisionEngine::new(ScoringConfig {
            weights: CriteriaWeights {
                time: 0.0,
                suitability: 0.0,
                battery: 0.0,
            },
            ..ScoringConfig::default()
        })
        .expect_err("zero weights should fail");
        assert_eq!(degenerate, ConfigError::DegenerateWeights);

        let negative_factor = DecisionEngine::new(ScoringConfig {
            adjustments: vec![WeightAdjustmentRule {
                when: FleetCondition::MeanBatteryBelow { threshold: 0.5 },
                boost: WeightKey::Battery,
                factor: -1.0,
            }],
            ..ScoringConfig::default()
        })
        .expect_err("negative factor should fail");
        assert!(negative_factor.to_string().contains("adjustments[0].factor"));
    }

    #[test]
    fn unknown_weight_key_is_rejected_when_parsing() {
        let parsed = serde_json::from_value::<ScoringConfig>(serde_json::json!({
            "weights": {"time": 0.5, "battery": 0.2, "comfort": 0.3}
        }));
        assert!(parsed.is_err());
    }

    fn arb_candidates() -> impl Strategy<Value = Vec<AssignmentPlan>> {
        // Coarse value sets so equal composites, and thus id tie-breaks, are common.
        proptest::collection::vec(
            (
                proptest::sample::select(vec![5.0, 10.0, 40.0]),
                proptest::sample::select(vec![0.0, 0.5, 0.9]),
                proptest::sample::select(vec![0.2, 0.6, 1.0]),
            ),
            1..8,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(index, (time, utilization, battery))| {
                    plan(&format!("amr-{index}"), time, utilization, battery)
                })
                .collect()
        })
    }

    fn arb_fleet() -> impl Strategy<Value = FleetAggregate> {
        (0.0f64..=1.0, 0usize..=4).prop_map(|(mean_battery, available_count)| FleetAggregate {
            agent_count: 4,
            available_count,
            mean_battery,
            available_ratio: available_count as f64 / 4.0,
        })
    }

    proptest! {
        #[test]
        fn property_selection_is_argmax_with_smallest_id_on_ties(
            candidates in arb_candidates(),
            fleet in arb_fleet(),
        ) {
            let engine = engine();
            let weights = engine.effective_weights(&fleet);
            let best = engine
                .select_best_plan(candidates.clone(), &fleet)
                .expect("non-empty candidates");
            let best_score = best.composite_score().expect("selected plan is scored");

            for candidate in &candidates {
                let score = engine.score(candidate, &weights).composite;
                prop_assert!(score <= best_score);
                if score == best_score {
                    prop_assert!(best.agent_id <= candidate.agent_id);
                }
            }
        }

        #[test]
        fn property_selection_ignores_candidate_order_and_repeats(
            candidates in arb_candidates(),
            fleet in arb_fleet(),
        ) {
            let engine = engine();
            let mut reversed = candidates.clone();
            reversed.reverse();

            let first = engine.select_best_plan(candidates.clone(), &fleet).expect("best");
            let again = engine.select_best_plan(candidates, &fleet).expect("best");
            let from_reversed = engine.select_best_plan(reversed, &fleet).expect("best");

            prop_assert_eq!(&first.agent_id, &again.agent_id);
            prop_assert_eq!(first.score, again.score);
            prop_assert_eq!(&first.agent_id, &from_reversed.agent_id);
            prop_assert_eq!(first.score, from_reversed.score);
        }
    }
}
