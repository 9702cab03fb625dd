use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid configuration detected at startup; no task processing may begin.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("config field '{field}' must be {expectation} (got {value})")]
    OutOfRange {
        field: String,
        expectation: &'static str,
        value: String,
    },
    #[error("criteria weights must contain at least one positive value")]
    DegenerateWeights,
    #[error("failed to parse {source_label}: {message}")]
    Parse {
        source_label: String,
        message: String,
    },
}

impl ConfigError {
    pub fn out_of_range(
        field: impl Into<String>,
        expectation: &'static str,
        value: impl ToString,
    ) -> Self {
        Self::OutOfRange {
            field: field.into(),
            expectation,
            value: value.to_string(),
        }
    }
}

/// Task-scoped reason a workflow ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("no agent satisfies the hard constraints")]
    NoCandidate,
    #[error("agent commit lost after {attempts} planning attempts")]
    AssignmentRace { attempts: u32 },
    #[error("dispatch failed: {detail}")]
    DispatchFailure { detail: String },
}

impl FailureReason {
    /// Stable short code for summaries and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCandidate => "no_candidate",
            Self::AssignmentRace { .. } => "assignment_race",
            Self::DispatchFailure { .. } => "dispatch_failure",
        }
    }
}

/// Error returned when a workflow phase transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid workflow transition for task '{task_id}': {from} -> {to}")]
pub struct PhaseTransitionError {
    pub task_id: String,
    pub from: &'static str,
    pub to: &'static str,
}
