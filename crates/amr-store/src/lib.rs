//! Shared mutable state for AMR dispatch: the fleet registry and the traffic cost model.
//!
//! Both stores are synchronous and hold their locks only for short critical
//! sections, so async workflows never await while holding fleet or model state.

mod cost_model;
mod registry;

pub use cost_model::{CostEntry, CostModelError, CostModelRecord, CostModelSnapshot, TrafficCostModel};
pub use registry::{FleetRegistry, FleetStore, RegistryError, ReleaseTelemetry};

use std::sync::{LockResult, PoisonError};

// Guarded values are replaced wholesale inside each critical section, so a
// panicking holder cannot leave them half-written.
pub(crate) fn recover<T>(result: LockResult<T>) -> T {
    result.unwrap_or_else(PoisonError::into_inner)
}
