use amr_types::RouteKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

use crate::recover;

/// Errors returned by traffic cost model operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CostModelError {
    #[error("route '{route_key}' rejected estimate {value}: must be finite and >= 0")]
    InvalidEstimate { route_key: String, value: f64 },
    #[error("route '{route_key}' rejected observation {value}: must be finite and >= 0")]
    InvalidObservation { route_key: String, value: f64 },
}

/// Learned traversal time for one route key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub estimate_s: f64,
    pub observations: u64,
    pub last_observed_s: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// One exported cost model entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModelRecord {
    pub route_key: RouteKey,
    pub entry: CostEntry,
}

/// Serializable export of every learned entry, ordered by route key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostModelSnapshot {
    pub entries: Vec<CostModelRecord>,
}

type EntrySlot = Arc<Mutex<Option<CostEntry>>>;

/// Route key to learned time estimate map.
///
/// Each key owns its own mutex: updates to one key are serialized, while
/// updates to distinct keys only share the brief map lookup.
#[derive(Debug, Default)]
pub struct TrafficCostModel {
    slots: RwLock<HashMap<RouteKey, EntrySlot>>,
}

impl TrafficCostModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current estimate for `key`, if one has been learned or seeded.
    pub fn estimate(&self, key: &RouteKey) -> Option<f64> {
        self.entry(key).map(|entry| entry.estimate_s)
    }

    pub fn entry(&self, key: &RouteKey) -> Option<CostEntry> {
        let slot = recover(self.slots.read()).get(key).cloned()?;
        let entry = recover(slot.lock()).clone();
        entry
    }

    pub fn len(&self) -> usize {
        let slots: Vec<EntrySlot> = recover(self.slots.read()).values().cloned().collect();
        slots
            .iter()
            .filter(|slot| recover(slot.lock()).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets a prior estimate for `key`, replacing any learned value.
    pub fn seed(&self, key: RouteKey, estimate_s: f64) -> Result<CostEntry, CostModelError> {
        self.update_with(key, |_| {
            Ok(CostEntry {
                estimate_s,
                observations: 0,
                last_observed_s: None,
                updated_at: Utc::now(),
            })
        })
    }

    /// Applies `update` to the entry for `key` while holding that key's lock.
    ///
    /// Concurrent updates of one key run one after another, each seeing the
    /// previous result, so no write is lost.
    pub fn update_with<F>(&self, key: RouteKey, update: F) -> Result<CostEntry, CostModelError>
    where
        F: FnOnce(Option<&CostEntry>) -> Result<CostEntry, CostModelError>,
    {
        let slot = self.slot(key);
        let mut guard = recover(slot.lock());
        let next = update(guard.as_ref())?;
        if !next.estimate_s.is_finite() || next.estimate_s < 0.0 {
            return Err(CostModelError::InvalidEstimate {
                route_key: key.to_string(),
                value: next.estimate_s,
            });
        }
        *guard = Some(next.clone());
        Ok(next)
    }

    pub fn snapshot(&self) -> CostModelSnapshot {
        let slots: Vec<(RouteKey, EntrySlot)> = recover(self.slots.read())
            .iter()
            .map(|(key, slot)| (*key, Arc::clone(slot)))
            .collect();
        let mut entries: Vec<CostModelRecord> = slots
            .into_iter()
            .filter_map(|(route_key, slot)| {
                let entry = recover(slot.lock()).clone()?;
                Some(CostModelRecord { route_key, entry })
            })
            .collect();
        entries.sort_by(|left, right| left.route_key.cmp(&right.route_key));
        CostModelSnapshot { entries }
    }

    /// Builds a model from an exported snapshot, validating every estimate.
    pub fn from_snapshot(snapshot: CostModelSnapshot) -> Result<Self, CostModelError> {
        let model = Self::new();
        for record in snapshot.entries {
            let entry = record.entry;
            model.update_with(record.route_key, move |_| Ok(entry))?;
        }
        Ok(model)
    }

    fn slot(&self, key: RouteKey) -> EntrySlot {
        if let Some(slot) = recover(self.slots.read()).get(&key) {
            return Arc::clone(slot);
        }
        let mut slots = recover(self.slots.write());
        Arc::clone(slots.entry(key).or_default())
    }
}
