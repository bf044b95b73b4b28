//! Gamification state snapshot
//!
//! [`GamificationState`] is the durable per-user snapshot owned by the
//! state store. It is mutated only through the progression engine and the
//! daily outcome evaluator (via the orchestrator), never by presentation
//! code.

pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::DailyOutcome;
use crate::progression::{UnitConfig, UnitProgress, UnitStatus};

pub use store::StateStore;

/// Durable per-user gamification snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamificationState {
    /// 1-based index into the unit sequence.
    pub current_level: usize,
    /// Unit id -> derived progress. Keys mirror the configured curriculum.
    pub units: BTreeMap<String, UnitProgress>,
    /// Most recent daily verdict.
    pub daily: DailyOutcome,
    /// When the last sync finished (UTC, second precision).
    pub last_sync: DateTime<Utc>,
    /// Error strings from the most recent sync; empty on full success.
    #[serde(default)]
    pub last_sync_errors: Vec<String>,
}

impl GamificationState {
    /// Synthesize the initial snapshot for a fresh learner: first unit
    /// active, the rest locked, zero counts.
    pub fn initial(units: &[UnitConfig]) -> Self {
        let mut map = BTreeMap::new();
        for (index, unit) in units.iter().enumerate() {
            let status = if index == 0 {
                UnitStatus::Active
            } else {
                UnitStatus::Locked
            };
            map.insert(unit.id.clone(), UnitProgress::empty(status));
        }

        Self {
            current_level: 1,
            units: map,
            daily: DailyOutcome::default(),
            last_sync: now_secs(),
            last_sync_errors: Vec::new(),
        }
    }

    /// Reconcile a persisted snapshot against the current curriculum:
    /// keep persisted progress for surviving unit ids, default newly added
    /// ids, and drop ids no longer configured. This is what allows
    /// curriculum edits without discarding historical counts.
    pub fn reconcile(mut self, units: &[UnitConfig]) -> Self {
        let mut reconciled = BTreeMap::new();
        for unit in units {
            let progress = self
                .units
                .remove(&unit.id)
                .unwrap_or_else(|| UnitProgress::empty(UnitStatus::Locked));
            reconciled.insert(unit.id.clone(), progress);
        }
        self.units = reconciled;
        self
    }
}

/// Current UTC time truncated to second precision, so the snapshot
/// round-trips losslessly through JSON.
pub fn now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}
