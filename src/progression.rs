//! Progression Engine
//!
//! Pure derivation of unit unlock statuses and the learner's current level
//! from raw mastery counters. No I/O, no shared state; the orchestrator and
//! `recompute_many` both call through here.
//!
//! # Rules
//!
//! Units are walked in curriculum order with a 1-based index. A unit is
//! `completed` once its mastery ratio reaches the configured threshold; the
//! first unit that is not completed becomes the single `active` unit and
//! fixes the current level; everything after it is `locked`. If every unit
//! is completed the level stays pinned at the curriculum length.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One curriculum unit as configured by the operator.
///
/// The order of units in the configured sequence is significant: it drives
/// the "first incomplete unit" semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Stable unique identifier (state map key).
    pub id: String,
    /// Display name.
    pub label: String,
    /// Tag used to query the review client for this unit's cards.
    pub tag: String,
}

/// Raw per-unit counters as reported by the review client (or as persisted
/// from a previous sync). Signed so that defensive clamping happens here
/// rather than at every call site.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub total_cards: i64,
    pub mastered_cards: i64,
}

/// Unlock status of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Locked,
    Active,
    Completed,
}

/// Derived per-unit progress, recomputed on every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitProgress {
    pub status: UnitStatus,
    pub mastered_cards: u32,
    pub total_cards: u32,
    /// mastered/total, rounded to 4 decimals; 0.0 when the unit has no cards.
    pub mastery_ratio: f64,
}

impl UnitProgress {
    /// Zero-count progress with the given status.
    pub fn empty(status: UnitStatus) -> Self {
        Self {
            status,
            mastered_cards: 0,
            total_cards: 0,
            mastery_ratio: 0.0,
        }
    }
}

/// Derive unit statuses and the current level from raw counters.
///
/// # Arguments
///
/// - `units`: ordered curriculum (order is significant)
/// - `counts`: unit id -> raw counters; missing ids are treated as zero
/// - `threshold`: mastery ratio in (0, 1] at which a unit counts as completed
///
/// # Returns
///
/// `(current_level, unit id -> UnitProgress)` where `current_level` is the
/// 1-based index of the first non-completed unit, or `units.len()` when all
/// units are completed.
pub fn derive(
    units: &[UnitConfig],
    counts: &BTreeMap<String, ProgressCounts>,
    threshold: f64,
) -> (usize, BTreeMap<String, UnitProgress>) {
    let mut derived = BTreeMap::new();
    let mut first_incomplete: Option<usize> = None;

    for (index, unit) in units.iter().enumerate() {
        let raw = counts.get(&unit.id).copied().unwrap_or_default();

        let total = raw.total_cards.max(0);
        let mut mastered = raw.mastered_cards.max(0);
        if total > 0 && mastered > total {
            // Never let the ratio exceed 1
            mastered = total;
        }

        let ratio = if total > 0 {
            round4(mastered as f64 / total as f64)
        } else {
            0.0
        };

        let status = if total > 0 && ratio >= threshold {
            UnitStatus::Completed
        } else if first_incomplete.is_none() {
            first_incomplete = Some(index + 1);
            UnitStatus::Active
        } else {
            UnitStatus::Locked
        };

        derived.insert(
            unit.id.clone(),
            UnitProgress {
                status,
                mastered_cards: mastered as u32,
                total_cards: total as u32,
                mastery_ratio: ratio,
            },
        );
    }

    let current_level = first_incomplete.unwrap_or(units.len());
    (current_level, derived)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
