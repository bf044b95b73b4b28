//! Daily Outcome Evaluator
//!
//! Pure pass/fail verdict for one day of reviews, plus the quantized
//! reward/penalty signal the orchestrator turns into habit-service scoring
//! calls. Rewards round down (floor of reviews per up-event), penalties
//! round up (ceiling of the shortfall per down-event); the asymmetry is
//! deliberate and must be preserved.

use serde::{Deserialize, Serialize};

/// Persisted portion of the day's verdict (part of the state snapshot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyOutcome {
    pub reviews_today: u32,
    pub min_daily_reviews: u32,
    pub passed: bool,
    pub missing_reviews: u32,
}

/// Direction of a scoring event pushed to the habit service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreDirection {
    Up,
    Down,
}

impl ScoreDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Full evaluation result. `direction` and `score_events` are runtime-only;
/// the orchestrator issues exactly `score_events` scoring calls and then
/// persists only the [`DailyOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyVerdict {
    pub outcome: DailyOutcome,
    pub direction: ScoreDirection,
    pub score_events: u32,
}

/// Evaluate a day's review count against the configured goal.
///
/// `reviews_per_up_event` and `missing_reviews_per_down_event` must be
/// positive (enforced by config validation); they are clamped to 1 here so
/// the function stays total.
pub fn evaluate(
    reviews_today: u32,
    min_daily_reviews: u32,
    reviews_per_up_event: u32,
    missing_reviews_per_down_event: u32,
) -> DailyVerdict {
    let per_up = reviews_per_up_event.max(1);
    let per_down = missing_reviews_per_down_event.max(1);

    let passed = reviews_today >= min_daily_reviews;
    let missing_reviews = min_daily_reviews.saturating_sub(reviews_today);

    let (direction, score_events) = if passed {
        // Reward scales with volume: floor(reviews / per_up)
        (ScoreDirection::Up, reviews_today / per_up)
    } else {
        // Penalty scales with shortfall: ceil(missing / per_down)
        (ScoreDirection::Down, missing_reviews.div_ceil(per_down))
    };

    DailyVerdict {
        outcome: DailyOutcome {
            reviews_today,
            min_daily_reviews,
            passed,
            missing_reviews,
        },
        direction,
        score_events,
    }
}
