//! SuperMemo-2 and the accuracy-aware "Ultra" variant.
//!
//! Again and Hard are failures in the classic sense: the repetition chain
//! resets and the card comes back the next day. Good and Easy walk the
//! 1 → 6 → interval·ease ladder.

use serde::{Deserialize, Serialize};

use super::rating::Rating;

pub const MIN_EASE_FACTOR: f64 = 1.3;
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;
pub const MAX_INTERVAL_DAYS: u32 = 36500;

const LAPSE_EASE_PENALTY: f64 = 0.2;
const EASY_INTERVAL_BONUS: f64 = 1.3;

const ULTRA_MIN_REVIEWS: u32 = 5;
const ULTRA_HIGH_ACCURACY: f64 = 0.9;
const ULTRA_LOW_ACCURACY: f64 = 0.7;
const ULTRA_BOOST: f64 = 1.2;
const ULTRA_DAMPEN: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sm2State {
    pub ease_factor: f64,
    pub interval_days: u32,
    pub repetitions: u32,
}

impl Default for Sm2State {
    fn default() -> Self {
        Self {
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 0,
            repetitions: 0,
        }
    }
}

/// SM-2 quality score used by the ease formula.
fn quality(rating: Rating) -> f64 {
    match rating {
        Rating::Again => 1.0,
        Rating::Hard => 3.0,
        Rating::Good => 4.0,
        Rating::Easy => 5.0,
    }
}

pub fn compute(rating: Rating, state: Sm2State) -> Sm2State {
    let state = sanitize(state);

    if !rating.is_correct() {
        return Sm2State {
            ease_factor: (state.ease_factor - LAPSE_EASE_PENALTY).max(MIN_EASE_FACTOR),
            interval_days: 1,
            repetitions: 0,
        };
    }

    let repetitions = state.repetitions.saturating_add(1);
    let interval_days = match repetitions {
        1 if rating == Rating::Easy => 2,
        1 => 1,
        2 => 6,
        _ => {
            let mut days = f64::from(state.interval_days.max(1)) * state.ease_factor;
            if rating == Rating::Easy {
                days *= EASY_INTERVAL_BONUS;
            }
            clamp_days(days.round())
        }
    };

    // EF' = EF + (0.1 - (5-q) * (0.08 + (5-q) * 0.02))
    let q = quality(rating);
    let ease_factor =
        (state.ease_factor + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02))).max(MIN_EASE_FACTOR);

    Sm2State {
        ease_factor,
        interval_days,
        repetitions,
    }
}

/// Base SM-2 pass followed by a rolling-accuracy adjustment once the card
/// has more than five reviews behind it.
pub fn compute_ultra(rating: Rating, state: Sm2State, total_reviews: u32, accuracy: f64) -> Sm2State {
    let mut next = compute(rating, state);
    if total_reviews > ULTRA_MIN_REVIEWS && accuracy.is_finite() {
        next.interval_days = adjust_for_accuracy(next.interval_days, accuracy);
    }
    next
}

fn adjust_for_accuracy(interval_days: u32, accuracy: f64) -> u32 {
    let days = f64::from(interval_days);
    if accuracy > ULTRA_HIGH_ACCURACY {
        clamp_days((days * ULTRA_BOOST).round())
    } else if accuracy < ULTRA_LOW_ACCURACY {
        clamp_days((days * ULTRA_DAMPEN).round())
    } else {
        interval_days
    }
}

fn clamp_days(days: f64) -> u32 {
    if days.is_finite() {
        days.clamp(1.0, f64::from(MAX_INTERVAL_DAYS)) as u32
    } else {
        MAX_INTERVAL_DAYS
    }
}

fn sanitize(state: Sm2State) -> Sm2State {
    let ease_factor = if state.ease_factor.is_finite() {
        state.ease_factor.max(MIN_EASE_FACTOR)
    } else {
        DEFAULT_EASE_FACTOR
    };
    Sm2State {
        ease_factor,
        interval_days: state.interval_days.min(MAX_INTERVAL_DAYS),
        repetitions: state.repetitions,
    }
}
