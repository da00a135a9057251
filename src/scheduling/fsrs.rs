use serde::{Deserialize, Serialize};

use super::rating::Rating;

/// Recall probability reached after `stability` days.
const RETENTION_BASE: f64 = 0.9;
const DIFFICULTY_WEIGHT: f64 = 0.3;
const EASY_BONUS: f64 = 1.3;
const GOOD_INTERVAL_FACTOR: f64 = 0.9;
const EASY_INTERVAL_FACTOR: f64 = 1.5;

pub const DEFAULT_STABILITY: f64 = 1.0;
pub const DEFAULT_DIFFICULTY: f64 = 5.0;
pub const MIN_STABILITY: f64 = 0.01;
pub const MAX_STABILITY: f64 = 36500.0;
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;
pub const MAX_INTERVAL_DAYS: u32 = 36500;

/// Model weights. Defaults are the FSRS-4 reference values for the terms
/// this engine uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsrsParams {
    /// Stability after the first review, indexed by `rating - 1`.
    pub initial_stability: [f64; 4],
    /// Difficulty target for Good.
    pub difficulty_base: f64,
    /// Target shift per rating step away from Good.
    pub difficulty_step: f64,
    pub recall_growth: f64,
    pub recall_stability_decay: f64,
    pub recall_retrievability_gain: f64,
    pub hard_penalty: f64,
    pub forget_scale: f64,
    pub forget_difficulty_decay: f64,
    pub forget_stability_exp: f64,
    pub forget_retrievability_gain: f64,
}

impl Default for FsrsParams {
    fn default() -> Self {
        Self {
            initial_stability: [0.4, 0.6, 2.4, 5.8],
            difficulty_base: 4.93,
            difficulty_step: 0.94,
            recall_growth: 1.49,
            recall_stability_decay: 0.14,
            recall_retrievability_gain: 0.94,
            hard_penalty: 0.29,
            forget_scale: 2.18,
            forget_difficulty_decay: 0.05,
            forget_stability_exp: 0.34,
            forget_retrievability_gain: 1.26,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsrsState {
    pub stability: f64,
    pub difficulty: f64,
}

impl Default for FsrsState {
    fn default() -> Self {
        Self {
            stability: DEFAULT_STABILITY,
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsrsOutcome {
    pub stability: f64,
    pub difficulty: f64,
    pub interval_days: u32,
    /// Retrievability the update was computed against.
    pub retrievability: f64,
}

/// Probability of recall after `elapsed_days` on a 90%-retention decay curve.
pub fn retrievability(stability: f64, elapsed_days: u32) -> f64 {
    if elapsed_days == 0 {
        return 1.0;
    }
    if !(stability > 0.0) {
        return 0.0;
    }
    RETENTION_BASE
        .powf(f64::from(elapsed_days) / stability)
        .clamp(0.0, 1.0)
}

/// First review of a card: stability is seeded per rating instead of grown
/// from the placeholder default.
pub fn first_review(rating: Rating, state: FsrsState) -> FsrsOutcome {
    first_review_with_params(rating, state, &FsrsParams::default())
}

pub fn first_review_with_params(rating: Rating, state: FsrsState, params: &FsrsParams) -> FsrsOutcome {
    let state = sanitize(state);
    let seed = params.initial_stability[(rating.value() - 1) as usize];
    let stability = if seed.is_finite() {
        seed.clamp(MIN_STABILITY, MAX_STABILITY)
    } else {
        DEFAULT_STABILITY
    };

    FsrsOutcome {
        stability,
        difficulty: next_difficulty(params, state.difficulty, rating),
        interval_days: next_interval(stability, rating),
        retrievability: 1.0,
    }
}

/// Review of a card that has been reviewed before.
pub fn compute(
    rating: Rating,
    state: FsrsState,
    elapsed_days: u32,
    retrievability: Option<f64>,
) -> FsrsOutcome {
    compute_with_params(rating, state, elapsed_days, retrievability, &FsrsParams::default())
}

pub fn compute_with_params(
    rating: Rating,
    state: FsrsState,
    elapsed_days: u32,
    supplied_retrievability: Option<f64>,
    params: &FsrsParams,
) -> FsrsOutcome {
    let state = sanitize(state);

    let r = match supplied_retrievability {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => retrievability(state.stability, elapsed_days),
    };

    let difficulty = next_difficulty(params, state.difficulty, rating);
    let stability = match rating {
        Rating::Again => next_forget_stability(params, state.difficulty, state.stability, r),
        _ => next_recall_stability(params, state.difficulty, state.stability, r, rating),
    };

    FsrsOutcome {
        stability,
        difficulty,
        interval_days: next_interval(stability, rating),
        retrievability: r,
    }
}

fn sanitize(state: FsrsState) -> FsrsState {
    let stability = if state.stability.is_finite() && state.stability > 0.0 {
        state.stability.clamp(MIN_STABILITY, MAX_STABILITY)
    } else {
        DEFAULT_STABILITY
    };
    let difficulty = if state.difficulty.is_finite() {
        state.difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    } else {
        DEFAULT_DIFFICULTY
    };
    FsrsState {
        stability,
        difficulty,
    }
}

fn target_difficulty(p: &FsrsParams, rating: Rating) -> f64 {
    let d = p.difficulty_base - (rating.value() - 3) as f64 * p.difficulty_step;
    d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

fn next_difficulty(p: &FsrsParams, d: f64, rating: Rating) -> f64 {
    let target = target_difficulty(p, rating);
    (d + DIFFICULTY_WEIGHT * (target - d)).clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

fn next_recall_stability(p: &FsrsParams, d: f64, s: f64, r: f64, rating: Rating) -> f64 {
    let hard_penalty = if rating == Rating::Hard { p.hard_penalty } else { 1.0 };
    let easy_bonus = if rating == Rating::Easy { EASY_BONUS } else { 1.0 };

    let growth = p.recall_growth.exp()
        * (11.0 - d)
        * s.powf(-p.recall_stability_decay)
        * ((1.0 - r) * p.recall_retrievability_gain).exp_m1()
        * hard_penalty
        * easy_bonus;
    let new_s = s * (1.0 + growth);
    if new_s.is_finite() {
        new_s.clamp(MIN_STABILITY, MAX_STABILITY)
    } else {
        MAX_STABILITY
    }
}

fn next_forget_stability(p: &FsrsParams, d: f64, s: f64, r: f64) -> f64 {
    let new_s = p.forget_scale
        * d.powf(-p.forget_difficulty_decay)
        * ((s + 1.0).powf(p.forget_stability_exp) - 1.0)
        * ((1.0 - r) * p.forget_retrievability_gain).exp();
    // a lapse never raises stability
    new_s.min(s).max(MIN_STABILITY)
}

fn next_interval(stability: f64, rating: Rating) -> u32 {
    let days = match rating {
        Rating::Again => return 1,
        Rating::Easy => (stability * EASY_INTERVAL_FACTOR).round().max(2.0),
        Rating::Hard | Rating::Good => (stability * GOOD_INTERVAL_FACTOR).round().max(1.0),
    };
    days.min(f64::from(MAX_INTERVAL_DAYS)) as u32
}
