//! Pure scheduling: card memory snapshots and the engines that advance them.
//!
//! Nothing in here touches the database or the clock; every timestamp is an
//! epoch-millisecond value handed in by the caller.

pub mod fsrs;
pub mod rating;
pub mod sm2;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use rating::{InvalidRating, Rating};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

// ========== Algorithm ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmType {
    Fsrs,
    Sm2,
    UltraSm2,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl AlgorithmType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fsrs => "fsrs",
            Self::Sm2 => "sm2",
            Self::UltraSm2 => "ultra_sm2",
        }
    }
}

impl FromStr for AlgorithmType {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fsrs" => Ok(Self::Fsrs),
            "sm2" => Ok(Self::Sm2),
            "ultra_sm2" => Ok(Self::UltraSm2),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== Memory State ==========

/// Every algorithm-relevant field of a card's memory model.
///
/// Review rows store one of these before and after each review, so the
/// struct must carry everything needed to rebuild the card row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryState {
    pub ease_factor: f64,
    pub stability: f64,
    pub difficulty: f64,
    pub interval_days: u32,
    pub repetitions: u32,
    pub total_reviews: u32,
    pub correct_reviews: u32,
    pub last_reviewed_at: Option<i64>,
    pub next_review_at: i64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("computed {field} = {value} violates its invariant")]
pub struct InvariantViolation {
    pub field: &'static str,
    pub value: f64,
}

impl MemoryState {
    /// State of a card that has never been reviewed.
    pub fn initial(created_at: i64) -> Self {
        Self {
            ease_factor: sm2::DEFAULT_EASE_FACTOR,
            stability: fsrs::DEFAULT_STABILITY,
            difficulty: fsrs::DEFAULT_DIFFICULTY,
            interval_days: 0,
            repetitions: 0,
            total_reviews: 0,
            correct_reviews: 0,
            last_reviewed_at: None,
            next_review_at: created_at,
        }
    }

    pub fn is_new(&self) -> bool {
        self.last_reviewed_at.is_none()
    }

    /// Share of correct answers, 0 for a card without reviews.
    pub fn accuracy(&self) -> f64 {
        if self.total_reviews == 0 {
            return 0.0;
        }
        f64::from(self.correct_reviews) / f64::from(self.total_reviews)
    }

    pub fn elapsed_days(&self, now: i64) -> u32 {
        match self.last_reviewed_at {
            Some(last) => {
                let days = (now - last).max(0) / DAY_MS;
                u32::try_from(days).unwrap_or(u32::MAX)
            }
            None => 0,
        }
    }

    fn fsrs_state(&self) -> fsrs::FsrsState {
        fsrs::FsrsState {
            stability: self.stability,
            difficulty: self.difficulty,
        }
    }

    fn sm2_state(&self) -> sm2::Sm2State {
        sm2::Sm2State {
            ease_factor: self.ease_factor,
            interval_days: self.interval_days,
            repetitions: self.repetitions,
        }
    }

    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let violation = |field: &'static str, value: f64| Err(InvariantViolation { field, value });

        if !(self.ease_factor.is_finite() && self.ease_factor >= sm2::MIN_EASE_FACTOR) {
            return violation("easeFactor", self.ease_factor);
        }
        if !(self.stability.is_finite() && self.stability > 0.0) {
            return violation("stability", self.stability);
        }
        if !(fsrs::MIN_DIFFICULTY..=fsrs::MAX_DIFFICULTY).contains(&self.difficulty) {
            return violation("difficulty", self.difficulty);
        }
        if self.correct_reviews > self.total_reviews {
            return violation("correctReviews", f64::from(self.correct_reviews));
        }
        if let Some(last) = self.last_reviewed_at {
            if self.interval_days < 1 {
                return violation("intervalDays", f64::from(self.interval_days));
            }
            if self.next_review_at < last {
                return violation("nextReviewAt", self.next_review_at as f64);
            }
        }
        Ok(())
    }
}

// ========== Transition ==========

/// Applies one review to `prior` and returns the resulting state.
///
/// This is the only state transition a card goes through; live reviews and
/// history replay both call it.
pub fn schedule(
    algorithm: AlgorithmType,
    rating: Rating,
    prior: &MemoryState,
    now: i64,
) -> Result<MemoryState, InvariantViolation> {
    let elapsed_days = prior.elapsed_days(now);
    let mut next = prior.clone();

    match algorithm {
        AlgorithmType::Fsrs => {
            let outcome = if prior.is_new() {
                fsrs::first_review(rating, prior.fsrs_state())
            } else {
                fsrs::compute(rating, prior.fsrs_state(), elapsed_days, None)
            };
            tracing::debug!(
                rating = rating.value(),
                elapsed_days,
                retrievability = outcome.retrievability,
                stability = outcome.stability,
                difficulty = outcome.difficulty,
                interval_days = outcome.interval_days,
                "fsrs step"
            );
            next.stability = outcome.stability;
            next.difficulty = outcome.difficulty;
            next.interval_days = outcome.interval_days;
            next.repetitions = match rating {
                Rating::Again => 0,
                _ => prior.repetitions.saturating_add(1),
            };
        }
        AlgorithmType::Sm2 | AlgorithmType::UltraSm2 => {
            let outcome = if algorithm == AlgorithmType::UltraSm2 {
                sm2::compute_ultra(rating, prior.sm2_state(), prior.total_reviews, prior.accuracy())
            } else {
                sm2::compute(rating, prior.sm2_state())
            };
            tracing::debug!(
                %algorithm,
                rating = rating.value(),
                ease_factor = outcome.ease_factor,
                interval_days = outcome.interval_days,
                repetitions = outcome.repetitions,
                "sm2 step"
            );
            next.ease_factor = outcome.ease_factor;
            next.interval_days = outcome.interval_days;
            next.repetitions = outcome.repetitions;
        }
    }

    next.total_reviews = prior.total_reviews.saturating_add(1);
    if rating.is_correct() {
        next.correct_reviews = prior.correct_reviews.saturating_add(1);
    }
    next.last_reviewed_at = Some(now);
    next.next_review_at = now.saturating_add(i64::from(next.interval_days) * DAY_MS);

    next.validate()?;
    Ok(next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalPreview {
    pub again: u32,
    pub hard: u32,
    pub good: u32,
    pub easy: u32,
}

/// Interval each rating would produce if the card were reviewed at `now`.
pub fn preview(
    algorithm: AlgorithmType,
    state: &MemoryState,
    now: i64,
) -> Result<IntervalPreview, InvariantViolation> {
    let interval = |rating| schedule(algorithm, rating, state, now).map(|s| s.interval_days);
    Ok(IntervalPreview {
        again: interval(Rating::Again)?,
        hard: interval(Rating::Hard)?,
        good: interval(Rating::Good)?,
        easy: interval(Rating::Easy)?,
    })
}
