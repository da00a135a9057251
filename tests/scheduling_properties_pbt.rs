//! Property-Based Tests for the scheduling engines
//!
//! Tests the following invariants:
//! - Domain: every engine output stays inside its valid range
//! - Failure reset: Again always restarts the SM-2 repetition chain
//! - Monotonicity: a better rating never yields a shorter interval
//! - Snapshots: a JSON snapshot restores the exact state it was taken from

use proptest::prelude::*;

use flashcard_scheduler::scheduling::fsrs::{self, FsrsState};
use flashcard_scheduler::scheduling::sm2::{self, Sm2State};
use flashcard_scheduler::scheduling::{schedule, AlgorithmType, MemoryState, Rating, DAY_MS};

const T0: i64 = 1_700_000_000_000;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_rating() -> impl Strategy<Value = Rating> {
    prop::sample::select(Rating::ALL.to_vec())
}

fn arb_algorithm() -> impl Strategy<Value = AlgorithmType> {
    prop::sample::select(vec![AlgorithmType::Fsrs, AlgorithmType::Sm2, AlgorithmType::UltraSm2])
}

fn arb_fsrs_state() -> impl Strategy<Value = FsrsState> {
    ((1u32..=3_650_000u32), (100u32..=1000u32)).prop_map(|(s, d)| FsrsState {
        stability: f64::from(s) / 100.0,
        difficulty: f64::from(d) / 100.0,
    })
}

fn arb_sm2_state() -> impl Strategy<Value = Sm2State> {
    ((130u32..=500u32), (0u32..=36_500u32), (0u32..=60u32)).prop_map(|(ef, interval, reps)| Sm2State {
        ease_factor: f64::from(ef) / 100.0,
        interval_days: interval,
        repetitions: reps,
    })
}

/// A card that has been reviewed at least once, last at `T0`.
fn arb_reviewed_state() -> impl Strategy<Value = MemoryState> {
    (arb_fsrs_state(), arb_sm2_state(), (1u32..=200u32), (0u32..=100u32))
        .prop_map(|(f, s, total, correct_pct)| {
            let interval_days = s.interval_days.max(1);
            MemoryState {
                ease_factor: s.ease_factor,
                stability: f.stability,
                difficulty: f.difficulty,
                interval_days,
                repetitions: s.repetitions,
                total_reviews: total,
                correct_reviews: total * correct_pct / 100,
                last_reviewed_at: Some(T0),
                next_review_at: T0 + i64::from(interval_days) * DAY_MS,
            }
        })
}

// ============================================================================
// Engine Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn fsrs_outputs_stay_in_domain(
        state in arb_fsrs_state(),
        rating in arb_rating(),
        elapsed in 0u32..=3650,
    ) {
        let out = fsrs::compute(rating, state, elapsed, None);
        prop_assert!(out.stability > 0.0 && out.stability.is_finite());
        prop_assert!((1.0..=10.0).contains(&out.difficulty));
        prop_assert!(out.interval_days >= 1);
        prop_assert!(out.interval_days <= fsrs::MAX_INTERVAL_DAYS);
        prop_assert!((0.0..=1.0).contains(&out.retrievability));
    }

    #[test]
    fn fsrs_lapse_never_raises_stability(state in arb_fsrs_state(), elapsed in 0u32..=3650) {
        let out = fsrs::compute(Rating::Again, state, elapsed, None);
        prop_assert_eq!(out.interval_days, 1);
        prop_assert!(out.stability <= state.stability);
    }

    #[test]
    fn sm2_outputs_stay_in_domain(state in arb_sm2_state(), rating in arb_rating()) {
        let out = sm2::compute(rating, state);
        prop_assert!(out.ease_factor >= sm2::MIN_EASE_FACTOR);
        prop_assert!(out.interval_days >= 1);
        prop_assert!(out.interval_days <= sm2::MAX_INTERVAL_DAYS);
    }

    #[test]
    fn sm2_again_resets_chain(
        state in arb_sm2_state(),
        total in 0u32..=500,
        accuracy in 0.0f64..=1.0,
    ) {
        let base = sm2::compute(Rating::Again, state);
        prop_assert_eq!(base.repetitions, 0);
        prop_assert_eq!(base.interval_days, 1);

        let ultra = sm2::compute_ultra(Rating::Again, state, total, accuracy);
        prop_assert_eq!(ultra.repetitions, 0);
        prop_assert_eq!(ultra.interval_days, 1);
    }

    #[test]
    fn better_ratings_never_shorten_intervals(
        prior in arb_reviewed_state(),
        algorithm in arb_algorithm(),
        elapsed in 0i64..=400,
    ) {
        let now = T0 + elapsed * DAY_MS;
        let interval = |rating| schedule(algorithm, rating, &prior, now).map(|s| s.interval_days);

        let again = interval(Rating::Again).unwrap();
        let hard = interval(Rating::Hard).unwrap();
        let good = interval(Rating::Good).unwrap();
        let easy = interval(Rating::Easy).unwrap();

        prop_assert!(easy >= good, "easy {} < good {}", easy, good);
        prop_assert!(good >= hard, "good {} < hard {}", good, hard);
        prop_assert!(hard >= again, "hard {} < again {}", hard, again);
    }

    #[test]
    fn schedule_produces_valid_states(
        prior in arb_reviewed_state(),
        algorithm in arb_algorithm(),
        rating in arb_rating(),
        elapsed_ms in 0i64..=(400 * DAY_MS),
    ) {
        let now = T0 + elapsed_ms;
        let next = schedule(algorithm, rating, &prior, now).unwrap();

        prop_assert!(next.validate().is_ok());
        prop_assert_eq!(next.total_reviews, prior.total_reviews + 1);
        prop_assert_eq!(
            next.correct_reviews,
            prior.correct_reviews + u32::from(rating.is_correct())
        );
        prop_assert_eq!(next.last_reviewed_at, Some(now));
        prop_assert_eq!(next.next_review_at, now + i64::from(next.interval_days) * DAY_MS);
    }

    #[test]
    fn new_cards_accept_every_rating(algorithm in arb_algorithm(), rating in arb_rating()) {
        let prior = MemoryState::initial(T0);
        let next = schedule(algorithm, rating, &prior, T0).unwrap();
        prop_assert!(next.interval_days >= 1);
        prop_assert!(!next.is_new());
    }

    #[test]
    fn json_snapshot_restores_exact_state(prior in arb_reviewed_state(), rating in arb_rating()) {
        let next = schedule(AlgorithmType::Fsrs, rating, &prior, T0 + 3 * DAY_MS).unwrap();
        let json = serde_json::to_string(&next).unwrap();
        let restored: MemoryState = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(restored, next);
    }
}
