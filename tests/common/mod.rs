#![allow(dead_code)]

use std::time::Duration;

use chrono::NaiveDate;
use tempfile::TempDir;

use flashcard_scheduler::cache::StatsCache;
use flashcard_scheduler::db::Database;
use flashcard_scheduler::scheduling::{AlgorithmType, Rating, DAY_MS};
use flashcard_scheduler::services::cards::{self, CardMemory, Deck, NewCard, User};
use flashcard_scheduler::services::review::ReviewRequest;
use flashcard_scheduler::services::session::{self, NewSession, StudySession};

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;

pub fn days(n: i64) -> i64 {
    n * DAY_MS
}

pub fn noon_utc(date: NaiveDate) -> i64 {
    date.and_hms_opt(12, 0, 0)
        .expect("valid time")
        .and_utc()
        .timestamp_millis()
}

pub struct TestEnv {
    _dir: TempDir,
    pub db: Database,
    pub cache: StatsCache,
}

pub async fn setup() -> TestEnv {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db = Database::open(dir.path().join("scheduler.db"))
        .await
        .expect("failed to open database");
    TestEnv {
        _dir: dir,
        db,
        cache: StatsCache::memory(Duration::from_secs(60)),
    }
}

impl TestEnv {
    pub async fn user(&self, name: &str) -> User {
        cards::create_user(&self.db, name).await.expect("create user")
    }

    pub async fn deck(&self, user: &User, algorithm: AlgorithmType) -> Deck {
        cards::create_deck(&self.db, &user.id, "Vocabulary", algorithm)
            .await
            .expect("create deck")
    }

    pub async fn card(&self, user: &User, deck: &Deck, front: &str, created_at: i64) -> CardMemory {
        cards::create_card(
            &self.db,
            NewCard {
                deck_id: deck.id.clone(),
                user_id: user.id.clone(),
                front: front.to_string(),
                back: format!("{front} (back)"),
                created_at: Some(created_at),
            },
        )
        .await
        .expect("create card")
    }

    pub async fn session(&self, user: &User, deck: &Deck, started_at: i64) -> StudySession {
        session::start_session(
            &self.db,
            NewSession {
                user_id: user.id.clone(),
                deck_id: Some(deck.id.clone()),
                algorithm: deck.algorithm,
                started_at: Some(started_at),
            },
        )
        .await
        .expect("start session")
    }
}

pub fn review_request(
    card: &CardMemory,
    user: &User,
    session: &StudySession,
    rating: Rating,
    reviewed_at: i64,
) -> ReviewRequest {
    ReviewRequest {
        card_id: card.card_id.clone(),
        user_id: user.id.clone(),
        rating: rating.value(),
        response_time_ms: 2_500,
        session_id: session.id.clone(),
        reviewed_at: Some(reviewed_at),
        idempotency_key: None,
    }
}
