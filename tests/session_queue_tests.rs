mod common;

use chrono::{Days, NaiveDate};

use common::{days, noon_utc, review_request, setup, T0};
use flashcard_scheduler::db::Database;
use flashcard_scheduler::scheduling::{AlgorithmType, Rating};
use flashcard_scheduler::services::due_cards::{self, DueCounts, DueScope};
use flashcard_scheduler::services::cards::{self, Deck, User};
use flashcard_scheduler::services::review;
use flashcard_scheduler::services::session::{self, NewSession, SessionError, StudySession};
use flashcard_scheduler::services::stats;

#[tokio::test]
async fn session_counters_and_summary() {
    let env = setup().await;
    let user = env.user("lia").await;
    let deck = env.deck(&user, AlgorithmType::Sm2).await;
    let sess = env.session(&user, &deck, T0).await;

    let mut last = None;
    for (i, rating) in [Rating::Good, Rating::Again, Rating::Easy].into_iter().enumerate() {
        let card = env.card(&user, &deck, &format!("word-{i}"), T0).await;
        let result = review::review(&env.db, &env.cache, review_request(&card, &user, &sess, rating, T0 + 1_000))
            .await
            .unwrap();
        assert!(result.session.cards_correct <= result.session.cards_studied);
        last = Some(result.session);
    }
    let progress = last.unwrap();
    assert_eq!((progress.cards_studied, progress.cards_correct), (3, 2));
    assert_eq!(progress.accuracy, 66.7);

    let summary = session::end_session(&env.db, &env.cache, &sess.id, Some(T0 + 90_000))
        .await
        .unwrap();
    assert_eq!(summary.total_time_seconds, 90);
    assert_eq!(summary.cards_studied, 3);
    assert_eq!(summary.accuracy, 66.7);
    assert_eq!(summary.streak_days, 1);

    let refreshed = cards::get_user(&env.db, &user.id).await.unwrap();
    assert!((refreshed.total_study_minutes - 1.5).abs() < 1e-9);

    let err = session::end_session(&env.db, &env.cache, &sess.id, Some(T0 + 120_000))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AlreadyCompleted(_)));
}

#[tokio::test]
async fn session_lifecycle_rejects_bad_input() {
    let env = setup().await;
    let owner = env.user("max").await;
    let other = env.user("nia").await;
    let deck = env.deck(&owner, AlgorithmType::Fsrs).await;

    let err = session::start_session(
        &env.db,
        NewSession {
            user_id: other.id.clone(),
            deck_id: Some(deck.id.clone()),
            algorithm: AlgorithmType::Fsrs,
            started_at: Some(T0),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));

    let sess = env.session(&owner, &deck, T0).await;
    let err = session::end_session(&env.db, &env.cache, &sess.id, Some(T0 - 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));

    let err = session::end_session(&env.db, &env.cache, "missing", None).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(_)));
}

/// Runs one session finishing at noon UTC on `date`, optionally with a single Good review.
async fn study_on(env: &common::TestEnv, user: &User, deck: &Deck, date: NaiveDate, reviews: bool) {
    let at = noon_utc(date);
    let sess = env.session(user, deck, at - 600_000).await;
    if reviews {
        let card = env.card(user, deck, &format!("card-{date}"), at - days(30)).await;
        review::review(&env.db, &env.cache, review_request(&card, user, &sess, Rating::Good, at - 300_000))
            .await
            .unwrap();
    }
    session::end_session(&env.db, &env.cache, &sess.id, Some(at)).await.unwrap();
}

#[tokio::test]
async fn streak_counts_contiguous_study_days() {
    let env = setup().await;
    let user = env.user("oli").await;
    let deck = env.deck(&user, AlgorithmType::Sm2).await;
    let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
    let back = |n: u64| today.checked_sub_days(Days::new(n)).unwrap();

    study_on(&env, &user, &deck, back(4), true).await;
    // an empty session does not bridge the gap
    study_on(&env, &user, &deck, back(3), false).await;
    study_on(&env, &user, &deck, back(2), true).await;
    study_on(&env, &user, &deck, back(1), true).await;
    study_on(&env, &user, &deck, today, true).await;

    assert_eq!(session::calculate_streak_on(&env.db, &user.id, today).await.unwrap(), 3);
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap();
    assert_eq!(session::calculate_streak_on(&env.db, &user.id, tomorrow).await.unwrap(), 3);
    let later = today.checked_add_days(Days::new(2)).unwrap();
    assert_eq!(session::calculate_streak_on(&env.db, &user.id, later).await.unwrap(), 0);

    // an open session does not count
    let open = env.session(&user, &deck, noon_utc(back(3))).await;
    let card = env.card(&user, &deck, "open", noon_utc(back(3))).await;
    review::review(&env.db, &env.cache, review_request(&card, &user, &open, Rating::Good, noon_utc(back(3))))
        .await
        .unwrap();
    assert_eq!(session::calculate_streak_on(&env.db, &user.id, today).await.unwrap(), 3);

    let stats = session::get_user_study_stats(&env.db, &env.cache, &user.id, today).await.unwrap();
    assert_eq!(stats.streak_days, 3);
    assert_eq!(stats.completed_sessions, 5);
    assert_eq!(stats.cards_studied, 4);
    assert!((stats.total_study_minutes - 50.0).abs() < 1e-9);
}

async fn reviewed_card(
    env: &common::TestEnv,
    user: &User,
    deck: &Deck,
    session: &StudySession,
    front: &str,
    reviewed_at: i64,
) -> String {
    let card = env.card(user, deck, front, T0 - days(30)).await;
    review::review(&env.db, &env.cache, review_request(&card, user, session, Rating::Good, reviewed_at))
        .await
        .unwrap();
    card.card_id
}

async fn due_ids(db: &Database, scope: &DueScope, limit: u32, now: i64) -> Vec<String> {
    due_cards::get_due_cards(db, scope, limit, now)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.card_id)
        .collect()
}

#[tokio::test]
async fn due_queue_orders_overdue_then_new() {
    let env = setup().await;
    let user = env.user("pia").await;
    let deck = env.deck(&user, AlgorithmType::Sm2).await;
    let sess = env.session(&user, &deck, T0 - days(10)).await;

    // Good on a new SM-2 card is due one day later.
    let mut tied = vec![
        reviewed_card(&env, &user, &deck, &sess, "tie-a", T0).await,
        reviewed_card(&env, &user, &deck, &sess, "tie-b", T0).await,
    ];
    tied.sort();
    let most_overdue = reviewed_card(&env, &user, &deck, &sess, "old", T0 - days(3)).await;
    let not_due = reviewed_card(&env, &user, &deck, &sess, "later", T0 + days(5)).await;
    let newer = env.card(&user, &deck, "new-2", T0 + 20).await.card_id;
    let older = env.card(&user, &deck, "new-1", T0 + 10).await.card_id;

    let scope = DueScope::Deck(deck.id.clone());
    let now = T0 + days(2);

    let all = due_ids(&env.db, &scope, 10, now).await;
    assert_eq!(
        all,
        vec![most_overdue.clone(), tied[0].clone(), tied[1].clone(), older.clone(), newer.clone()]
    );
    assert!(!all.contains(&not_due));

    assert_eq!(due_ids(&env.db, &scope, 1, now).await, vec![most_overdue.clone()]);
    assert_eq!(
        due_ids(&env.db, &scope, 4, now).await,
        vec![most_overdue, tied[0].clone(), tied[1].clone(), older]
    );
    assert!(due_ids(&env.db, &scope, 0, now).await.is_empty());

    let counts = due_cards::count_due(&env.db, &scope, now).await.unwrap();
    assert_eq!(counts, DueCounts { due: 3, new: 2 });

    let queue = due_cards::get_due_cards(&env.db, &scope, 10, now).await.unwrap();
    assert!(queue.iter().take(3).all(|c| !c.is_new && c.next_review_at <= now));
    assert!(queue.iter().skip(3).all(|c| c.is_new));
}

#[tokio::test]
async fn user_scope_spans_decks_but_not_users() {
    let env = setup().await;
    let user = env.user("quin").await;
    let other = env.user("rae").await;
    let first = env.deck(&user, AlgorithmType::Sm2).await;
    let second = env.deck(&user, AlgorithmType::Fsrs).await;
    let foreign = env.deck(&other, AlgorithmType::Sm2).await;

    let a = env.card(&user, &first, "a", T0).await.card_id;
    let b = env.card(&user, &second, "b", T0 + 1).await.card_id;
    env.card(&other, &foreign, "c", T0 - 1).await;

    let ids = due_ids(&env.db, &DueScope::User(user.id.clone()), 10, T0).await;
    assert_eq!(ids, vec![a, b]);
}

#[tokio::test]
async fn deck_statistics_refresh_after_review() {
    let env = setup().await;
    let user = env.user("sam").await;
    let deck = env.deck(&user, AlgorithmType::Sm2).await;
    let card = env.card(&user, &deck, "uno", T0).await;
    env.card(&user, &deck, "dos", T0).await;
    let sess = env.session(&user, &deck, T0).await;

    let before = stats::get_deck_statistics(&env.db, &env.cache, &deck.id, &user.id, T0)
        .await
        .unwrap();
    assert_eq!((before.total_cards, before.new_cards, before.total_reviews), (2, 2, 0));
    assert_eq!(before.accuracy, 0.0);

    review::review(&env.db, &env.cache, review_request(&card, &user, &sess, Rating::Good, T0))
        .await
        .unwrap();

    let after = stats::get_deck_statistics(&env.db, &env.cache, &deck.id, &user.id, T0 + days(2))
        .await
        .unwrap();
    assert_eq!((after.new_cards, after.due_cards, after.learned_cards), (1, 1, 0));
    assert_eq!((after.total_reviews, after.correct_reviews), (1, 1));
    assert_eq!(after.accuracy, 100.0);
    assert!((after.average_ease_factor - 2.5).abs() < 1e-9);
}

#[tokio::test]
async fn reopening_database_keeps_data() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("scheduler.db");

    let db = Database::open(&path).await.unwrap();
    let user = cards::create_user(&db, "tia").await.unwrap();
    db.close().await;

    let db = Database::open(&path).await.unwrap();
    let loaded = cards::get_user(&db, &user.id).await.unwrap();
    assert_eq!(loaded.username, "tia");
}
