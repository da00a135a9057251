use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::cache::{keys, StatsCache};
use crate::db::{get_u32, now_ms, Database};
use crate::scheduling::{AlgorithmType, Rating, UnknownAlgorithm};

// ========== Types ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: String,
    pub user_id: String,
    pub deck_id: Option<String>,
    pub algorithm: AlgorithmType,
    pub cards_studied: u32,
    pub cards_correct: u32,
    pub total_time_seconds: i64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl StudySession {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn accuracy(&self) -> f64 {
        session_accuracy(self.cards_studied, self.cards_correct)
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub deck_id: Option<String>,
    pub algorithm: AlgorithmType,
    pub started_at: Option<i64>,
}

/// Running counters returned after each recorded review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: String,
    pub cards_studied: u32,
    pub cards_correct: u32,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub cards_studied: u32,
    pub cards_correct: u32,
    pub accuracy: f64,
    pub total_time_seconds: i64,
    pub started_at: i64,
    pub completed_at: i64,
    pub streak_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStudyStats {
    pub user_id: String,
    pub as_of: NaiveDate,
    pub streak_days: u32,
    pub total_study_minutes: f64,
    pub completed_sessions: i64,
    pub cards_studied: i64,
    pub cards_correct: i64,
    pub accuracy: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("session already completed: {0}")]
    AlreadyCompleted(String),
    #[error(transparent)]
    UnknownAlgorithm(#[from] UnknownAlgorithm),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// `round(correct / total * 100, 1)`, 0 when nothing was answered.
///
/// Every accuracy figure (sessions, user stats, deck stats) goes through here.
pub fn accuracy_percent(correct: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let pct = correct as f64 / total as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

pub fn session_accuracy(cards_studied: u32, cards_correct: u32) -> f64 {
    accuracy_percent(i64::from(cards_correct), i64::from(cards_studied))
}

/// Length of the run of consecutive study days ending today, or ending
/// yesterday when nothing has been studied yet today.
pub fn streak_from_dates(dates: &HashSet<NaiveDate>, today: NaiveDate) -> u32 {
    let start = if dates.contains(&today) {
        Some(today)
    } else {
        today.pred_opt()
    };

    let mut streak = 0;
    let mut cursor = start;
    while let Some(day) = cursor {
        if !dates.contains(&day) {
            break;
        }
        streak += 1;
        cursor = day.pred_opt();
    }
    streak
}

fn utc_date(ms: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

// ========== Service Implementation ==========

pub async fn start_session(db: &Database, input: NewSession) -> Result<StudySession, SessionError> {
    let pool = db.pool();

    let user_exists: Option<i64> = sqlx::query_scalar(r#"SELECT 1 FROM "users" WHERE "id" = ?"#)
        .bind(&input.user_id)
        .fetch_optional(pool)
        .await?;
    if user_exists.is_none() {
        return Err(SessionError::NotFound(format!("user {}", input.user_id)));
    }

    if let Some(deck_id) = input.deck_id.as_deref() {
        let owned: Option<i64> =
            sqlx::query_scalar(r#"SELECT 1 FROM "decks" WHERE "id" = ? AND "userId" = ?"#)
                .bind(deck_id)
                .bind(&input.user_id)
                .fetch_optional(pool)
                .await?;
        if owned.is_none() {
            return Err(SessionError::NotFound(format!("deck {deck_id}")));
        }
    }

    let session = StudySession {
        id: Uuid::new_v4().to_string(),
        user_id: input.user_id,
        deck_id: input.deck_id,
        algorithm: input.algorithm,
        cards_studied: 0,
        cards_correct: 0,
        total_time_seconds: 0,
        started_at: input.started_at.unwrap_or_else(now_ms),
        completed_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO "study_sessions"
          ("id","userId","deckId","algorithm","cardsStudied","cardsCorrect","totalTimeSeconds","startedAt","completedAt")
        VALUES (?,?,?,?,0,0,0,?,NULL)
        "#,
    )
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(session.deck_id.as_deref())
    .bind(session.algorithm.as_str())
    .bind(session.started_at)
    .execute(pool)
    .await?;

    tracing::info!(session_id = %session.id, user_id = %session.user_id, algorithm = %session.algorithm, "study session started");
    Ok(session)
}

/// Bumps the counters of an open session owned by `user_id`.
///
/// Runs on the caller's connection so it commits or rolls back with the
/// review insert. `None` means there is no such open session.
pub async fn record_review(
    conn: &mut SqliteConnection,
    session_id: &str,
    user_id: &str,
    rating: Rating,
) -> Result<Option<SessionProgress>, sqlx::Error> {
    let correct_delta: i64 = if rating.is_correct() { 1 } else { 0 };
    let row = sqlx::query(
        r#"
        UPDATE "study_sessions"
        SET "cardsStudied" = "cardsStudied" + 1, "cardsCorrect" = "cardsCorrect" + ?
        WHERE "id" = ? AND "userId" = ? AND "completedAt" IS NULL
        RETURNING "cardsStudied", "cardsCorrect"
        "#,
    )
    .bind(correct_delta)
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let cards_studied = get_u32(&row, "cardsStudied")?;
    let cards_correct = get_u32(&row, "cardsCorrect")?;
    Ok(Some(SessionProgress {
        session_id: session_id.to_string(),
        cards_studied,
        cards_correct,
        accuracy: session_accuracy(cards_studied, cards_correct),
    }))
}

pub async fn get_session(db: &Database, session_id: &str) -> Result<StudySession, SessionError> {
    let row = sqlx::query(SESSION_SELECT_SQL)
        .bind(session_id)
        .fetch_optional(db.pool())
        .await?
        .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
    parse_session(&row)
}

pub(crate) async fn session_progress(
    db: &Database,
    session_id: &str,
) -> Result<SessionProgress, SessionError> {
    let session = get_session(db, session_id).await?;
    Ok(SessionProgress {
        accuracy: session.accuracy(),
        session_id: session.id,
        cards_studied: session.cards_studied,
        cards_correct: session.cards_correct,
    })
}

/// Closes a session, credits the owner's study time and reports the streak
/// as of the completion date.
pub async fn end_session(
    db: &Database,
    cache: &StatsCache,
    session_id: &str,
    completed_at: Option<i64>,
) -> Result<SessionSummary, SessionError> {
    let completed_at = completed_at.unwrap_or_else(now_ms);

    let mut tx = db.pool().begin().await?;
    let row = sqlx::query(SESSION_SELECT_SQL)
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
    let session = parse_session(&row)?;

    if session.is_completed() {
        return Err(SessionError::AlreadyCompleted(session_id.to_string()));
    }
    if completed_at < session.started_at {
        return Err(SessionError::Validation(
            "session cannot end before it started".to_string(),
        ));
    }

    let total_time_seconds = (completed_at - session.started_at) / 1000;
    let updated = sqlx::query(
        r#"
        UPDATE "study_sessions" SET "completedAt" = ?, "totalTimeSeconds" = ?
        WHERE "id" = ? AND "completedAt" IS NULL
        "#,
    )
    .bind(completed_at)
    .bind(total_time_seconds)
    .bind(session_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(SessionError::AlreadyCompleted(session_id.to_string()));
    }

    let minutes = total_time_seconds as f64 / 60.0;
    sqlx::query(
        r#"UPDATE "users" SET "totalStudyMinutes" = "totalStudyMinutes" + ? WHERE "id" = ?"#,
    )
    .bind(minutes)
    .bind(&session.user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    cache.delete(&keys::user_stats_key(&session.user_id)).await;

    let today = utc_date(completed_at).unwrap_or_else(|| Utc::now().date_naive());
    let streak_days = calculate_streak_on(db, &session.user_id, today).await?;

    tracing::info!(
        session_id,
        user_id = %session.user_id,
        cards_studied = session.cards_studied,
        cards_correct = session.cards_correct,
        total_time_seconds,
        streak_days,
        "study session completed"
    );

    Ok(SessionSummary {
        session_id: session.id.clone(),
        accuracy: session.accuracy(),
        user_id: session.user_id,
        cards_studied: session.cards_studied,
        cards_correct: session.cards_correct,
        total_time_seconds,
        started_at: session.started_at,
        completed_at,
        streak_days,
    })
}

pub async fn calculate_streak(db: &Database, user_id: &str) -> Result<u32, sqlx::Error> {
    calculate_streak_on(db, user_id, Utc::now().date_naive()).await
}

/// Streak over completed, non-empty sessions, using UTC calendar dates.
pub async fn calculate_streak_on(
    db: &Database,
    user_id: &str,
    today: NaiveDate,
) -> Result<u32, sqlx::Error> {
    let completed: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT "completedAt" FROM "study_sessions"
        WHERE "userId" = ? AND "completedAt" IS NOT NULL AND "cardsStudied" > 0
        "#,
    )
    .bind(user_id)
    .fetch_all(db.pool())
    .await?;

    let dates: HashSet<NaiveDate> = completed.into_iter().filter_map(utc_date).collect();
    Ok(streak_from_dates(&dates, today))
}

pub async fn get_user_study_stats(
    db: &Database,
    cache: &StatsCache,
    user_id: &str,
    today: NaiveDate,
) -> Result<UserStudyStats, SessionError> {
    let key = keys::user_stats_key(user_id);
    if let Some(cached) = cache.get::<UserStudyStats>(&key).await {
        if cached.as_of == today {
            return Ok(cached);
        }
    }

    let total_study_minutes: Option<f64> =
        sqlx::query_scalar(r#"SELECT "totalStudyMinutes" FROM "users" WHERE "id" = ?"#)
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?;
    let Some(total_study_minutes) = total_study_minutes else {
        return Err(SessionError::NotFound(format!("user {user_id}")));
    };

    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS "sessions",
               COALESCE(SUM("cardsStudied"), 0) AS "studied",
               COALESCE(SUM("cardsCorrect"), 0) AS "correct"
        FROM "study_sessions"
        WHERE "userId" = ? AND "completedAt" IS NOT NULL
        "#,
    )
    .bind(user_id)
    .fetch_one(db.pool())
    .await?;

    let cards_studied: i64 = row.try_get("studied")?;
    let cards_correct: i64 = row.try_get("correct")?;
    let accuracy = accuracy_percent(cards_correct, cards_studied);

    let stats = UserStudyStats {
        user_id: user_id.to_string(),
        as_of: today,
        streak_days: calculate_streak_on(db, user_id, today).await?,
        total_study_minutes,
        completed_sessions: row.try_get("sessions")?,
        cards_studied,
        cards_correct,
        accuracy,
    };

    cache.set(&key, &stats).await;
    Ok(stats)
}

const SESSION_SELECT_SQL: &str = r#"
    SELECT "id","userId","deckId","algorithm","cardsStudied","cardsCorrect","totalTimeSeconds","startedAt","completedAt"
    FROM "study_sessions" WHERE "id" = ?
"#;

fn parse_session(row: &SqliteRow) -> Result<StudySession, SessionError> {
    Ok(StudySession {
        id: row.try_get("id")?,
        user_id: row.try_get("userId")?,
        deck_id: row.try_get("deckId")?,
        algorithm: row.try_get::<String, _>("algorithm")?.parse()?,
        cards_studied: get_u32(row, "cardsStudied")?,
        cards_correct: get_u32(row, "cardsCorrect")?,
        total_time_seconds: row.try_get("totalTimeSeconds")?,
        started_at: row.try_get("startedAt")?,
        completed_at: row.try_get("completedAt")?,
    })
}
