use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::cache::{keys, StatsCache};
use crate::db::{is_unique_violation, now_ms, Database};
use crate::scheduling::{
    schedule, AlgorithmType, InvalidRating, InvariantViolation, MemoryState, Rating,
    UnknownAlgorithm,
};
use crate::services::cards::{CardMemory, CardRow, CARD_MEMORY_FOR_USER_SQL};
use crate::services::session::{self, SessionError, SessionProgress};

// ========== Types ==========

#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub card_id: String,
    pub user_id: String,
    /// Raw rating as received; validated against the 1..=4 scale.
    pub rating: i64,
    pub response_time_ms: i64,
    pub session_id: String,
    pub reviewed_at: Option<i64>,
    pub idempotency_key: Option<String>,
}

/// One immutable row of a card's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: String,
    pub card_id: String,
    pub session_id: String,
    pub rating: Rating,
    pub response_time_ms: i64,
    pub reviewed_at: i64,
    pub previous_state: MemoryState,
    pub new_state: MemoryState,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub card: CardMemory,
    pub review: ReviewRecord,
    pub session: SessionProgress,
    /// True when an earlier review with the same idempotency key was returned.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayDivergence {
    /// `previousState` of this review differs from the state the fold reached.
    ChainBreak { index: usize, review_id: String },
    /// Re-running the algorithm does not reproduce the stored `newState`.
    Recompute { index: usize, review_id: String },
    /// The last `newState` differs from the card row.
    FinalState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub card_id: String,
    pub algorithm: AlgorithmType,
    pub reviews_replayed: usize,
    pub consistent: bool,
    pub divergence: Option<ReplayDivergence>,
    pub replayed_state: MemoryState,
    pub current_state: MemoryState,
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error(transparent)]
    InvalidRating(#[from] InvalidRating),
    #[error(transparent)]
    UnknownAlgorithm(#[from] UnknownAlgorithm),
    #[error("card not found: {0}")]
    CardNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal algorithm error: {0}")]
    InternalAlgorithm(#[from] InvariantViolation),
    #[error("card {0} was modified concurrently, retry the review")]
    ConcurrentModification(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl From<SessionError> for ReviewError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionNotFound(id) => Self::SessionNotFound(id),
            SessionError::UnknownAlgorithm(err) => Self::UnknownAlgorithm(err),
            SessionError::Sql(err) => Self::Sql(err),
            other => Self::Validation(other.to_string()),
        }
    }
}

// ========== Service Implementation ==========

/// Applies one rating to a card, appends the audit row and bumps the
/// session counters, all in a single transaction.
pub async fn review(
    db: &Database,
    cache: &StatsCache,
    request: ReviewRequest,
) -> Result<ReviewResult, ReviewError> {
    let card = load_card_row(db, &request.card_id, &request.user_id).await?;
    let rating = Rating::try_from(request.rating)?;
    let algorithm: AlgorithmType = card.algorithm.parse()?;

    if let Some(key) = request.idempotency_key.as_deref() {
        if key.trim().is_empty() {
            return Err(ReviewError::Validation("idempotency key must not be empty".to_string()));
        }
        if let Some(existing) = find_by_idempotency_key(db, &card.card_id, key).await? {
            tracing::info!(
                card_id = %card.card_id,
                review_id = %existing.id,
                "duplicate review submission, returning stored result"
            );
            let session = session::session_progress(db, &existing.session_id).await?;
            return Ok(ReviewResult {
                card: card.into_card()?,
                review: existing,
                session,
                replayed: true,
            });
        }
    }

    if request.response_time_ms < 0 {
        return Err(ReviewError::Validation("response time must not be negative".to_string()));
    }
    let reviewed_at = request.reviewed_at.unwrap_or_else(now_ms);
    if let Some(last) = card.state.last_reviewed_at {
        if reviewed_at < last {
            return Err(ReviewError::Validation(format!(
                "review time {reviewed_at} precedes the last review at {last}"
            )));
        }
    }

    let previous_state = card.state.clone();
    let new_state = schedule(algorithm, rating, &previous_state, reviewed_at).map_err(|err| {
        tracing::error!(card_id = %card.card_id, %algorithm, error = %err, "refusing to persist invalid state");
        err
    })?;

    let mut tx = db.pool().begin().await?;

    let s = &new_state;
    let updated = sqlx::query(
        r#"
        UPDATE "card_memory"
        SET "easeFactor" = ?, "stability" = ?, "difficulty" = ?, "intervalDays" = ?,
            "repetitions" = ?, "totalReviews" = ?, "correctReviews" = ?,
            "lastReviewedAt" = ?, "nextReviewAt" = ?
        WHERE "cardId" = ? AND "totalReviews" = ?
        "#,
    )
    .bind(s.ease_factor)
    .bind(s.stability)
    .bind(s.difficulty)
    .bind(i64::from(s.interval_days))
    .bind(i64::from(s.repetitions))
    .bind(i64::from(s.total_reviews))
    .bind(i64::from(s.correct_reviews))
    .bind(s.last_reviewed_at)
    .bind(s.next_review_at)
    .bind(&card.card_id)
    .bind(i64::from(previous_state.total_reviews))
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tracing::warn!(card_id = %card.card_id, "card changed since it was read, rejecting review");
        return Err(ReviewError::ConcurrentModification(card.card_id));
    }

    // checked before the audit insert, whose sessionId foreign key would otherwise fail first
    let Some(progress) =
        session::record_review(&mut *tx, &request.session_id, &request.user_id, rating).await?
    else {
        tracing::warn!(
            session_id = %request.session_id,
            user_id = %request.user_id,
            "review rejected, session is missing, closed or owned by another user"
        );
        return Err(ReviewError::SessionNotFound(request.session_id));
    };

    let record = ReviewRecord {
        id: Uuid::new_v4().to_string(),
        card_id: card.card_id.clone(),
        session_id: request.session_id.clone(),
        rating,
        response_time_ms: request.response_time_ms,
        reviewed_at,
        previous_state,
        new_state,
        idempotency_key: request.idempotency_key.clone(),
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO "reviews"
          ("id","cardId","sessionId","rating","responseTimeMs","reviewedAt","previousState","newState","idempotencyKey")
        VALUES (?,?,?,?,?,?,?,?,?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.card_id)
    .bind(&record.session_id)
    .bind(i64::from(record.rating))
    .bind(record.response_time_ms)
    .bind(record.reviewed_at)
    .bind(Json(&record.previous_state))
    .bind(Json(&record.new_state))
    .bind(record.idempotency_key.as_deref())
    .execute(&mut *tx)
    .await;

    if let Err(err) = inserted {
        if is_unique_violation(&err) {
            tracing::warn!(card_id = %card.card_id, "idempotency key already used by a concurrent review");
            return Err(ReviewError::ConcurrentModification(card.card_id));
        }
        return Err(err.into());
    }

    tx.commit().await?;

    cache.delete(&keys::deck_stats_key(&card.deck_id)).await;

    tracing::info!(
        card_id = %record.card_id,
        session_id = %record.session_id,
        %algorithm,
        rating = rating.value(),
        interval_days = record.new_state.interval_days,
        next_review_at = record.new_state.next_review_at,
        "review recorded"
    );

    let updated_card = CardMemory {
        card_id: card.card_id,
        deck_id: card.deck_id,
        algorithm,
        created_at: card.created_at,
        state: record.new_state.clone(),
    };

    Ok(ReviewResult {
        card: updated_card,
        review: record,
        session: progress,
        replayed: false,
    })
}

/// Audit trail of a card in the order the reviews were applied.
pub async fn list_card_reviews(
    db: &Database,
    card_id: &str,
    user_id: &str,
) -> Result<Vec<ReviewRecord>, ReviewError> {
    load_card_row(db, card_id, user_id).await?;
    fetch_reviews(db, card_id).await
}

/// Rebuilds the card from its review rows and compares against the stored row.
pub async fn replay_card_history(
    db: &Database,
    card_id: &str,
    user_id: &str,
) -> Result<ReplayReport, ReviewError> {
    let card = load_card_row(db, card_id, user_id).await?.into_card()?;
    let reviews = fetch_reviews(db, card_id).await?;

    let mut state = MemoryState::initial(card.created_at);
    let mut divergence = None;

    for (index, review) in reviews.iter().enumerate() {
        if review.previous_state != state {
            divergence = Some(ReplayDivergence::ChainBreak {
                index,
                review_id: review.id.clone(),
            });
            break;
        }
        let recomputed = schedule(card.algorithm, review.rating, &state, review.reviewed_at);
        if recomputed.as_ref().ok() != Some(&review.new_state) {
            divergence = Some(ReplayDivergence::Recompute {
                index,
                review_id: review.id.clone(),
            });
            break;
        }
        state = review.new_state.clone();
    }

    if divergence.is_none() && state != card.state {
        divergence = Some(ReplayDivergence::FinalState);
    }

    if let Some(found) = &divergence {
        tracing::warn!(card_id, ?found, "review history does not reproduce the card");
    }

    Ok(ReplayReport {
        card_id: card.card_id,
        algorithm: card.algorithm,
        reviews_replayed: reviews.len(),
        consistent: divergence.is_none(),
        divergence,
        replayed_state: state,
        current_state: card.state,
    })
}

async fn load_card_row(db: &Database, card_id: &str, user_id: &str) -> Result<CardRow, ReviewError> {
    let row = sqlx::query(CARD_MEMORY_FOR_USER_SQL)
        .bind(card_id)
        .bind(user_id)
        .fetch_optional(db.pool())
        .await?
        .ok_or_else(|| ReviewError::CardNotFound(card_id.to_string()))?;
    Ok(CardRow::from_row(&row)?)
}

const REVIEW_COLUMNS: &str = r#""id","cardId","sessionId","rating","responseTimeMs","reviewedAt","previousState","newState","idempotencyKey""#;

async fn fetch_reviews(db: &Database, card_id: &str) -> Result<Vec<ReviewRecord>, ReviewError> {
    let sql = format!(
        r#"SELECT {REVIEW_COLUMNS} FROM "reviews" WHERE "cardId" = ? ORDER BY "reviewedAt" ASC, rowid ASC"#
    );
    let rows = sqlx::query(&sql).bind(card_id).fetch_all(db.pool()).await?;
    rows.iter()
        .map(|row| parse_review(row).map_err(ReviewError::from))
        .collect()
}

async fn find_by_idempotency_key(
    db: &Database,
    card_id: &str,
    key: &str,
) -> Result<Option<ReviewRecord>, ReviewError> {
    let sql = format!(
        r#"SELECT {REVIEW_COLUMNS} FROM "reviews" WHERE "cardId" = ? AND "idempotencyKey" = ?"#
    );
    let row = sqlx::query(&sql)
        .bind(card_id)
        .bind(key)
        .fetch_optional(db.pool())
        .await?;
    Ok(row.as_ref().map(parse_review).transpose()?)
}

fn parse_review(row: &SqliteRow) -> Result<ReviewRecord, sqlx::Error> {
    let rating: i64 = row.try_get("rating")?;
    let rating = Rating::try_from(rating).map_err(|err| sqlx::Error::ColumnDecode {
        index: "rating".to_string(),
        source: Box::new(err),
    })?;
    let Json(previous_state) = row.try_get::<Json<MemoryState>, _>("previousState")?;
    let Json(new_state) = row.try_get::<Json<MemoryState>, _>("newState")?;

    Ok(ReviewRecord {
        id: row.try_get("id")?,
        card_id: row.try_get("cardId")?,
        session_id: row.try_get("sessionId")?,
        rating,
        response_time_ms: row.try_get("responseTimeMs")?,
        reviewed_at: row.try_get("reviewedAt")?,
        previous_state,
        new_state,
        idempotency_key: row.try_get("idempotencyKey")?,
    })
}
