use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::db::{get_u32, now_ms, Database};
use crate::scheduling::{AlgorithmType, MemoryState, UnknownAlgorithm};

// ========== Types ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub total_study_minutes: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub algorithm: AlgorithmType,
    pub created_at: i64,
}

/// A flashcard's memory model as persisted in `card_memory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMemory {
    pub card_id: String,
    pub deck_id: String,
    pub algorithm: AlgorithmType,
    pub created_at: i64,
    #[serde(flatten)]
    pub state: MemoryState,
}

#[derive(Debug, Clone)]
pub struct NewCard {
    pub deck_id: String,
    pub user_id: String,
    pub front: String,
    pub back: String,
    pub created_at: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    UnknownAlgorithm(#[from] UnknownAlgorithm),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

// ========== Service Implementation ==========

pub async fn create_user(db: &Database, username: &str) -> Result<User, CardError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(CardError::Validation("username must not be empty".to_string()));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        total_study_minutes: 0.0,
        created_at: now_ms(),
    };

    sqlx::query(
        r#"INSERT INTO "users" ("id", "username", "totalStudyMinutes", "createdAt") VALUES (?, ?, 0, ?)"#,
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(user.created_at)
    .execute(db.pool())
    .await?;

    Ok(user)
}

pub async fn get_user(db: &Database, user_id: &str) -> Result<User, CardError> {
    let row = sqlx::query(
        r#"SELECT "id", "username", "totalStudyMinutes", "createdAt" FROM "users" WHERE "id" = ?"#,
    )
    .bind(user_id)
    .fetch_optional(db.pool())
    .await?
    .ok_or_else(|| CardError::NotFound(format!("user {user_id}")))?;

    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        total_study_minutes: row.try_get("totalStudyMinutes")?,
        created_at: row.try_get("createdAt")?,
    })
}

pub async fn create_deck(
    db: &Database,
    user_id: &str,
    name: &str,
    algorithm: AlgorithmType,
) -> Result<Deck, CardError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CardError::Validation("deck name must not be empty".to_string()));
    }
    get_user(db, user_id).await?;

    let deck = Deck {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: name.to_string(),
        algorithm,
        created_at: now_ms(),
    };

    sqlx::query(
        r#"INSERT INTO "decks" ("id", "userId", "name", "algorithm", "createdAt") VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(&deck.id)
    .bind(&deck.user_id)
    .bind(&deck.name)
    .bind(deck.algorithm.as_str())
    .bind(deck.created_at)
    .execute(db.pool())
    .await?;

    Ok(deck)
}

pub async fn get_deck(db: &Database, deck_id: &str, user_id: &str) -> Result<Deck, CardError> {
    let row = sqlx::query(
        r#"SELECT "id", "userId", "name", "algorithm", "createdAt" FROM "decks" WHERE "id" = ? AND "userId" = ?"#,
    )
    .bind(deck_id)
    .bind(user_id)
    .fetch_optional(db.pool())
    .await?
    .ok_or_else(|| CardError::NotFound(format!("deck {deck_id}")))?;

    Ok(Deck {
        id: row.try_get("id")?,
        user_id: row.try_get("userId")?,
        name: row.try_get("name")?,
        algorithm: row.try_get::<String, _>("algorithm")?.parse()?,
        created_at: row.try_get("createdAt")?,
    })
}

/// Inserts a flashcard together with its default memory model.
pub async fn create_card(db: &Database, input: NewCard) -> Result<CardMemory, CardError> {
    if input.front.trim().is_empty() || input.back.trim().is_empty() {
        return Err(CardError::Validation("card front and back are required".to_string()));
    }
    let deck = get_deck(db, &input.deck_id, &input.user_id).await?;

    let created_at = input.created_at.unwrap_or_else(now_ms);
    let card = CardMemory {
        card_id: Uuid::new_v4().to_string(),
        deck_id: deck.id,
        algorithm: deck.algorithm,
        created_at,
        state: MemoryState::initial(created_at),
    };

    let mut tx = db.pool().begin().await?;
    sqlx::query(
        r#"INSERT INTO "flashcards" ("id", "deckId", "front", "back", "createdAt") VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(&card.card_id)
    .bind(&card.deck_id)
    .bind(input.front.trim())
    .bind(input.back.trim())
    .bind(created_at)
    .execute(&mut *tx)
    .await?;

    let s = &card.state;
    sqlx::query(
        r#"
        INSERT INTO "card_memory"
          ("cardId","algorithm","easeFactor","stability","difficulty","intervalDays","repetitions",
           "totalReviews","correctReviews","lastReviewedAt","nextReviewAt")
        VALUES (?,?,?,?,?,?,?,?,?,?,?)
        "#,
    )
    .bind(&card.card_id)
    .bind(card.algorithm.as_str())
    .bind(s.ease_factor)
    .bind(s.stability)
    .bind(s.difficulty)
    .bind(i64::from(s.interval_days))
    .bind(i64::from(s.repetitions))
    .bind(i64::from(s.total_reviews))
    .bind(i64::from(s.correct_reviews))
    .bind(s.last_reviewed_at)
    .bind(s.next_review_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::debug!(card_id = %card.card_id, deck_id = %card.deck_id, "card created");
    Ok(card)
}

pub async fn get_card(db: &Database, card_id: &str, user_id: &str) -> Result<CardMemory, CardError> {
    let row = sqlx::query(CARD_MEMORY_FOR_USER_SQL)
        .bind(card_id)
        .bind(user_id)
        .fetch_optional(db.pool())
        .await?
        .ok_or_else(|| CardError::NotFound(format!("card {card_id}")))?;

    Ok(CardRow::from_row(&row)?.into_card()?)
}

pub(crate) const CARD_MEMORY_FOR_USER_SQL: &str = r#"
    SELECT m."cardId", f."deckId", f."createdAt", m."algorithm", m."easeFactor", m."stability",
           m."difficulty", m."intervalDays", m."repetitions", m."totalReviews", m."correctReviews",
           m."lastReviewedAt", m."nextReviewAt"
    FROM "card_memory" m
    JOIN "flashcards" f ON f."id" = m."cardId"
    JOIN "decks" d ON d."id" = f."deckId"
    WHERE m."cardId" = ? AND d."userId" = ?
"#;

/// A `card_memory` row whose algorithm name has not been checked yet.
pub(crate) struct CardRow {
    pub card_id: String,
    pub deck_id: String,
    pub created_at: i64,
    pub algorithm: String,
    pub state: MemoryState,
}

impl CardRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            card_id: row.try_get("cardId")?,
            deck_id: row.try_get("deckId")?,
            created_at: row.try_get("createdAt")?,
            algorithm: row.try_get("algorithm")?,
            state: MemoryState {
                ease_factor: row.try_get("easeFactor")?,
                stability: row.try_get("stability")?,
                difficulty: row.try_get("difficulty")?,
                interval_days: get_u32(row, "intervalDays")?,
                repetitions: get_u32(row, "repetitions")?,
                total_reviews: get_u32(row, "totalReviews")?,
                correct_reviews: get_u32(row, "correctReviews")?,
                last_reviewed_at: row.try_get("lastReviewedAt")?,
                next_review_at: row.try_get("nextReviewAt")?,
            },
        })
    }

    pub(crate) fn into_card(self) -> Result<CardMemory, UnknownAlgorithm> {
        Ok(CardMemory {
            algorithm: self.algorithm.parse()?,
            card_id: self.card_id,
            deck_id: self.deck_id,
            created_at: self.created_at,
            state: self.state,
        })
    }
}
