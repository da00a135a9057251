use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::db::Database;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum DueScope {
    Deck(String),
    /// Every deck owned by the user.
    User(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCard {
    pub card_id: String,
    pub deck_id: String,
    pub front: String,
    pub back: String,
    pub algorithm: String,
    pub created_at: i64,
    pub next_review_at: i64,
    pub last_reviewed_at: Option<i64>,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCounts {
    pub due: i64,
    pub new: i64,
}

const DUE_CARD_SELECT: &str = r#"
    SELECT m."cardId", f."deckId", f."front", f."back", f."createdAt", m."algorithm",
           m."nextReviewAt", m."lastReviewedAt"
    FROM "card_memory" m
    JOIN "flashcards" f ON f."id" = m."cardId"
    JOIN "decks" d ON d."id" = f."deckId"
    WHERE "#;

fn push_scope(qb: &mut QueryBuilder<'_, Sqlite>, scope: &DueScope) {
    match scope {
        DueScope::Deck(deck_id) => {
            qb.push(r#"f."deckId" = "#);
            qb.push_bind(deck_id.clone());
        }
        DueScope::User(user_id) => {
            qb.push(r#"d."userId" = "#);
            qb.push_bind(user_id.clone());
        }
    }
}

/// Study queue: reviewed cards that are due, most overdue first, topped up
/// with never-reviewed cards oldest first. Read-only.
pub async fn get_due_cards(
    db: &Database,
    scope: &DueScope,
    limit: u32,
    now: i64,
) -> Result<Vec<DueCard>, sqlx::Error> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(DUE_CARD_SELECT);
    push_scope(&mut qb, scope);
    qb.push(r#" AND m."lastReviewedAt" IS NOT NULL AND m."nextReviewAt" <= "#);
    qb.push_bind(now);
    qb.push(r#" ORDER BY m."nextReviewAt" ASC, m."cardId" ASC LIMIT "#);
    qb.push_bind(i64::from(limit));

    let rows = qb.build().fetch_all(db.pool()).await?;
    let mut cards = rows.iter().map(parse_due_card).collect::<Result<Vec<_>, _>>()?;

    let remaining = limit as usize - cards.len().min(limit as usize);
    if remaining > 0 {
        let mut qb = QueryBuilder::<Sqlite>::new(DUE_CARD_SELECT);
        push_scope(&mut qb, scope);
        qb.push(r#" AND m."lastReviewedAt" IS NULL ORDER BY f."createdAt" ASC, m."cardId" ASC LIMIT "#);
        qb.push_bind(remaining as i64);

        let rows = qb.build().fetch_all(db.pool()).await?;
        for row in &rows {
            cards.push(parse_due_card(row)?);
        }
    }

    tracing::debug!(?scope, limit, returned = cards.len(), "due cards selected");
    Ok(cards)
}

pub async fn count_due(db: &Database, scope: &DueScope, now: i64) -> Result<DueCounts, sqlx::Error> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT
          COALESCE(SUM(CASE WHEN m."lastReviewedAt" IS NOT NULL AND m."nextReviewAt" <= "#,
    );
    qb.push_bind(now);
    qb.push(
        r#" THEN 1 ELSE 0 END), 0) AS "due",
          COALESCE(SUM(CASE WHEN m."lastReviewedAt" IS NULL THEN 1 ELSE 0 END), 0) AS "new"
        FROM "card_memory" m
        JOIN "flashcards" f ON f."id" = m."cardId"
        JOIN "decks" d ON d."id" = f."deckId"
        WHERE "#,
    );
    push_scope(&mut qb, scope);

    let row = qb.build().fetch_one(db.pool()).await?;
    Ok(DueCounts {
        due: row.try_get("due")?,
        new: row.try_get("new")?,
    })
}

fn parse_due_card(row: &SqliteRow) -> Result<DueCard, sqlx::Error> {
    let last_reviewed_at: Option<i64> = row.try_get("lastReviewedAt")?;
    Ok(DueCard {
        card_id: row.try_get("cardId")?,
        deck_id: row.try_get("deckId")?,
        front: row.try_get("front")?,
        back: row.try_get("back")?,
        algorithm: row.try_get("algorithm")?,
        created_at: row.try_get("createdAt")?,
        next_review_at: row.try_get("nextReviewAt")?,
        is_new: last_reviewed_at.is_none(),
        last_reviewed_at,
    })
}
