use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::cache::{keys, StatsCache};
use crate::db::Database;
use crate::scheduling::AlgorithmType;
use crate::services::cards::{self, CardError};
use crate::services::session;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckStatistics {
    pub deck_id: String,
    pub algorithm: AlgorithmType,
    pub total_cards: i64,
    pub new_cards: i64,
    pub due_cards: i64,
    /// Reviewed cards that are not due yet.
    pub learned_cards: i64,
    pub average_ease_factor: f64,
    pub average_stability: f64,
    pub total_reviews: i64,
    pub correct_reviews: i64,
    /// Percent, one decimal.
    pub accuracy: f64,
    pub generated_at: i64,
}

/// Deck summary, served from the stats cache while the entry is live.
///
/// Every committed review on the deck drops the cached entry.
pub async fn get_deck_statistics(
    db: &Database,
    cache: &StatsCache,
    deck_id: &str,
    user_id: &str,
    now: i64,
) -> Result<DeckStatistics, CardError> {
    let deck = cards::get_deck(db, deck_id, user_id).await?;

    let key = keys::deck_stats_key(deck_id);
    if let Some(cached) = cache.get::<DeckStatistics>(&key).await {
        tracing::debug!(deck_id, "deck statistics served from cache");
        return Ok(cached);
    }

    let row = sqlx::query(
        r#"
        SELECT
          COUNT(*) AS "total",
          COALESCE(SUM(CASE WHEN m."lastReviewedAt" IS NULL THEN 1 ELSE 0 END), 0) AS "newCards",
          COALESCE(SUM(CASE WHEN m."lastReviewedAt" IS NOT NULL AND m."nextReviewAt" <= ? THEN 1 ELSE 0 END), 0) AS "dueCards",
          COALESCE(AVG(CASE WHEN m."lastReviewedAt" IS NOT NULL THEN m."easeFactor" END), 0.0) AS "avgEase",
          COALESCE(AVG(CASE WHEN m."lastReviewedAt" IS NOT NULL THEN m."stability" END), 0.0) AS "avgStability",
          COALESCE(SUM(m."totalReviews"), 0) AS "totalReviews",
          COALESCE(SUM(m."correctReviews"), 0) AS "correctReviews"
        FROM "card_memory" m
        JOIN "flashcards" f ON f."id" = m."cardId"
        WHERE f."deckId" = ?
        "#,
    )
    .bind(now)
    .bind(deck_id)
    .fetch_one(db.pool())
    .await?;

    let total_cards: i64 = row.try_get("total")?;
    let new_cards: i64 = row.try_get("newCards")?;
    let due_cards: i64 = row.try_get("dueCards")?;
    let total_reviews: i64 = row.try_get("totalReviews")?;
    let correct_reviews: i64 = row.try_get("correctReviews")?;

    let stats = DeckStatistics {
        deck_id: deck.id,
        algorithm: deck.algorithm,
        total_cards,
        new_cards,
        due_cards,
        learned_cards: total_cards - new_cards - due_cards,
        average_ease_factor: row.try_get("avgEase")?,
        average_stability: row.try_get("avgStability")?,
        total_reviews,
        correct_reviews,
        accuracy: session::accuracy_percent(correct_reviews, total_reviews),
        generated_at: now,
    };

    cache.set(&key, &stats).await;
    Ok(stats)
}
