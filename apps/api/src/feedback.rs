//! Feedback store: append-only record of chat exchanges and their ratings.
//!
//! Highly rated exchanges are fed back into the system prompt as learned examples.
//! Ratings never overwrite: each rating is a new row and the latest one counts.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::conversation::{ConversationRow, LearnedExample, RatingRow};

pub const MAX_RATING: i32 = 5;
/// A latest rating at or above this marks an exchange as a learned example.
pub const HIGH_RATING: i32 = 4;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conversation {0} not found")]
    UnknownConversation(Uuid),

    #[error("Rating must be between 0 and 5, got {0}")]
    InvalidRating(i32),
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Stores one user/assistant exchange and returns its conversation id.
    async fn record_turn(
        &self,
        session_id: Uuid,
        user_message: &str,
        ai_response: &str,
    ) -> Result<Uuid, FeedbackError>;

    async fn rate(
        &self,
        conversation_id: Uuid,
        rating: i32,
        was_helpful: Option<bool>,
    ) -> Result<(), FeedbackError>;

    /// Exchanges whose latest rating is high or marked helpful, best first.
    async fn high_rated(&self, limit: usize) -> Result<Vec<LearnedExample>, FeedbackError>;
}

fn validate_rating(rating: i32) -> Result<(), FeedbackError> {
    if (0..=MAX_RATING).contains(&rating) {
        Ok(())
    } else {
        Err(FeedbackError::InvalidRating(rating))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres
// ────────────────────────────────────────────────────────────────────────────

pub struct PgFeedbackStore {
    pool: PgPool,
}

impl PgFeedbackStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedbackStore for PgFeedbackStore {
    async fn record_turn(
        &self,
        session_id: Uuid,
        user_message: &str,
        ai_response: &str,
    ) -> Result<Uuid, FeedbackError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO conversations (id, session_id, user_message, ai_response)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(session_id)
        .bind(user_message)
        .bind(ai_response)
        .execute(&self.pool)
        .await?;

        debug!(conversation_id = %id, %session_id, "conversation recorded");
        Ok(id)
    }

    async fn rate(
        &self,
        conversation_id: Uuid,
        rating: i32,
        was_helpful: Option<bool>,
    ) -> Result<(), FeedbackError> {
        validate_rating(rating)?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1)")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(FeedbackError::UnknownConversation(conversation_id));
        }

        // Append-only INSERT
        sqlx::query(
            r#"
            INSERT INTO conversation_ratings (id, conversation_id, rating, was_helpful)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(rating)
        .bind(was_helpful)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn high_rated(&self, limit: usize) -> Result<Vec<LearnedExample>, FeedbackError> {
        let rows = sqlx::query_as::<_, LearnedExample>(
            r#"
            SELECT c.user_message, c.ai_response
            FROM conversations c
            JOIN LATERAL (
                SELECT r.rating, r.was_helpful
                FROM conversation_ratings r
                WHERE r.conversation_id = c.id
                ORDER BY r.created_at DESC
                LIMIT 1
            ) latest ON TRUE
            WHERE latest.rating >= $1 OR latest.was_helpful = TRUE
            ORDER BY latest.rating DESC, c.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(HIGH_RATING)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory (no DATABASE_URL, and tests)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryTables {
    conversations: Vec<ConversationRow>,
    ratings: Vec<RatingRow>,
}

#[derive(Default)]
pub struct MemoryFeedbackStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, MemoryTables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    pub fn conversation_count(&self) -> usize {
        self.tables().conversations.len()
    }

    #[cfg(test)]
    pub fn rating_count(&self) -> usize {
        self.tables().ratings.len()
    }
}

#[async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn record_turn(
        &self,
        session_id: Uuid,
        user_message: &str,
        ai_response: &str,
    ) -> Result<Uuid, FeedbackError> {
        let id = Uuid::new_v4();
        self.tables().conversations.push(ConversationRow {
            id,
            session_id,
            user_message: user_message.to_string(),
            ai_response: ai_response.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn rate(
        &self,
        conversation_id: Uuid,
        rating: i32,
        was_helpful: Option<bool>,
    ) -> Result<(), FeedbackError> {
        validate_rating(rating)?;
        let mut tables = self.tables();
        if !tables.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(FeedbackError::UnknownConversation(conversation_id));
        }
        tables.ratings.push(RatingRow {
            id: Uuid::new_v4(),
            conversation_id,
            rating,
            was_helpful,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn high_rated(&self, limit: usize) -> Result<Vec<LearnedExample>, FeedbackError> {
        let tables = self.tables();

        // Insertion order stands in for `created_at` so ties resolve deterministically.
        let mut rated: Vec<(i32, usize, &ConversationRow)> = tables
            .conversations
            .iter()
            .enumerate()
            .filter_map(|(seq, conversation)| {
                let latest = tables
                    .ratings
                    .iter()
                    .rev()
                    .find(|r| r.conversation_id == conversation.id)?;
                let keep = latest.rating >= HIGH_RATING || latest.was_helpful == Some(true);
                keep.then_some((latest.rating, seq, conversation))
            })
            .collect();

        rated.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(rated
            .into_iter()
            .take(limit)
            .map(|(_, _, c)| LearnedExample {
                user_message: c.user_message.clone(),
                ai_response: c.ai_response.clone(),
            })
            .collect())
    }
}
