//! Episodic event storage and retrieval
//!
//! Episodic events are time-bound: only events inside a rolling recency
//! window are eligible for similarity search. Older events stay on disk.

use crate::database::PostgresPool;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of an episodic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Interaction,
    Decision,
    Milestone,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Interaction => "interaction",
            EventKind::Decision => "decision",
            EventKind::Milestone => "milestone",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "interaction" => Ok(EventKind::Interaction),
            "decision" => Ok(EventKind::Decision),
            "milestone" => Ok(EventKind::Milestone),
            _ => Err(Error::InvalidInput(format!("Unknown event kind: {}", s))),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bound event or interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEvent {
    /// Unique event ID
    pub id: Uuid,
    /// User the event belongs to
    pub user_id: String,
    /// Project the event belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Conversation the event was recorded from
    pub conversation_id: String,
    /// When the event happened
    pub occurred_at: DateTime<Utc>,
    /// Event text
    pub text: String,
    /// Kind of event
    pub kind: EventKind,
    /// Embedding of `text`; populated on the write path only
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Tombstone flag
    #[serde(skip)]
    pub is_deleted: bool,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Computed by similarity search; never persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl EpisodicEvent {
    /// Create a new episodic event
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        text: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        EpisodicEvent {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            project_id: None,
            conversation_id: conversation_id.into(),
            occurred_at,
            text: text.into(),
            kind,
            embedding: None,
            is_deleted: false,
            created_at: Utc::now(),
            similarity: None,
        }
    }

    /// Set the project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

#[derive(FromRow)]
struct EpisodicEventRow {
    id: Uuid,
    user_id: String,
    project_id: Option<String>,
    conversation_id: String,
    occurred_at: DateTime<Utc>,
    text: String,
    kind: String,
    created_at: DateTime<Utc>,
    #[sqlx(default)]
    similarity: Option<f32>,
}

impl EpisodicEventRow {
    fn into_event(self) -> EpisodicEvent {
        EpisodicEvent {
            id: self.id,
            user_id: self.user_id,
            project_id: self.project_id,
            conversation_id: self.conversation_id,
            occurred_at: self.occurred_at,
            text: self.text,
            kind: self.kind.parse().unwrap_or(EventKind::Interaction),
            embedding: None,
            is_deleted: false,
            created_at: self.created_at,
            similarity: self.similarity,
        }
    }
}

/// Episodic event store backed by PostgreSQL + pgvector
#[derive(Clone)]
pub struct EpisodicStore {
    pg_pool: PostgresPool,
    window_days: i32,
}

impl EpisodicStore {
    /// Create a new store. `window_days` bounds the recency window for
    /// similarity search eligibility.
    pub fn new(pg_pool: PostgresPool, window_days: i32) -> Self {
        EpisodicStore {
            pg_pool,
            window_days,
        }
    }

    /// Append a new event
    pub async fn create(&self, event: &EpisodicEvent) -> Result<()> {
        let embedding = event.embedding.clone().map(Vector::from);

        sqlx::query(
            r#"
            INSERT INTO episodic_events (
                id, user_id, project_id, conversation_id, occurred_at,
                text, kind, embedding, is_deleted, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
        )
        .bind(event.id)
        .bind(&event.user_id)
        .bind(&event.project_id)
        .bind(&event.conversation_id)
        .bind(event.occurred_at)
        .bind(&event.text)
        .bind(event.kind.as_str())
        .bind(embedding)
        .bind(event.is_deleted)
        .bind(event.created_at)
        .execute(&self.pg_pool)
        .await?;

        Ok(())
    }

    /// Get the most recent live events for a user
    pub async fn get_recent(&self, user_id: &str, limit: usize) -> Result<Vec<EpisodicEvent>> {
        let rows: Vec<EpisodicEventRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, project_id, conversation_id, occurred_at, text, kind, created_at
            FROM episodic_events
            WHERE user_id = $1 AND NOT is_deleted
            ORDER BY occurred_at DESC
            LIMIT $2
        "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pg_pool)
        .await?;

        Ok(rows.into_iter().map(EpisodicEventRow::into_event).collect())
    }

    /// Soft-delete an event. Reports NotFound if no live row matched.
    pub async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let result =
            sqlx::query("UPDATE episodic_events SET is_deleted = TRUE WHERE id = $1 AND NOT is_deleted")
                .bind(id)
                .execute(&self.pg_pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("episodic event {}", id)));
        }

        Ok(())
    }

    /// Search events by cosine similarity against a query embedding.
    /// Results are ordered by ascending vector distance and filtered by the
    /// tombstone flag, the recency window, and `min_similarity`.
    pub async fn search(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<EpisodicEvent>> {
        let embedding = Vector::from(query_embedding.to_vec());

        let rows: Vec<EpisodicEventRow> = sqlx::query_as(
            r#"
            SELECT
                id, user_id, project_id, conversation_id, occurred_at, text, kind, created_at,
                (1 - (embedding <=> $1))::real AS similarity
            FROM episodic_events
            WHERE user_id = $2
              AND NOT is_deleted
              AND occurred_at > NOW() - ($3::int * INTERVAL '1 day')
              AND embedding IS NOT NULL
              AND 1 - (embedding <=> $1) >= $4
            ORDER BY embedding <=> $1
            LIMIT $5
        "#,
        )
        .bind(&embedding)
        .bind(user_id)
        .bind(self.window_days)
        .bind(min_similarity)
        .bind(limit as i64)
        .fetch_all(&self.pg_pool)
        .await?;

        Ok(rows.into_iter().map(EpisodicEventRow::into_event).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = EpisodicEvent::new(
            "user1",
            "conv-1",
            Utc::now(),
            "user: shipped the release",
            EventKind::Milestone,
        )
        .with_project("proj-1");

        assert_eq!(event.kind, EventKind::Milestone);
        assert_eq!(event.project_id.as_deref(), Some("proj-1"));
        assert!(!event.is_deleted);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [EventKind::Interaction, EventKind::Decision, EventKind::Milestone] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("party".parse::<EventKind>().is_err());
    }
}
