//! User memory storage and retrieval

use crate::database::PostgresPool;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Scope of a user memory item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Identity-level facts that should always be available
    Core,
    /// Likes, dislikes, and working-style preferences
    Preference,
    /// Situational context that may go stale
    Context,
    /// Biographical profile details
    Profile,
    /// Skills and proficiencies
    Skill,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Core => "core",
            MemoryScope::Preference => "preference",
            MemoryScope::Context => "context",
            MemoryScope::Profile => "profile",
            MemoryScope::Skill => "skill",
        }
    }
}

impl std::str::FromStr for MemoryScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "core" => Ok(MemoryScope::Core),
            "preference" => Ok(MemoryScope::Preference),
            "context" => Ok(MemoryScope::Context),
            "profile" => Ok(MemoryScope::Profile),
            "skill" => Ok(MemoryScope::Skill),
            _ => Err(Error::InvalidInput(format!("Unknown memory scope: {}", s))),
        }
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's personal memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemoryItem {
    /// Unique item ID
    pub id: Uuid,
    /// User who owns this item
    pub user_id: String,
    /// Scope of the item
    pub scope: MemoryScope,
    /// Stable key for the item within its scope
    pub key: String,
    /// Memory text
    pub text: String,
    /// Importance, 1 (discardable) to 5 (critical)
    pub importance: i32,
    /// Embedding of `text`; populated on the write path only
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Tombstone flag
    #[serde(skip)]
    pub is_deleted: bool,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// When the item was last updated
    pub updated_at: DateTime<Utc>,
    /// Computed by similarity search; never persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl UserMemoryItem {
    /// Create a new user memory item. Importance is clamped to [1, 5].
    pub fn new(
        user_id: impl Into<String>,
        scope: MemoryScope,
        key: impl Into<String>,
        text: impl Into<String>,
        importance: i32,
    ) -> Self {
        let now = Utc::now();
        UserMemoryItem {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            scope,
            key: key.into(),
            text: text.into(),
            importance: importance.clamp(1, 5),
            embedding: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            similarity: None,
        }
    }

    /// Set the item ID (used when re-upserting an existing item)
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Set the embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

#[derive(FromRow)]
struct UserMemoryRow {
    id: Uuid,
    user_id: String,
    scope: String,
    key: String,
    text: String,
    importance: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[sqlx(default)]
    similarity: Option<f32>,
}

impl UserMemoryRow {
    fn into_item(self) -> UserMemoryItem {
        UserMemoryItem {
            id: self.id,
            user_id: self.user_id,
            scope: self.scope.parse().unwrap_or(MemoryScope::Context),
            key: self.key,
            text: self.text,
            importance: self.importance,
            embedding: None,
            is_deleted: false,
            created_at: self.created_at,
            updated_at: self.updated_at,
            similarity: self.similarity,
        }
    }
}

/// User memory store backed by PostgreSQL + pgvector
#[derive(Clone)]
pub struct UserMemoryStore {
    pg_pool: PostgresPool,
    min_importance: i32,
}

impl UserMemoryStore {
    /// Create a new store. `min_importance` is the eligibility floor for
    /// similarity search; lower-importance items are stored but never surface.
    pub fn new(pg_pool: PostgresPool, min_importance: i32) -> Self {
        UserMemoryStore {
            pg_pool,
            min_importance,
        }
    }

    /// Insert-or-update keyed on id
    pub async fn upsert(&self, item: &UserMemoryItem) -> Result<Uuid> {
        let embedding = item.embedding.clone().map(Vector::from);

        sqlx::query(
            r#"
            INSERT INTO user_memory_items (
                id, user_id, scope, key, text, importance, embedding, is_deleted, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (id) DO UPDATE SET
                scope = EXCLUDED.scope,
                key = EXCLUDED.key,
                text = EXCLUDED.text,
                importance = EXCLUDED.importance,
                embedding = EXCLUDED.embedding,
                is_deleted = EXCLUDED.is_deleted,
                updated_at = NOW()
        "#,
        )
        .bind(item.id)
        .bind(&item.user_id)
        .bind(item.scope.as_str())
        .bind(&item.key)
        .bind(&item.text)
        .bind(item.importance)
        .bind(embedding)
        .bind(item.is_deleted)
        .bind(item.created_at)
        .execute(&self.pg_pool)
        .await?;

        Ok(item.id)
    }

    /// Get all live items for a user, most important first
    pub async fn get_all(&self, user_id: &str) -> Result<Vec<UserMemoryItem>> {
        let rows: Vec<UserMemoryRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, scope, key, text, importance, created_at, updated_at
            FROM user_memory_items
            WHERE user_id = $1 AND NOT is_deleted
            ORDER BY importance DESC, updated_at DESC
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pg_pool)
        .await?;

        Ok(rows.into_iter().map(UserMemoryRow::into_item).collect())
    }

    /// Soft-delete an item. Reports NotFound if no live row matched.
    pub async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_memory_items SET is_deleted = TRUE, updated_at = NOW() \
             WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .execute(&self.pg_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user memory item {}", id)));
        }

        Ok(())
    }

    /// Search items by cosine similarity against a query embedding.
    /// Results are ordered by ascending vector distance and filtered by the
    /// tombstone flag, the importance floor, and `min_similarity`.
    pub async fn search(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<UserMemoryItem>> {
        let embedding = Vector::from(query_embedding.to_vec());

        let rows: Vec<UserMemoryRow> = sqlx::query_as(
            r#"
            SELECT
                id, user_id, scope, key, text, importance, created_at, updated_at,
                (1 - (embedding <=> $1))::real AS similarity
            FROM user_memory_items
            WHERE user_id = $2
              AND NOT is_deleted
              AND importance >= $3
              AND embedding IS NOT NULL
              AND 1 - (embedding <=> $1) >= $4
            ORDER BY embedding <=> $1
            LIMIT $5
        "#,
        )
        .bind(&embedding)
        .bind(user_id)
        .bind(self.min_importance)
        .bind(min_similarity)
        .bind(limit as i64)
        .fetch_all(&self.pg_pool)
        .await?;

        Ok(rows.into_iter().map(UserMemoryRow::into_item).collect())
    }
}
