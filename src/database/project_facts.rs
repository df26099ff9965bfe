//! Project fact storage and retrieval

use crate::database::PostgresPool;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of a project fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    Decision,
    Requirement,
    Constraint,
    Context,
    Assumption,
    Risk,
    Fact,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Decision => "decision",
            FactKind::Requirement => "requirement",
            FactKind::Constraint => "constraint",
            FactKind::Context => "context",
            FactKind::Assumption => "assumption",
            FactKind::Risk => "risk",
            FactKind::Fact => "fact",
        }
    }
}

impl std::str::FromStr for FactKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "decision" => Ok(FactKind::Decision),
            "requirement" => Ok(FactKind::Requirement),
            "constraint" => Ok(FactKind::Constraint),
            "context" => Ok(FactKind::Context),
            "assumption" => Ok(FactKind::Assumption),
            "risk" => Ok(FactKind::Risk),
            "fact" => Ok(FactKind::Fact),
            _ => Err(Error::InvalidInput(format!("Unknown fact kind: {}", s))),
        }
    }
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A project-level fact or decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFact {
    /// Unique fact ID
    pub id: Uuid,
    /// Project this fact belongs to
    pub project_id: String,
    /// Kind of fact
    pub kind: FactKind,
    /// Short title
    pub title: String,
    /// Fact text
    pub text: String,
    /// Extraction confidence, 0.0 to 1.0
    pub confidence: f32,
    /// Embedding of `text`; populated on the write path only
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Conversation the fact was extracted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
    /// Tombstone flag
    #[serde(skip)]
    pub is_deleted: bool,
    /// When the fact was created
    pub created_at: DateTime<Utc>,
    /// When the fact was last updated
    pub updated_at: DateTime<Utc>,
    /// Computed by similarity search; never persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl ProjectFact {
    /// Create a new project fact. Confidence is clamped to [0, 1].
    pub fn new(
        project_id: impl Into<String>,
        kind: FactKind,
        title: impl Into<String>,
        text: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let now = Utc::now();
        ProjectFact {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            kind,
            title: title.into(),
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            embedding: None,
            source_conversation_id: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            similarity: None,
        }
    }

    /// Set the fact ID (used when re-upserting an existing fact)
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Set the source conversation
    pub fn with_source_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.source_conversation_id = Some(conversation_id.into());
        self
    }

    /// Set the embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

#[derive(FromRow)]
struct ProjectFactRow {
    id: Uuid,
    project_id: String,
    kind: String,
    title: String,
    text: String,
    confidence: f32,
    source_conversation_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[sqlx(default)]
    similarity: Option<f32>,
}

impl ProjectFactRow {
    fn into_fact(self) -> ProjectFact {
        ProjectFact {
            id: self.id,
            project_id: self.project_id,
            kind: self.kind.parse().unwrap_or(FactKind::Fact),
            title: self.title,
            text: self.text,
            confidence: self.confidence,
            embedding: None,
            source_conversation_id: self.source_conversation_id,
            is_deleted: false,
            created_at: self.created_at,
            updated_at: self.updated_at,
            similarity: self.similarity,
        }
    }
}

/// Project fact store backed by PostgreSQL + pgvector
#[derive(Clone)]
pub struct ProjectFactStore {
    pg_pool: PostgresPool,
    min_confidence: f32,
}

impl ProjectFactStore {
    /// Create a new store. `min_confidence` is the eligibility floor for
    /// similarity search; lower-confidence facts are stored but never surface.
    pub fn new(pg_pool: PostgresPool, min_confidence: f32) -> Self {
        ProjectFactStore {
            pg_pool,
            min_confidence,
        }
    }

    /// Insert-or-update keyed on id
    pub async fn upsert(&self, fact: &ProjectFact) -> Result<Uuid> {
        let embedding = fact.embedding.clone().map(Vector::from);

        sqlx::query(
            r#"
            INSERT INTO project_facts (
                id, project_id, kind, title, text, confidence, embedding,
                source_conversation_id, is_deleted, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (id) DO UPDATE SET
                kind = EXCLUDED.kind,
                title = EXCLUDED.title,
                text = EXCLUDED.text,
                confidence = EXCLUDED.confidence,
                embedding = EXCLUDED.embedding,
                is_deleted = EXCLUDED.is_deleted,
                updated_at = NOW()
        "#,
        )
        .bind(fact.id)
        .bind(&fact.project_id)
        .bind(fact.kind.as_str())
        .bind(&fact.title)
        .bind(&fact.text)
        .bind(fact.confidence)
        .bind(embedding)
        .bind(&fact.source_conversation_id)
        .bind(fact.is_deleted)
        .bind(fact.created_at)
        .execute(&self.pg_pool)
        .await?;

        Ok(fact.id)
    }

    /// Get all live facts for a project, most confident first
    pub async fn get_all(&self, project_id: &str) -> Result<Vec<ProjectFact>> {
        let rows: Vec<ProjectFactRow> = sqlx::query_as(
            r#"
            SELECT id, project_id, kind, title, text, confidence,
                   source_conversation_id, created_at, updated_at
            FROM project_facts
            WHERE project_id = $1 AND NOT is_deleted
            ORDER BY confidence DESC, updated_at DESC
        "#,
        )
        .bind(project_id)
        .fetch_all(&self.pg_pool)
        .await?;

        Ok(rows.into_iter().map(ProjectFactRow::into_fact).collect())
    }

    /// Soft-delete a fact. Reports NotFound if no live row matched.
    pub async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE project_facts SET is_deleted = TRUE, updated_at = NOW() \
             WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .execute(&self.pg_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("project fact {}", id)));
        }

        Ok(())
    }

    /// Search facts by cosine similarity against a query embedding.
    /// Results are ordered by ascending vector distance and filtered by the
    /// tombstone flag, the confidence floor, and `min_similarity`.
    pub async fn search(
        &self,
        project_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ProjectFact>> {
        let embedding = Vector::from(query_embedding.to_vec());

        let rows: Vec<ProjectFactRow> = sqlx::query_as(
            r#"
            SELECT
                id, project_id, kind, title, text, confidence,
                source_conversation_id, created_at, updated_at,
                (1 - (embedding <=> $1))::real AS similarity
            FROM project_facts
            WHERE project_id = $2
              AND NOT is_deleted
              AND confidence >= $3
              AND embedding IS NOT NULL
              AND 1 - (embedding <=> $1) >= $4
            ORDER BY embedding <=> $1
            LIMIT $5
        "#,
        )
        .bind(&embedding)
        .bind(project_id)
        .bind(self.min_confidence)
        .bind(min_similarity)
        .bind(limit as i64)
        .fetch_all(&self.pg_pool)
        .await?;

        Ok(rows.into_iter().map(ProjectFactRow::into_fact).collect())
    }
}
