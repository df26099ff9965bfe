//! PostgreSQL database connection and migrations

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// PostgreSQL connection pool type alias
pub type PostgresPool = PgPool;

/// Initialize the PostgreSQL connection pool
pub async fn init_pool(config: &DatabaseConfig) -> Result<PostgresPool> {
    init_pool_with_options(config, true).await
}

/// Initialize the PostgreSQL connection pool without pgvector check
/// Use this for running migrations before pgvector is installed
pub async fn init_pool_for_migrations(config: &DatabaseConfig) -> Result<PostgresPool> {
    init_pool_with_options(config, false).await
}

/// Initialize the PostgreSQL connection pool with options
async fn init_pool_with_options(
    config: &DatabaseConfig,
    require_pgvector: bool,
) -> Result<PostgresPool> {
    info!("Initializing PostgreSQL connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(config.url.expose_secret())
        .await?;

    verify_database(&pool, require_pgvector).await?;

    info!("PostgreSQL connection pool initialized successfully");
    Ok(pool)
}

/// Verify database connection and optionally check for required extensions
async fn verify_database(pool: &PgPool, require_pgvector: bool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(Error::Database)?;

    if require_pgvector {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(pool)
                .await?;

        if result.is_none() {
            return Err(Error::Database(sqlx::Error::Configuration(
                "pgvector extension is not installed. Run: CREATE EXTENSION vector;".into(),
            )));
        }
    }

    Ok(())
}

/// Database migrations
pub mod migrations {
    use super::*;
    use tracing::warn;

    /// Run all migrations. The embedding column width must match the
    /// configured embedding model's output dimensionality.
    pub async fn run(pool: &PgPool, dimension: usize) -> Result<()> {
        info!("Running database migrations");

        // Try to create pgvector extension (requires superuser or extension already available)
        match sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(pool)
            .await
        {
            Ok(_) => info!("pgvector extension enabled"),
            Err(e) => {
                warn!("Could not create pgvector extension: {}. Vector features may not work.", e);
                warn!("If you need vector support, run as superuser: CREATE EXTENSION vector;");
            }
        }

        // User memory items: per-user preferences, profile, and context
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS user_memory_items (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                text TEXT NOT NULL,
                importance INTEGER NOT NULL DEFAULT 3,
                embedding vector({dimension}),
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#
        ))
        .execute(pool)
        .await?;

        // Project facts: decisions, requirements, and constraints
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS project_facts (
                id UUID PRIMARY KEY,
                project_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                embedding vector({dimension}),
                source_conversation_id TEXT,
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#
        ))
        .execute(pool)
        .await?;

        // Episodic events: time-bound interactions and milestones
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS episodic_events (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                project_id TEXT,
                conversation_id TEXT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL,
                text TEXT NOT NULL,
                kind TEXT NOT NULL,
                embedding vector({dimension}),
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#
        ))
        .execute(pool)
        .await?;

        // Conversation items: append-only raw log, extraction input and audit trail
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_items (
                id UUID PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_calls JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await?;

        // Conversation summaries: one rolling summary per conversation
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_summaries (
                id UUID PRIMARY KEY,
                conversation_id TEXT NOT NULL UNIQUE,
                dialogue_summary TEXT NOT NULL,
                open_tasks JSONB NOT NULL DEFAULT '[]',
                entities JSONB NOT NULL DEFAULT '[]',
                decisions JSONB NOT NULL DEFAULT '[]',
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await?;

        // Partial indexes: every read path filters the tombstone flag
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_memory_items_user_id \
             ON user_memory_items(user_id) WHERE NOT is_deleted",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_project_facts_project_id \
             ON project_facts(project_id) WHERE NOT is_deleted",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodic_events_user_time \
             ON episodic_events(user_id, occurred_at DESC) WHERE NOT is_deleted",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversation_items_conversation_id \
             ON conversation_items(conversation_id)",
        )
        .execute(pool)
        .await?;

        // Vector similarity search indexes (IVFFlat, cosine distance)
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_user_memory_items_embedding ON user_memory_items
            USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)
        "#,
        )
        .execute(pool)
        .await
        .ok(); // Ignore if not enough data or vector type not available

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_project_facts_embedding ON project_facts
            USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)
        "#,
        )
        .execute(pool)
        .await
        .ok();

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_episodic_events_embedding ON episodic_events
            USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)
        "#,
        )
        .execute(pool)
        .await
        .ok();

        info!("Database migrations completed");
        Ok(())
    }
}
