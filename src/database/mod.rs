//! Database layer - PostgreSQL + pgvector stores for the four record kinds

pub mod conversation;
pub mod episodic;
pub mod postgres;
pub mod project_facts;
pub mod user_memory;

pub use conversation::{ConversationItem, ConversationLog, ConversationSummary, Role, ToolCall};
pub use episodic::{EpisodicEvent, EpisodicStore, EventKind};
pub use postgres::{init_pool, init_pool_for_migrations, migrations, PostgresPool};
pub use project_facts::{FactKind, ProjectFact, ProjectFactStore};
pub use user_memory::{MemoryScope, UserMemoryItem, UserMemoryStore};

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::memory::types::MemoryRepository;
use async_trait::async_trait;
use uuid::Uuid;

/// The production [`MemoryRepository`]: one store per record kind, sharing a pool
#[derive(Clone)]
pub struct PostgresRepository {
    user_memory: UserMemoryStore,
    project_facts: ProjectFactStore,
    episodic: EpisodicStore,
    conversations: ConversationLog,
}

impl PostgresRepository {
    /// Create a repository over a pool, applying the retrieval eligibility policy
    pub fn new(pool: PostgresPool, retrieval: &RetrievalConfig) -> Self {
        PostgresRepository {
            user_memory: UserMemoryStore::new(pool.clone(), retrieval.min_importance),
            project_facts: ProjectFactStore::new(pool.clone(), retrieval.min_confidence),
            episodic: EpisodicStore::new(pool.clone(), retrieval.episodic_window_days),
            conversations: ConversationLog::new(pool),
        }
    }

}

#[async_trait]
impl MemoryRepository for PostgresRepository {
    async fn get_user_memory_items(&self, user_id: &str) -> Result<Vec<UserMemoryItem>> {
        self.user_memory.get_all(user_id).await
    }

    async fn upsert_user_memory_item(&self, item: &UserMemoryItem) -> Result<Uuid> {
        self.user_memory.upsert(item).await
    }

    async fn delete_user_memory_item(&self, id: Uuid) -> Result<()> {
        self.user_memory.soft_delete(id).await
    }

    async fn search_user_memory(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<UserMemoryItem>> {
        self.user_memory
            .search(user_id, query_embedding, limit, min_similarity)
            .await
    }

    async fn get_project_facts(&self, project_id: &str) -> Result<Vec<ProjectFact>> {
        self.project_facts.get_all(project_id).await
    }

    async fn upsert_project_fact(&self, fact: &ProjectFact) -> Result<Uuid> {
        self.project_facts.upsert(fact).await
    }

    async fn delete_project_fact(&self, id: Uuid) -> Result<()> {
        self.project_facts.soft_delete(id).await
    }

    async fn search_project_facts(
        &self,
        project_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ProjectFact>> {
        self.project_facts
            .search(project_id, query_embedding, limit, min_similarity)
            .await
    }

    async fn get_episodic_events(&self, user_id: &str, limit: usize) -> Result<Vec<EpisodicEvent>> {
        self.episodic.get_recent(user_id, limit).await
    }

    async fn create_episodic_event(&self, event: &EpisodicEvent) -> Result<()> {
        self.episodic.create(event).await
    }

    async fn delete_episodic_event(&self, id: Uuid) -> Result<()> {
        self.episodic.soft_delete(id).await
    }

    async fn search_episodic_events(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<EpisodicEvent>> {
        self.episodic
            .search(user_id, query_embedding, limit, min_similarity)
            .await
    }

    async fn create_conversation_item(&self, item: &ConversationItem) -> Result<()> {
        self.conversations.append(item).await
    }

    async fn get_conversation_items(&self, conversation_id: &str) -> Result<Vec<ConversationItem>> {
        self.conversations.get(conversation_id).await
    }

    async fn get_conversation_summary(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSummary>> {
        self.conversations.get_summary(conversation_id).await
    }

    async fn upsert_conversation_summary(&self, summary: &ConversationSummary) -> Result<Uuid> {
        self.conversations.upsert_summary(summary).await
    }
}
