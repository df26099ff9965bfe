//! Request/response types and the repository seam for the memory service

use crate::database::{
    ConversationItem, ConversationSummary, EpisodicEvent, EventKind, FactKind, MemoryScope,
    ProjectFact, Role, ToolCall, UserMemoryItem,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied importance, mapped onto the persisted 1-5 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Importance {
    /// Persisted importance score
    pub fn score(&self) -> i32 {
        match self {
            Importance::Low => 2,
            Importance::Medium => 3,
            Importance::High => 4,
            Importance::Critical => 5,
        }
    }
}

/// Options controlling a memory load
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Maximum user memory items to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_user_items: Option<usize>,
    /// Maximum project facts to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_project_items: Option<usize>,
    /// Maximum episodic events to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_episodic_items: Option<usize>,
    /// Minimum cosine similarity for a search hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
}

/// Request to load relevant memories for a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub options: LoadOptions,
}

/// Loaded memories, one list per kind. Lists are empty, never absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadResponse {
    pub core_memory: Vec<UserMemoryItem>,
    pub semantic_memory: Vec<ProjectFact>,
    pub episodic_memory: Vec<EpisodicEvent>,
}

/// An inbound conversation turn, not yet persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// When the turn happened; defaults to now
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Request to observe a conversation window and extract memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserveRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub conversation_id: String,
    pub messages: Vec<IncomingMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Per-kind counts produced by an observe call
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObserveOutcome {
    pub user_memory_added: usize,
    pub project_facts_added: usize,
    pub episodic_added: usize,
    pub deleted: usize,
}

/// Input for creating or replacing a user memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemoryInput {
    /// Existing item ID to replace; a fresh ID is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub scope: MemoryScope,
    pub key: String,
    pub text: String,
    #[serde(default)]
    pub importance: Importance,
}

/// Input for creating or replacing a project fact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFactInput {
    /// Existing fact ID to replace; a fresh ID is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub kind: FactKind,
    pub title: String,
    pub text: String,
    pub confidence: f32,
}

/// Input for recording an episodic event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicInput {
    pub text: String,
    pub kind: EventKind,
}

/// Additions produced by an extractor, one list per kind
#[derive(Debug, Clone, Default)]
pub struct MemoryAdditions {
    pub user_memory: Vec<UserMemoryInput>,
    pub project_facts: Vec<ProjectFactInput>,
    pub episodic: Vec<EpisodicInput>,
}

/// Full set of actions produced by an extractor
#[derive(Debug, Clone, Default)]
pub struct MemoryActions {
    pub add: MemoryAdditions,
    /// IDs of items the conversation invalidated
    pub delete: Vec<Uuid>,
}

/// Request to upsert user memory items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemoryUpsertRequest {
    pub user_id: String,
    pub items: Vec<UserMemoryInput>,
}

/// Request to upsert project facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFactUpsertRequest {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
    pub facts: Vec<ProjectFactInput>,
}

/// Request to soft-delete memories by ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<Uuid>,
}

/// Per-kind record counts for a user
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub user_memory_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_fact_count: Option<usize>,
    pub episodic_event_count: usize,
}

/// Full memory dump for a user (data portability)
#[derive(Debug, Clone, Serialize)]
pub struct MemoryExport {
    pub user_memory: Vec<UserMemoryItem>,
    pub episodic_events: Vec<EpisodicEvent>,
}

/// Storage operations the memory service depends on
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    // User memory
    async fn get_user_memory_items(&self, user_id: &str) -> Result<Vec<UserMemoryItem>>;
    async fn upsert_user_memory_item(&self, item: &UserMemoryItem) -> Result<Uuid>;
    async fn delete_user_memory_item(&self, id: Uuid) -> Result<()>;
    async fn search_user_memory(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<UserMemoryItem>>;

    // Project facts
    async fn get_project_facts(&self, project_id: &str) -> Result<Vec<ProjectFact>>;
    async fn upsert_project_fact(&self, fact: &ProjectFact) -> Result<Uuid>;
    async fn delete_project_fact(&self, id: Uuid) -> Result<()>;
    async fn search_project_facts(
        &self,
        project_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ProjectFact>>;

    // Episodic events
    async fn get_episodic_events(&self, user_id: &str, limit: usize) -> Result<Vec<EpisodicEvent>>;
    async fn create_episodic_event(&self, event: &EpisodicEvent) -> Result<()>;
    async fn delete_episodic_event(&self, id: Uuid) -> Result<()>;
    async fn search_episodic_events(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<EpisodicEvent>>;

    // Conversation log
    async fn create_conversation_item(&self, item: &ConversationItem) -> Result<()>;
    async fn get_conversation_items(&self, conversation_id: &str) -> Result<Vec<ConversationItem>>;
    async fn get_conversation_summary(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSummary>>;
    async fn upsert_conversation_summary(&self, summary: &ConversationSummary) -> Result<Uuid>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_scores() {
        assert_eq!(Importance::Low.score(), 2);
        assert_eq!(Importance::Medium.score(), 3);
        assert_eq!(Importance::High.score(), 4);
        assert_eq!(Importance::Critical.score(), 5);
        assert_eq!(Importance::default(), Importance::Medium);
    }

    #[test]
    fn test_load_request_deserializes_without_options() {
        let req: LoadRequest = serde_json::from_str(
            r#"{"user_id": "u1", "query": "what do I like"}"#,
        )
        .unwrap();
        assert_eq!(req.user_id, "u1");
        assert!(req.options.max_user_items.is_none());
        assert!(req.project_id.is_none());
    }
}
