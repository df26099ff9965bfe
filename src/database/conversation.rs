//! Conversation log and summaries
//!
//! The conversation log is append-only: it is never embedded or searched,
//! serving only as extraction input and audit trail.

use crate::database::PostgresPool;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tool invocation recorded alongside a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Arguments passed to the tool
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    /// Tool output, if recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Unique message ID
    pub id: Uuid,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Author role
    pub role: Role,
    /// Message content
    pub content: String,
    /// Tool invocations attached to the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl ConversationItem {
    /// Create a new conversation item
    pub fn new(
        conversation_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        ConversationItem {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            tool_calls: None,
            created_at,
        }
    }

    /// Attach tool calls
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }
}

/// A rolling summary of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Unique summary ID
    pub id: Uuid,
    /// Conversation this summary covers
    pub conversation_id: String,
    /// 2-3 sentence dialogue summary
    pub dialogue_summary: String,
    /// Outstanding tasks mentioned in the conversation
    pub open_tasks: Vec<String>,
    /// People, systems, and tools mentioned
    pub entities: Vec<String>,
    /// Decisions reached
    pub decisions: Vec<String>,
    /// When the summary was last refreshed
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ConversationItemRow {
    id: Uuid,
    conversation_id: String,
    role: String,
    content: String,
    tool_calls: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl ConversationItemRow {
    fn into_item(self) -> ConversationItem {
        let tool_calls = self.tool_calls.and_then(|value| {
            serde_json::from_value(value)
                .map_err(|e| warn!("Discarding malformed tool_calls payload: {}", e))
                .ok()
        });

        ConversationItem {
            id: self.id,
            conversation_id: self.conversation_id,
            role: match self.role.as_str() {
                "assistant" => Role::Assistant,
                "system" => Role::System,
                _ => Role::User,
            },
            content: self.content,
            tool_calls,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ConversationSummaryRow {
    id: Uuid,
    conversation_id: String,
    dialogue_summary: String,
    open_tasks: serde_json::Value,
    entities: serde_json::Value,
    decisions: serde_json::Value,
    updated_at: DateTime<Utc>,
}

fn string_list(value: serde_json::Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

impl ConversationSummaryRow {
    fn into_summary(self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            conversation_id: self.conversation_id,
            dialogue_summary: self.dialogue_summary,
            open_tasks: string_list(self.open_tasks),
            entities: string_list(self.entities),
            decisions: string_list(self.decisions),
            updated_at: self.updated_at,
        }
    }
}

/// Append-only conversation log backed by PostgreSQL
#[derive(Clone)]
pub struct ConversationLog {
    pg_pool: PostgresPool,
}

impl ConversationLog {
    /// Create a new conversation log
    pub fn new(pg_pool: PostgresPool) -> Self {
        ConversationLog { pg_pool }
    }

    /// Append a message to the log
    pub async fn append(&self, item: &ConversationItem) -> Result<()> {
        let tool_calls = item
            .tool_calls
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO conversation_items (
                id, conversation_id, role, content, tool_calls, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
        "#,
        )
        .bind(item.id)
        .bind(&item.conversation_id)
        .bind(item.role.as_str())
        .bind(&item.content)
        .bind(tool_calls)
        .bind(item.created_at)
        .execute(&self.pg_pool)
        .await?;

        Ok(())
    }

    /// Get all messages of a conversation, oldest first
    pub async fn get(&self, conversation_id: &str) -> Result<Vec<ConversationItem>> {
        let rows: Vec<ConversationItemRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, role, content, tool_calls, created_at
            FROM conversation_items
            WHERE conversation_id = $1
            ORDER BY created_at ASC
        "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pg_pool)
        .await?;

        Ok(rows.into_iter().map(ConversationItemRow::into_item).collect())
    }

    /// Insert-or-replace the rolling summary of a conversation
    pub async fn upsert_summary(&self, summary: &ConversationSummary) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO conversation_summaries (
                id, conversation_id, dialogue_summary, open_tasks, entities, decisions, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (conversation_id) DO UPDATE SET
                dialogue_summary = EXCLUDED.dialogue_summary,
                open_tasks = EXCLUDED.open_tasks,
                entities = EXCLUDED.entities,
                decisions = EXCLUDED.decisions,
                updated_at = NOW()
        "#,
        )
        .bind(summary.id)
        .bind(&summary.conversation_id)
        .bind(&summary.dialogue_summary)
        .bind(serde_json::to_value(&summary.open_tasks)?)
        .bind(serde_json::to_value(&summary.entities)?)
        .bind(serde_json::to_value(&summary.decisions)?)
        .execute(&self.pg_pool)
        .await?;

        Ok(summary.id)
    }

    /// Get the rolling summary of a conversation, if any
    pub async fn get_summary(&self, conversation_id: &str) -> Result<Option<ConversationSummary>> {
        let row: Option<ConversationSummaryRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, dialogue_summary, open_tasks, entities, decisions, updated_at
            FROM conversation_summaries
            WHERE conversation_id = $1
        "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pg_pool)
        .await?;

        Ok(row.map(ConversationSummaryRow::into_summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_creation() {
        let item = ConversationItem::new("conv-1", Role::User, "hello", Utc::now())
            .with_tool_calls(vec![ToolCall {
                name: "search".to_string(),
                arguments: serde_json::Map::new(),
                result: Some("ok".to_string()),
            }]);

        assert_eq!(item.conversation_id, "conv-1");
        assert_eq!(item.role, Role::User);
        assert_eq!(item.tool_calls.as_ref().map(|t| t.len()), Some(1));
    }

    #[test]
    fn test_tool_call_serialization_round_trip() {
        let mut arguments = serde_json::Map::new();
        arguments.insert("query".to_string(), serde_json::json!("rust"));
        let call = ToolCall {
            name: "web_search".to_string(),
            arguments,
            result: None,
        };

        let value = serde_json::to_value(vec![call]).unwrap();
        let parsed: Vec<ToolCall> = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "web_search");
        assert_eq!(parsed[0].arguments["query"], serde_json::json!("rust"));
    }
}
