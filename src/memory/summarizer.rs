//! Conversation summarization
//!
//! Maintains a rolling per-conversation summary via an LLM completion
//! boundary. The chat client itself lives outside this crate; anything
//! implementing [`LlmClient`] works.

use crate::database::{ConversationItem, ConversationSummary};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Completion response format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Text,
}

/// Options for an LLM completion call
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

/// Boundary to the chat-completion service
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> Result<String>;
}

/// Configuration for conversation summarization
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Model used for summarization
    pub model: String,
    /// Summarize every N messages
    pub trigger_every_n: usize,
    /// Or after this much time since the last summary
    pub trigger_interval: Duration,
    /// Maximum messages included in one summarization window
    pub max_window_size: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        SummarizerConfig {
            model: "gpt-4".to_string(),
            trigger_every_n: 10,
            trigger_interval: Duration::from_secs(5 * 60),
            max_window_size: 50,
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

/// Structured output of one summarization pass
#[derive(Debug, Clone, Deserialize)]
pub struct SummarizationResult {
    pub dialogue_summary: String,
    #[serde(default)]
    pub open_tasks: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
}

/// Rolling conversation summarizer
pub struct Summarizer {
    config: SummarizerConfig,
    llm: Arc<dyn LlmClient>,
}

impl Summarizer {
    pub fn new(config: SummarizerConfig, llm: Arc<dyn LlmClient>) -> Self {
        Summarizer { config, llm }
    }

    /// Whether a new summarization pass is due
    pub fn should_summarize(&self, message_count: usize, last_summarized_at: DateTime<Utc>) -> bool {
        if message_count >= self.config.trigger_every_n {
            return true;
        }

        let elapsed = Utc::now().signed_duration_since(last_summarized_at);
        elapsed.to_std().map(|e| e >= self.config.trigger_interval).unwrap_or(false)
    }

    /// Summarize a conversation window, folding in the previous summary
    pub async fn summarize(
        &self,
        messages: &[ConversationItem],
        previous: Option<&ConversationSummary>,
    ) -> Result<SummarizationResult> {
        let window = if messages.len() > self.config.max_window_size {
            &messages[messages.len() - self.config.max_window_size..]
        } else {
            messages
        };

        let prompt = self.build_prompt(window, previous);

        debug!(
            message_count = window.len(),
            has_previous_summary = previous.is_some(),
            "Generating conversation summary"
        );

        let response = self
            .llm
            .complete(
                &prompt,
                &LlmOptions {
                    model: self.config.model.clone(),
                    temperature: self.config.temperature,
                    max_tokens: self.config.max_tokens,
                    response_format: ResponseFormat::Json,
                },
            )
            .await?;

        let result: SummarizationResult = serde_json::from_str(&response)
            .map_err(|e| Error::Internal(format!("failed to parse summarization result: {}", e)))?;

        info!(
            open_tasks = result.open_tasks.len(),
            entities = result.entities.len(),
            decisions = result.decisions.len(),
            "Conversation summarized"
        );

        Ok(result)
    }

    fn build_prompt(
        &self,
        messages: &[ConversationItem],
        previous: Option<&ConversationSummary>,
    ) -> String {
        let mut prompt = String::from(
            "You are analyzing a conversation to extract key information. Your task is to:\n\
             1. Provide a concise 2-3 sentence summary of the conversation\n\
             2. List any open tasks or action items mentioned\n\
             3. Identify people, systems, services, or tools mentioned\n\
             4. Note any decisions or conclusions reached\n\n\
             Be precise and factual. Only include information explicitly mentioned in the conversation.\n\n",
        );

        if let Some(previous) = previous {
            if !previous.dialogue_summary.is_empty() {
                prompt.push_str(&format!(
                    "Previous Summary:\n{}\n\nPrevious Open Tasks:\n{}\n\nPrevious Entities:\n{}\n\nPrevious Decisions:\n{}\n\n",
                    previous.dialogue_summary,
                    format_list(&previous.open_tasks),
                    format_list(&previous.entities),
                    format_list(&previous.decisions),
                ));
            }
        }

        prompt.push_str("Recent Conversation:\n");
        for message in messages {
            prompt.push_str(&format!("{}: {}\n", message.role, message.content));
        }

        prompt.push_str(
            "\nReturn your analysis as JSON with this exact structure:\n\
             {\n\
             \x20 \"dialogue_summary\": \"2-3 sentence summary of the conversation\",\n\
             \x20 \"open_tasks\": [\"task 1\", \"task 2\"],\n\
             \x20 \"entities\": [\"entity 1\", \"entity 2\"],\n\
             \x20 \"decisions\": [\"decision 1\", \"decision 2\"]\n\
             }\n\n\
             Ensure the response is valid JSON.",
        );

        prompt
    }

    /// Fold a fresh result into the stored summary. Entities and decisions
    /// accumulate (deduplicated); open tasks are replaced, since unlisted
    /// tasks are assumed completed.
    pub fn merge_summaries(
        &self,
        previous: Option<&ConversationSummary>,
        conversation_id: &str,
        fresh: SummarizationResult,
    ) -> ConversationSummary {
        match previous {
            None => ConversationSummary {
                id: Uuid::new_v4(),
                conversation_id: conversation_id.to_string(),
                dialogue_summary: fresh.dialogue_summary,
                open_tasks: fresh.open_tasks,
                entities: fresh.entities,
                decisions: fresh.decisions,
                updated_at: Utc::now(),
            },
            Some(previous) => ConversationSummary {
                id: previous.id,
                conversation_id: previous.conversation_id.clone(),
                dialogue_summary: fresh.dialogue_summary,
                open_tasks: fresh.open_tasks,
                entities: merge_unique(&previous.entities, fresh.entities),
                decisions: merge_unique(&previous.decisions, fresh.decisions),
                updated_at: Utc::now(),
            },
        }
    }
}

fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }

    let mut result = String::new();
    for (i, item) in items.iter().enumerate() {
        if i >= 10 {
            result.push_str("- ...\n");
            break;
        }
        result.push_str(&format!("- {}\n", item));
    }
    result
}

fn merge_unique(existing: &[String], fresh: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for item in existing.iter().cloned().chain(fresh) {
        if seen.insert(item.clone()) {
            merged.push(item);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Role;

    struct CannedLlm(String);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn summary(conversation_id: &str) -> ConversationSummary {
        ConversationSummary {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            dialogue_summary: "Earlier discussion".to_string(),
            open_tasks: vec!["write docs".to_string()],
            entities: vec!["postgres".to_string()],
            decisions: vec!["use pgvector".to_string()],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_should_summarize_by_count_and_interval() {
        let summarizer = Summarizer::new(
            SummarizerConfig::default(),
            Arc::new(CannedLlm(String::new())),
        );

        assert!(summarizer.should_summarize(10, Utc::now()));
        assert!(!summarizer.should_summarize(3, Utc::now()));
        assert!(summarizer.should_summarize(3, Utc::now() - chrono::Duration::minutes(10)));
    }

    #[tokio::test]
    async fn test_summarize_parses_llm_json() {
        let summarizer = Summarizer::new(
            SummarizerConfig::default(),
            Arc::new(CannedLlm(
                r#"{"dialogue_summary": "Talked about Rust.", "open_tasks": ["benchmark"], "entities": ["tokio"], "decisions": []}"#
                    .to_string(),
            )),
        );

        let messages = vec![ConversationItem::new(
            "conv1",
            Role::User,
            "Rust is great",
            Utc::now(),
        )];
        let result = summarizer.summarize(&messages, None).await.unwrap();

        assert_eq!(result.dialogue_summary, "Talked about Rust.");
        assert_eq!(result.open_tasks, vec!["benchmark"]);
        assert!(result.decisions.is_empty());
    }

    #[tokio::test]
    async fn test_summarize_rejects_malformed_json() {
        let summarizer = Summarizer::new(
            SummarizerConfig::default(),
            Arc::new(CannedLlm("not json".to_string())),
        );

        let messages = vec![ConversationItem::new("c", Role::User, "hi", Utc::now())];
        assert!(summarizer.summarize(&messages, None).await.is_err());
    }

    #[test]
    fn test_merge_deduplicates_and_replaces_tasks() {
        let summarizer = Summarizer::new(
            SummarizerConfig::default(),
            Arc::new(CannedLlm(String::new())),
        );

        let previous = summary("conv1");
        let fresh = SummarizationResult {
            dialogue_summary: "New summary".to_string(),
            open_tasks: vec!["ship release".to_string()],
            entities: vec!["postgres".to_string(), "redis".to_string()],
            decisions: vec![],
        };

        let merged = summarizer.merge_summaries(Some(&previous), "conv1", fresh);

        assert_eq!(merged.dialogue_summary, "New summary");
        // Old task replaced, entities deduplicated-merged, decisions kept
        assert_eq!(merged.open_tasks, vec!["ship release"]);
        assert_eq!(merged.entities, vec!["postgres", "redis"]);
        assert_eq!(merged.decisions, vec!["use pgvector"]);
    }
}
