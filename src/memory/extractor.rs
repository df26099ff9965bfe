//! Conversation fact extraction
//!
//! Turns raw conversation turns into candidate memory items. The keyword
//! heuristic below is one interchangeable strategy; a model-driven
//! extractor implements the same trait and drops in without touching the
//! service.

use crate::database::{EventKind, FactKind, MemoryScope, Role};
use crate::error::Result;
use crate::memory::types::{
    EpisodicInput, Importance, MemoryActions, ObserveRequest, ProjectFactInput, UserMemoryInput,
};
use async_trait::async_trait;

/// Strategy for extracting memory candidates from a conversation window
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ObserveRequest) -> Result<MemoryActions>;
}

/// Keyword-based extraction
///
/// Preference phrasing in a user turn becomes a user memory candidate;
/// decision phrasing becomes a project fact candidate when the request
/// carries a project; every turn becomes an episodic interaction.
pub struct HeuristicExtractor;

const PREFERENCE_MARKERS: &[&str] = &["i prefer", "i like", "i love", "i always use"];
const DECISION_MARKERS: &[&str] = &["we should", "let's use", "we decided", "we will use"];

impl HeuristicExtractor {
    pub fn new() -> Self {
        HeuristicExtractor
    }
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for HeuristicExtractor {
    async fn extract(&self, request: &ObserveRequest) -> Result<MemoryActions> {
        let mut actions = MemoryActions::default();

        for message in &request.messages {
            if message.role == Role::User {
                let content = message.content.to_lowercase();

                if PREFERENCE_MARKERS.iter().any(|marker| content.contains(marker)) {
                    actions.add.user_memory.push(UserMemoryInput {
                        id: None,
                        scope: MemoryScope::Preference,
                        key: "user_preference".to_string(),
                        text: message.content.clone(),
                        importance: Importance::Medium,
                    });
                }

                if request.project_id.is_some()
                    && DECISION_MARKERS.iter().any(|marker| content.contains(marker))
                {
                    actions.add.project_facts.push(ProjectFactInput {
                        id: None,
                        kind: FactKind::Decision,
                        title: "Project decision".to_string(),
                        text: message.content.clone(),
                        confidence: 0.8,
                    });
                }
            }

            // Every turn is recorded as an interaction
            actions.add.episodic.push(EpisodicInput {
                text: format!("{}: {}", message.role, message.content),
                kind: EventKind::Interaction,
            });
        }

        Ok(actions)
    }
}
