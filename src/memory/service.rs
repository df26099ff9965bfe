//! Memory service orchestration
//!
//! Ties the embedding client, the repository, and the extractor into the
//! load / observe / upsert / delete operations. Each method is a single
//! request/response unit of work; there is no cross-call state.

use crate::database::{
    ConversationItem, ConversationSummary, EpisodicEvent, ProjectFact, UserMemoryItem,
};
use crate::error::{Error, Result};
use crate::memory::embedding::Embedder;
use crate::memory::extractor::Extractor;
use crate::memory::ranker::{RankedResult, Ranker};
use crate::memory::summarizer::Summarizer;
use crate::memory::types::{
    DeleteRequest, LoadRequest, LoadResponse, MemoryAdditions, MemoryExport, MemoryRepository,
    MemoryStats, ObserveOutcome, ObserveRequest, ProjectFactUpsertRequest, UserMemoryUpsertRequest,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_ITEM_LIMIT: usize = 20;
const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// Similarity assigned to user memory reached via the un-ranked fallback
const FALLBACK_USER_SIMILARITY: f32 = 1.0;
/// Similarity assigned to episodic events reached via the un-ranked fallback
const FALLBACK_EPISODIC_SIMILARITY: f32 = 0.8;

const STATS_EPISODIC_LIMIT: usize = 100;
const EXPORT_EPISODIC_LIMIT: usize = 1000;

/// Orchestrates memory retrieval and ingestion
pub struct MemoryService {
    repo: Arc<dyn MemoryRepository>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    ranker: Ranker,
}

impl MemoryService {
    pub fn new(
        repo: Arc<dyn MemoryRepository>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        MemoryService {
            repo,
            embedder,
            extractor,
            ranker: Ranker::new(),
        }
    }

    /// Retrieve the memories most relevant to a query.
    ///
    /// Each of the three searches falls back to an un-ranked read (most
    /// important / most confident / most recent) when similarity search
    /// comes up empty, so a cold store still answers. Results reached via
    /// fallback get a synthetic similarity so consumers see one shape.
    pub async fn load(&self, request: LoadRequest) -> Result<LoadResponse> {
        if request.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id is required".to_string()));
        }
        if request.query.trim().is_empty() {
            return Err(Error::InvalidInput("query is required".to_string()));
        }

        let max_user = request.options.max_user_items.unwrap_or(DEFAULT_ITEM_LIMIT);
        let max_project = request.options.max_project_items.unwrap_or(DEFAULT_ITEM_LIMIT);
        let max_episodic = request.options.max_episodic_items.unwrap_or(DEFAULT_ITEM_LIMIT);
        let min_similarity = request.options.min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY);

        let query_embedding = self.embedder.embed_single(&request.query).await?;
        debug!(
            user_id = %request.user_id,
            embedding_dim = query_embedding.len(),
            "Query embedded"
        );

        let mut user_memory = self
            .repo
            .search_user_memory(&request.user_id, &query_embedding, max_user, min_similarity)
            .await?;
        if user_memory.is_empty() {
            match self.repo.get_user_memory_items(&request.user_id).await {
                Ok(mut all) => {
                    all.truncate(max_user);
                    user_memory = all;
                }
                Err(e) => warn!("User memory fallback read failed: {}", e),
            }
        }

        let mut project_facts = Vec::new();
        if let Some(project_id) = request.project_id.as_deref().filter(|p| !p.is_empty()) {
            project_facts = self
                .repo
                .search_project_facts(project_id, &query_embedding, max_project, min_similarity)
                .await?;
            if project_facts.is_empty() {
                match self.repo.get_project_facts(project_id).await {
                    Ok(mut all) => {
                        all.truncate(max_project);
                        project_facts = all;
                    }
                    Err(e) => warn!("Project fact fallback read failed: {}", e),
                }
            }
        }

        let mut episodic_events = self
            .repo
            .search_episodic_events(&request.user_id, &query_embedding, max_episodic, min_similarity)
            .await?;
        if episodic_events.is_empty() {
            match self.repo.get_episodic_events(&request.user_id, max_episodic).await {
                Ok(recent) => episodic_events = recent,
                Err(e) => warn!("Episodic fallback read failed: {}", e),
            }
        }

        for item in &mut user_memory {
            item.similarity.get_or_insert(FALLBACK_USER_SIMILARITY);
        }
        for fact in &mut project_facts {
            if fact.similarity.is_none() {
                fact.similarity = Some(if fact.confidence > 0.0 {
                    fact.confidence
                } else {
                    1.0
                });
            }
        }
        for event in &mut episodic_events {
            event.similarity.get_or_insert(FALLBACK_EPISODIC_SIMILARITY);
        }

        info!(
            user_memory_count = user_memory.len(),
            project_facts_count = project_facts.len(),
            episodic_events_count = episodic_events.len(),
            "Memory load completed"
        );

        Ok(LoadResponse {
            core_memory: user_memory,
            semantic_memory: project_facts,
            episodic_memory: episodic_events,
        })
    }

    /// Persist a conversation window and extract memories from it.
    ///
    /// Raw-turn logging failures are isolated per turn; extraction and
    /// storage proceed regardless. All candidate texts across the three
    /// kinds are embedded in a single upstream call.
    pub async fn observe(&self, request: ObserveRequest) -> Result<ObserveOutcome> {
        if request.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id is required".to_string()));
        }
        if request.conversation_id.trim().is_empty() {
            return Err(Error::InvalidInput("conversation_id is required".to_string()));
        }
        if request.messages.is_empty() {
            return Err(Error::InvalidInput("messages must not be empty".to_string()));
        }

        for message in &request.messages {
            let mut item = ConversationItem::new(
                &request.conversation_id,
                message.role,
                &message.content,
                message.created_at.unwrap_or_else(Utc::now),
            );
            if let Some(tool_calls) = &message.tool_calls {
                item = item.with_tool_calls(tool_calls.clone());
            }
            if let Err(e) = self.repo.create_conversation_item(&item).await {
                error!("Failed to store conversation item: {}", e);
            }
        }

        let actions = self.extractor.extract(&request).await?;
        let (user_added, facts_added, episodic_added) =
            self.apply_additions(&request, actions.add).await?;

        let mut deleted = 0;
        for id in &actions.delete {
            // Episodic events are historical and not deletable from this
            // path; they stay as audit trail
            if self.repo.delete_user_memory_item(*id).await.is_ok() {
                deleted += 1;
                continue;
            }
            if self.repo.delete_project_fact(*id).await.is_ok() {
                deleted += 1;
                continue;
            }
            warn!(id = %id, "Extractor deletion target not found");
        }

        info!(
            user_memory_added = user_added,
            project_facts_added = facts_added,
            episodic_added = episodic_added,
            deleted,
            "Memory observation completed"
        );

        Ok(ObserveOutcome {
            user_memory_added: user_added,
            project_facts_added: facts_added,
            episodic_added,
            deleted,
        })
    }

    /// Embed and store extractor additions. One batched embedding call
    /// covers every candidate; per-record storage failures are isolated.
    async fn apply_additions(
        &self,
        request: &ObserveRequest,
        additions: MemoryAdditions,
    ) -> Result<(usize, usize, usize)> {
        let texts: Vec<String> = additions
            .user_memory
            .iter()
            .map(|input| input.text.clone())
            .chain(additions.project_facts.iter().map(|input| input.text.clone()))
            .chain(additions.episodic.iter().map(|input| input.text.clone()))
            .collect();

        if texts.is_empty() {
            return Ok((0, 0, 0));
        }

        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(Error::Internal(
                "embedding count does not match candidate count".to_string(),
            ));
        }
        debug!(texts_embedded = texts.len(), "Batch embedding completed");

        let mut vectors = embeddings.into_iter();
        let mut user_added = 0;
        let mut facts_added = 0;
        let mut episodic_added = 0;

        for input in additions.user_memory {
            let Some(embedding) = vectors.next() else { break };
            let item = UserMemoryItem::new(
                &request.user_id,
                input.scope,
                &input.key,
                &input.text,
                input.importance.score(),
            )
            .with_id(input.id.unwrap_or_else(Uuid::new_v4))
            .with_embedding(embedding);

            match self.repo.upsert_user_memory_item(&item).await {
                Ok(_) => user_added += 1,
                Err(e) => error!("Failed to store user memory item: {}", e),
            }
        }

        for input in additions.project_facts {
            let Some(embedding) = vectors.next() else { break };
            let Some(project_id) = request.project_id.as_deref() else {
                warn!("Dropping project fact candidate without a project id");
                continue;
            };
            let fact = ProjectFact::new(
                project_id,
                input.kind,
                &input.title,
                &input.text,
                input.confidence,
            )
            .with_id(input.id.unwrap_or_else(Uuid::new_v4))
            .with_source_conversation(&request.conversation_id)
            .with_embedding(embedding);

            match self.repo.upsert_project_fact(&fact).await {
                Ok(_) => facts_added += 1,
                Err(e) => error!("Failed to store project fact: {}", e),
            }
        }

        let occurred_at = request
            .messages
            .last()
            .and_then(|message| message.created_at)
            .unwrap_or_else(Utc::now);

        for input in additions.episodic {
            let Some(embedding) = vectors.next() else { break };
            let mut event = EpisodicEvent::new(
                &request.user_id,
                &request.conversation_id,
                occurred_at,
                &input.text,
                input.kind,
            )
            .with_embedding(embedding);
            if let Some(project_id) = &request.project_id {
                event = event.with_project(project_id);
            }

            match self.repo.create_episodic_event(&event).await {
                Ok(()) => episodic_added += 1,
                Err(e) => error!("Failed to store episodic event: {}", e),
            }
        }

        Ok((user_added, facts_added, episodic_added))
    }

    /// Upsert user memory items, embedding all texts in one call.
    /// Returns the ids actually written.
    pub async fn upsert_user_memories(
        &self,
        request: UserMemoryUpsertRequest,
    ) -> Result<Vec<Uuid>> {
        if request.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id is required".to_string()));
        }
        if request.items.is_empty() {
            return Err(Error::InvalidInput("items must not be empty".to_string()));
        }

        let texts: Vec<String> = request.items.iter().map(|item| item.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        info!(
            user_id = %request.user_id,
            item_count = request.items.len(),
            "Upserting user memories"
        );

        let mut ids = Vec::with_capacity(request.items.len());
        for (input, embedding) in request.items.into_iter().zip(embeddings) {
            let item = UserMemoryItem::new(
                &request.user_id,
                input.scope,
                &input.key,
                &input.text,
                input.importance.score(),
            )
            .with_id(input.id.unwrap_or_else(Uuid::new_v4))
            .with_embedding(embedding);

            match self.repo.upsert_user_memory_item(&item).await {
                Ok(id) => ids.push(id),
                Err(e) => error!("Failed to upsert user memory item: {}", e),
            }
        }

        info!(
            user_id = %request.user_id,
            upserted_count = ids.len(),
            "User memories upserted"
        );

        Ok(ids)
    }

    /// Upsert project facts, embedding all texts in one call.
    /// Returns the ids actually written.
    pub async fn upsert_project_facts(
        &self,
        request: ProjectFactUpsertRequest,
    ) -> Result<Vec<Uuid>> {
        if request.project_id.trim().is_empty() {
            return Err(Error::InvalidInput("project_id is required".to_string()));
        }
        if request.facts.is_empty() {
            return Err(Error::InvalidInput("facts must not be empty".to_string()));
        }

        let texts: Vec<String> = request.facts.iter().map(|fact| fact.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        info!(
            project_id = %request.project_id,
            fact_count = request.facts.len(),
            "Upserting project facts"
        );

        let mut ids = Vec::with_capacity(request.facts.len());
        for (input, embedding) in request.facts.into_iter().zip(embeddings) {
            let mut fact = ProjectFact::new(
                &request.project_id,
                input.kind,
                &input.title,
                &input.text,
                input.confidence,
            )
            .with_id(input.id.unwrap_or_else(Uuid::new_v4))
            .with_embedding(embedding);
            if let Some(conversation_id) = &request.source_conversation_id {
                fact = fact.with_source_conversation(conversation_id);
            }

            match self.repo.upsert_project_fact(&fact).await {
                Ok(id) => ids.push(id),
                Err(e) => error!("Failed to upsert project fact: {}", e),
            }
        }

        info!(
            project_id = %request.project_id,
            upserted_count = ids.len(),
            "Project facts upserted"
        );

        Ok(ids)
    }

    /// Soft-delete memories by id, trying user memory, then project facts,
    /// then episodic events, stopping at the first success per id. An id
    /// matching nothing is counted as not deleted without failing the call.
    pub async fn delete_memories(&self, request: DeleteRequest) -> Result<usize> {
        if request.ids.is_empty() {
            return Err(Error::InvalidInput("ids must not be empty".to_string()));
        }

        info!(id_count = request.ids.len(), "Deleting memories");

        let mut deleted = 0;
        for id in &request.ids {
            match self.try_delete(*id).await {
                true => deleted += 1,
                false => warn!(id = %id, "Memory id not found in any table"),
            }
        }

        info!(
            deleted_count = deleted,
            requested_count = request.ids.len(),
            "Memories deleted"
        );

        Ok(deleted)
    }

    /// Try each kind in order, stopping at the first success. A storage
    /// failure on one kind is logged and the next kind is still tried.
    async fn try_delete(&self, id: Uuid) -> bool {
        match self.repo.delete_user_memory_item(id).await {
            Ok(()) => return true,
            Err(Error::NotFound(_)) => {}
            Err(e) => error!(id = %id, "User memory delete failed: {}", e),
        }
        match self.repo.delete_project_fact(id).await {
            Ok(()) => return true,
            Err(Error::NotFound(_)) => {}
            Err(e) => error!(id = %id, "Project fact delete failed: {}", e),
        }
        match self.repo.delete_episodic_event(id).await {
            Ok(()) => return true,
            Err(Error::NotFound(_)) => {}
            Err(e) => error!(id = %id, "Episodic event delete failed: {}", e),
        }
        false
    }

    /// Fuse a load response into one list ordered by fused score, for
    /// callers that want a single ranked stream instead of three kinds
    pub fn rank_results(&self, response: &LoadResponse) -> Vec<RankedResult> {
        self.ranker.combine_and_rank(
            response.core_memory.clone(),
            response.semantic_memory.clone(),
            response.episodic_memory.clone(),
        )
    }

    /// Refresh the rolling summary of a conversation when one is due.
    /// Returns the updated summary, or None when no refresh happened.
    pub async fn summarize_conversation(
        &self,
        conversation_id: &str,
        summarizer: &Summarizer,
    ) -> Result<Option<ConversationSummary>> {
        let messages = self.repo.get_conversation_items(conversation_id).await?;
        if messages.is_empty() {
            return Ok(None);
        }

        let previous = self.repo.get_conversation_summary(conversation_id).await?;
        let last_summarized_at = previous
            .as_ref()
            .map(|summary| summary.updated_at)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        if !summarizer.should_summarize(messages.len(), last_summarized_at) {
            return Ok(None);
        }

        let fresh = summarizer.summarize(&messages, previous.as_ref()).await?;
        let merged = summarizer.merge_summaries(previous.as_ref(), conversation_id, fresh);
        self.repo.upsert_conversation_summary(&merged).await?;

        Ok(Some(merged))
    }

    /// Per-kind record counts for a user and optional project
    pub async fn stats(&self, user_id: &str, project_id: Option<&str>) -> Result<MemoryStats> {
        let user_memory_count = self.repo.get_user_memory_items(user_id).await?.len();

        let project_fact_count = match project_id.filter(|p| !p.is_empty()) {
            Some(project_id) => Some(self.repo.get_project_facts(project_id).await?.len()),
            None => None,
        };

        let episodic_event_count = self
            .repo
            .get_episodic_events(user_id, STATS_EPISODIC_LIMIT)
            .await?
            .len();

        Ok(MemoryStats {
            user_memory_count,
            project_fact_count,
            episodic_event_count,
        })
    }

    /// Dump a user's memory for data portability
    pub async fn export(&self, user_id: &str) -> Result<MemoryExport> {
        let user_memory = self.repo.get_user_memory_items(user_id).await?;
        let episodic_events = self
            .repo
            .get_episodic_events(user_id, EXPORT_EPISODIC_LIMIT)
            .await?;

        Ok(MemoryExport {
            user_memory,
            episodic_events,
        })
    }

    /// Render a load response as context for prompt injection
    pub fn format_for_context(&self, response: &LoadResponse) -> String {
        let mut output = String::new();

        if !response.core_memory.is_empty() {
            output.push_str("## Core Memory (User Preferences & Context)\n\n");
            for item in &response.core_memory {
                output.push_str(&format!(
                    "- [{}] {} (importance: {}/5, similarity: {:.2})\n",
                    item.scope,
                    item.text,
                    item.importance,
                    item.similarity.unwrap_or(0.0)
                ));
            }
            output.push('\n');
        }

        if !response.semantic_memory.is_empty() {
            output.push_str("## Semantic Memory (Project Facts & Decisions)\n\n");
            for fact in &response.semantic_memory {
                output.push_str(&format!(
                    "- [{}] {}: {} (confidence: {:.2}, similarity: {:.2})\n",
                    fact.kind,
                    fact.title,
                    fact.text,
                    fact.confidence,
                    fact.similarity.unwrap_or(0.0)
                ));
            }
            output.push('\n');
        }

        if !response.episodic_memory.is_empty() {
            output.push_str("## Episodic Memory (Recent Interactions)\n\n");
            for event in &response.episodic_memory {
                output.push_str(&format!(
                    "- [{}] {}: {} (similarity: {:.2})\n",
                    event.occurred_at.format("%Y-%m-%d %H:%M"),
                    event.kind,
                    event.text,
                    event.similarity.unwrap_or(0.0)
                ));
            }
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{EventKind, MemoryScope, Role};
    use crate::memory::extractor::HeuristicExtractor;
    use crate::memory::types::{Importance, IncomingMessage, LoadOptions, UserMemoryInput};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Deterministic embedder: a constant unit vector, so any two embedded
    /// texts have cosine similarity 1.0
    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
        }

        async fn embed_single(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }

        async fn validate_server(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockState {
        user_memory: Vec<UserMemoryItem>,
        project_facts: Vec<ProjectFact>,
        episodic_events: Vec<EpisodicEvent>,
        conversation_items: Vec<ConversationItem>,
        summaries: Vec<ConversationSummary>,
    }

    /// In-memory repository with real cosine-similarity search semantics
    #[derive(Default)]
    struct MockRepository {
        state: Mutex<MockState>,
        fail_conversation_log: bool,
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }

    fn sort_by_similarity_desc<T, F: Fn(&T) -> f32>(items: &mut [T], similarity: F) {
        items.sort_by(|a, b| {
            similarity(b)
                .partial_cmp(&similarity(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    #[async_trait]
    impl MemoryRepository for MockRepository {
        async fn get_user_memory_items(&self, user_id: &str) -> Result<Vec<UserMemoryItem>> {
            let state = self.state.lock().unwrap();
            let mut items: Vec<_> = state
                .user_memory
                .iter()
                .filter(|i| i.user_id == user_id && !i.is_deleted)
                .cloned()
                .collect();
            items.sort_by(|a, b| b.importance.cmp(&a.importance));
            Ok(items)
        }

        async fn upsert_user_memory_item(&self, item: &UserMemoryItem) -> Result<Uuid> {
            let mut state = self.state.lock().unwrap();
            state.user_memory.retain(|existing| existing.id != item.id);
            state.user_memory.push(item.clone());
            Ok(item.id)
        }

        async fn delete_user_memory_item(&self, id: Uuid) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            match state
                .user_memory
                .iter_mut()
                .find(|i| i.id == id && !i.is_deleted)
            {
                Some(item) => {
                    item.is_deleted = true;
                    Ok(())
                }
                None => Err(Error::NotFound(format!("user memory item {}", id))),
            }
        }

        async fn search_user_memory(
            &self,
            user_id: &str,
            query_embedding: &[f32],
            limit: usize,
            min_similarity: f32,
        ) -> Result<Vec<UserMemoryItem>> {
            let state = self.state.lock().unwrap();
            let mut hits: Vec<_> = state
                .user_memory
                .iter()
                .filter(|i| i.user_id == user_id && !i.is_deleted && i.importance >= 2)
                .filter_map(|i| {
                    let embedding = i.embedding.as_ref()?;
                    let similarity = cosine(embedding, query_embedding);
                    (similarity >= min_similarity).then(|| {
                        let mut hit = i.clone();
                        hit.similarity = Some(similarity);
                        hit
                    })
                })
                .collect();
            sort_by_similarity_desc(&mut hits, |i| i.similarity.unwrap_or(0.0));
            hits.truncate(limit);
            Ok(hits)
        }

        async fn get_project_facts(&self, project_id: &str) -> Result<Vec<ProjectFact>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .project_facts
                .iter()
                .filter(|f| f.project_id == project_id && !f.is_deleted)
                .cloned()
                .collect())
        }

        async fn upsert_project_fact(&self, fact: &ProjectFact) -> Result<Uuid> {
            let mut state = self.state.lock().unwrap();
            state.project_facts.retain(|existing| existing.id != fact.id);
            state.project_facts.push(fact.clone());
            Ok(fact.id)
        }

        async fn delete_project_fact(&self, id: Uuid) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            match state
                .project_facts
                .iter_mut()
                .find(|f| f.id == id && !f.is_deleted)
            {
                Some(fact) => {
                    fact.is_deleted = true;
                    Ok(())
                }
                None => Err(Error::NotFound(format!("project fact {}", id))),
            }
        }

        async fn search_project_facts(
            &self,
            project_id: &str,
            query_embedding: &[f32],
            limit: usize,
            min_similarity: f32,
        ) -> Result<Vec<ProjectFact>> {
            let state = self.state.lock().unwrap();
            let mut hits: Vec<_> = state
                .project_facts
                .iter()
                .filter(|f| f.project_id == project_id && !f.is_deleted && f.confidence >= 0.7)
                .filter_map(|f| {
                    let embedding = f.embedding.as_ref()?;
                    let similarity = cosine(embedding, query_embedding);
                    (similarity >= min_similarity).then(|| {
                        let mut hit = f.clone();
                        hit.similarity = Some(similarity);
                        hit
                    })
                })
                .collect();
            sort_by_similarity_desc(&mut hits, |f| f.similarity.unwrap_or(0.0));
            hits.truncate(limit);
            Ok(hits)
        }

        async fn get_episodic_events(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<EpisodicEvent>> {
            let state = self.state.lock().unwrap();
            let mut events: Vec<_> = state
                .episodic_events
                .iter()
                .filter(|e| e.user_id == user_id && !e.is_deleted)
                .cloned()
                .collect();
            events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
            events.truncate(limit);
            Ok(events)
        }

        async fn create_episodic_event(&self, event: &EpisodicEvent) -> Result<()> {
            self.state.lock().unwrap().episodic_events.push(event.clone());
            Ok(())
        }

        async fn delete_episodic_event(&self, id: Uuid) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            match state
                .episodic_events
                .iter_mut()
                .find(|e| e.id == id && !e.is_deleted)
            {
                Some(event) => {
                    event.is_deleted = true;
                    Ok(())
                }
                None => Err(Error::NotFound(format!("episodic event {}", id))),
            }
        }

        async fn search_episodic_events(
            &self,
            user_id: &str,
            query_embedding: &[f32],
            limit: usize,
            min_similarity: f32,
        ) -> Result<Vec<EpisodicEvent>> {
            let state = self.state.lock().unwrap();
            let mut hits: Vec<_> = state
                .episodic_events
                .iter()
                .filter(|e| e.user_id == user_id && !e.is_deleted)
                .filter_map(|e| {
                    let embedding = e.embedding.as_ref()?;
                    let similarity = cosine(embedding, query_embedding);
                    (similarity >= min_similarity).then(|| {
                        let mut hit = e.clone();
                        hit.similarity = Some(similarity);
                        hit
                    })
                })
                .collect();
            sort_by_similarity_desc(&mut hits, |e| e.similarity.unwrap_or(0.0));
            hits.truncate(limit);
            Ok(hits)
        }

        async fn create_conversation_item(&self, item: &ConversationItem) -> Result<()> {
            if self.fail_conversation_log {
                return Err(Error::Internal("log write refused".to_string()));
            }
            self.state.lock().unwrap().conversation_items.push(item.clone());
            Ok(())
        }

        async fn get_conversation_items(
            &self,
            conversation_id: &str,
        ) -> Result<Vec<ConversationItem>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .conversation_items
                .iter()
                .filter(|i| i.conversation_id == conversation_id)
                .cloned()
                .collect())
        }

        async fn get_conversation_summary(
            &self,
            conversation_id: &str,
        ) -> Result<Option<ConversationSummary>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .summaries
                .iter()
                .find(|s| s.conversation_id == conversation_id)
                .cloned())
        }

        async fn upsert_conversation_summary(&self, summary: &ConversationSummary) -> Result<Uuid> {
            let mut state = self.state.lock().unwrap();
            state
                .summaries
                .retain(|s| s.conversation_id != summary.conversation_id);
            state.summaries.push(summary.clone());
            Ok(summary.id)
        }
    }

    fn service_with(repo: Arc<MockRepository>) -> MemoryService {
        MemoryService::new(repo, Arc::new(ConstantEmbedder), Arc::new(HeuristicExtractor))
    }

    fn load_request(user_id: &str, query: &str) -> LoadRequest {
        LoadRequest {
            user_id: user_id.to_string(),
            project_id: None,
            conversation_id: None,
            query: query.to_string(),
            options: LoadOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_load_rejects_missing_fields() {
        let service = service_with(Arc::new(MockRepository::default()));

        assert!(matches!(
            service.load(load_request("", "query")).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            service.load(load_request("user", "  ")).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_load_returns_empty_lists_when_nothing_stored() {
        let service = service_with(Arc::new(MockRepository::default()));

        let response = service.load(load_request("u1", "anything")).await.unwrap();
        assert!(response.core_memory.is_empty());
        assert!(response.semantic_memory.is_empty());
        assert!(response.episodic_memory.is_empty());
    }

    #[tokio::test]
    async fn test_load_falls_back_when_similarity_search_is_cold() {
        let repo = Arc::new(MockRepository::default());
        // An item without an embedding is invisible to similarity search
        let item = UserMemoryItem::new("u1", MemoryScope::Core, "role", "Staff engineer", 4);
        repo.upsert_user_memory_item(&item).await.unwrap();

        let service = service_with(repo);
        let response = service.load(load_request("u1", "who am I")).await.unwrap();

        assert_eq!(response.core_memory.len(), 1);
        // Fallback results carry a synthetic similarity for a consistent shape
        assert_eq!(response.core_memory[0].similarity, Some(1.0));
    }

    #[tokio::test]
    async fn test_load_skips_project_facts_without_project_id() {
        let repo = Arc::new(MockRepository::default());
        let fact = ProjectFact::new("p1", crate::database::FactKind::Decision, "t", "x", 0.9)
            .with_embedding(vec![1.0, 0.0, 0.0, 0.0]);
        repo.upsert_project_fact(&fact).await.unwrap();

        let service = service_with(repo);
        let response = service.load(load_request("u1", "decisions")).await.unwrap();
        assert!(response.semantic_memory.is_empty());

        let mut with_project = load_request("u1", "decisions");
        with_project.project_id = Some("p1".to_string());
        let response = service.load(with_project).await.unwrap();
        assert_eq!(response.semantic_memory.len(), 1);
    }

    #[tokio::test]
    async fn test_observe_then_load_surfaces_preference() {
        let repo = Arc::new(MockRepository::default());
        let service = service_with(repo.clone());

        let outcome = service
            .observe(ObserveRequest {
                user_id: "u1".to_string(),
                project_id: None,
                conversation_id: "c1".to_string(),
                messages: vec![IncomingMessage {
                    role: Role::User,
                    content: "I prefer Rust for systems programming".to_string(),
                    tool_calls: None,
                    created_at: None,
                }],
                tool_calls: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.user_memory_added, 1);
        assert_eq!(outcome.episodic_added, 1);

        // Raw turn is in the audit log
        assert_eq!(repo.get_conversation_items("c1").await.unwrap().len(), 1);

        let mut request = load_request("u1", "what language do I like");
        request.options.min_similarity = Some(0.1);
        let response = service.load(request).await.unwrap();

        assert_eq!(response.core_memory.len(), 1);
        assert_eq!(response.core_memory[0].scope, MemoryScope::Preference);
        assert_eq!(
            response.core_memory[0].text,
            "I prefer Rust for systems programming"
        );
    }

    #[tokio::test]
    async fn test_observe_survives_conversation_log_failures() {
        let repo = Arc::new(MockRepository {
            fail_conversation_log: true,
            ..Default::default()
        });
        let service = service_with(repo.clone());

        let outcome = service
            .observe(ObserveRequest {
                user_id: "u1".to_string(),
                project_id: None,
                conversation_id: "c1".to_string(),
                messages: vec![IncomingMessage {
                    role: Role::User,
                    content: "I like terse error messages".to_string(),
                    tool_calls: None,
                    created_at: None,
                }],
                tool_calls: None,
            })
            .await
            .unwrap();

        // Extraction and storage proceeded despite the log failures
        assert_eq!(outcome.user_memory_added, 1);
        assert_eq!(outcome.episodic_added, 1);
    }

    #[tokio::test]
    async fn test_delete_counts_and_double_delete_reports_missing() {
        let repo = Arc::new(MockRepository::default());
        let item = UserMemoryItem::new("u1", MemoryScope::Context, "k", "text", 3);
        let id = repo.upsert_user_memory_item(&item).await.unwrap();

        let service = service_with(repo.clone());

        let deleted = service
            .delete_memories(DeleteRequest { ids: vec![id] })
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        // Deleted items are gone from subsequent reads
        assert!(repo.get_user_memory_items("u1").await.unwrap().is_empty());

        // A second delete finds the id nowhere but does not fail the call
        let deleted = service
            .delete_memories(DeleteRequest { ids: vec![id] })
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_upsert_validates_and_returns_ids() {
        let repo = Arc::new(MockRepository::default());
        let service = service_with(repo.clone());

        let empty = service
            .upsert_user_memories(UserMemoryUpsertRequest {
                user_id: "u1".to_string(),
                items: vec![],
            })
            .await;
        assert!(matches!(empty, Err(Error::InvalidInput(_))));

        let ids = service
            .upsert_user_memories(UserMemoryUpsertRequest {
                user_id: "u1".to_string(),
                items: vec![
                    UserMemoryInput {
                        id: None,
                        scope: MemoryScope::Skill,
                        key: "lang".to_string(),
                        text: "Fluent in Rust".to_string(),
                        importance: Importance::High,
                    },
                    UserMemoryInput {
                        id: None,
                        scope: MemoryScope::Preference,
                        key: "editor".to_string(),
                        text: "Uses helix".to_string(),
                        importance: Importance::Low,
                    },
                ],
            })
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        let stored = repo.get_user_memory_items("u1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].importance, 4); // high first
    }

    #[tokio::test]
    async fn test_stats_and_export() {
        let repo = Arc::new(MockRepository::default());
        let service = service_with(repo.clone());

        service
            .observe(ObserveRequest {
                user_id: "u1".to_string(),
                project_id: Some("p1".to_string()),
                conversation_id: "c1".to_string(),
                messages: vec![IncomingMessage {
                    role: Role::User,
                    content: "Let's use pgvector. I prefer cosine distance.".to_string(),
                    tool_calls: None,
                    created_at: None,
                }],
                tool_calls: None,
            })
            .await
            .unwrap();

        let stats = service.stats("u1", Some("p1")).await.unwrap();
        assert_eq!(stats.user_memory_count, 1);
        assert_eq!(stats.project_fact_count, Some(1));
        assert_eq!(stats.episodic_event_count, 1);

        let export = service.export("u1").await.unwrap();
        assert_eq!(export.user_memory.len(), 1);
        assert_eq!(export.episodic_events.len(), 1);
    }

    #[tokio::test]
    async fn test_rank_results_orders_across_kinds() {
        let repo = Arc::new(MockRepository::default());
        let service = service_with(repo);

        let mut strong = UserMemoryItem::new("u1", MemoryScope::Core, "k", "critical", 5);
        strong.similarity = Some(0.9);
        let mut weak = UserMemoryItem::new("u1", MemoryScope::Context, "k", "minor", 2);
        weak.similarity = Some(0.9);
        let mut event = EpisodicEvent::new("u1", "c1", Utc::now(), "user: hi", crate::database::EventKind::Interaction);
        event.similarity = Some(0.9);

        let ranked = service.rank_results(&LoadResponse {
            core_memory: vec![weak, strong],
            semantic_memory: vec![],
            episodic_memory: vec![event],
        });

        assert_eq!(ranked.len(), 3);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // importance 5 outranks the episodic discount which outranks importance 2
        assert!(matches!(
            &ranked[0].record,
            crate::memory::ranker::RankedRecord::UserMemory(i) if i.importance == 5
        ));
    }

    #[tokio::test]
    async fn test_summarize_conversation_persists_when_due() {
        use crate::memory::summarizer::{LlmClient, LlmOptions, SummarizerConfig};

        struct CannedLlm;

        #[async_trait]
        impl LlmClient for CannedLlm {
            async fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<String> {
                Ok(r#"{"dialogue_summary": "Discussed Rust.", "open_tasks": [], "entities": ["rust"], "decisions": []}"#.to_string())
            }
        }

        let repo = Arc::new(MockRepository::default());
        let service = service_with(repo.clone());
        let summarizer = Summarizer::new(
            SummarizerConfig {
                trigger_every_n: 1,
                ..Default::default()
            },
            Arc::new(CannedLlm),
        );

        // Nothing logged yet: no summary
        let none = service
            .summarize_conversation("c1", &summarizer)
            .await
            .unwrap();
        assert!(none.is_none());

        let item = ConversationItem::new("c1", Role::User, "Rust is great", Utc::now());
        repo.create_conversation_item(&item).await.unwrap();

        let summary = service
            .summarize_conversation("c1", &summarizer)
            .await
            .unwrap()
            .expect("summary should be produced");
        assert_eq!(summary.dialogue_summary, "Discussed Rust.");

        // Persisted for the next pass to fold into
        let stored = repo.get_conversation_summary("c1").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_format_for_context_renders_sections() {
        let repo = Arc::new(MockRepository::default());
        let service = service_with(repo);

        let mut item = UserMemoryItem::new("u1", MemoryScope::Preference, "k", "Likes Rust", 5);
        item.similarity = Some(0.92);
        let event = {
            let mut event = EpisodicEvent::new("u1", "c1", Utc::now(), "user: hi", EventKind::Interaction);
            event.similarity = Some(0.8);
            event
        };

        let rendered = service.format_for_context(&LoadResponse {
            core_memory: vec![item],
            semantic_memory: vec![],
            episodic_memory: vec![event],
        });

        assert!(rendered.contains("## Core Memory"));
        assert!(rendered.contains("Likes Rust"));
        assert!(rendered.contains("## Episodic Memory"));
        assert!(!rendered.contains("## Semantic Memory"));
    }
}
