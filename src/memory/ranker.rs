//! Rank fusion across the three memory kinds
//!
//! Each kind carries its own quality signal (importance, confidence,
//! recency class); fusion multiplies similarity by a per-kind weight so the
//! three result sets become one comparable ordering.

use crate::database::{EpisodicEvent, ProjectFact, UserMemoryItem};
use std::cmp::Ordering;

/// Fixed discount applied to episodic events during fusion
const EPISODIC_WEIGHT: f32 = 0.8;

/// A record from any of the three kinds
#[derive(Debug, Clone)]
pub enum RankedRecord {
    UserMemory(UserMemoryItem),
    ProjectFact(ProjectFact),
    Episodic(EpisodicEvent),
}

/// A record with its fused score
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub record: RankedRecord,
    pub score: f32,
}

/// Fuses and orders results from the three memory kinds
pub struct Ranker;

impl Ranker {
    pub fn new() -> Self {
        Ranker
    }

    /// Score user memory: similarity weighted by normalized importance
    pub fn rank_user_memory(&self, items: Vec<UserMemoryItem>) -> Vec<RankedResult> {
        items
            .into_iter()
            .map(|item| {
                let score = item.similarity.unwrap_or(0.0) * (item.importance as f32 / 5.0);
                RankedResult {
                    record: RankedRecord::UserMemory(item),
                    score,
                }
            })
            .collect()
    }

    /// Score project facts: similarity weighted by extraction confidence
    pub fn rank_project_facts(&self, facts: Vec<ProjectFact>) -> Vec<RankedResult> {
        facts
            .into_iter()
            .map(|fact| {
                let score = fact.similarity.unwrap_or(0.0) * fact.confidence;
                RankedResult {
                    record: RankedRecord::ProjectFact(fact),
                    score,
                }
            })
            .collect()
    }

    /// Score episodic events: similarity with a fixed recency discount
    pub fn rank_episodic_events(&self, events: Vec<EpisodicEvent>) -> Vec<RankedResult> {
        events
            .into_iter()
            .map(|event| {
                let score = event.similarity.unwrap_or(0.0) * EPISODIC_WEIGHT;
                RankedResult {
                    record: RankedRecord::Episodic(event),
                    score,
                }
            })
            .collect()
    }

    /// Combine all three kinds into one list, sorted by fused score descending
    pub fn combine_and_rank(
        &self,
        user_memory: Vec<UserMemoryItem>,
        project_facts: Vec<ProjectFact>,
        episodic_events: Vec<EpisodicEvent>,
    ) -> Vec<RankedResult> {
        let mut results = self.rank_user_memory(user_memory);
        results.extend(self.rank_project_facts(project_facts));
        results.extend(self.rank_episodic_events(episodic_events));

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results
    }

    /// Keep the top k results
    pub fn top_k(&self, mut results: Vec<RankedResult>, k: usize) -> Vec<RankedResult> {
        results.truncate(k);
        results
    }

    /// Split a fused, sorted list back into per-kind lists, preserving order
    pub fn separate_by_type(
        &self,
        results: Vec<RankedResult>,
    ) -> (Vec<UserMemoryItem>, Vec<ProjectFact>, Vec<EpisodicEvent>) {
        let mut user_memory = Vec::new();
        let mut project_facts = Vec::new();
        let mut episodic_events = Vec::new();

        for result in results {
            match result.record {
                RankedRecord::UserMemory(item) => user_memory.push(item),
                RankedRecord::ProjectFact(fact) => project_facts.push(fact),
                RankedRecord::Episodic(event) => episodic_events.push(event),
            }
        }

        (user_memory, project_facts, episodic_events)
    }
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new()
    }
}
