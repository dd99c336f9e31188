//! Consequence generation with memoization.

use super::analyzer::PlayerImpact;
use super::memory::{NarrativeEvent, NarrativeMemory};
use crate::narrator::{self, property_path, unit_interval, AgentPersona, NarrativeError, Narrator, Payload};
use crate::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

pub const CONSEQUENCE_PERSONA: AgentPersona =
    AgentPersona::new("consequence-engine", include_str!("prompts/consequence_engine.txt"));

/// Events considered for long-term analysis.
const LONG_TERM_WINDOW: usize = 10;

#[derive(Debug, Error)]
pub enum ConsequenceError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A follow-up change to the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct Consequence {
    /// Dot-separated property path to change, e.g. "properties.magic_level"
    pub path: String,
    /// The value that path should take
    pub value: Value,
    /// Why this happens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Consequences of a single event.
#[derive(Debug, Clone, Deserialize, Schema)]
#[schema(name = "consequence_set")]
pub struct ConsequenceSet {
    /// Follow-up changes, in the order they should be applied
    pub consequences: Vec<Consequence>,
}

impl Payload for ConsequenceSet {
    fn validate(&self) -> Result<(), String> {
        self.consequences
            .iter()
            .try_for_each(|c| property_path("consequence path", &c.path))
    }
}

/// A slower trend suggested by the narrative so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct LongTermConsequence {
    /// What will eventually happen
    pub description: String,
    /// How likely it is, from 0 to 1
    pub likelihood: f64,
    /// Rough horizon, e.g. "weeks" or "a generation"
    pub timeframe: String,
    /// World property paths this will touch
    #[serde(default)]
    #[schema(optional)]
    pub affected_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Schema)]
#[schema(name = "long_term_consequences")]
pub struct LongTermConsequences {
    /// Long-term developments
    pub consequences: Vec<LongTermConsequence>,
}

impl Payload for LongTermConsequences {
    fn validate(&self) -> Result<(), String> {
        self.consequences
            .iter()
            .try_for_each(|c| unit_interval("likelihood", c.likelihood))
    }
}

/// Serialized form: cache entries sorted by key.
#[derive(Serialize, Deserialize)]
struct CacheDocument {
    cache: Vec<(String, Vec<Consequence>)>,
}

impl From<ConsequenceEngine> for CacheDocument {
    fn from(engine: ConsequenceEngine) -> Self {
        let mut cache: Vec<(String, Vec<Consequence>)> = engine.cache.into_iter().collect();
        cache.sort_by(|a, b| a.0.cmp(&b.0));
        Self { cache }
    }
}

impl From<CacheDocument> for ConsequenceEngine {
    fn from(document: CacheDocument) -> Self {
        Self {
            cache: document.cache.into_iter().collect(),
        }
    }
}

/// Maps (event, player profile) to follow-up changes, caching every answer.
///
/// The cache is never invalidated on its own; [`clear_cache`](Self::clear_cache)
/// is the only way to evict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "CacheDocument", from = "CacheDocument")]
pub struct ConsequenceEngine {
    cache: HashMap<String, Vec<Consequence>>,
}

impl ConsequenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic key from the event kind, the full event and the play style.
    pub fn cache_key(event: &NarrativeEvent, impact: &PlayerImpact) -> String {
        let body = serde_json::to_string(event).unwrap_or_default();
        format!("{}-{}-{}", event.label(), body, impact.play_style)
    }

    pub async fn generate_consequences(
        &mut self,
        narrator: &dyn Narrator,
        event: &NarrativeEvent,
        impact: &PlayerImpact,
    ) -> Result<Vec<Consequence>, NarrativeError> {
        let key = Self::cache_key(event, impact);
        if let Some(cached) = self.cache.get(&key) {
            debug!(event = event.label(), "Consequence cache hit");
            return Ok(cached.clone());
        }
        debug!(event = event.label(), "Consequence cache miss");

        let prompt = build_prompt(event, impact);
        let set: ConsequenceSet = narrator::request(narrator, &CONSEQUENCE_PERSONA, prompt).await?;
        self.cache.insert(key, set.consequences.clone());
        Ok(set.consequences)
    }

    /// One-shot analysis of the last ten remembered events. Not cached.
    pub async fn generate_long_term_consequences(
        &self,
        narrator: &dyn Narrator,
        memory: &NarrativeMemory,
    ) -> Result<Vec<LongTermConsequence>, NarrativeError> {
        let history = serde_json::to_string(&memory.recent_events(LONG_TERM_WINDOW)).unwrap_or_default();
        let prompt = format!(
            "Analyze this narrative history and suggest long-term consequences:\n{history}\n\n\
             Consider:\n\
             - Character relationship developments\n\
             - World state trends\n\
             - Player behavior patterns"
        );
        let result: LongTermConsequences = narrator::request(narrator, &CONSEQUENCE_PERSONA, prompt).await?;
        Ok(result.consequences)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn to_json(&self) -> Result<String, ConsequenceError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ConsequenceError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn build_prompt(event: &NarrativeEvent, impact: &PlayerImpact) -> String {
    let details = serde_json::to_string(event).unwrap_or_default();
    let preferences = serde_json::to_string(&impact.content_preferences).unwrap_or_default();
    format!(
        "Generate consequences for this event:\n\
         Type: {}\n\
         Details: {details}\n\n\
         Player Profile:\n\
         Style: {}\n\
         Risk Tolerance: {}\n\
         Content Preferences: {preferences}\n\n\
         Consider:\n\
         - Logical cause-and-effect relationships\n\
         - Player's preferred content types\n\
         - Maintaining narrative coherence\n\
         - Gradual world evolution",
        event.label(),
        impact.play_style,
        impact.risk_tolerance,
    )
}
