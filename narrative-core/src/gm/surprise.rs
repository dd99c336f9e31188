//! Surprise engine: probabilistic, cooldown-gated narrative twists.

use super::memory::NarrativeMemory;
use crate::narrator::{self, property_path, unit_interval, AgentPersona, NarrativeError, Narrator, Payload};
use crate::world::WorldStore;
use crate::Schema;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

pub const SURPRISE_PERSONA: AgentPersona =
    AgentPersona::new("surprise-engine", include_str!("prompts/surprise_engine.txt"));

pub const DEFAULT_SURPRISE_FREQUENCY: f64 = 0.1;
pub const SURPRISE_FREQUENCY_CEILING: f64 = 0.3;
pub const SURPRISE_COOLDOWN_MS: i64 = 30_000;
/// Frequency gained per unit of surprise intensity.
pub const INTENSITY_FACTOR: f64 = 0.05;

#[derive(Debug, Error)]
pub enum SurpriseError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An unplanned change to the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
#[serde(rename_all = "camelCase")]
pub struct Surprise {
    /// Dot-separated property path the twist changes
    pub path: String,
    /// The value that path takes
    pub value: Value,
    /// From 0 (subtle) to 1 (world-shaking)
    pub intensity: f64,
    /// What happens, in a sentence or two
    pub description: String,
    /// Effects that will play out later
    #[serde(default)]
    #[schema(rename = "longTermEffects", optional)]
    pub long_term_effects: Vec<String>,
}

impl Payload for Surprise {
    fn validate(&self) -> Result<(), String> {
        property_path("path", &self.path)?;
        unit_interval("intensity", self.intensity)
    }
}

/// A subtle hint of something to come.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct ForeshadowingHint {
    /// The hint as it would appear in the story
    pub text: String,
    /// Where it shows up: "dialogue" or "environment"
    pub channel: String,
    /// How hard it is to notice, from 0 (obvious) to 1 (only clear in hindsight)
    pub subtlety: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct Foreshadowing {
    /// Hints to weave into upcoming scenes
    pub hints: Vec<ForeshadowingHint>,
}

impl Payload for Foreshadowing {
    fn validate(&self) -> Result<(), String> {
        self.hints
            .iter()
            .try_for_each(|hint| unit_interval("subtlety", hint.subtlety))
    }
}

/// Observable state of the engine at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurpriseState {
    /// Eligible to roll for a surprise.
    Dormant,
    /// A surprise happened less than one cooldown ago.
    Cooldown,
}

fn default_cooldown() -> i64 {
    SURPRISE_COOLDOWN_MS
}

fn entropy_rng() -> StdRng {
    StdRng::from_entropy()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurpriseEngine {
    frequency: f64,
    #[serde(rename = "lastTime", default)]
    last_surprise_time: Option<i64>,
    #[serde(default = "default_cooldown")]
    cooldown_ms: i64,
    #[serde(skip, default = "entropy_rng")]
    rng: StdRng,
}

impl Default for SurpriseEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SurpriseEngine {
    pub fn new() -> Self {
        Self {
            frequency: DEFAULT_SURPRISE_FREQUENCY,
            last_surprise_time: None,
            cooldown_ms: SURPRISE_COOLDOWN_MS,
            rng: entropy_rng(),
        }
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_cooldown(mut self, cooldown_ms: i64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Reseed after a restore, for reproducible runs.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn last_surprise_time(&self) -> Option<i64> {
        self.last_surprise_time
    }

    pub fn state_at(&self, now: i64) -> SurpriseState {
        match self.last_surprise_time {
            Some(last) if now - last < self.cooldown_ms => SurpriseState::Cooldown,
            _ => SurpriseState::Dormant,
        }
    }

    pub async fn check_for_surprise(
        &mut self,
        narrator: &dyn Narrator,
        world: &dyn WorldStore,
        memory: &NarrativeMemory,
    ) -> Result<Option<Surprise>, NarrativeError> {
        self.check_for_surprise_at(narrator, world, memory, Utc::now().timestamp_millis())
            .await
    }

    /// Roll for a surprise. Returns `None` while cooling down or when the draw
    /// exceeds the current frequency.
    pub async fn check_for_surprise_at(
        &mut self,
        narrator: &dyn Narrator,
        world: &dyn WorldStore,
        memory: &NarrativeMemory,
        now: i64,
    ) -> Result<Option<Surprise>, NarrativeError> {
        if self.state_at(now) == SurpriseState::Cooldown {
            return Ok(None);
        }
        let draw: f64 = self.rng.gen();
        if draw > self.frequency {
            debug!(draw, frequency = self.frequency, "No surprise this time");
            return Ok(None);
        }

        let properties = world.get_property("properties").cloned().unwrap_or(Value::Null);
        let recent = serde_json::to_string(&memory.recent_events(5)).unwrap_or_default();
        let prompt = format!(
            "Suggest a surprising narrative twist based on:\n\
             Current World State: {properties}\n\
             Recent Events: {recent}\n\n\
             Requirements:\n\
             - Should be unexpected but logically follow from recent events\n\
             - Should create new narrative opportunities\n\
             - Should not completely invalidate player choices\n\
             - Intensity should match current story pace\n\
             - Include both immediate and long-term effects"
        );

        let surprise: Surprise = narrator::request(narrator, &SURPRISE_PERSONA, prompt).await?;
        self.last_surprise_time = Some(now);
        self.adjust_frequency(surprise.intensity);
        info!(path = %surprise.path, intensity = surprise.intensity, "Surprise injected");
        Ok(Some(surprise))
    }

    /// Intense surprises make later ones more likely, up to the ceiling.
    /// The frequency never decreases.
    fn adjust_frequency(&mut self, intensity: f64) {
        let raised = (self.frequency + intensity * INTENSITY_FACTOR).min(SURPRISE_FREQUENCY_CEILING);
        self.frequency = raised.max(self.frequency);
    }

    /// Hints for upcoming surprises from the last ten events. Not cached.
    pub async fn generate_foreshadowing(
        &self,
        narrator: &dyn Narrator,
        memory: &NarrativeMemory,
    ) -> Result<Foreshadowing, NarrativeError> {
        let history = serde_json::to_string(&memory.recent_events(10)).unwrap_or_default();
        let prompt = format!(
            "Generate subtle foreshadowing hints for upcoming surprises based on:\n\
             Narrative History: {history}\n\n\
             Requirements:\n\
             - Should be subtle and only recognizable in hindsight\n\
             - Should appear in dialogue or environmental details\n\
             - Should not reveal the exact nature of future events"
        );
        narrator::request(narrator, &SURPRISE_PERSONA, prompt).await
    }

    pub fn to_json(&self) -> Result<String, SurpriseError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SurpriseError> {
        Ok(serde_json::from_str(json)?)
    }
}
