//! Content creators: characters, world events and dialogue.

use crate::narrator::{self, property_path, unit_interval, AgentPersona, NarrativeError, Narrator, Payload};
use crate::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHARACTER_PERSONA: AgentPersona =
    AgentPersona::new("character-creator", include_str!("prompts/character_creator.txt"));
pub const EVENT_PERSONA: AgentPersona =
    AgentPersona::new("event-generator", include_str!("prompts/event_generator.txt"));
pub const DIALOGUE_PERSONA: AgentPersona =
    AgentPersona::new("dialogue-creator", include_str!("prompts/dialogue_creator.txt"));

/// A character living in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
#[serde(rename_all = "camelCase")]
#[schema(name = "character")]
pub struct CharacterProfile {
    /// Short unique identifier
    pub id: String,
    pub name: String,
    /// Narrative role, e.g. "Hero", "Villain" or "Merchant"
    pub role: String,
    /// A few sentences on who they are
    pub description: String,
    /// Defining personality traits
    #[serde(default)]
    #[schema(optional)]
    pub traits: Vec<String>,
    /// What drives them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motivation: Option<String>,
    /// Where they come from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstory: Option<String>,
    /// Sway over the world, from 0 to 1
    pub influence: f64,
}

impl Payload for CharacterProfile {
    fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("character id must not be empty".to_string());
        }
        unit_interval("influence", self.influence)
    }
}

#[derive(Debug, Clone, Deserialize, Schema)]
#[schema(name = "character_group")]
pub struct CharacterGroup {
    /// Distinct characters that exist together
    pub characters: Vec<CharacterProfile>,
}

impl Payload for CharacterGroup {
    fn validate(&self) -> Result<(), String> {
        if self.characters.is_empty() {
            return Err("character group is empty".to_string());
        }
        self.characters.iter().try_for_each(Payload::validate)
    }
}

/// Something that happens and changes one world property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
#[schema(name = "event")]
pub struct WorldEvent {
    /// Short title
    pub name: String,
    /// What happens
    pub description: String,
    /// Dot-separated property path the event changes
    pub path: String,
    /// The value that path takes
    pub value: Value,
    /// How much the event matters, from 0 to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<f64>,
}

impl Payload for WorldEvent {
    fn validate(&self) -> Result<(), String> {
        property_path("path", &self.path)?;
        match self.impact {
            Some(impact) => unit_interval("impact", impact),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Schema)]
#[schema(name = "event_chain")]
pub struct EventChain {
    /// Connected events in the order they happen
    pub events: Vec<WorldEvent>,
}

impl Payload for EventChain {
    fn validate(&self) -> Result<(), String> {
        if self.events.is_empty() {
            return Err("event chain is empty".to_string());
        }
        self.events.iter().try_for_each(Payload::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct DialogueLine {
    /// Name of the character speaking
    pub speaker: String,
    pub text: String,
    /// Tone of delivery, e.g. "angry" or "wistful"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

/// A single conversation scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
pub struct Dialogue {
    /// Where and when the scene takes place
    pub setting: String,
    /// Names of everyone who speaks
    pub participants: Vec<String>,
    pub lines: Vec<DialogueLine>,
}

impl Payload for Dialogue {
    fn validate(&self) -> Result<(), String> {
        if self.lines.is_empty() {
            return Err("dialogue has no lines".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Schema)]
#[schema(name = "dialogue_scenes")]
pub struct DialogueScenes {
    /// Connected scenes forming one conversation arc
    pub scenes: Vec<Dialogue>,
}

impl Payload for DialogueScenes {
    fn validate(&self) -> Result<(), String> {
        if self.scenes.is_empty() {
            return Err("no dialogue scenes".to_string());
        }
        self.scenes.iter().try_for_each(Payload::validate)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterCreator;

impl CharacterCreator {
    pub async fn create_character(
        &self,
        narrator: &dyn Narrator,
        prompt: &str,
    ) -> Result<CharacterProfile, NarrativeError> {
        narrator::request(narrator, &CHARACTER_PERSONA, prompt).await
    }

    pub async fn create_character_group(
        &self,
        narrator: &dyn Narrator,
        prompt: &str,
        count: usize,
    ) -> Result<Vec<CharacterProfile>, NarrativeError> {
        let prompt = format!(
            "{prompt}\n\nGenerate {count} distinct characters that would exist together in this context."
        );
        let group: CharacterGroup = narrator::request(narrator, &CHARACTER_PERSONA, prompt).await?;
        Ok(group.characters)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventGenerator;

impl EventGenerator {
    pub async fn generate_event(
        &self,
        narrator: &dyn Narrator,
        prompt: &str,
    ) -> Result<WorldEvent, NarrativeError> {
        narrator::request(narrator, &EVENT_PERSONA, prompt).await
    }

    pub async fn generate_event_chain(
        &self,
        narrator: &dyn Narrator,
        prompt: &str,
        count: usize,
    ) -> Result<Vec<WorldEvent>, NarrativeError> {
        let prompt = format!("{prompt}\n\nGenerate {count} connected events that form a coherent sequence.");
        let chain: EventChain = narrator::request(narrator, &EVENT_PERSONA, prompt).await?;
        Ok(chain.events)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DialogueCreator;

impl DialogueCreator {
    pub async fn create_dialogue(
        &self,
        narrator: &dyn Narrator,
        prompt: &str,
    ) -> Result<Dialogue, NarrativeError> {
        narrator::request(narrator, &DIALOGUE_PERSONA, prompt).await
    }

    pub async fn create_multi_scene_dialogue(
        &self,
        narrator: &dyn Narrator,
        prompt: &str,
        scenes: usize,
    ) -> Result<Vec<Dialogue>, NarrativeError> {
        let prompt = format!(
            "{prompt}\n\nCreate {scenes} connected dialogue scenes that form a coherent conversation arc."
        );
        let result: DialogueScenes = narrator::request(narrator, &DIALOGUE_PERSONA, prompt).await?;
        Ok(result.scenes)
    }
}
