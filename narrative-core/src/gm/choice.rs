//! Player choice generation and preference ranking.

use super::analyzer::{PlayStyle, PlayerAnalyzer, PlayerImpact};
use super::memory::NarrativeMemory;
use crate::narrator::{self, unit_interval, AgentPersona, NarrativeError, Narrator, Payload};
use crate::world::{Timeline, WorldStore};
use crate::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::ops::RangeInclusive;

pub const CHOICE_PERSONA: AgentPersona =
    AgentPersona::new("choice-generator", include_str!("prompts/choice_generator.txt"));

/// How many candidates a generated set must contain.
pub const CHOICE_COUNT: RangeInclusive<usize> = 3..=5;

/// An option offered to the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    /// What the player reads
    pub text: String,
    /// Short action name, e.g. "attack" or "wait"
    pub action: String,
    /// Play style this option suits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<PlayStyle>,
    /// Kind of content it leads to, e.g. "combat" or "mystery"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(rename = "contentType")]
    pub content_type: Option<String>,
    /// From 0 (safe) to 1 (reckless)
    #[schema(rename = "riskLevel")]
    pub risk_level: f64,
    /// Likely outcomes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schema(optional)]
    pub consequences: Vec<String>,
}

impl Choice {
    pub fn new(text: impl Into<String>, action: impl Into<String>, risk_level: f64) -> Self {
        Self {
            text: text.into(),
            action: action.into(),
            style: None,
            content_type: None,
            risk_level,
            consequences: Vec::new(),
        }
    }

    pub fn with_style(mut self, style: PlayStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, Deserialize, Schema)]
#[schema(name = "choice_set")]
pub struct ChoiceSet {
    /// Between three and five options
    pub choices: Vec<Choice>,
}

impl Payload for ChoiceSet {
    fn validate(&self) -> Result<(), String> {
        if !CHOICE_COUNT.contains(&self.choices.len()) {
            return Err(format!(
                "expected {} to {} choices, got {}",
                CHOICE_COUNT.start(),
                CHOICE_COUNT.end(),
                self.choices.len()
            ));
        }
        self.choices
            .iter()
            .try_for_each(|choice| unit_interval("riskLevel", choice.risk_level))
    }
}

/// A choice together with how well it fits the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChoice {
    #[serde(flatten)]
    pub choice: Choice,
    pub preference_score: f64,
}

/// The situation choices are generated for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceContext {
    pub description: String,
}

impl ChoiceContext {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// A choice that sends the world down a different timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
#[serde(rename_all = "camelCase")]
pub struct BranchingChoice {
    /// What the player reads
    pub text: String,
    /// The timeline this choice leads to
    pub timeline: Timeline,
    /// Immediate effects
    #[schema(rename = "shortTermConsequences")]
    pub short_term_consequences: Vec<String>,
    /// Effects that unfold over time
    #[schema(rename = "longTermConsequences")]
    pub long_term_consequences: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Schema)]
#[schema(name = "branching_choices")]
pub struct BranchingChoices {
    /// One entry per distinct timeline
    pub choices: Vec<BranchingChoice>,
}

impl Payload for BranchingChoices {
    fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for choice in &self.choices {
            if !seen.insert(choice.timeline.as_str()) {
                return Err(format!("timeline '{}' offered more than once", choice.timeline));
            }
        }
        Ok(())
    }
}

/// Score every choice against the profile and sort best first.
///
/// +2 for a matching style, plus the content preference score, plus 1 when
/// the risk level matches a clearly bold or clearly cautious player. Ties keep
/// their original order.
pub fn apply_player_preferences(choices: Vec<Choice>, impact: &PlayerImpact) -> Vec<ScoredChoice> {
    let mut scored: Vec<ScoredChoice> = choices
        .into_iter()
        .map(|choice| {
            let mut score = 0.0;
            if choice.style == Some(impact.play_style) {
                score += 2.0;
            }
            if let Some(preference) = choice
                .content_type
                .as_ref()
                .and_then(|content| impact.content_preferences.get(content))
            {
                score += preference;
            }
            let bold = impact.risk_tolerance > 0.7 && choice.risk_level > 0.7;
            let cautious = impact.risk_tolerance < 0.3 && choice.risk_level < 0.3;
            if bold || cautious {
                score += 1.0;
            }
            ScoredChoice {
                choice,
                preference_score: score,
            }
        })
        .collect();
    scored.sort_by(|a, b| b.preference_score.total_cmp(&a.preference_score));
    scored
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChoiceGenerator;

impl ChoiceGenerator {
    pub fn new() -> Self {
        Self
    }

    pub async fn generate_choices(
        &self,
        narrator: &dyn Narrator,
        context: &ChoiceContext,
        memory: &NarrativeMemory,
        analyzer: &PlayerAnalyzer,
    ) -> Result<Vec<ScoredChoice>, NarrativeError> {
        let impact = analyzer.current_impact();
        let recent = serde_json::to_string(&memory.recent_events(3)).unwrap_or_default();
        let preferences = serde_json::to_string(&impact.content_preferences).unwrap_or_default();
        let prompt = format!(
            "Generate 3-5 choices for this context:\n\
             Current Situation: {}\n\
             Recent Events: {recent}\n\n\
             Player Preferences:\n\
             Style: {}\n\
             Risk Tolerance: {}\n\
             Content Types: {preferences}\n\n\
             Requirements:\n\
             - Each choice should have clear consequences\n\
             - Include at least one high-risk/high-reward option\n\
             - One choice should align with player's preferred style\n\
             - Choices should follow from recent events\n\
             - Vary the apparent difficulty levels",
            context.description, impact.play_style, impact.risk_tolerance,
        );

        let set: ChoiceSet = narrator::request(narrator, &CHOICE_PERSONA, prompt).await?;
        Ok(apply_player_preferences(set.choices, &impact))
    }

    /// Choices that each lead to a different timeline.
    pub async fn generate_branching_choices(
        &self,
        narrator: &dyn Narrator,
        world: &dyn WorldStore,
        memory: &NarrativeMemory,
    ) -> Result<Vec<BranchingChoice>, NarrativeError> {
        let timeline = world.get_property("timeline").cloned().unwrap_or(Value::Null);
        let properties = world.get_property("properties").cloned().unwrap_or(Value::Null);
        let history = serde_json::to_string(&memory.timeline_history()).unwrap_or_default();
        let prompt = format!(
            "Generate timeline branching choices based on:\n\
             Current Timeline: {timeline}\n\
             World Properties: {properties}\n\
             Narrative History: {history}\n\n\
             Requirements:\n\
             - Each choice should lead to a distinct timeline\n\
             - Include short-term and long-term consequences\n\
             - Make the differences between timelines meaningful"
        );
        let result: BranchingChoices = narrator::request(narrator, &CHOICE_PERSONA, prompt).await?;
        Ok(result.choices)
    }
}
